//! Boundary extension of partially filled block lines.

/// How a line is extended past its last valid sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    /// Mirror about the last sample without repeating it.
    SymH,
    /// Mirror repeating the last sample.
    SymW,
    /// Periodic repetition of the valid samples.
    Per,
    /// Repeat the last valid sample.
    #[default]
    Sp0,
}

impl PadMode {
    /// Parse a mode name; unknown names fall back to constant extension.
    pub fn from_name(name: &str) -> Self {
        match name {
            "symh" => PadMode::SymH,
            "symw" => PadMode::SymW,
            "per" => PadMode::Per,
            _ => PadMode::Sp0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PadMode::SymH => "symh",
            PadMode::SymW => "symw",
            PadMode::Per => "per",
            PadMode::Sp0 => "sp0",
        }
    }
}

/// Extend a strided line in place: samples `[0, l1)` are valid, slots
/// `[l1, l2)` are filled. Sample `k` lives at `line[k * stride]`. `l1 == l2`
/// is a no-op, and a single valid sample is replicated in every mode.
pub fn pad_line(mode: PadMode, line: &mut [f64], l1: usize, l2: usize, stride: usize) {
    debug_assert!(l1 >= 1 && l1 <= l2);
    debug_assert!(l2 == 0 || (l2 - 1) * stride < line.len());
    for j in l1..l2 {
        let src = if l1 == 1 {
            0
        } else {
            match mode {
                PadMode::SymH => {
                    let period = 2 * (l1 - 1);
                    let r = j % period;
                    if r >= l1 {
                        period - r
                    } else {
                        r
                    }
                }
                PadMode::SymW => {
                    let period = 2 * l1;
                    let r = j % period;
                    if r >= l1 {
                        period - 1 - r
                    } else {
                        r
                    }
                }
                PadMode::Per => j % l1,
                PadMode::Sp0 => l1 - 1,
            }
        };
        line[j * stride] = line[src * stride];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(mode: PadMode, valid: &[f64], l2: usize) -> Vec<f64> {
        let mut line = vec![0.0; l2];
        line[..valid.len()].copy_from_slice(valid);
        pad_line(mode, &mut line, valid.len(), l2, 1);
        line
    }

    #[test]
    fn test_modes() {
        let v = [1.0, 2.0, 3.0];
        assert_eq!(pad(PadMode::Sp0, &v, 6), vec![1.0, 2.0, 3.0, 3.0, 3.0, 3.0]);
        assert_eq!(pad(PadMode::Per, &v, 6), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        // Mirror without the edge: 1 2 3 | 2 1 2
        assert_eq!(pad(PadMode::SymH, &v, 6), vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0]);
        // Mirror with the edge: 1 2 3 | 3 2 1
        assert_eq!(pad(PadMode::SymW, &v, 6), vec![1.0, 2.0, 3.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_single_sample_replicates() {
        for mode in [PadMode::SymH, PadMode::SymW, PadMode::Per, PadMode::Sp0] {
            assert_eq!(pad(mode, &[7.0], 4), vec![7.0; 4]);
        }
    }

    #[test]
    fn test_noop_and_stride() {
        let mut line = vec![5.0, 9.0];
        pad_line(PadMode::Sp0, &mut line, 2, 2, 1);
        assert_eq!(line, vec![5.0, 9.0]);

        // Stride-2 access: pad the even slots, leave the odd ones alone.
        let mut line = vec![1.0, -1.0, 2.0, -1.0, 0.0, -1.0, 0.0, -1.0];
        pad_line(PadMode::Sp0, &mut line, 2, 4, 2);
        assert_eq!(line, vec![1.0, -1.0, 2.0, -1.0, 2.0, -1.0, 2.0, -1.0]);
    }

    #[test]
    fn test_from_name_defaults() {
        assert_eq!(PadMode::from_name("symh"), PadMode::SymH);
        assert_eq!(PadMode::from_name("per"), PadMode::Per);
        assert_eq!(PadMode::from_name("whatever"), PadMode::Sp0);
    }
}
