//! End-to-end tests of the multi-file variable facade.

use wasp::{DType, Wasp};

fn field(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| (i as f64 * 0.21).sin() * 50.0 + (i as f64 * 0.017).cos() * 7.0)
        .collect()
}

#[test]
fn test_lossless_roundtrip_2d() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 2, 1).unwrap();
    w.def_dim("y", 48).unwrap();
    w.def_dim("x", 64).unwrap();
    w.def_var(
        "temperature",
        DType::Double,
        &["y", "x"],
        "bior4.4",
        &[16, 16],
        &[1],
        None,
    )
    .unwrap();

    let data = field(48 * 64);
    w.open_var_write("temperature", -1).unwrap();
    w.put_var(&data, None).unwrap();
    w.close().unwrap();

    let mut w = Wasp::open(&path, false).unwrap();
    assert!(w.inq_var_compressed("temperature").unwrap());
    w.open_var_read("temperature", -1, -1).unwrap();
    let mut back = vec![0.0f64; 48 * 64];
    w.get_var(&mut back).unwrap();
    for (a, b) in data.iter().zip(&back) {
        assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
    }
}

#[test]
fn test_lossy_ladder_and_levels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 4, 1).unwrap();
    w.def_dim("y", 64).unwrap();
    w.def_dim("x", 64).unwrap();
    w.def_var(
        "vx",
        DType::Double,
        &["y", "x"],
        "bior4.4",
        &[64, 64],
        &[64, 8, 1],
        None,
    )
    .unwrap();
    assert_eq!(w.inq_var_num_ref_levels("vx").unwrap(), 4);

    let data = field(64 * 64);
    w.open_var_write("vx", -1).unwrap();
    w.put_var(&data, None).unwrap();

    // Coarser ladder depths give larger error, full depth is lossless.
    let mut errs = Vec::new();
    for lod in [0i32, 1, 2] {
        w.open_var_read("vx", -1, lod).unwrap();
        let mut back = vec![0.0f64; 64 * 64];
        w.get_var(&mut back).unwrap();
        let err: f64 = data
            .iter()
            .zip(&back)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        errs.push(err);
    }
    assert!(errs[2] < 1e-7, "full ladder err {}", errs[2]);
    assert!(errs[1] <= errs[0]);

    // A coarse refinement level has the coarsened shape.
    w.open_var_read("vx", 1, -1).unwrap();
    let dims = w.inq_var_dimlens("vx", 1).unwrap();
    assert_eq!(dims, vec![16, 16]);
    let mut coarse = vec![0.0f64; 16 * 16];
    w.get_var(&mut coarse).unwrap();
    assert!(coarse.iter().any(|&v| v != 0.0));
    w.close().unwrap();
}

#[test]
fn test_boundary_flush_put_and_residual_dims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 100).unwrap();
    w.def_var("f", DType::Double, &["x"], "bior1.1", &[64], &[1], None)
        .unwrap();

    let data = field(100);
    w.open_var_write("f", -1).unwrap();
    // Count is not a whole block but runs flush to the boundary.
    w.put_vara(&[0], &[100], &data, None).unwrap();

    w.open_var_read("f", -1, -1).unwrap();
    let mut back = vec![0.0f64; 100];
    w.get_var(&mut back).unwrap();
    for (a, b) in data.iter().zip(&back) {
        assert!((a - b).abs() < 1e-8);
    }

    // An interior region read.
    let mut mid = vec![0.0f64; 30];
    w.get_vara(&[50], &[30], &mut mid).unwrap();
    assert_eq!(&mid[..], &back[50..80]);
    w.close().unwrap();
}

#[test]
fn test_uncompressed_blocked_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 10).unwrap();
    // Empty wavelet name: blocked storage with no transform.
    w.def_var("f", DType::Float, &["x"], "", &[4], &[1], None)
        .unwrap();
    assert!(!w.inq_var_compressed("f").unwrap());
    assert_eq!(w.inq_var_num_ref_levels("f").unwrap(), 1);
    let (wname, bs, cratios) = w.inq_var_compression_params("f").unwrap();
    assert_eq!(wname, None);
    assert_eq!(bs, vec![4]);
    assert_eq!(cratios, vec![1]);

    let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
    w.open_var_write("f", -1).unwrap();
    // One whole block, then a residual run flush to the boundary.
    w.put_vara(&[0], &[4], &data[..4], None).unwrap();
    w.put_vara(&[4], &[6], &data[4..], None).unwrap();

    w.open_var_read("f", -1, -1).unwrap();
    let mut back = vec![0.0f32; 10];
    w.get_var(&mut back).unwrap();
    assert_eq!(back, data);

    // Interior unaligned region read.
    let mut mid = vec![0.0f32; 5];
    w.get_vara(&[3], &[5], &mut mid).unwrap();
    assert_eq!(mid, &data[3..8]);
    w.close().unwrap();
}

#[test]
fn test_unaligned_put_rejected_compressed_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 128).unwrap();
    w.def_var("c", DType::Float, &["x"], "bior1.1", &[64], &[1], None)
        .unwrap();
    // Block size product of one: plain variable, exempt from alignment.
    w.def_var("p", DType::Float, &["x"], "", &[1], &[1], None)
        .unwrap();
    assert!(!w.inq_var_compressed("p").unwrap());

    let data = vec![1.0f32; 32];
    w.open_var_write("c", -1).unwrap();
    assert!(w.put_vara(&[32], &[32], &data, None).is_err());

    w.open_var_write("p", -1).unwrap();
    w.put_vara(&[3], &[32], &data, None).unwrap();
    w.open_var_read("p", -1, -1).unwrap();
    let mut back = vec![0.0f32; 32];
    w.get_vara(&[3], &[32], &mut back).unwrap();
    assert_eq!(back, data);
    w.close().unwrap();
}

#[test]
fn test_level_and_lod_clamping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 64).unwrap();
    w.def_var("f", DType::Double, &["x"], "bior4.4", &[64], &[4, 1], None)
        .unwrap();
    let data = field(64);
    w.open_var_write("f", -1).unwrap();
    w.put_var(&data, None).unwrap();

    // Wildly out-of-range level and lod clamp to the finest / deepest.
    w.open_var_read("f", 99, 99).unwrap();
    let mut back = vec![0.0f64; 64];
    w.get_var(&mut back).unwrap();
    for (a, b) in data.iter().zip(&back) {
        assert!((a - b).abs() < 1e-8);
    }
    w.close().unwrap();
}

#[test]
fn test_masked_write_substitutes_mean() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 4).unwrap();
    w.def_var(
        "m",
        DType::Double,
        &["x"],
        "bior1.1",
        &[4],
        &[1],
        Some(-999.0),
    )
    .unwrap();
    assert_eq!(w.inq_var_missing_value("m").unwrap(), Some(-999.0));

    let data = vec![10.0f64, 20.0, 30.0, -999.0];
    let mask = vec![1u8, 1, 1, 0];
    w.open_var_write("m", -1).unwrap();
    w.put_var(&data, Some(&mask)).unwrap();

    w.open_var_read("m", -1, -1).unwrap();
    let mut back = vec![0.0f64; 4];
    w.get_var(&mut back).unwrap();
    assert!((back[0] - 10.0).abs() < 1e-8);
    assert!((back[3] - 20.0).abs() < 1e-8, "masked sample becomes the mean");
    w.close().unwrap();
}

#[test]
fn test_multifile_layout_and_truncated_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 2, 3).unwrap();
    w.def_dim("x", 64).unwrap();
    w.def_var("f", DType::Double, &["x"], "bior1.1", &[64], &[8, 2, 1], None)
        .unwrap();
    let data = field(64);
    w.open_var_write("f", -1).unwrap();
    w.put_var(&data, None).unwrap();
    w.close().unwrap();

    assert!(path.exists());
    assert!(dir.path().join("v.wasp1").exists());
    assert!(dir.path().join("v.wasp2").exists());

    // Full set: full fidelity.
    let mut w = Wasp::open(&path, false).unwrap();
    w.open_var_read("f", -1, -1).unwrap();
    let mut back = vec![0.0f64; 64];
    w.get_var(&mut back).unwrap();
    for (a, b) in data.iter().zip(&back) {
        assert!((a - b).abs() < 1e-8);
    }
    w.close().unwrap();

    // Drop the last ladder file: a read-only open still works, with the
    // ladder capped at the files present.
    std::fs::remove_file(dir.path().join("v.wasp2")).unwrap();
    let mut w = Wasp::open(&path, false).unwrap();
    w.open_var_read("f", -1, -1).unwrap();
    let mut coarse = vec![0.0f64; 64];
    w.get_var(&mut coarse).unwrap();
    assert!(coarse.iter().any(|&v| v != 0.0));
    assert!(Wasp::open(&path, true).is_err());
}

#[test]
fn test_def_var_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 64).unwrap();

    // Unknown wavelet.
    assert!(w
        .def_var("a", DType::Float, &["x"], "db9", &[64], &[1], None)
        .is_err());
    // Duplicate ratios.
    assert!(w
        .def_var("b", DType::Float, &["x"], "bior1.1", &[64], &[4, 4], None)
        .is_err());
    // Ratio beyond what the block supports.
    assert!(w
        .def_var("c", DType::Float, &["x"], "bior1.1", &[64], &[100_000], None)
        .is_err());
    // Undefined dimension.
    assert!(w
        .def_var("d", DType::Float, &["nope"], "bior1.1", &[64], &[1], None)
        .is_err());
    // No blocks to decompose: a wavelet or a ladder cannot be honoured.
    assert!(w
        .def_var("e", DType::Float, &["x"], "bior1.1", &[1], &[1], None)
        .is_err());
    assert!(w
        .def_var("e", DType::Float, &["x"], "", &[1], &[4, 1], None)
        .is_err());
    // A ladder beyond [1] needs a wavelet, blocked or not.
    assert!(w
        .def_var("e", DType::Float, &["x"], "", &[4], &[4, 1], None)
        .is_err());

    let (nlevels, maxcratio) = Wasp::inq_compression_info(&[64], "bior1.1").unwrap();
    assert_eq!(nlevels, 7);
    assert_eq!(maxcratio, 64);
    w.close().unwrap();
}

#[test]
fn test_blocked_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 32).unwrap();
    w.def_var("f", DType::Double, &["x"], "bior1.1", &[16], &[1], None)
        .unwrap();
    let data = field(32);
    w.open_var_write("f", -1).unwrap();
    w.put_var(&data, None).unwrap();

    w.open_var_read("f", -1, -1).unwrap();
    let mut blocked = vec![0.0f64; 32];
    w.get_vara_block(&[0], &[32], &mut blocked).unwrap();
    // With no boundary residue the blocked layout matches the flat one.
    for (a, b) in data.iter().zip(&blocked) {
        assert!((a - b).abs() < 1e-8);
    }
    assert!(w.get_vara_block(&[3], &[16], &mut blocked[..16]).is_err());
    // Out-of-range requests are rejected up front, not deep in the files.
    assert!(w.get_vara_block(&[16], &[32], &mut blocked).is_err());
    w.close().unwrap();
}

#[test]
fn test_attributes_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.wasp");

    let mut w = Wasp::create(&path, 1, 1).unwrap();
    w.def_dim("x", 16).unwrap();
    w.def_var("f", DType::Float, &["x"], "bior1.1", &[16], &[1], None)
        .unwrap();
    w.put_att("f", "units", wasp::AttrValue::Text("m/s".to_string()))
        .unwrap();
    w.put_att("", "title", wasp::AttrValue::Text("test set".to_string()))
        .unwrap();
    w.close().unwrap();

    let w = Wasp::open(&path, false).unwrap();
    assert_eq!(
        w.get_att("f", "units").unwrap().unwrap().as_text(),
        Some("m/s")
    );
    assert_eq!(
        w.get_att("", "title").unwrap().unwrap().as_text(),
        Some("test set")
    );
    let (wname, bs, cratios) = w.inq_var_compression_params("f").unwrap();
    assert_eq!(wname.as_deref(), Some("bior1.1"));
    assert_eq!(bs, vec![16]);
    assert_eq!(cratios, vec![1]);
}
