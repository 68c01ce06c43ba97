//! Shared fixtures: synthetic series written through the library's own
//! writer, so every test exercises the real Part-10 round trip.

#![allow(dead_code)]

use dicomdb::{series, Coords, DataBaseDicom, Patient, Series, Study};
use ndarray::ArrayD;

/// Route library logs through the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn mkuid(suffix: &str) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch");
    format!(
        "1.2.826.0.1.3680043.10.1177.{suffix}.{}.{}",
        now.as_secs(),
        now.subsec_nanos()
    )
}

pub fn study(patient_id: &str, patient_name: &str, description: &str) -> Study {
    Study {
        patient: Patient {
            id: patient_id.to_string(),
            name: patient_name.to_string(),
        },
        uid: mkuid("study"),
        description: description.to_string(),
        date: None,
    }
}

/// A series of `n_slices` axial frames, 3 rows by 4 columns, 5 mm apart,
/// with voxel values that encode their own grid position.
pub fn slice_series(db: &mut DataBaseDicom, study: &Study, n_slices: usize) -> Series {
    let rows = 3;
    let cols = 4;
    let locations: Vec<f64> = (0..n_slices).map(|k| 5.0 * k as f64).collect();
    let coords = Coords(vec![("SliceLocation".to_string(), locations)]);
    let array = ArrayD::from_shape_fn(
        ndarray::IxDyn(&[n_slices, rows, cols]),
        |idx| (idx[0] * rows * cols + idx[1] * cols + idx[2]) as f32,
    );
    series::from_array(db, study, "synthetic slices", &array, &coords)
        .expect("create slice series")
}

/// A two-dimensional series: slices crossed with flip angles.
pub fn grid_series(
    db: &mut DataBaseDicom,
    study: &Study,
    locations: &[f64],
    flip_angles: &[f64],
) -> Series {
    let rows = 3;
    let cols = 4;
    let coords = Coords(vec![
        ("SliceLocation".to_string(), locations.to_vec()),
        ("FlipAngle".to_string(), flip_angles.to_vec()),
    ]);
    let shape = [locations.len(), flip_angles.len(), rows, cols];
    let array = ArrayD::from_shape_fn(ndarray::IxDyn(&shape), |idx| {
        (idx[0] * 1000 + idx[1] * 100 + idx[2] * cols + idx[3]) as f32
    });
    series::from_array(db, study, "synthetic grid", &array, &coords)
        .expect("create grid series")
}

pub fn assert_close(a: f32, b: f32, tolerance: f32) {
    assert!(
        (a - b).abs() <= tolerance,
        "expected {b}, got {a} (tolerance {tolerance})"
    );
}
