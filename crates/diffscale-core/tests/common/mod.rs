#![allow(dead_code)]

use diffscale_core::common::ScalingOptions;
use diffscale_core::domain::ScalingModelKind;
use diffscale_core::modules::apm::ActiveParameterManager;
use diffscale_core::modules::data_manager::DataManager;
use diffscale_core::reflections::{
    Column, Crystal, Detector, Experiment, ReflectionTable, Scan, SpaceGroup, columns,
};

pub fn experiment() -> Experiment {
    let crystal = Crystal::from_real_space_vectors(
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 2.0],
        SpaceGroup::from_symbol("C 2").expect("space group"),
    )
    .expect("crystal");
    Experiment {
        crystal: Some(crystal),
        scan: Some(Scan {
            image_range: [0, 60],
            oscillation: [0.0, 1.0],
        }),
        detector: Some(Detector {
            image_size: [200, 200],
        }),
    }
}

fn table_from(
    intensity: Vec<f64>,
    variance: Vec<f64>,
    miller: Vec<[i32; 3]>,
    d: Vec<f64>,
    xyz: Vec<[f64; 3]>,
) -> ReflectionTable {
    let n = intensity.len();
    let mut table = ReflectionTable::new();
    let entries = [
        ("intensity.prf.value", Column::Double(intensity)),
        ("intensity.prf.variance", Column::Double(variance)),
        (columns::MILLER_INDEX, Column::Miller(miller)),
        (columns::D, Column::Double(d)),
        (columns::LP, Column::Double(vec![1.0; n])),
        (columns::DQE, Column::Double(vec![1.0; n])),
        (columns::PARTIALITY, Column::Double(vec![1.0; n])),
        (columns::XYZOBS_PX, Column::Vec3(xyz)),
        (
            columns::FLAGS,
            Column::Int(vec![columns::FLAG_INTEGRATED_PRF; n]),
        ),
    ];
    for (name, column) in entries {
        table.insert(name, column).expect("column lengths agree");
    }
    table
}

/// Three observations of two unique reflections.
pub fn small_table() -> ReflectionTable {
    table_from(
        vec![75.0, 10.0, 100.0],
        vec![50.0, 10.0, 100.0],
        vec![[1, 0, 0], [0, 0, 1], [1, 0, 0]],
        vec![2.0, 0.8, 2.0],
        vec![[20.0, 30.0, 0.0], [150.0, 60.0, 5.0], [90.0, 170.0, 10.0]],
    )
}

/// Ten observations of three unique reflections spread over the whole scan.
pub fn large_table() -> ReflectionTable {
    let x = [10.0, 150.0, 40.0, 90.0, 180.0, 60.0, 120.0, 30.0, 170.0, 100.0];
    let y = [20.0, 80.0, 160.0, 40.0, 110.0, 190.0, 70.0, 130.0, 50.0, 150.0];
    let z = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 59.0];
    table_from(
        vec![75.0, 10.0, 100.0, 25.0, 50.0, 100.0, 25.0, 20.0, 300.0, 10.0],
        vec![50.0, 10.0, 100.0, 50.0, 10.0, 100.0, 50.0, 10.0, 100.0, 10.0],
        vec![
            [1, 0, 0],
            [0, 0, 1],
            [1, 0, 0],
            [1, 0, 0],
            [0, 0, 1],
            [1, 0, 0],
            [0, 4, 0],
            [0, 0, 1],
            [1, 0, 0],
            [0, 4, 0],
        ],
        vec![2.0, 0.8, 2.0, 2.0, 0.8, 2.0, 2.0, 0.8, 2.0, 1.0],
        (0..10).map(|i| [x[i], y[i], z[i]]).collect(),
    )
}

pub fn options(model: ScalingModelKind) -> ScalingOptions {
    let mut options = ScalingOptions::for_model(model);
    options.outlier_rejection = false;
    if model == ScalingModelKind::Xds {
        options.binning.n_d_bins = Some(2);
        options.binning.n_z_bins = Some(2);
        options.binning.n_detector_bins = Some(2);
    }
    options
}

/// Data manager with the scaling subset extracted.
pub fn extracted_manager(table: ReflectionTable, options: ScalingOptions) -> DataManager {
    let mut manager = DataManager::new(table, experiment(), options).expect("data manager");
    manager.bin_reflections().expect("binning");
    manager
        .extract_reflections_for_scaling()
        .expect("extraction");
    manager
}

/// Deterministic, non-trivial parameter values for every entry of `apm`.
pub fn perturbed_parameters(apm: &ActiveParameterManager) -> Vec<f64> {
    apm.x()
        .iter()
        .enumerate()
        .map(|(i, x)| x + 0.1 * ((i as f64) * 1.3 + 0.4).sin())
        .collect()
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{what}: expected {expected}, got {actual} (tolerance {tolerance})"
    );
}
