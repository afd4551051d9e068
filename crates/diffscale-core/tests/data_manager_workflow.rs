mod common;

use common::{
    assert_close, experiment, extracted_manager, large_table, options, perturbed_parameters,
    small_table,
};
use diffscale_core::common::{AbsorptionBinning, RefinementOptions};
use diffscale_core::domain::{
    ComponentKind, Parameterisation, ScalingErrorCategory, ScalingModelKind, ScalingResult,
    ScalingStage,
};
use diffscale_core::modules::data_manager::DataManager;
use diffscale_core::modules::ih_table::IhTable;
use diffscale_core::modules::refinement::{LevenbergMarquardt, RefinementOutcome, run_scaling};
use diffscale_core::modules::{LeastSquaresProblem, LeastSquaresSolver};
use diffscale_core::modules::target::{ScalingTarget, calculate_residuals};
use diffscale_core::reflections::{Detector, columns};
use tempfile::TempDir;

#[test]
fn update_for_minimisation_is_idempotent() {
    let mut manager = extracted_manager(large_table(), options(ScalingModelKind::Physical));
    let mut apm = manager
        .active_parameter_manager(&[ComponentKind::Scale, ComponentKind::Decay])
        .expect("apm");
    let x = perturbed_parameters(&apm);
    apm.set_param_vals(&x).expect("parameters");

    manager.update_for_minimisation(&apm).expect("first update");
    let table = manager.ih_table().expect("ih table");
    let first = (
        table.inverse_scale_factors().to_vec(),
        table.ih_values().to_vec(),
        calculate_residuals(&ScalingTarget, table),
    );

    manager.update_for_minimisation(&apm).expect("second update");
    let table = manager.ih_table().expect("ih table");
    let second = (
        table.inverse_scale_factors().to_vec(),
        table.ih_values().to_vec(),
        calculate_residuals(&ScalingTarget, table),
    );
    assert_eq!(first, second);
    assert_eq!(manager.stage(), ScalingStage::Iterating);
}

#[test]
fn expand_and_clean_restore_the_input_columns() {
    let table = large_table();
    let mut input_keys = table.keys();
    let mut manager =
        DataManager::new(table, experiment(), options(ScalingModelKind::Physical)).expect("manager");
    let report = run_scaling(&mut manager, &LevenbergMarquardt::default()).expect("scaling");
    assert_eq!(manager.stage(), ScalingStage::Expanded);
    assert_eq!(report.n_reflections, 10);
    assert!(report.cycles[0].outcome.final_rmsd <= report.cycles[0].outcome.initial_rmsd);

    let cleaned = manager.clean_reflection_table().expect("clean table");
    input_keys.push(columns::INVERSE_SCALE_FACTOR.to_string());
    input_keys.push(columns::IH_VALUES.to_string());
    input_keys.sort();
    assert_eq!(cleaned.keys(), input_keys);

    let scales = cleaned.doubles(columns::INVERSE_SCALE_FACTOR).expect("scales");
    assert!(scales.iter().all(|g| g.is_finite() && *g > 0.0));
    let ih = cleaned.doubles(columns::IH_VALUES).expect("Ih");
    let indices = cleaned.millers(columns::MILLER_INDEX).expect("indices");
    for row in 1..cleaned.len() {
        if indices[row] == indices[row - 1] {
            assert_eq!(ih[row], ih[row - 1]);
        }
    }
}

#[test]
fn zero_weight_rows_do_not_move_ih() {
    let with_outlier = IhTable::new(
        vec![[1, 0, 0], [1, 0, 0], [1, 0, 0], [2, 0, 0]],
        vec![10.0, 12.0, 5000.0, 7.0],
        vec![1.0, 1.0, 0.0, 0.5],
        1,
    )
    .expect("table");
    let without = IhTable::new(
        vec![[1, 0, 0], [1, 0, 0], [2, 0, 0]],
        vec![10.0, 12.0, 7.0],
        vec![1.0, 1.0, 0.5],
        1,
    )
    .expect("table");
    assert_eq!(with_outlier.ih_values()[0], without.ih_values()[0]);
    assert_eq!(with_outlier.ih_values()[2], 11.0);
    assert_eq!(with_outlier.ih_values()[3], without.ih_values()[2]);
}

#[test]
fn unweighted_reflections_are_excluded_from_scaling_but_scaled_on_expansion() {
    let mut table = large_table();
    let mut variance = table
        .doubles("intensity.prf.variance")
        .expect("variance")
        .to_vec();
    variance[8] = 0.0;
    table
        .set_doubles("intensity.prf.variance", variance)
        .expect("variance");

    let mut manager =
        DataManager::new(table, experiment(), options(ScalingModelKind::Kb)).expect("manager");
    manager.bin_reflections().expect("binning");
    manager.extract_reflections_for_scaling().expect("extraction");
    assert_eq!(manager.reflections_for_scaling().expect("subset").len(), 9);

    run_scaling(&mut manager, &LevenbergMarquardt::default()).expect("scaling");
    let sorted = manager.sorted_reflections();
    let scales = sorted.doubles(columns::INVERSE_SCALE_FACTOR).expect("scales");
    assert_eq!(scales.len(), 10);
    assert!(scales.iter().all(|g| *g > 0.0));
}

#[test]
fn standard_and_log_parameterisations_agree_for_kb() {
    let standard_x = [2.0, 0.3];
    let log_x = [2.0_f64.ln(), 0.3];
    let mut results = Vec::new();
    for (parameterisation, x) in [
        (Parameterisation::Standard, standard_x),
        (Parameterisation::Log, log_x),
    ] {
        let mut options = options(ScalingModelKind::Kb);
        options.parameterisation = parameterisation;
        let mut manager = extracted_manager(small_table(), options);
        let mut apm = manager
            .active_parameter_manager(&[ComponentKind::Scale, ComponentKind::Decay])
            .expect("apm");
        apm.set_param_vals(&x).expect("parameters");
        manager.update_for_minimisation(&apm).expect("update");
        let table = manager.ih_table().expect("ih table");
        results.push((
            table.inverse_scale_factors().to_vec(),
            table.ih_values().to_vec(),
        ));
    }
    for row in 0..3 {
        assert_close(results[0].0[row], results[1].0[row], 1.0e-12, "inverse scale factor");
        assert_close(results[0].1[row], results[1].1[row], 1.0e-10, "Ih");
    }
}

#[test]
fn standard_and_log_refinements_reach_the_same_fit() {
    let mut fitted = Vec::new();
    for parameterisation in [Parameterisation::Standard, Parameterisation::Log] {
        let mut options = options(ScalingModelKind::Kb);
        options.parameterisation = parameterisation;
        options.refinement = RefinementOptions {
            max_iterations: 100,
            cost_tolerance: 1.0e-12,
            ..RefinementOptions::default()
        };
        let mut manager =
            DataManager::new(large_table(), experiment(), options.clone()).expect("manager");
        run_scaling(&mut manager, &LevenbergMarquardt::new(options.refinement))
            .expect("scaling");
        let sorted = manager.sorted_reflections();
        let scales = sorted.doubles(columns::INVERSE_SCALE_FACTOR).expect("scales");
        let ih = sorted.doubles(columns::IH_VALUES).expect("Ih");
        fitted.push(
            scales
                .iter()
                .zip(ih)
                .map(|(g, ih)| g * ih)
                .collect::<Vec<_>>(),
        );
    }
    for (standard, log) in fitted[0].iter().zip(&fitted[1]) {
        assert_close(*standard, *log, 1.0e-3 * standard.abs().max(1.0), "g·Ih");
    }
}

fn fitted_intensities(manager: &DataManager) -> Vec<f64> {
    let table = manager.ih_table().expect("ih table");
    table
        .inverse_scale_factors()
        .iter()
        .zip(table.ih_values())
        .map(|(g, ih)| g * ih)
        .collect()
}

#[test]
fn xds_decay_normalisation_keeps_the_fit() {
    let mut options = options(ScalingModelKind::Xds);
    options.parameterisation = Parameterisation::Log;
    // d from the unit cell, so symmetry equivalents share a resolution.
    let mut table = large_table();
    table.remove(columns::D);
    let mut manager = extracted_manager(table, options);
    let mut apm = manager
        .active_parameter_manager(&[ComponentKind::Decay])
        .expect("apm");
    let x: Vec<f64> = perturbed_parameters(&apm).iter().map(|x| x + 0.8).collect();
    apm.set_param_vals(&x).expect("parameters");
    manager.update_for_minimisation(&apm).expect("update");
    let before = fitted_intensities(&manager);

    manager
        .normalise_scales(&[ComponentKind::Decay])
        .expect("normalised");
    let decay = manager
        .components()
        .get(ComponentKind::Decay)
        .expect("decay");
    assert_ne!(decay.parameters(), x.as_slice());
    let trend = decay.log_scale_trend(true).expect("trend");
    assert_close(trend.intercept, 0.0, 1.0e-10, "log scale");
    assert_close(trend.slope, 0.0, 1.0e-10, "relative B");

    for (after, before) in fitted_intensities(&manager).iter().zip(&before) {
        assert_close(*after, *before, 1.0e-9 * before.abs().max(1.0), "g·Ih");
    }
    assert_eq!(manager.stage(), ScalingStage::Iterating);
}

#[test]
fn normalisation_leaves_other_models_alone() {
    let mut manager = extracted_manager(large_table(), options(ScalingModelKind::Kb));
    let mut apm = manager
        .active_parameter_manager(&[ComponentKind::Scale])
        .expect("apm");
    apm.set_param_vals(&[2.5]).expect("parameters");
    manager.update_for_minimisation(&apm).expect("update");
    manager
        .normalise_scales(&[ComponentKind::Scale])
        .expect("no-op");
    assert_eq!(
        manager
            .components()
            .get(ComponentKind::Scale)
            .expect("scale")
            .parameters(),
        &[2.5]
    );
}

#[test]
fn xds_refinement_keeps_scales_positive() {
    for parameterisation in [Parameterisation::Standard, Parameterisation::Log] {
        let mut options = options(ScalingModelKind::Xds);
        options.parameterisation = parameterisation;
        let mut manager =
            DataManager::new(large_table(), experiment(), options.clone()).expect("manager");
        let report = run_scaling(&mut manager, &LevenbergMarquardt::new(options.refinement))
            .expect("scaling");
        assert_eq!(report.statistics.n_observations, 10);

        let scales = manager
            .sorted_reflections()
            .doubles(columns::INVERSE_SCALE_FACTOR)
            .expect("scales");
        assert!(
            scales.iter().all(|g| g.is_finite() && *g > 0.0),
            "{parameterisation}: {scales:?}"
        );
        let ih = manager
            .sorted_reflections()
            .doubles(columns::IH_VALUES)
            .expect("Ih");
        assert!(ih.iter().all(|ih| *ih > 0.0), "{parameterisation}: {ih:?}");
    }
}

/// Evaluates the starting point and reports it as converged.
struct StartingPoint;

impl LeastSquaresSolver for StartingPoint {
    fn minimise(&self, problem: &mut dyn LeastSquaresProblem) -> ScalingResult<RefinementOutcome> {
        let parameters = problem.parameters();
        let evaluation = problem.evaluate(&parameters)?;
        Ok(RefinementOutcome {
            iterations: 0,
            converged: true,
            initial_rmsd: evaluation.rmsd(),
            final_rmsd: evaluation.rmsd(),
            cost: evaluation.cost,
            parameters,
        })
    }
}

#[test]
fn unmergeable_refined_scales_are_a_computation_error() {
    let mut manager = extracted_manager(large_table(), options(ScalingModelKind::Kb));
    let mut apm = manager
        .active_parameter_manager(&[ComponentKind::Scale])
        .expect("apm");
    apm.set_param_vals(&[-1.0]).expect("parameters");
    manager.update_for_minimisation(&apm).expect("update");

    let error = run_scaling(&mut manager, &StartingPoint).expect_err("negative scales");
    assert_eq!(error.category(), ScalingErrorCategory::Computation);
    assert_eq!(error.code(), "REFINEMENT.NO_POSITIVE_SCALES");
    assert!(!error.category().is_recoverable_per_experiment());
}

#[test]
fn radial_absorption_requires_a_detector() {
    let mut options = options(ScalingModelKind::Xds);
    options.absorption_binning = AbsorptionBinning::Radial;
    let mut no_detector = experiment();
    no_detector.detector = None;
    let mut manager = DataManager::new(large_table(), no_detector, options).expect("manager");
    let error = manager.bin_reflections().expect_err("missing detector");
    assert_eq!(error.category(), ScalingErrorCategory::Configuration);
    assert_eq!(error.code(), "CONFIG.MISSING_DETECTOR");
    assert_eq!(manager.stage(), ScalingStage::Initialized);
}

#[test]
fn radial_absorption_bins_every_reflection() {
    let mut options = options(ScalingModelKind::Xds);
    options.absorption_binning = AbsorptionBinning::Radial;
    let manager = extracted_manager(large_table(), options);
    let bins = manager
        .sorted_reflections()
        .ints(columns::A_BIN_INDEX)
        .expect("bins");
    assert!(bins.iter().all(|bin| (0..48).contains(bin)));
    assert_eq!(
        manager
            .components()
            .get(ComponentKind::Absorption)
            .expect("absorption")
            .n_params(),
        48
    );
}

#[test]
fn unbinnable_reflections_abort_binning_without_side_effects() {
    let mut options = options(ScalingModelKind::Xds);
    options.absorption_binning = AbsorptionBinning::Radial;
    let mut centred = experiment();
    // Row 3 of the large table sits at (90, 40): the centre of a 180 × 80 detector.
    centred.detector = Some(Detector {
        image_size: [180, 80],
    });
    let mut manager = DataManager::new(large_table(), centred, options).expect("manager");
    let keys = manager.sorted_reflections().keys();

    let error = manager.bin_reflections().expect_err("unbinnable reflection");
    assert_eq!(error.category(), ScalingErrorCategory::Binning);
    assert_eq!(manager.sorted_reflections().keys(), keys);
    assert!(manager.components().is_empty());
}

#[test]
fn coordinates_outside_a_frozen_grid_are_rejected() {
    let manager = extracted_manager(large_table(), options(ScalingModelKind::Physical));
    let mut table = manager.sorted_reflections().clone();
    table
        .set_doubles(columns::NORMALISED_ROTATION_ANGLE, vec![100.0; table.len()])
        .expect("coordinates");
    let mut scale = manager
        .components()
        .get(ComponentKind::Scale)
        .expect("scale")
        .clone();
    let error = scale
        .set_normalised_values(&table)
        .expect_err("outside grid");
    assert_eq!(error.category(), ScalingErrorCategory::Binning);
    assert_eq!(error.code(), "BINNING.OUT_OF_GRID");
}

#[test]
fn saved_state_round_trips_mid_refinement() {
    let temp = TempDir::new().expect("tempdir should be created");
    let path = temp.path().join("state.json");

    let mut manager = extracted_manager(large_table(), options(ScalingModelKind::Physical));
    let mut apm = manager
        .active_parameter_manager(&[ComponentKind::Scale, ComponentKind::Decay])
        .expect("apm");
    let x = perturbed_parameters(&apm);
    apm.set_param_vals(&x).expect("parameters");
    manager.update_for_minimisation(&apm).expect("update");
    manager.save_json(&path).expect("save");

    let mut restored = DataManager::load_json(&path).expect("load");
    assert_eq!(restored.stage(), ScalingStage::Iterating);
    assert_eq!(restored.options(), manager.options());
    assert_eq!(restored.initial_keys(), manager.initial_keys());
    for kind in [ComponentKind::Scale, ComponentKind::Decay] {
        assert_eq!(
            restored.components().get(kind).expect("component").parameters(),
            manager.components().get(kind).expect("component").parameters()
        );
    }
    let original = manager.ih_table().expect("ih table");
    let reloaded = restored.ih_table().expect("ih table");
    for row in 0..original.len() {
        assert_close(
            reloaded.inverse_scale_factors()[row],
            original.inverse_scale_factors()[row],
            1.0e-12,
            "inverse scale factor",
        );
        assert_close(reloaded.ih_values()[row], original.ih_values()[row], 1.0e-9, "Ih");
    }

    run_scaling(&mut restored, &LevenbergMarquardt::default()).expect("continue scaling");
    assert_eq!(restored.stage(), ScalingStage::Expanded);
}

#[test]
fn corrupt_state_files_are_reported() {
    let temp = TempDir::new().expect("tempdir should be created");
    let path = temp.path().join("state.json");
    std::fs::write(&path, "{\"format_version\": 1}").expect("write");
    let error = DataManager::load_json(&path).expect_err("incomplete state");
    assert_eq!(error.category(), ScalingErrorCategory::Configuration);

    let missing = DataManager::load_json(&temp.path().join("absent.json")).expect_err("missing");
    assert_eq!(missing.category(), ScalingErrorCategory::IoSystem);
}
