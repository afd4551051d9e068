//! Refinement of a data manager's components and the end-to-end scaling runs.

mod levenberg_marquardt;

pub use levenberg_marquardt::LevenbergMarquardt;

use crate::common::{ScalingOptions, TargetKind};
use crate::domain::{ComponentKind, ScalingError, ScalingModelKind, ScalingResult, ScalingStage};
use crate::modules::apm::ActiveParameterManager;
use crate::modules::data_manager::DataManager;
use crate::modules::quality::{MergingStatistics, merging_statistics};
use crate::modules::target::{ScalingTarget, ScalingTargetFixedIh, TargetEvaluation, evaluate};
use crate::modules::traits::{LeastSquaresProblem, LeastSquaresSolver};
use crate::reflections::{Experiment, ReflectionTable};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub iterations: usize,
    pub converged: bool,
    pub initial_rmsd: f64,
    pub final_rmsd: f64,
    /// Σ w R² at the final parameters.
    pub cost: f64,
    pub parameters: Vec<f64>,
}

/// Components refined together in each cycle, in order.
pub fn refinement_plan(options: &ScalingOptions) -> Vec<Vec<ComponentKind>> {
    let kinds = options.model.component_kinds();
    if options.refines_concurrently() {
        return vec![kinds.to_vec()];
    }
    kinds.iter().map(|kind| vec![*kind]).collect()
}

/// The data manager's scaling subset seen as a least-squares problem over
/// the parameters of one apm.
pub struct ScalingProblem<'a> {
    manager: &'a mut DataManager,
    apm: ActiveParameterManager,
}

impl<'a> ScalingProblem<'a> {
    pub fn new(manager: &'a mut DataManager, active: &[ComponentKind]) -> ScalingResult<Self> {
        let apm = manager.active_parameter_manager(active)?;
        Ok(Self { manager, apm })
    }

    pub fn apm(&self) -> &ActiveParameterManager {
        &self.apm
    }
}

impl LeastSquaresProblem for ScalingProblem<'_> {
    fn parameters(&self) -> Vec<f64> {
        self.apm.x().to_vec()
    }

    fn evaluate(&mut self, x: &[f64]) -> ScalingResult<TargetEvaluation> {
        self.apm.set_param_vals(x)?;
        self.manager.update_for_minimisation(&self.apm)?;
        let table = self.manager.ih_table()?;
        match self.manager.options().target {
            TargetKind::Full => evaluate(&ScalingTarget, table),
            TargetKind::FixedIh => evaluate(&ScalingTargetFixedIh, table),
        }
    }

    /// Every inverse scale factor of the scaling subset is finite and positive.
    fn is_feasible(&self) -> bool {
        self.manager.ih_table().is_ok_and(|table| {
            table
                .inverse_scale_factors()
                .iter()
                .all(|g| g.is_finite() && *g > 0.0)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub components: Vec<ComponentKind>,
    pub outcome: RefinementOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingReport {
    pub model: ScalingModelKind,
    pub n_reflections: usize,
    pub n_scaling_reflections: usize,
    pub cycles: Vec<CycleReport>,
    pub statistics: MergingStatistics,
}

/// Runs the remaining stages of `manager` through expansion: binning and
/// extraction if not yet done, then every cycle of the refinement plan.
pub fn run_scaling(
    manager: &mut DataManager,
    solver: &dyn LeastSquaresSolver,
) -> ScalingResult<ScalingReport> {
    if manager.stage() == ScalingStage::Initialized {
        manager.bin_reflections()?;
    }
    if manager.stage() == ScalingStage::Binned {
        manager.extract_reflections_for_scaling()?;
    }
    if !matches!(
        manager.stage(),
        ScalingStage::Extracted | ScalingStage::Iterating
    ) {
        return Err(ScalingError::configuration(
            "STATE.STAGE",
            format!("cannot refine a data manager in stage {}", manager.stage()),
        ));
    }
    let n_scaling_reflections = manager.reflections_for_scaling()?.len();

    let mut cycles = Vec::new();
    for components in refinement_plan(manager.options()) {
        let mut problem = ScalingProblem::new(manager, &components)?;
        let outcome = solver.minimise(&mut problem)?;
        info!(
            components = ?components,
            iterations = outcome.iterations,
            converged = outcome.converged,
            initial_rmsd = outcome.initial_rmsd,
            final_rmsd = outcome.final_rmsd,
            "refinement cycle finished"
        );
        if !outcome.converged {
            warn!(components = ?components, "refinement stopped at the iteration limit");
        }
        manager.normalise_scales(&components)?;
        cycles.push(CycleReport {
            components,
            outcome,
        });
    }

    manager.finish_refinement()?;
    manager.expand_scales_to_all_reflections()?;
    let statistics = merging_statistics(manager.sorted_reflections()).map_err(|error| {
        if error.category().is_recoverable_per_experiment() {
            ScalingError::computation(
                "REFINEMENT.NO_POSITIVE_SCALES",
                format!("refined scale factors cannot be merged: {}", error.message()),
            )
        } else {
            error
        }
    })?;
    Ok(ScalingReport {
        model: manager.model(),
        n_reflections: manager.sorted_reflections().len(),
        n_scaling_reflections,
        cycles,
        statistics,
    })
}

#[derive(Debug, Clone)]
pub struct ScaledExperiment {
    pub reflections: ReflectionTable,
    pub report: ScalingReport,
}

/// Scales one experiment from raw reflections to the cleaned output table.
pub fn scale_experiment(
    reflections: ReflectionTable,
    experiment: Experiment,
    options: &ScalingOptions,
) -> ScalingResult<ScaledExperiment> {
    let mut manager = DataManager::new(reflections, experiment, options.clone())?;
    let solver = LevenbergMarquardt::new(options.refinement);
    let report = run_scaling(&mut manager, &solver)?;
    Ok(ScaledExperiment {
        reflections: manager.clean_reflection_table()?,
        report,
    })
}

#[derive(Debug, Clone)]
pub enum ExperimentOutcome {
    Scaled(Box<ScaledExperiment>),
    /// Not enough usable data; the rest of the batch is unaffected.
    Skipped { reason: ScalingError },
}

impl ExperimentOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Scales each experiment independently. Experiments without enough data are
/// skipped; any other error aborts the batch.
pub fn scale_experiments(
    datasets: Vec<(ReflectionTable, Experiment)>,
    options: &ScalingOptions,
) -> ScalingResult<Vec<ExperimentOutcome>> {
    let mut outcomes = Vec::with_capacity(datasets.len());
    for (index, (reflections, experiment)) in datasets.into_iter().enumerate() {
        match scale_experiment(reflections, experiment, options) {
            Ok(scaled) => outcomes.push(ExperimentOutcome::Scaled(Box::new(scaled))),
            Err(error) if error.category().is_recoverable_per_experiment() => {
                warn!(experiment = index, error = %error, "skipping experiment");
                outcomes.push(ExperimentOutcome::Skipped { reason: error });
            }
            Err(error) => return Err(error),
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::refinement_plan;
    use crate::common::ScalingOptions;
    use crate::domain::{ComponentKind, ScalingModelKind};

    #[test]
    fn xds_refines_one_component_per_cycle() {
        let plan = refinement_plan(&ScalingOptions::for_model(ScalingModelKind::Xds));
        assert_eq!(
            plan,
            vec![
                vec![ComponentKind::Decay],
                vec![ComponentKind::Absorption],
                vec![ComponentKind::Modulation],
            ]
        );
    }

    #[test]
    fn concurrent_models_refine_everything_at_once() {
        let plan = refinement_plan(&ScalingOptions::for_model(ScalingModelKind::Physical));
        assert_eq!(plan, vec![vec![ComponentKind::Scale, ComponentKind::Decay]]);

        let mut options = ScalingOptions::for_model(ScalingModelKind::Xds);
        options.concurrent = Some(true);
        assert_eq!(refinement_plan(&options).len(), 1);
    }
}
