use super::CliError;
use anyhow::Context;
use diffscale_core::domain::ScalingError;
use diffscale_core::modules::quality::MergingStatistics;
use diffscale_core::modules::refinement::{ExperimentOutcome, ScalingReport};
use diffscale_core::modules::serialization::{format_fixed_f64, read_json_artifact};
use diffscale_core::reflections::experiment::load_experiments;
use diffscale_core::reflections::{Experiment, ReflectionTable};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Per-experiment entry of the JSON report written by `scale --report`.
#[derive(Debug, Serialize)]
pub(super) struct ExperimentReportEntry {
    pub(super) experiment: usize,
    pub(super) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) report: Option<ScalingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) reason: Option<String>,
}

impl ExperimentReportEntry {
    pub(super) fn from_outcome(experiment: usize, outcome: &ExperimentOutcome) -> Self {
        match outcome {
            ExperimentOutcome::Scaled(scaled) => Self {
                experiment,
                status: "scaled",
                report: Some(scaled.report.clone()),
                reason: None,
            },
            ExperimentOutcome::Skipped { reason } => Self {
                experiment,
                status: "skipped",
                report: None,
                reason: Some(reason.to_string()),
            },
        }
    }
}

/// Reads one reflection table per experiment. Tables may be `null` for
/// experiments that were skipped by an earlier run.
pub(super) fn load_tables(
    reflections: &Path,
    experiments: &Path,
) -> Result<Vec<(Option<ReflectionTable>, Experiment)>, CliError> {
    let tables: Vec<Option<ReflectionTable>> =
        read_json_artifact(reflections, "reflection tables").map_err(CliError::Compute)?;
    let experiments = load_experiments(experiments).map_err(CliError::Compute)?;
    if tables.len() != experiments.len() {
        return Err(CliError::Compute(ScalingError::configuration(
            "CONFIG.EXPERIMENT_COUNT",
            format!(
                "{} reflection tables were given for {} experiments",
                tables.len(),
                experiments.len()
            ),
        )));
    }
    Ok(tables.into_iter().zip(experiments).collect())
}

pub(super) fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    Ok(())
}

pub(super) fn render_statistics(experiment: usize, statistics: &MergingStatistics) -> String {
    let r_factor = |value: Option<f64>| match value {
        Some(value) => format_fixed_f64(value, 8, 4),
        None => format!("{:>8}", "n/a"),
    };
    format!(
        "experiment {experiment:>3}  obs {:>7}  unique {:>6}  mult {}  Rmeas {}  Rpim {}  I/sigma {}",
        statistics.n_observations,
        statistics.n_unique,
        format_fixed_f64(statistics.multiplicity, 6, 2),
        r_factor(statistics.r_meas),
        r_factor(statistics.r_pim),
        format_fixed_f64(statistics.mean_i_over_sigma, 8, 2),
    )
}
