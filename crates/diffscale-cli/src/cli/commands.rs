use super::CliError;
use super::helpers::{ExperimentReportEntry, ensure_parent_dir, load_tables, render_statistics};
use diffscale_core::common::{IntegrationMethod, ScalingOptions, load_scaling_options};
use diffscale_core::domain::{Parameterisation, ScalingError, ScalingModelKind};
use diffscale_core::modules::quality::merging_statistics_from_output;
use diffscale_core::modules::refinement::{ExperimentOutcome, scale_experiments};
use diffscale_core::modules::serialization::write_json_artifact;
use diffscale_core::reflections::ReflectionTable;
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct ScaleArgs {
    /// JSON list of reflection tables, one per experiment
    #[arg(long)]
    reflections: PathBuf,
    /// JSON list of experiment models
    #[arg(long)]
    experiments: PathBuf,
    /// Scaling options document; defaults apply when omitted
    #[arg(long)]
    options: Option<PathBuf>,
    /// Scaling model (kb, physical or xds), overriding the options document
    #[arg(long)]
    model: Option<String>,
    /// Parameterisation (standard or log), overriding the options document
    #[arg(long)]
    parameterisation: Option<String>,
    /// Number of Ih table blocks, overriding the options document
    #[arg(long)]
    n_blocks: Option<usize>,
    /// Scaled reflection tables output path
    #[arg(long, default_value = "scaled.json")]
    output: PathBuf,
    /// JSON report output path
    #[arg(long, default_value = "scaling-report.json")]
    report: PathBuf,
}

impl ScaleArgs {
    fn resolve_options(&self) -> Result<ScalingOptions, CliError> {
        let mut options = match &self.options {
            Some(path) => load_scaling_options(path)
                .map_err(|error| CliError::Compute(ScalingError::from(error)))?,
            None => ScalingOptions::default(),
        };
        if let Some(model) = &self.model {
            options.model = model
                .parse::<ScalingModelKind>()
                .map_err(CliError::Compute)?;
        }
        if let Some(parameterisation) = &self.parameterisation {
            options.parameterisation = parameterisation
                .parse::<Parameterisation>()
                .map_err(CliError::Compute)?;
        }
        if let Some(n_blocks) = self.n_blocks {
            options.n_blocks = n_blocks;
        }
        options.validate().map_err(CliError::Compute)?;
        Ok(options)
    }
}

#[derive(clap::Args)]
pub(super) struct StatsArgs {
    /// Scaled reflection tables written by `diffscale scale`
    #[arg(long)]
    reflections: PathBuf,
    /// JSON list of experiment models
    #[arg(long)]
    experiments: PathBuf,
    /// Intensity columns to merge (sum, prf or combine)
    #[arg(long, default_value = "prf")]
    method: String,
}

pub(super) fn run_scale_command(args: ScaleArgs) -> Result<i32, CliError> {
    let options = args.resolve_options()?;
    let mut datasets = Vec::new();
    for (index, (table, experiment)) in load_tables(&args.reflections, &args.experiments)?
        .into_iter()
        .enumerate()
    {
        let table = table.ok_or_else(|| {
            CliError::Compute(ScalingError::configuration(
                "CONFIG.MISSING_TABLE",
                format!("experiment {index} has no reflection table"),
            ))
        })?;
        datasets.push((table, experiment));
    }
    info!(
        experiments = datasets.len(),
        model = %options.model,
        "scaling"
    );

    let outcomes = scale_experiments(datasets, &options).map_err(CliError::Compute)?;
    let entries: Vec<ExperimentReportEntry> = outcomes
        .iter()
        .enumerate()
        .map(|(index, outcome)| ExperimentReportEntry::from_outcome(index, outcome))
        .collect();
    let n_scaled = outcomes.iter().filter(|outcome| !outcome.is_skipped()).count();
    let tables: Vec<Option<ReflectionTable>> = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            ExperimentOutcome::Scaled(scaled) => Some(scaled.reflections),
            ExperimentOutcome::Skipped { .. } => None,
        })
        .collect();

    ensure_parent_dir(&args.output)?;
    write_json_artifact(&args.output, &tables).map_err(CliError::Compute)?;
    ensure_parent_dir(&args.report)?;
    write_json_artifact(&args.report, &entries).map_err(CliError::Compute)?;

    for entry in &entries {
        match (&entry.report, &entry.reason) {
            (Some(report), _) => println!("{}", render_statistics(entry.experiment, &report.statistics)),
            (None, Some(reason)) => println!("experiment {:>3}  skipped: {reason}", entry.experiment),
            (None, None) => {}
        }
    }
    println!("Scaled reflections: {}", args.output.display());
    println!("JSON report: {}", args.report.display());

    if n_scaled == 0 {
        return Err(CliError::Compute(ScalingError::insufficient_data(
            "DATA.ALL_SKIPPED",
            "no experiment could be scaled",
        )));
    }
    Ok(0)
}

pub(super) fn run_stats_command(args: StatsArgs) -> Result<i32, CliError> {
    let method = args
        .method
        .parse::<IntegrationMethod>()
        .map_err(CliError::Compute)?;
    for (index, (table, experiment)) in load_tables(&args.reflections, &args.experiments)?
        .into_iter()
        .enumerate()
    {
        let Some(table) = table else {
            println!("experiment {index:>3}  skipped");
            continue;
        };
        let crystal = experiment.crystal().map_err(CliError::Compute)?;
        let statistics = merging_statistics_from_output(&table, &crystal.space_group, method)
            .map_err(CliError::Compute)?;
        println!("{}", render_statistics(index, &statistics));
    }
    Ok(0)
}
