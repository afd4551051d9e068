//! Orchestration of one experiment's scaling: binning, extraction of the
//! scaling subset, per-iteration updates, expansion and export.

mod binning;
mod persistence;

use crate::common::{BinningParameters, ScalingOptions, TargetKind};
use crate::domain::{ComponentKind, ScalingError, ScalingModelKind, ScalingResult, ScalingStage};
use crate::modules::apm::ActiveParameterManager;
use crate::modules::basis::update_scale_factors;
use crate::modules::components::ScalingComponents;
use crate::modules::ih_table::IhTable;
use crate::modules::weighting::{calculate_wilson_outliers, compute_weights, select_intensities};
use crate::numerics::deterministic_argsort_by;
use crate::reflections::{Experiment, MillerIndex, ReflectionTable, columns};
use tracing::{debug, info, warn};

/// Rows of the sorted table that take part in refinement, with everything
/// derived from them. Built in full before it replaces the previous subset.
#[derive(Debug, Clone)]
struct ScalingSubset {
    reflections: ReflectionTable,
    components: ScalingComponents,
    ih_table: IhTable,
}

#[derive(Debug, Clone)]
pub struct DataManager {
    options: ScalingOptions,
    experiment: Experiment,
    stage: ScalingStage,
    /// Columns of the input table after filtering, in sorted-key order.
    initial_keys: Vec<String>,
    sorted_reflections: ReflectionTable,
    /// Weights of `sorted_reflections` as of the last weighting pass.
    weights: Vec<f64>,
    components: ScalingComponents,
    subset: Option<ScalingSubset>,
}

impl DataManager {
    /// Filters `reflections` to integrated rows, derives the scaling columns,
    /// maps indices to the asymmetric unit and sorts rows by asu index.
    pub fn new(
        reflections: ReflectionTable,
        experiment: Experiment,
        options: ScalingOptions,
    ) -> ScalingResult<Self> {
        options.validate()?;
        let crystal = experiment.crystal()?;

        let reflections = filter_integrated(reflections)?;
        if reflections.is_empty() {
            return Err(ScalingError::insufficient_data(
                "DATA.NO_REFLECTIONS",
                "no integrated reflections remain after filtering",
            ));
        }
        let initial_keys = reflections.keys();
        let mut table = reflections;

        if !table.contains(columns::D) {
            let d = crystal.d_spacings(table.millers(columns::MILLER_INDEX)?)?;
            table.set_doubles(columns::D, d)?;
        }

        let (intensity, variance) = select_intensities(&table, options.integration_method)?;
        table.set_doubles(columns::INTENSITY, intensity)?;
        table.set_doubles(columns::VARIANCE, variance)?;

        if table.contains(columns::XYZOBS_PX) {
            let xyz = table.vec3s(columns::XYZOBS_PX)?.to_vec();
            for (axis, name) in [columns::X_VALUE, columns::Y_VALUE, columns::Z_VALUE]
                .into_iter()
                .enumerate()
            {
                table.set_doubles(name, xyz.iter().map(|v| v[axis]).collect())?;
            }
        }
        let n = table.len();
        table.set_doubles(columns::INVERSE_SCALE_FACTOR, vec![1.0; n])?;
        table.set_doubles(columns::IH_VALUES, vec![0.0; n])?;

        let space_group = &crystal.space_group;
        let indices = table.millers(columns::MILLER_INDEX)?;
        let asu: Vec<MillerIndex> = indices.iter().map(|h| space_group.map_to_asu(*h)).collect();
        let centric: Vec<bool> = indices.iter().map(|h| space_group.is_centric(*h)).collect();
        table.set_millers(columns::ASU_MILLER_INDEX, asu)?;
        table.set_bools(columns::CENTRIC_FLAG, centric)?;

        let order = deterministic_argsort_by(table.millers(columns::ASU_MILLER_INDEX)?, |a, b| {
            a.cmp(b)
        });
        let sorted_reflections = table.reorder(&order)?;
        let weights = compute_weights(&sorted_reflections, options.isigma_min, options.d_min)?;

        info!(
            model = %options.model,
            reflections = sorted_reflections.len(),
            "initialised data manager"
        );
        Ok(Self {
            options,
            experiment,
            stage: ScalingStage::Initialized,
            initial_keys,
            sorted_reflections,
            weights,
            components: ScalingComponents::new(),
            subset: None,
        })
    }

    pub fn model(&self) -> ScalingModelKind {
        self.options.model
    }

    pub fn options(&self) -> &ScalingOptions {
        &self.options
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn stage(&self) -> ScalingStage {
        self.stage
    }

    pub fn initial_keys(&self) -> &[String] {
        &self.initial_keys
    }

    /// Every integrated reflection, sorted by asu index.
    pub fn sorted_reflections(&self) -> &ReflectionTable {
        &self.sorted_reflections
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn components(&self) -> &ScalingComponents {
        &self.components
    }

    pub fn reflections_for_scaling(&self) -> ScalingResult<&ReflectionTable> {
        Ok(&self.subset()?.reflections)
    }

    pub fn ih_table(&self) -> ScalingResult<&IhTable> {
        Ok(&self.subset()?.ih_table)
    }

    fn subset(&self) -> ScalingResult<&ScalingSubset> {
        self.subset.as_ref().ok_or_else(|| {
            ScalingError::configuration(
                "STATE.NOT_EXTRACTED",
                format!(
                    "no scaling subset has been extracted (stage {})",
                    self.stage
                ),
            )
        })
    }

    fn require_stage(&self, allowed: &[ScalingStage], operation: &str) -> ScalingResult<()> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        Err(ScalingError::configuration(
            "STATE.STAGE",
            format!("{operation} is not allowed in stage {}", self.stage),
        ))
    }

    pub fn set_binning_parameters(&mut self, binning: BinningParameters) -> ScalingResult<()> {
        self.require_stage(&[ScalingStage::Initialized], "set_binning_parameters")?;
        binning.validate(self.options.model)?;
        self.options.binning = binning;
        Ok(())
    }

    /// Creates the model's components and their normalised coordinates. On
    /// error the table and components are left as they were.
    pub fn bin_reflections(&mut self) -> ScalingResult<()> {
        self.require_stage(&[ScalingStage::Initialized], "bin_reflections")?;
        let mut table = self.sorted_reflections.clone();
        let mut components =
            binning::bin_reflections(self.options.model, &self.options, &self.experiment, &mut table)?;
        components.set_normalised_values(&table)?;

        self.sorted_reflections = table;
        self.components = components;
        self.stage = ScalingStage::Binned;
        info!(
            model = %self.options.model,
            components = ?self.components.kinds(),
            parameters = self.components.iter().map(|(_, c)| c.n_params()).sum::<usize>(),
            "binned reflections"
        );
        Ok(())
    }

    /// Flags Wilson outliers, reweights, and copies the rows with positive
    /// weight into the scaling subset.
    pub fn extract_reflections_for_scaling(&mut self) -> ScalingResult<()> {
        self.require_stage(&[ScalingStage::Binned], "extract_reflections_for_scaling")?;
        let mut table = self.sorted_reflections.clone();
        let outliers = if self.options.outlier_rejection {
            let crystal = self.experiment.crystal()?;
            let flags = calculate_wilson_outliers(
                table.doubles(columns::INTENSITY)?,
                table.doubles(columns::D)?,
                table.millers(columns::ASU_MILLER_INDEX)?,
                &crystal.space_group,
            )?;
            flags.outlier
        } else {
            vec![false; table.len()]
        };
        table.set_bools(columns::WILSON_OUTLIER_FLAG, outliers)?;
        let weights = compute_weights(&table, self.options.isigma_min, self.options.d_min)?;

        let subset = self.build_subset(&table, &weights)?;
        info!(
            selected = subset.reflections.len(),
            total = table.len(),
            groups = subset.ih_table.n_groups(),
            blocks = subset.ih_table.n_blocks(),
            "extracted reflections for scaling"
        );
        self.sorted_reflections = table;
        self.weights = weights;
        self.subset = Some(subset);
        self.stage = ScalingStage::Extracted;
        Ok(())
    }

    fn build_subset(&self, table: &ReflectionTable, weights: &[f64]) -> ScalingResult<ScalingSubset> {
        let mask: Vec<bool> = weights.iter().map(|w| *w > 0.0).collect();
        let reflections = table.select(&mask)?;
        if reflections.is_empty() {
            return Err(ScalingError::insufficient_data(
                "DATA.NO_SCALING_REFLECTIONS",
                "no reflection has a positive weight after the scaling cutoffs",
            ));
        }
        let subset_weights: Vec<f64> = weights.iter().copied().filter(|w| *w > 0.0).collect();

        let mut components = self.components.clone();
        components.set_normalised_values(&reflections)?;

        let asu = reflections.millers(columns::ASU_MILLER_INDEX)?.to_vec();
        let intensity = reflections.doubles(columns::INTENSITY)?.to_vec();
        let mut ih_table = IhTable::new(asu, intensity, subset_weights, self.options.n_blocks)?;
        if self.options.target == TargetKind::FixedIh {
            ih_table.fix_ih();
        }
        if ih_table.degenerate_groups() > 0 {
            warn!(
                groups = ih_table.degenerate_groups(),
                "groups with zero weighted scale sum were given Ih = 0"
            );
        }
        Ok(ScalingSubset {
            reflections,
            components,
            ih_table,
        })
    }

    /// Active parameter manager over `kinds` at the current component parameters.
    pub fn active_parameter_manager(
        &self,
        kinds: &[ComponentKind],
    ) -> ScalingResult<ActiveParameterManager> {
        ActiveParameterManager::new(&self.subset()?.components, kinds)
    }

    /// Copies the apm values into the components and refreshes scales,
    /// derivatives and Ih of the scaling subset. Calling it twice with the
    /// same apm leaves the state unchanged.
    pub fn update_for_minimisation(&mut self, apm: &ActiveParameterManager) -> ScalingResult<()> {
        self.require_stage(
            &[ScalingStage::Extracted, ScalingStage::Iterating],
            "update_for_minimisation",
        )?;
        let parameterisation = self.options.parameterisation;
        let current = self.subset()?;
        if !apm.is_empty() && apm.n_obs() != current.reflections.len() {
            return Err(ScalingError::internal(
                "APM.N_OBS",
                format!(
                    "parameter manager covers {} observations, scaling subset has {}",
                    apm.n_obs(),
                    current.reflections.len()
                ),
            ));
        }

        let mut subset = current.clone();
        for range in apm.ranges() {
            subset
                .components
                .get_mut(range.kind)?
                .set_parameters(&apm.x()[range.range()])?;
        }
        let basis = update_scale_factors(&subset.components, apm, parameterisation)?;
        subset.ih_table.update_scale_factors(
            basis.inverse_scale_factors.clone(),
            basis.derivatives,
        )?;
        subset.ih_table.calc_ih();
        subset
            .reflections
            .set_doubles(columns::INVERSE_SCALE_FACTOR, basis.inverse_scale_factors)?;
        subset
            .reflections
            .set_doubles(columns::IH_VALUES, subset.ih_table.ih_values().to_vec())?;

        for range in apm.ranges() {
            let parameters = subset.components.get(range.kind)?.parameters().to_vec();
            self.components.get_mut(range.kind)?.set_parameters(&parameters)?;
        }
        self.subset = Some(subset);
        self.stage = ScalingStage::Iterating;
        Ok(())
    }

    /// Pins the scale degeneracy of the XDS model under the full target after
    /// a refinement cycle over `kinds`: each component is divided by its
    /// fitted overall scale, and the decay grid also loses its relative B
    /// trend along resolution. Other models and targets are left unchanged,
    /// as is the state when the normalised scales would not all be positive.
    pub fn normalise_scales(&mut self, kinds: &[ComponentKind]) -> ScalingResult<()> {
        if self.options.model != ScalingModelKind::Xds
            || self.options.target != TargetKind::Full
            || self.stage != ScalingStage::Iterating
        {
            return Ok(());
        }
        let mut subset = self.subset()?.clone();
        for kind in kinds {
            let component = subset.components.get_mut(*kind)?;
            let Some(trend) = component.log_scale_trend(*kind == ComponentKind::Decay) else {
                warn!(component = %kind, "no positive parameters to normalise");
                continue;
            };
            component.remove_log_scale_trend(trend);
            debug!(
                component = %kind,
                log_scale = trend.intercept,
                relative_b = trend.slope,
                "normalised component"
            );
        }
        let apm = ActiveParameterManager::new(&subset.components, kinds)?;

        let previous_subset = self.subset.replace(subset);
        let previous_components = self.components.clone();
        let updated = self.update_for_minimisation(&apm);
        let positive = self.ih_table().is_ok_and(|table| {
            table
                .inverse_scale_factors()
                .iter()
                .all(|g| g.is_finite() && *g > 0.0)
        });
        if updated.is_err() || !positive {
            self.subset = previous_subset;
            self.components = previous_components;
            warn!(components = ?kinds, "normalisation skipped");
        }
        updated
    }

    pub fn finish_refinement(&mut self) -> ScalingResult<()> {
        self.require_stage(
            &[ScalingStage::Extracted, ScalingStage::Iterating],
            "finish_refinement",
        )?;
        self.stage = ScalingStage::Converged;
        info!("refinement finished");
        Ok(())
    }

    /// Evaluates every component on the full sorted table and stores the final
    /// inverse scale factors, weights and Ih values there.
    pub fn expand_scales_to_all_reflections(&mut self) -> ScalingResult<()> {
        self.require_stage(&[ScalingStage::Converged], "expand_scales_to_all_reflections")?;
        let mut table = self.sorted_reflections.clone();
        let mut components = self.components.clone();
        components.set_normalised_values(&table)?;

        let apm = ActiveParameterManager::new(&components, &[])?;
        let basis = update_scale_factors(&components, &apm, self.options.parameterisation)?;
        let scales = basis.inverse_scale_factors;
        let weights = compute_weights(&table, self.options.isigma_min, self.options.d_min)?;

        let mut ih_table = IhTable::new(
            table.millers(columns::ASU_MILLER_INDEX)?.to_vec(),
            table.doubles(columns::INTENSITY)?.to_vec(),
            weights.clone(),
            1,
        )?;
        ih_table.update_scale_factors(scales.clone(), None)?;
        ih_table.calc_ih();

        table.set_doubles(columns::INVERSE_SCALE_FACTOR, scales)?;
        table.set_doubles(columns::IH_VALUES, ih_table.ih_values().to_vec())?;

        self.sorted_reflections = table;
        self.weights = weights;
        self.components = components;
        self.stage = ScalingStage::Expanded;
        info!(
            reflections = self.sorted_reflections.len(),
            "expanded scale factors to all reflections"
        );
        Ok(())
    }

    /// The sorted table reduced to its initial columns plus
    /// `inverse_scale_factor` and `Ih_values`.
    pub fn clean_reflection_table(&self) -> ScalingResult<ReflectionTable> {
        self.require_stage(&[ScalingStage::Expanded], "clean_reflection_table")?;
        let mut table = self.sorted_reflections.clone();
        table.retain_columns(|name| {
            self.initial_keys.iter().any(|key| key == name)
                || name == columns::INVERSE_SCALE_FACTOR
                || name == columns::IH_VALUES
        });
        Ok(table)
    }
}

fn filter_integrated(reflections: ReflectionTable) -> ScalingResult<ReflectionTable> {
    if !reflections.contains(columns::FLAGS) {
        return Ok(reflections);
    }
    let mask: Vec<bool> = reflections
        .ints(columns::FLAGS)?
        .iter()
        .map(|flags| flags & columns::FLAG_INTEGRATED != 0)
        .collect();
    Ok(reflections.select(&mask)?)
}
