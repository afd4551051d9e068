use super::DataManager;
use crate::common::ScalingOptions;
use crate::domain::{ScalingError, ScalingResult, ScalingStage};
use crate::modules::apm::ActiveParameterManager;
use crate::modules::basis::update_scale_factors;
use crate::modules::components::ScalingComponents;
use crate::modules::serialization::{read_json_artifact, write_json_artifact};
use crate::modules::weighting::compute_weights;
use crate::reflections::{Experiment, ReflectionTable, columns};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const STATE_FORMAT_VERSION: u32 = 1;

/// On-disk state. Bound coordinates, weights, the scaling subset and the Ih
/// table are rebuilt from these fields on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataManagerDocument {
    format_version: u32,
    options: ScalingOptions,
    experiment: Experiment,
    stage: ScalingStage,
    initial_keys: Vec<String>,
    reflections: ReflectionTable,
    components: ScalingComponents,
}

impl DataManager {
    pub fn save_json(&self, path: &Path) -> ScalingResult<()> {
        let document = DataManagerDocument {
            format_version: STATE_FORMAT_VERSION,
            options: self.options.clone(),
            experiment: self.experiment.clone(),
            stage: self.stage,
            initial_keys: self.initial_keys.clone(),
            reflections: self.sorted_reflections.clone(),
            components: self.components.clone(),
        };
        write_json_artifact(path, &document)?;
        info!(path = %path.display(), stage = %self.stage, "saved data manager state");
        Ok(())
    }

    pub fn load_json(path: &Path) -> ScalingResult<Self> {
        let document: DataManagerDocument = read_json_artifact(path, "data manager state")?;
        if document.format_version != STATE_FORMAT_VERSION {
            return Err(ScalingError::configuration(
                "CONFIG.STATE_VERSION",
                format!(
                    "unsupported data manager state version {} (expected {STATE_FORMAT_VERSION})",
                    document.format_version
                ),
            ));
        }
        document.options.validate()?;
        let weights = compute_weights(
            &document.reflections,
            document.options.isigma_min,
            document.options.d_min,
        )?;

        let mut manager = Self {
            options: document.options,
            experiment: document.experiment,
            stage: document.stage,
            initial_keys: document.initial_keys,
            sorted_reflections: document.reflections,
            weights,
            components: document.components,
            subset: None,
        };
        manager.restore_runtime_state()?;
        info!(path = %path.display(), stage = %manager.stage, "loaded data manager state");
        Ok(manager)
    }

    fn restore_runtime_state(&mut self) -> ScalingResult<()> {
        match self.stage {
            ScalingStage::Initialized => Ok(()),
            ScalingStage::Binned | ScalingStage::Expanded => self
                .components
                .set_normalised_values(&self.sorted_reflections),
            ScalingStage::Extracted | ScalingStage::Iterating | ScalingStage::Converged => {
                let mut subset = self.build_subset(&self.sorted_reflections, &self.weights)?;
                let apm = ActiveParameterManager::new(&subset.components, &[])?;
                let basis =
                    update_scale_factors(&subset.components, &apm, self.options.parameterisation)?;
                subset
                    .ih_table
                    .update_scale_factors(basis.inverse_scale_factors.clone(), None)?;
                subset.ih_table.calc_ih();
                subset
                    .reflections
                    .set_doubles(columns::INVERSE_SCALE_FACTOR, basis.inverse_scale_factors)?;
                subset
                    .reflections
                    .set_doubles(columns::IH_VALUES, subset.ih_table.ih_values().to_vec())?;
                self.subset = Some(subset);
                Ok(())
            }
        }
    }
}
