//! Flat view over the parameters being refined.

use crate::domain::{ComponentKind, ScalingError, ScalingResult};
use crate::modules::components::ScalingComponents;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub kind: ComponentKind,
    pub start_idx: usize,
    pub n_params: usize,
}

impl ParameterRange {
    pub fn range(&self) -> Range<usize> {
        self.start_idx..self.start_idx + self.n_params
    }
}

/// Concatenated parameters of the active components, in the order given at
/// construction. Holds copies only; [`DataManager::update_for_minimisation`]
/// copies `x` back into the components.
///
/// [`DataManager::update_for_minimisation`]: crate::modules::data_manager::DataManager::update_for_minimisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveParameterManager {
    x: Vec<f64>,
    ranges: Vec<ParameterRange>,
    n_obs: usize,
}

impl ActiveParameterManager {
    pub fn new(components: &ScalingComponents, active: &[ComponentKind]) -> ScalingResult<Self> {
        let mut x = Vec::new();
        let mut ranges = Vec::with_capacity(active.len());
        let mut n_obs = 0;
        for (position, kind) in active.iter().enumerate() {
            if active[..position].contains(kind) {
                return Err(ScalingError::configuration(
                    "CONFIG.ACTIVE_COMPONENTS",
                    format!("component {kind} is listed twice"),
                ));
            }
            let component = components.get(*kind)?;
            ranges.push(ParameterRange {
                kind: *kind,
                start_idx: x.len(),
                n_params: component.n_params(),
            });
            x.extend_from_slice(component.parameters());
            n_obs = component.n_obs();
        }
        Ok(Self { x, ranges, n_obs })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn ranges(&self) -> &[ParameterRange] {
        &self.ranges
    }

    pub fn active_kinds(&self) -> Vec<ComponentKind> {
        self.ranges.iter().map(|range| range.kind).collect()
    }

    pub fn range_of(&self, kind: ComponentKind) -> Option<ParameterRange> {
        self.ranges.iter().copied().find(|range| range.kind == kind)
    }

    pub fn is_active(&self, kind: ComponentKind) -> bool {
        self.range_of(kind).is_some()
    }

    pub fn component_values(&self, kind: ComponentKind) -> Option<&[f64]> {
        self.range_of(kind).map(|range| &self.x[range.range()])
    }

    pub fn set_param_vals(&mut self, x: &[f64]) -> ScalingResult<()> {
        if x.len() != self.x.len() {
            return Err(ScalingError::internal(
                "APM.LENGTH",
                format!("expected {} parameters, got {}", self.x.len(), x.len()),
            ));
        }
        self.x.copy_from_slice(x);
        Ok(())
    }
}
