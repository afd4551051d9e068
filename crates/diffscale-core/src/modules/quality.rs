//! Merging statistics of scaled intensities.

use crate::common::IntegrationMethod;
use crate::domain::{ScalingError, ScalingResult};
use crate::modules::weighting::select_intensities;
use crate::numerics::stable_sum_iter;
use crate::reflections::{MillerIndex, ReflectionTable, SpaceGroup, columns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergingStatistics {
    pub n_observations: usize,
    pub n_unique: usize,
    pub multiplicity: f64,
    /// Multiplicity-independent R factor, `None` without any repeated reflection.
    pub r_meas: Option<f64>,
    /// Precision-indicating R factor.
    pub r_pim: Option<f64>,
    /// Mean of I/σ(I) over the merged reflections.
    pub mean_i_over_sigma: f64,
}

/// Statistics over the `intensity`, `variance`, `asu_miller_index` and
/// `inverse_scale_factor` columns. Rows with a non-positive scale factor or
/// variance are ignored.
pub fn merging_statistics(table: &ReflectionTable) -> ScalingResult<MergingStatistics> {
    let intensity = table.doubles(columns::INTENSITY)?;
    let variance = table.doubles(columns::VARIANCE)?;
    let indices = table.millers(columns::ASU_MILLER_INDEX)?;
    let scales = table.doubles(columns::INVERSE_SCALE_FACTOR)?;

    let mut groups: BTreeMap<MillerIndex, Vec<(f64, f64)>> = BTreeMap::new();
    for row in 0..table.len() {
        let g = scales[row];
        if g <= 0.0 || variance[row] <= 0.0 || !g.is_finite() {
            continue;
        }
        groups
            .entry(indices[row])
            .or_default()
            .push((intensity[row] / g, variance[row] / (g * g)));
    }
    let n_observations = groups.values().map(Vec::len).sum::<usize>();
    if n_observations == 0 {
        return Err(ScalingError::insufficient_data(
            "QUALITY.NO_OBSERVATIONS",
            "no scaled observation has a positive scale factor and variance",
        ));
    }

    let mut meas_terms = Vec::new();
    let mut pim_terms = Vec::new();
    let mut total_terms = Vec::new();
    let mut i_over_sigma = Vec::with_capacity(groups.len());
    for observations in groups.values() {
        let n = observations.len() as f64;
        let mean = stable_sum_iter(observations.iter().map(|(i, _)| *i)) / n;
        let inverse_variance = stable_sum_iter(observations.iter().map(|(_, v)| 1.0 / v));
        let merged = stable_sum_iter(observations.iter().map(|(i, v)| i / v)) / inverse_variance;
        i_over_sigma.push(merged * inverse_variance.sqrt());

        if observations.len() < 2 {
            continue;
        }
        let deviation = stable_sum_iter(observations.iter().map(|(i, _)| (i - mean).abs()));
        meas_terms.push((n / (n - 1.0)).sqrt() * deviation);
        pim_terms.push((1.0 / (n - 1.0)).sqrt() * deviation);
        total_terms.extend(observations.iter().map(|(i, _)| *i));
    }

    let denominator = stable_sum_iter(total_terms);
    let ratio = |terms: Vec<f64>| (denominator > 0.0).then(|| stable_sum_iter(terms) / denominator);
    Ok(MergingStatistics {
        n_observations,
        n_unique: groups.len(),
        multiplicity: n_observations as f64 / groups.len() as f64,
        r_meas: ratio(meas_terms),
        r_pim: ratio(pim_terms),
        mean_i_over_sigma: stable_sum_iter(i_over_sigma.iter().copied()) / groups.len() as f64,
    })
}

/// Statistics of an exported table, which keeps only the input columns plus
/// `inverse_scale_factor`: intensities and asu indices are derived again.
pub fn merging_statistics_from_output(
    table: &ReflectionTable,
    space_group: &SpaceGroup,
    method: IntegrationMethod,
) -> ScalingResult<MergingStatistics> {
    let (intensity, variance) = select_intensities(table, method)?;
    let asu = table
        .millers(columns::MILLER_INDEX)?
        .iter()
        .map(|h| space_group.map_to_asu(*h))
        .collect();
    let mut derived = ReflectionTable::new();
    derived.set_doubles(columns::INTENSITY, intensity)?;
    derived.set_doubles(columns::VARIANCE, variance)?;
    derived.set_millers(columns::ASU_MILLER_INDEX, asu)?;
    derived.set_doubles(
        columns::INVERSE_SCALE_FACTOR,
        table.doubles(columns::INVERSE_SCALE_FACTOR)?.to_vec(),
    )?;
    merging_statistics(&derived)
}
