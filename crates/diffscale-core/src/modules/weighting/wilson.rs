use crate::common::constants::{
    ACENTRIC_E2_CUTOFF, CENTRIC_E2_CUTOFF, MAX_WILSON_BINS, MIN_REFLECTIONS_PER_WILSON_BIN,
};
use crate::domain::{ScalingError, ScalingResult};
use crate::numerics::{finite_extent, stable_weighted_mean};
use crate::reflections::{MillerIndex, SpaceGroup};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct WilsonOutliers {
    pub outlier: Vec<bool>,
    pub centric: Vec<bool>,
    /// Normalised intensity E² per row; zero where the bin mean is not positive.
    pub normalised_intensity: Vec<f64>,
}

impl WilsonOutliers {
    pub fn count(&self) -> usize {
        self.outlier.iter().filter(|flag| **flag).count()
    }
}

/// Flags reflections whose normalised intensity E² = (I/ε)/⟨I/ε⟩ is improbably
/// large for a Wilson distribution. Means are taken over equal-width bins of
/// 1/d², with at most [`MAX_WILSON_BINS`] bins.
pub fn calculate_wilson_outliers(
    intensity: &[f64],
    d: &[f64],
    indices: &[MillerIndex],
    space_group: &SpaceGroup,
) -> ScalingResult<WilsonOutliers> {
    let n = intensity.len();
    if d.len() != n || indices.len() != n {
        return Err(ScalingError::internal(
            "WEIGHTING.SHAPE",
            "intensity, d and miller index columns differ in length",
        ));
    }

    let centric: Vec<bool> = indices.iter().map(|h| space_group.is_centric(*h)).collect();
    let corrected: Vec<f64> = intensity
        .iter()
        .zip(indices)
        .map(|(i, h)| i / space_group.epsilon(*h).max(1) as f64)
        .collect();
    let inverse_d_squared: Vec<f64> = d.iter().map(|d| 1.0 / (d * d)).collect();

    let n_bins = (n / MIN_REFLECTIONS_PER_WILSON_BIN).clamp(1, MAX_WILSON_BINS);
    let bins = match finite_extent(&inverse_d_squared) {
        Some((low, high)) if high > low => {
            let width = (high - low) / n_bins as f64;
            inverse_d_squared
                .iter()
                .map(|s| {
                    if s.is_finite() {
                        (((s - low) / width) as usize).min(n_bins - 1)
                    } else {
                        0
                    }
                })
                .collect()
        }
        _ => vec![0; n],
    };

    let mut bin_values = vec![Vec::new(); n_bins];
    for (row, bin) in bins.iter().enumerate() {
        bin_values[*bin].push(corrected[row]);
    }
    let bin_means: Vec<f64> = bin_values
        .iter()
        .map(|values| {
            let ones = vec![1.0; values.len()];
            stable_weighted_mean(values, &ones).unwrap_or(0.0)
        })
        .collect();

    let mut outlier = vec![false; n];
    let mut normalised_intensity = vec![0.0; n];
    for row in 0..n {
        let mean = bin_means[bins[row]];
        if mean <= 0.0 {
            continue;
        }
        let e_squared = corrected[row] / mean;
        normalised_intensity[row] = e_squared;
        let cutoff = if centric[row] {
            CENTRIC_E2_CUTOFF
        } else {
            ACENTRIC_E2_CUTOFF
        };
        outlier[row] = e_squared > cutoff;
    }

    let result = WilsonOutliers {
        outlier,
        centric,
        normalised_intensity,
    };
    debug!(
        reflections = n,
        bins = n_bins,
        outliers = result.count(),
        "wilson outlier test"
    );
    Ok(result)
}
