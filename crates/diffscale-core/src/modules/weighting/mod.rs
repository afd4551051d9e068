//! Observation weights for scaling.

mod wilson;

pub use wilson::{WilsonOutliers, calculate_wilson_outliers};

use crate::common::IntegrationMethod;
use crate::domain::{ScalingError, ScalingResult};
use crate::reflections::{ReflectionTable, columns};

/// Corrected intensities and variances for the chosen integration method:
/// `I·lp/dqe` and `V·lp²/dqe²`. Missing `lp` or `dqe` columns count as 1.
pub fn select_intensities(
    table: &ReflectionTable,
    method: IntegrationMethod,
) -> ScalingResult<(Vec<f64>, Vec<f64>)> {
    let prefix = method.column_prefix();
    let raw_intensity = table.doubles(&columns::intensity_value(prefix))?;
    let raw_variance = table.doubles(&columns::intensity_variance(prefix))?;
    let lp = table.doubles_or(columns::LP, 1.0)?;
    let dqe = table.doubles_or(columns::DQE, 1.0)?;

    if let Some(row) = dqe.iter().position(|value| *value == 0.0) {
        return Err(ScalingError::computation(
            "NUMERIC.ZERO_DQE",
            format!("reflection {row} has a zero detector quantum efficiency"),
        ));
    }

    let intensity = raw_intensity
        .iter()
        .zip(&lp)
        .zip(&dqe)
        .map(|((i, lp), dqe)| i * lp / dqe)
        .collect();
    let variance = raw_variance
        .iter()
        .zip(&lp)
        .zip(&dqe)
        .map(|((v, lp), dqe)| v * lp * lp / (dqe * dqe))
        .collect();
    Ok((intensity, variance))
}

/// Per-row weights from the `intensity`, `variance` and `d` columns.
///
/// A row gets weight zero when its variance is not positive, I/σ(I) is below
/// `isigma_min`, d is below `d_min`, or it carries a Wilson outlier flag;
/// every other row gets `1/variance`.
pub fn compute_weights(
    table: &ReflectionTable,
    isigma_min: f64,
    d_min: f64,
) -> ScalingResult<Vec<f64>> {
    let intensity = table.doubles(columns::INTENSITY)?;
    let variance = table.doubles(columns::VARIANCE)?;
    let d = table.doubles(columns::D)?;
    let outliers = if table.contains(columns::WILSON_OUTLIER_FLAG) {
        Some(table.bools(columns::WILSON_OUTLIER_FLAG)?)
    } else {
        None
    };

    Ok((0..table.len())
        .map(|row| {
            let variance = variance[row];
            if !variance.is_finite() || variance <= 0.0 {
                return 0.0;
            }
            if intensity[row] / variance.sqrt() < isigma_min || d[row] < d_min {
                return 0.0;
            }
            if outliers.is_some_and(|flags| flags[row]) {
                return 0.0;
            }
            1.0 / variance
        })
        .collect())
}
