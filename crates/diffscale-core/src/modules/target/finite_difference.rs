//! Central-difference checks of analytic derivatives.
//!
//! Each helper takes a closure that moves the model to a parameter vector and
//! returns the quantity being differentiated. The model is restored to `x`
//! before returning.

use crate::domain::{ScalingError, ScalingResult};
use crate::modules::target::is_degenerate;
use faer::Mat;

/// Central-difference Jacobian ∂R/∂x, `residuals.len() × x.len()`.
pub fn jacobian<F>(x: &[f64], step: f64, mut residuals_at: F) -> ScalingResult<Mat<f64>>
where
    F: FnMut(&[f64]) -> ScalingResult<Vec<f64>>,
{
    let base = residuals_at(x)?;
    refuse_degenerate(&base)?;

    let mut jacobian = Mat::<f64>::zeros(base.len(), x.len());
    let mut shifted = x.to_vec();
    for col in 0..x.len() {
        shifted[col] = x[col] - 0.5 * step;
        let lower = residuals_at(&shifted)?;
        shifted[col] = x[col] + 0.5 * step;
        let upper = residuals_at(&shifted)?;
        shifted[col] = x[col];
        if lower.len() != base.len() || upper.len() != base.len() {
            return Err(ScalingError::internal(
                "VALIDATION.SHAPE",
                "residual count changed while differencing",
            ));
        }
        for row in 0..base.len() {
            jacobian[(row, col)] = (upper[row] - lower[row]) / step;
        }
    }
    residuals_at(x)?;
    Ok(jacobian)
}

/// Central-difference gradient of Σ w R², given weighted-cost inputs.
pub fn gradient<F>(x: &[f64], step: f64, mut residuals_and_weights_at: F) -> ScalingResult<Vec<f64>>
where
    F: FnMut(&[f64]) -> ScalingResult<(Vec<f64>, Vec<f64>)>,
{
    let (base, _) = residuals_and_weights_at(x)?;
    refuse_degenerate(&base)?;

    let mut cost_at = |point: &[f64]| -> ScalingResult<f64> {
        let (residuals, weights) = residuals_and_weights_at(point)?;
        Ok(super::weighted_cost(&residuals, &weights))
    };
    let mut gradient = vec![0.0; x.len()];
    let mut shifted = x.to_vec();
    for (col, value) in gradient.iter_mut().enumerate() {
        shifted[col] = x[col] - 0.5 * step;
        let lower = cost_at(&shifted)?;
        shifted[col] = x[col] + 0.5 * step;
        let upper = cost_at(&shifted)?;
        shifted[col] = x[col];
        *value = (upper - lower) / step;
    }
    cost_at(x)?;
    Ok(gradient)
}

fn refuse_degenerate(residuals: &[f64]) -> ScalingResult<()> {
    if is_degenerate(residuals) {
        return Err(ScalingError::computation(
            "VALIDATION.DEGENERATE_RESIDUALS",
            "all residuals are zero; a finite-difference check would be vacuous",
        ));
    }
    Ok(())
}
