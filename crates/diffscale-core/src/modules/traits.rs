use crate::domain::{ScalingError, ScalingResult};
use crate::modules::ih_table::IhBlock;
use crate::modules::refinement::RefinementOutcome;
use crate::modules::target::TargetEvaluation;
use crate::numerics::{DerivativeMatrix, RowAccumulator};

/// Residuals R = I − g·Ih of one block and their derivatives with respect to
/// the active parameters.
pub trait TargetFunction: Sync {
    fn name(&self) -> &'static str;

    fn calculate_residuals(&self, block: &IhBlock<'_>) -> Vec<f64> {
        let intensities = block.intensities();
        let scales = block.inverse_scale_factors();
        let ih = block.ih_values();
        (0..block.len())
            .map(|row| intensities[row] - scales[row] * ih[row])
            .collect()
    }

    /// Sparse ∂R/∂p with rows local to the block.
    fn calculate_jacobian(&self, block: &IhBlock<'_>) -> ScalingResult<DerivativeMatrix>;

    /// ∂(Σ w R²)/∂p = −2 Σ w R Ih ∂g/∂p. For the full target the Ih term
    /// vanishes because Σ w R g = 0 within every group.
    fn calculate_gradients(&self, block: &IhBlock<'_>) -> ScalingResult<Vec<f64>> {
        let derivatives = block_derivatives(block)?;
        let residuals = self.calculate_residuals(block);
        let weights = block.weights();
        let ih = block.ih_values();
        let mut gradient = RowAccumulator::new();
        for row in 0..block.len() {
            let factor = -2.0 * weights[row] * residuals[row] * ih[row];
            if factor == 0.0 {
                continue;
            }
            for (col, value) in block.derivative_row(row) {
                gradient.add(col, factor * value);
            }
        }
        let mut dense = vec![0.0; derivatives.ncols()];
        for (col, value) in gradient.iter() {
            dense[col] = value;
        }
        Ok(dense)
    }
}

pub(crate) fn block_derivatives<'a>(block: &IhBlock<'a>) -> ScalingResult<&'a DerivativeMatrix> {
    block.derivatives().ok_or_else(|| {
        ScalingError::internal(
            "TARGET.NO_DERIVATIVES",
            "scale factor derivatives are not available; no parameters are active",
        )
    })
}

/// A weighted least-squares problem over a flat parameter vector.
pub trait LeastSquaresProblem {
    fn parameters(&self) -> Vec<f64>;

    /// Residuals, weights and Jacobian at `x`. Implementations keep `x` as
    /// their current state after the call.
    fn evaluate(&mut self, x: &[f64]) -> ScalingResult<TargetEvaluation>;

    /// Whether the state left by the last `evaluate` may be accepted as a step.
    fn is_feasible(&self) -> bool {
        true
    }
}

pub trait LeastSquaresSolver {
    fn minimise(&self, problem: &mut dyn LeastSquaresProblem) -> ScalingResult<RefinementOutcome>;
}
