//! Least-squares targets over an Ih table.

pub mod finite_difference;

use crate::domain::{ScalingError, ScalingResult};
use crate::modules::ih_table::{IhBlock, IhTable};
use crate::modules::traits::{TargetFunction, block_derivatives};
use crate::numerics::{DerivativeMatrix, RowAccumulator, stable_sum_iter};
use faer::sparse::Triplet;
use rayon::prelude::*;

/// Target with Ih recomputed from the current scales: ∂R/∂p includes the
/// change of Ih with the parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalingTarget;

/// Target against fixed reference intensities: ∂R/∂p = −Ih·∂g/∂p.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalingTargetFixedIh;

impl TargetFunction for ScalingTarget {
    fn name(&self) -> &'static str {
        "full"
    }

    fn calculate_jacobian(&self, block: &IhBlock<'_>) -> ScalingResult<DerivativeMatrix> {
        let ncols = block_derivatives(block)?.ncols();
        let intensities = block.intensities();
        let weights = block.weights();
        let scales = block.inverse_scale_factors();
        let ih = block.ih_values();

        let mut triplets = Vec::new();
        for group in block.group_ranges() {
            // ∂Ih/∂p = Σ w(I − 2·Ih·g)∂g/∂p / Σ w g²
            let denominator = stable_sum_iter(
                group
                    .clone()
                    .map(|row| weights[row] * scales[row] * scales[row]),
            );
            let mut ih_derivative = RowAccumulator::new();
            if denominator > 0.0 {
                for row in group.clone() {
                    let factor = weights[row] * (intensities[row] - 2.0 * ih[row] * scales[row])
                        / denominator;
                    if factor == 0.0 {
                        continue;
                    }
                    for (col, value) in block.derivative_row(row) {
                        ih_derivative.add(col, factor * value);
                    }
                }
            }

            for row in group {
                let mut entries = RowAccumulator::new();
                for (col, value) in block.derivative_row(row) {
                    entries.add(col, -ih[row] * value);
                }
                for (col, value) in ih_derivative.iter() {
                    entries.add(col, -scales[row] * value);
                }
                triplets.extend(
                    entries
                        .iter()
                        .map(|(col, value)| Triplet::new(row, col, value)),
                );
            }
        }
        DerivativeMatrix::from_triplets(block.len(), ncols, &triplets)
    }
}

impl TargetFunction for ScalingTargetFixedIh {
    fn name(&self) -> &'static str {
        "fixed_ih"
    }

    fn calculate_jacobian(&self, block: &IhBlock<'_>) -> ScalingResult<DerivativeMatrix> {
        let ncols = block_derivatives(block)?.ncols();
        let ih = block.ih_values();
        let mut triplets = Vec::new();
        for row in 0..block.len() {
            for (col, value) in block.derivative_row(row) {
                triplets.push(Triplet::new(row, col, -ih[row] * value));
            }
        }
        DerivativeMatrix::from_triplets(block.len(), ncols, &triplets)
    }
}

/// Residuals, weights and Jacobian of a whole table, assembled block by block.
#[derive(Debug, Clone)]
pub struct TargetEvaluation {
    pub residuals: Vec<f64>,
    pub weights: Vec<f64>,
    pub jacobian: DerivativeMatrix,
    pub gradients: Vec<f64>,
    /// Σ w R²
    pub cost: f64,
    /// Every residual is exactly zero.
    pub degenerate: bool,
}

impl TargetEvaluation {
    pub fn rmsd(&self) -> f64 {
        weighted_rmsd(&self.residuals, &self.weights)
    }
}

pub fn calculate_residuals<T: TargetFunction>(target: &T, table: &IhTable) -> Vec<f64> {
    let blocks: Vec<IhBlock<'_>> = table.blocks().collect();
    blocks
        .par_iter()
        .map(|block| target.calculate_residuals(block))
        .collect::<Vec<_>>()
        .concat()
}

/// Jacobian of every block, computed in parallel and stacked in block order.
pub fn calculate_jacobian<T: TargetFunction>(
    target: &T,
    table: &IhTable,
) -> ScalingResult<DerivativeMatrix> {
    let ncols = table
        .derivatives()
        .map(DerivativeMatrix::ncols)
        .ok_or_else(|| {
            ScalingError::internal(
                "TARGET.NO_DERIVATIVES",
                "scale factor derivatives are not available; no parameters are active",
            )
        })?;
    let blocks: Vec<IhBlock<'_>> = table.blocks().collect();
    let parts = blocks
        .par_iter()
        .map(|block| target.calculate_jacobian(block))
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<ScalingResult<Vec<_>>>()?;
    DerivativeMatrix::vstack(&parts, ncols)
}

pub fn calculate_gradients<T: TargetFunction>(
    target: &T,
    table: &IhTable,
) -> ScalingResult<Vec<f64>> {
    let blocks: Vec<IhBlock<'_>> = table.blocks().collect();
    let parts = blocks
        .par_iter()
        .map(|block| target.calculate_gradients(block))
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<ScalingResult<Vec<_>>>()?;
    let ncols = table.derivatives().map_or(0, DerivativeMatrix::ncols);
    let mut total = vec![0.0; ncols];
    for part in parts {
        for (sum, value) in total.iter_mut().zip(part) {
            *sum += value;
        }
    }
    Ok(total)
}

pub fn evaluate<T: TargetFunction>(target: &T, table: &IhTable) -> ScalingResult<TargetEvaluation> {
    let residuals = calculate_residuals(target, table);
    let jacobian = calculate_jacobian(target, table)?;
    let gradients = calculate_gradients(target, table)?;
    let weights = table.weights().to_vec();
    let cost = weighted_cost(&residuals, &weights);
    let degenerate = is_degenerate(&residuals);
    Ok(TargetEvaluation {
        residuals,
        weights,
        jacobian,
        gradients,
        cost,
        degenerate,
    })
}

/// sqrt(Σ w R² / n) over the whole table.
pub fn rmsds<T: TargetFunction>(target: &T, table: &IhTable) -> f64 {
    weighted_rmsd(&calculate_residuals(target, table), table.weights())
}

pub fn weighted_cost(residuals: &[f64], weights: &[f64]) -> f64 {
    stable_sum_iter(residuals.iter().zip(weights).map(|(r, w)| w * r * r))
}

fn weighted_rmsd(residuals: &[f64], weights: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    (weighted_cost(residuals, weights) / residuals.len() as f64).sqrt()
}

pub fn is_degenerate(residuals: &[f64]) -> bool {
    residuals.iter().all(|residual| *residual == 0.0)
}
