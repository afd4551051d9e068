//! Grid axes and interpolation kernels for the smooth components.

use crate::common::SmoothingKernel;
use crate::domain::{ScalingError, ScalingResult};
use crate::numerics::{DerivativeMatrix, finite_extent};
use faer::sparse::Triplet;
use serde::{Deserialize, Serialize};

/// One axis of a parameter grid. Node `j` sits at normalised coordinate
/// `lowest_node + j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridAxis {
    pub lowest_node: i64,
    pub n_nodes: usize,
}

impl GridAxis {
    /// Smallest grid covering `values` with the kernel's margins.
    pub fn spanning(values: &[f64], kernel: SmoothingKernel) -> ScalingResult<Self> {
        let (min, max) = finite_extent(values).ok_or_else(|| {
            ScalingError::binning(
                "BINNING.EMPTY_AXIS",
                "cannot place a grid over an axis without finite coordinates",
            )
        })?;
        if values.iter().any(|value| !value.is_finite()) {
            return Err(ScalingError::binning(
                "BINNING.NON_FINITE",
                "normalised coordinates must be finite",
            ));
        }
        let (lower, upper) = kernel.margins();
        let lowest_node = min.floor() as i64 - lower;
        let highest_node = max.floor() as i64 + upper;
        Ok(Self {
            lowest_node,
            n_nodes: (highest_node - lowest_node + 1) as usize,
        })
    }

    /// Normalised kernel weights of the nodes around `coordinate`.
    pub fn node_weights(
        &self,
        coordinate: f64,
        kernel: SmoothingKernel,
    ) -> ScalingResult<Vec<(usize, f64)>> {
        let position = coordinate - self.lowest_node as f64;
        let weights = match kernel {
            SmoothingKernel::Linear => {
                let base = position.floor();
                let fraction = position - base;
                let node = self.checked_node(base as i64, coordinate)?;
                let next = self.checked_node(base as i64 + 1, coordinate)?;
                vec![(node, 1.0 - fraction), (next, fraction)]
            }
            SmoothingKernel::Gaussian { variance, window } => {
                let first = (position - window).floor() as i64 + 1;
                let last = (position + window).floor() as i64;
                let mut weights = Vec::with_capacity((last - first + 1).max(0) as usize);
                for node in first..=last {
                    let index = self.checked_node(node, coordinate)?;
                    let offset = position - node as f64;
                    weights.push((index, (-(offset * offset) / variance).exp()));
                }
                let total: f64 = weights.iter().map(|(_, weight)| weight).sum();
                if total <= 0.0 {
                    return Err(ScalingError::binning(
                        "BINNING.OUT_OF_GRID",
                        format!("no grid nodes within the smoothing window of {coordinate}"),
                    ));
                }
                weights
                    .into_iter()
                    .map(|(index, weight)| (index, weight / total))
                    .collect()
            }
        };
        Ok(weights)
    }

    fn checked_node(&self, node: i64, coordinate: f64) -> ScalingResult<usize> {
        usize::try_from(node)
            .ok()
            .filter(|index| *index < self.n_nodes)
            .ok_or_else(|| {
                ScalingError::binning(
                    "BINNING.OUT_OF_GRID",
                    format!(
                        "coordinate {coordinate} lies outside the grid [{}, {}]",
                        self.lowest_node,
                        self.lowest_node + self.n_nodes as i64 - 1
                    ),
                )
            })
    }
}

pub fn grid_size(axes: &[GridAxis]) -> usize {
    axes.iter().map(|axis| axis.n_nodes).product()
}

/// Interpolation weights of every observation as an `n_obs × grid_size` matrix.
/// Axis 0 varies fastest in the flattened parameter index. Every row sums to 1.
pub fn interpolation_basis(
    axes: &[GridAxis],
    coordinates: &[&[f64]],
    kernel: SmoothingKernel,
) -> ScalingResult<DerivativeMatrix> {
    if axes.len() != coordinates.len() {
        return Err(ScalingError::internal(
            "COMPONENT.AXES",
            format!(
                "{} grid axes but {} coordinate columns",
                axes.len(),
                coordinates.len()
            ),
        ));
    }
    let n_obs = coordinates.first().map_or(0, |values| values.len());
    if coordinates.iter().any(|values| values.len() != n_obs) {
        return Err(ScalingError::internal(
            "COMPONENT.AXES",
            "coordinate columns differ in length",
        ));
    }

    let mut triplets = Vec::new();
    for row in 0..n_obs {
        let mut entries: Vec<(usize, f64)> = vec![(0, 1.0)];
        let mut stride = 1;
        for (axis, values) in axes.iter().zip(coordinates) {
            let axis_weights = axis.node_weights(values[row], kernel)?;
            entries = entries
                .iter()
                .flat_map(|&(index, weight)| {
                    axis_weights
                        .iter()
                        .map(move |&(node, node_weight)| (index + node * stride, weight * node_weight))
                })
                .filter(|(_, weight)| *weight != 0.0)
                .collect();
            stride *= axis.n_nodes;
        }
        triplets.extend(
            entries
                .into_iter()
                .map(|(col, weight)| Triplet::new(row, col, weight)),
        );
    }
    DerivativeMatrix::from_triplets(n_obs, grid_size(axes), &triplets)
}
