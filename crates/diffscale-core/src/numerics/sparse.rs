//! Row-major sparse matrices used for per-observation derivatives and Jacobians.
//!
//! Rows are observations and columns are parameters. Matrices are assembled
//! from triplets with unique (row, col) pairs; [`RowAccumulator`] merges
//! repeated contributions before assembly.

use crate::domain::{ScalingError, ScalingResult};
use faer::Mat;
use faer::sparse::{SparseColMat, SparseRowMat, Triplet};
use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct DerivativeMatrix {
    inner: SparseRowMat<usize, f64>,
}

impl DerivativeMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> ScalingResult<Self> {
        Self::from_triplets(nrows, ncols, &[])
    }

    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[Triplet<usize, usize, f64>],
    ) -> ScalingResult<Self> {
        SparseRowMat::try_new_from_triplets(nrows, ncols, triplets)
            .map(|inner| Self { inner })
            .map_err(|err| {
                ScalingError::internal(
                    "NUMERIC.SPARSE_ASSEMBLY",
                    format!("failed to assemble {nrows}x{ncols} sparse matrix: {err:?}"),
                )
            })
    }

    /// Builds a matrix from one entry list per row.
    pub fn from_rows(ncols: usize, rows: &[Vec<(usize, f64)>]) -> ScalingResult<Self> {
        let mut triplets = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for (row, entries) in rows.iter().enumerate() {
            for &(col, value) in entries {
                triplets.push(Triplet::new(row, col, value));
            }
        }
        Self::from_triplets(rows.len(), ncols, &triplets)
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn nnz(&self) -> usize {
        let (symbolic, _) = self.inner.parts();
        let row_ptr = symbolic.row_ptr();
        row_ptr[self.nrows()] - row_ptr[0]
    }

    pub fn as_faer(&self) -> &SparseRowMat<usize, f64> {
        &self.inner
    }

    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (symbolic, values) = self.inner.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        (row_ptr[row]..row_ptr[row + 1]).map(move |idx| (col_idx[idx], values[idx]))
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row)
            .filter(|(entry_col, _)| *entry_col == col)
            .map(|(_, value)| value)
            .sum()
    }

    /// Multiplies every row by the matching factor.
    pub fn scale_rows(&self, factors: &[f64]) -> ScalingResult<Self> {
        if factors.len() != self.nrows() {
            return Err(ScalingError::internal(
                "NUMERIC.SPARSE_SHAPE",
                format!(
                    "row factor length {} does not match {} rows",
                    factors.len(),
                    self.nrows()
                ),
            ));
        }
        let mut triplets = Vec::with_capacity(self.nnz());
        for (row, factor) in factors.iter().enumerate() {
            for (col, value) in self.row(row) {
                triplets.push(Triplet::new(row, col, value * factor));
            }
        }
        Self::from_triplets(self.nrows(), self.ncols(), &triplets)
    }

    /// Rows `range` as a new matrix with rows renumbered from zero.
    pub fn select_rows(&self, range: Range<usize>) -> ScalingResult<Self> {
        let mut triplets = Vec::new();
        for (local, row) in range.clone().enumerate() {
            for (col, value) in self.row(row) {
                triplets.push(Triplet::new(local, col, value));
            }
        }
        Self::from_triplets(range.len(), self.ncols(), &triplets)
    }

    /// Stacks blocks of equal width on top of each other, in order.
    pub fn vstack(blocks: &[DerivativeMatrix], ncols: usize) -> ScalingResult<Self> {
        let mut triplets = Vec::new();
        let mut offset = 0;
        for block in blocks {
            for row in 0..block.nrows() {
                for (col, value) in block.row(row) {
                    triplets.push(Triplet::new(offset + row, col, value));
                }
            }
            offset += block.nrows();
        }
        Self::from_triplets(offset, ncols, &triplets)
    }

    /// Places blocks of equal height side by side, in order.
    pub fn hstack(blocks: &[DerivativeMatrix], nrows: usize) -> ScalingResult<Self> {
        let mut triplets = Vec::new();
        let mut offset = 0;
        for block in blocks {
            for row in 0..block.nrows().min(nrows) {
                for (col, value) in block.row(row) {
                    triplets.push(Triplet::new(row, offset + col, value));
                }
            }
            offset += block.ncols();
        }
        Self::from_triplets(nrows, offset, &triplets)
    }

    pub fn to_col_major(&self) -> ScalingResult<SparseColMat<usize, f64>> {
        let mut triplets = Vec::with_capacity(self.nnz());
        for row in 0..self.nrows() {
            for (col, value) in self.row(row) {
                triplets.push(Triplet::new(row, col, value));
            }
        }
        SparseColMat::try_new_from_triplets(self.nrows(), self.ncols(), &triplets).map_err(
            |err| {
                ScalingError::internal(
                    "NUMERIC.SPARSE_ASSEMBLY",
                    format!("failed to convert sparse matrix to column-major: {err:?}"),
                )
            },
        )
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut dense = Mat::<f64>::zeros(self.nrows(), self.ncols());
        for row in 0..self.nrows() {
            for (col, value) in self.row(row) {
                dense[(row, col)] += value;
            }
        }
        dense
    }

    /// Dense normal-equation terms `JᵀWJ` and `JᵀWr`.
    pub fn weighted_normal_equations(
        &self,
        weights: &[f64],
        residuals: &[f64],
    ) -> (Mat<f64>, Vec<f64>) {
        let ncols = self.ncols();
        let mut normal = Mat::<f64>::zeros(ncols, ncols);
        let mut rhs = vec![0.0; ncols];
        for row in 0..self.nrows() {
            let weight = weights[row];
            if weight == 0.0 {
                continue;
            }
            let entries: Vec<(usize, f64)> = self.row(row).collect();
            for &(col_a, value_a) in &entries {
                rhs[col_a] += weight * value_a * residuals[row];
                for &(col_b, value_b) in &entries {
                    normal[(col_a, col_b)] += weight * value_a * value_b;
                }
            }
        }
        (normal, rhs)
    }
}

/// Accumulates sparse row entries, merging repeated columns.
#[derive(Debug, Clone, Default)]
pub struct RowAccumulator {
    entries: BTreeMap<usize, f64>,
}

impl RowAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, col: usize, value: f64) {
        *self.entries.entry(col).or_insert(0.0) += value;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().map(|(col, value)| (*col, *value))
    }

    pub fn into_entries(self) -> Vec<(usize, f64)> {
        self.entries.into_iter().collect()
    }
}
