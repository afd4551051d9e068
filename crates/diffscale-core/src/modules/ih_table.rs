//! Grouping of observations by asymmetric-unit index and the weighted
//! estimate of each group's intensity, Ih = Σ(g·I·w) / Σ(g²·w).

use crate::domain::{ScalingError, ScalingResult};
use crate::numerics::{DerivativeMatrix, stable_group_sums};
use crate::reflections::MillerIndex;
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IhTable {
    asu_indices: Vec<MillerIndex>,
    intensities: Vec<f64>,
    weights: Vec<f64>,
    inverse_scale_factors: Vec<f64>,
    derivatives: Option<DerivativeMatrix>,
    ih_values: Vec<f64>,
    group_starts: Vec<usize>,
    group_of_row: Vec<usize>,
    blocks: Vec<BlockLayout>,
    fixed_ih: bool,
    degenerate_groups: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockLayout {
    rows: Range<usize>,
    groups: Range<usize>,
}

impl IhTable {
    /// Builds the table from rows already sorted by asu index. Rows are split
    /// into at most `n_blocks` contiguous, group-aligned blocks.
    pub fn new(
        asu_indices: Vec<MillerIndex>,
        intensities: Vec<f64>,
        weights: Vec<f64>,
        n_blocks: usize,
    ) -> ScalingResult<Self> {
        let n = asu_indices.len();
        if intensities.len() != n || weights.len() != n {
            return Err(ScalingError::internal(
                "IH_TABLE.SHAPE",
                format!(
                    "{n} indices, {} intensities and {} weights",
                    intensities.len(),
                    weights.len()
                ),
            ));
        }
        if let Some(row) = asu_indices.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(ScalingError::internal(
                "IH_TABLE.UNSORTED",
                format!("asu indices are not sorted at row {}", row + 1),
            ));
        }

        let mut group_starts = Vec::new();
        let mut group_of_row = Vec::with_capacity(n);
        for row in 0..n {
            if row == 0 || asu_indices[row] != asu_indices[row - 1] {
                group_starts.push(row);
            }
            group_of_row.push(group_starts.len() - 1);
        }
        let blocks = split_blocks(&group_starts, n, n_blocks.max(1));

        let mut table = Self {
            asu_indices,
            intensities,
            weights,
            inverse_scale_factors: vec![1.0; n],
            derivatives: None,
            ih_values: vec![0.0; n],
            group_starts,
            group_of_row,
            blocks,
            fixed_ih: false,
            degenerate_groups: 0,
        };
        table.calc_ih();
        Ok(table)
    }

    /// Table whose Ih values are supplied and never recomputed.
    pub fn with_fixed_ih(
        asu_indices: Vec<MillerIndex>,
        intensities: Vec<f64>,
        weights: Vec<f64>,
        ih_values: Vec<f64>,
        n_blocks: usize,
    ) -> ScalingResult<Self> {
        if ih_values.len() != asu_indices.len() {
            return Err(ScalingError::internal(
                "IH_TABLE.SHAPE",
                "fixed Ih values do not match the number of rows",
            ));
        }
        let mut table = Self::new(asu_indices, intensities, weights, n_blocks)?;
        table.ih_values = ih_values;
        table.fixed_ih = true;
        Ok(table)
    }

    /// Freezes the current Ih values.
    pub fn fix_ih(&mut self) {
        self.fixed_ih = true;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_ih
    }

    pub fn len(&self) -> usize {
        self.asu_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asu_indices.is_empty()
    }

    pub fn n_groups(&self) -> usize {
        self.group_starts.len()
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn group_starts(&self) -> &[usize] {
        &self.group_starts
    }

    pub fn asu_indices(&self) -> &[MillerIndex] {
        &self.asu_indices
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn inverse_scale_factors(&self) -> &[f64] {
        &self.inverse_scale_factors
    }

    pub fn derivatives(&self) -> Option<&DerivativeMatrix> {
        self.derivatives.as_ref()
    }

    pub fn ih_values(&self) -> &[f64] {
        &self.ih_values
    }

    /// Groups whose Σ(g²·w) was zero at the last Ih calculation.
    pub fn degenerate_groups(&self) -> usize {
        self.degenerate_groups
    }

    pub fn update_scale_factors(
        &mut self,
        inverse_scale_factors: Vec<f64>,
        derivatives: Option<DerivativeMatrix>,
    ) -> ScalingResult<()> {
        if inverse_scale_factors.len() != self.len() {
            return Err(ScalingError::internal(
                "IH_TABLE.SHAPE",
                format!(
                    "{} scale factors for {} rows",
                    inverse_scale_factors.len(),
                    self.len()
                ),
            ));
        }
        if let Some(matrix) = &derivatives
            && matrix.nrows() != self.len()
        {
            return Err(ScalingError::internal(
                "IH_TABLE.SHAPE",
                format!("{} derivative rows for {} rows", matrix.nrows(), self.len()),
            ));
        }
        self.inverse_scale_factors = inverse_scale_factors;
        self.derivatives = derivatives;
        Ok(())
    }

    /// Recomputes Ih for every group from the current scale factors.
    /// Groups with zero Σ(g²·w) get Ih = 0. Fixed tables are left unchanged.
    pub fn calc_ih(&mut self) {
        if self.fixed_ih {
            return;
        }
        let g = &self.inverse_scale_factors;
        let giw: Vec<f64> = (0..self.len())
            .map(|row| g[row] * self.intensities[row] * self.weights[row])
            .collect();
        let g2w: Vec<f64> = (0..self.len())
            .map(|row| g[row] * g[row] * self.weights[row])
            .collect();
        let numerators = stable_group_sums(&giw, &self.group_starts);
        let denominators = stable_group_sums(&g2w, &self.group_starts);

        let mut degenerate = 0;
        let group_ih: Vec<f64> = numerators
            .iter()
            .zip(&denominators)
            .map(|(numerator, denominator)| {
                if *denominator > 0.0 {
                    numerator / denominator
                } else {
                    degenerate += 1;
                    0.0
                }
            })
            .collect();
        for (row, group) in self.group_of_row.iter().enumerate() {
            self.ih_values[row] = group_ih[*group];
        }
        if degenerate != self.degenerate_groups {
            debug!(degenerate_groups = degenerate, "groups without weighted observations");
        }
        self.degenerate_groups = degenerate;
    }

    pub fn blocks(&self) -> impl Iterator<Item = IhBlock<'_>> {
        self.blocks.iter().map(move |layout| IhBlock {
            table: self,
            rows: layout.rows.clone(),
            groups: layout.groups.clone(),
        })
    }

    pub fn block(&self, id: usize) -> Option<IhBlock<'_>> {
        self.blocks.get(id).map(|layout| IhBlock {
            table: self,
            rows: layout.rows.clone(),
            groups: layout.groups.clone(),
        })
    }

    /// The whole table as one block.
    pub fn as_block(&self) -> IhBlock<'_> {
        IhBlock {
            table: self,
            rows: 0..self.len(),
            groups: 0..self.n_groups(),
        }
    }
}

/// Group-aligned boundaries at roughly equal row counts.
fn split_blocks(group_starts: &[usize], n_rows: usize, n_blocks: usize) -> Vec<BlockLayout> {
    if n_rows == 0 {
        return Vec::new();
    }
    let mut boundaries = vec![0_usize];
    for block in 1..n_blocks {
        let target = block * n_rows / n_blocks;
        let group = group_starts.partition_point(|start| *start < target);
        if group < group_starts.len() && group > *boundaries.last().unwrap_or(&0) {
            boundaries.push(group);
        }
    }
    boundaries.push(group_starts.len());

    boundaries
        .windows(2)
        .filter(|pair| pair[0] < pair[1])
        .map(|pair| {
            let row_end = group_starts.get(pair[1]).copied().unwrap_or(n_rows);
            BlockLayout {
                rows: group_starts[pair[0]]..row_end,
                groups: pair[0]..pair[1],
            }
        })
        .collect()
}

/// Read-only view of a contiguous, group-aligned range of rows.
#[derive(Debug, Clone)]
pub struct IhBlock<'a> {
    table: &'a IhTable,
    rows: Range<usize>,
    groups: Range<usize>,
}

impl<'a> IhBlock<'a> {
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn intensities(&self) -> &'a [f64] {
        &self.table.intensities[self.rows.clone()]
    }

    pub fn weights(&self) -> &'a [f64] {
        &self.table.weights[self.rows.clone()]
    }

    pub fn inverse_scale_factors(&self) -> &'a [f64] {
        &self.table.inverse_scale_factors[self.rows.clone()]
    }

    pub fn ih_values(&self) -> &'a [f64] {
        &self.table.ih_values[self.rows.clone()]
    }

    pub fn derivatives(&self) -> Option<&'a DerivativeMatrix> {
        self.table.derivatives.as_ref()
    }

    /// Group ranges local to this block.
    pub fn group_ranges(&self) -> Vec<Range<usize>> {
        let offset = self.rows.start;
        self.groups
            .clone()
            .map(|group| {
                let start = self.table.group_starts[group];
                let end = self
                    .table
                    .group_starts
                    .get(group + 1)
                    .copied()
                    .unwrap_or(self.table.len());
                start - offset..end - offset
            })
            .collect()
    }

    /// Derivative row of local row `row`, in table column space.
    pub fn derivative_row(&self, row: usize) -> Vec<(usize, f64)> {
        self.table
            .derivatives
            .as_ref()
            .map(|matrix| matrix.row(self.rows.start + row).collect())
            .unwrap_or_default()
    }
}
