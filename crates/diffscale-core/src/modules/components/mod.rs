//! Parameterised scale-factor components.
//!
//! A component owns its parameters and the per-observation data it needs to
//! evaluate them (grid interpolation weights, resolution, bin indices). The
//! observation data is bound from a reflection table and is not persisted;
//! it is rebuilt by [`ScaleComponent::set_normalised_values`].

pub mod smoother;

pub use smoother::{GridAxis, grid_size, interpolation_basis};

use crate::common::SmoothingKernel;
use crate::domain::{ComponentKind, Parameterisation, ScalingError, ScalingResult};
use crate::numerics::{DerivativeMatrix, stable_sum_iter};
use crate::reflections::{ReflectionTable, columns};
use faer::sparse::Triplet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentShape {
    /// One overall scale parameter.
    SingleScale,
    /// One relative B factor, `exp(B/2d²)`.
    SingleB,
    Smooth1D,
    /// Smoothly varying B factor over one axis.
    SmoothB1D,
    Smooth2D,
    Smooth3D,
    /// One independent parameter per bin.
    Binned,
}

impl ComponentShape {
    pub const fn is_b_factor(self) -> bool {
        matches!(self, Self::SingleB | Self::SmoothB1D)
    }

    pub const fn n_axes(self) -> usize {
        match self {
            Self::SingleScale | Self::SingleB | Self::Binned => 0,
            Self::Smooth1D | Self::SmoothB1D => 1,
            Self::Smooth2D => 2,
            Self::Smooth3D => 3,
        }
    }
}

/// Component values with first and (for B factors) second derivatives
/// with respect to the component's own parameters.
#[derive(Debug, Clone)]
pub struct ComponentValues {
    pub values: Vec<f64>,
    pub derivatives: DerivativeMatrix,
    pub curvatures: Option<DerivativeMatrix>,
}

#[derive(Debug, Clone, Default)]
struct BoundObservations {
    n_obs: usize,
    inverse_two_d_squared: Vec<f64>,
    /// Interpolation weights (smooth) or bin indicators (binned), `n_obs × n_params`.
    basis: Option<DerivativeMatrix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleComponent {
    shape: ComponentShape,
    parameterisation: Parameterisation,
    kernel: SmoothingKernel,
    axes: Vec<GridAxis>,
    /// Table columns holding the normalised coordinate per axis, or the bin index.
    coordinate_columns: Vec<String>,
    parameters: Vec<f64>,
    #[serde(skip)]
    bound: BoundObservations,
}

impl ScaleComponent {
    pub fn single_scale(parameterisation: Parameterisation) -> Self {
        Self::build(
            ComponentShape::SingleScale,
            parameterisation,
            SmoothingKernel::Linear,
            Vec::new(),
            Vec::new(),
            1,
        )
    }

    pub fn single_b(parameterisation: Parameterisation) -> Self {
        Self::build(
            ComponentShape::SingleB,
            parameterisation,
            SmoothingKernel::Linear,
            Vec::new(),
            Vec::new(),
            1,
        )
    }

    /// Smooth grid component over the named normalised-coordinate columns of
    /// `table`. The grid is fixed here and never resized afterwards.
    pub fn smooth(
        shape: ComponentShape,
        parameterisation: Parameterisation,
        kernel: SmoothingKernel,
        table: &ReflectionTable,
        coordinate_columns: &[&str],
    ) -> ScalingResult<Self> {
        if shape.n_axes() == 0 || shape.n_axes() != coordinate_columns.len() {
            return Err(ScalingError::internal(
                "COMPONENT.SHAPE",
                format!(
                    "{shape:?} needs {} coordinate columns, got {}",
                    shape.n_axes(),
                    coordinate_columns.len()
                ),
            ));
        }
        let mut axes = Vec::with_capacity(coordinate_columns.len());
        for name in coordinate_columns {
            axes.push(GridAxis::spanning(table.doubles(name)?, kernel)?);
        }
        let n_params = grid_size(&axes);
        Ok(Self::build(
            shape,
            parameterisation,
            kernel,
            axes,
            coordinate_columns.iter().map(|name| name.to_string()).collect(),
            n_params,
        ))
    }

    /// One parameter per bin; `bin_column` holds integer bin indices in `0..n_bins`.
    pub fn binned(parameterisation: Parameterisation, bin_column: &str, n_bins: usize) -> Self {
        Self::build(
            ComponentShape::Binned,
            parameterisation,
            SmoothingKernel::Linear,
            Vec::new(),
            vec![bin_column.to_string()],
            n_bins,
        )
    }

    fn build(
        shape: ComponentShape,
        parameterisation: Parameterisation,
        kernel: SmoothingKernel,
        axes: Vec<GridAxis>,
        coordinate_columns: Vec<String>,
        n_params: usize,
    ) -> Self {
        let initial = if shape.is_b_factor() {
            0.0
        } else {
            parameterisation.initial_scale_parameter()
        };
        Self {
            shape,
            parameterisation,
            kernel,
            axes,
            coordinate_columns,
            parameters: vec![initial; n_params],
            bound: BoundObservations::default(),
        }
    }

    pub fn shape(&self) -> ComponentShape {
        self.shape
    }

    pub fn parameterisation(&self) -> Parameterisation {
        self.parameterisation
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    pub fn n_params(&self) -> usize {
        self.parameters.len()
    }

    pub fn n_obs(&self) -> usize {
        self.bound.n_obs
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: &[f64]) -> ScalingResult<()> {
        if parameters.len() != self.parameters.len() {
            return Err(ScalingError::internal(
                "COMPONENT.PARAMETERS",
                format!(
                    "{:?} has {} parameters, got {}",
                    self.shape,
                    self.parameters.len(),
                    parameters.len()
                ),
            ));
        }
        self.parameters.copy_from_slice(parameters);
        Ok(())
    }

    /// Binds the component to the rows of `table`, replacing any earlier binding.
    /// Nothing changes if the table cannot be bound.
    pub fn set_normalised_values(&mut self, table: &ReflectionTable) -> ScalingResult<()> {
        let n_obs = table.len();
        let inverse_two_d_squared = if self.shape.is_b_factor() {
            table
                .doubles(columns::D)?
                .iter()
                .map(|d| 1.0 / (2.0 * d * d))
                .collect()
        } else {
            Vec::new()
        };

        let basis = match self.shape {
            ComponentShape::SingleScale | ComponentShape::SingleB => None,
            ComponentShape::Binned => Some(self.bin_indicators(table)?),
            _ => {
                let mut coordinates = Vec::with_capacity(self.coordinate_columns.len());
                for name in &self.coordinate_columns {
                    coordinates.push(table.doubles(name)?);
                }
                Some(interpolation_basis(&self.axes, &coordinates, self.kernel)?)
            }
        };

        self.bound = BoundObservations {
            n_obs,
            inverse_two_d_squared,
            basis,
        };
        Ok(())
    }

    fn bin_indicators(&self, table: &ReflectionTable) -> ScalingResult<DerivativeMatrix> {
        let name = self.coordinate_columns.first().ok_or_else(|| {
            ScalingError::internal("COMPONENT.SHAPE", "binned component without a bin column")
        })?;
        let bins = table.ints(name)?;
        let n_bins = self.n_params();
        let mut triplets = Vec::with_capacity(bins.len());
        for (row, bin) in bins.iter().enumerate() {
            let bin = usize::try_from(*bin)
                .ok()
                .filter(|bin| *bin < n_bins)
                .ok_or_else(|| {
                    ScalingError::binning(
                        "BINNING.UNASSIGNED",
                        format!("reflection {row} has bin index {bin} outside 0..{n_bins}"),
                    )
                })?;
            triplets.push(Triplet::new(row, bin, 1.0));
        }
        DerivativeMatrix::from_triplets(bins.len(), n_bins, &triplets)
    }

    /// Component values for the bound observations together with derivatives.
    pub fn calculate_scales_and_derivatives(&self) -> ScalingResult<ComponentValues> {
        let n_obs = self.bound.n_obs;
        let n_params = self.n_params();

        let (raw, raw_derivatives) = match (&self.bound.basis, self.shape) {
            (Some(basis), _) => (self.interpolate(basis), basis.clone()),
            (None, ComponentShape::SingleScale | ComponentShape::SingleB) => {
                let ones: Vec<_> = (0..n_obs).map(|row| Triplet::new(row, 0, 1.0)).collect();
                (
                    vec![self.parameters[0]; n_obs],
                    DerivativeMatrix::from_triplets(n_obs, n_params, &ones)?,
                )
            }
            (None, shape) => {
                return Err(ScalingError::internal(
                    "COMPONENT.UNBOUND",
                    format!("{shape:?} component has no bound observations"),
                ));
            }
        };

        if !self.shape.is_b_factor() {
            return Ok(ComponentValues {
                values: raw,
                derivatives: raw_derivatives,
                curvatures: None,
            });
        }

        // raw holds B per observation; the component value is exp(B/2d²) or B/2d².
        let factors = &self.bound.inverse_two_d_squared;
        match self.parameterisation {
            Parameterisation::Standard => {
                let values: Vec<f64> = raw
                    .iter()
                    .zip(factors)
                    .map(|(b, factor)| (b * factor).exp())
                    .collect();
                let first: Vec<f64> = values.iter().zip(factors).map(|(v, f)| v * f).collect();
                let second: Vec<f64> = first.iter().zip(factors).map(|(d, f)| d * f).collect();
                let derivatives = raw_derivatives.scale_rows(&first)?;
                let curvatures = squared_entries(&raw_derivatives)?.scale_rows(&second)?;
                Ok(ComponentValues {
                    values,
                    derivatives,
                    curvatures: Some(curvatures),
                })
            }
            Parameterisation::Log => Ok(ComponentValues {
                values: raw.iter().zip(factors).map(|(b, f)| b * f).collect(),
                derivatives: raw_derivatives.scale_rows(factors)?,
                curvatures: None,
            }),
        }
    }

    /// Component values only.
    pub fn calculate_scales(&self) -> ScalingResult<Vec<f64>> {
        Ok(self.calculate_scales_and_derivatives()?.values)
    }

    /// Least-squares fit of `ln p = intercept + slope·u` over the parameters,
    /// `u` being each node's coordinate on the first grid axis. The slope is
    /// zero unless `with_slope` is set and the nodes span more than one
    /// coordinate. `None` for B-factor shapes or when no parameter is positive.
    pub fn log_scale_trend(&self, with_slope: bool) -> Option<LogScaleTrend> {
        if self.shape.is_b_factor() {
            return None;
        }
        let points: Vec<(f64, f64)> = self
            .parameters
            .iter()
            .enumerate()
            .filter_map(|(index, p)| {
                let log = match self.parameterisation {
                    Parameterisation::Standard => (*p > 0.0 && p.is_finite()).then(|| p.ln())?,
                    Parameterisation::Log => *p,
                };
                Some((self.node_coordinate(index), log))
            })
            .collect();
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean_u = stable_sum_iter(points.iter().map(|(u, _)| *u)) / n;
        let mean_log = stable_sum_iter(points.iter().map(|(_, log)| *log)) / n;
        let spread = stable_sum_iter(points.iter().map(|(u, _)| (u - mean_u).powi(2)));
        let slope = if with_slope && spread > 0.0 {
            stable_sum_iter(
                points
                    .iter()
                    .map(|(u, log)| (u - mean_u) * (log - mean_log)),
            ) / spread
        } else {
            0.0
        };
        Some(LogScaleTrend {
            intercept: mean_log - slope * mean_u,
            slope,
        })
    }

    /// Divides every parameter node by `exp(intercept + slope·u)`.
    pub fn remove_log_scale_trend(&mut self, trend: LogScaleTrend) {
        let offsets: Vec<f64> = (0..self.parameters.len())
            .map(|index| trend.at(self.node_coordinate(index)))
            .collect();
        for (p, offset) in self.parameters.iter_mut().zip(offsets) {
            match self.parameterisation {
                Parameterisation::Standard => *p *= (-offset).exp(),
                Parameterisation::Log => *p -= offset,
            }
        }
    }

    fn node_coordinate(&self, index: usize) -> f64 {
        self.axes.first().map_or(0.0, |axis| {
            (axis.lowest_node + (index % axis.n_nodes) as i64) as f64
        })
    }

    fn interpolate(&self, basis: &DerivativeMatrix) -> Vec<f64> {
        (0..basis.nrows())
            .map(|row| {
                basis
                    .row(row)
                    .map(|(col, weight)| weight * self.parameters[col])
                    .sum()
            })
            .collect()
    }
}

/// Linear trend of a component's log-parameters along its first grid axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogScaleTrend {
    pub intercept: f64,
    pub slope: f64,
}

impl LogScaleTrend {
    pub fn at(&self, coordinate: f64) -> f64 {
        self.intercept + self.slope * coordinate
    }
}

fn squared_entries(matrix: &DerivativeMatrix) -> ScalingResult<DerivativeMatrix> {
    let mut triplets = Vec::with_capacity(matrix.nnz());
    for row in 0..matrix.nrows() {
        for (col, value) in matrix.row(row) {
            triplets.push(Triplet::new(row, col, value * value));
        }
    }
    DerivativeMatrix::from_triplets(matrix.nrows(), matrix.ncols(), &triplets)
}

/// The components of one scaling model, keyed and ordered by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingComponents {
    components: BTreeMap<ComponentKind, ScaleComponent>,
}

impl ScalingComponents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ComponentKind, component: ScaleComponent) {
        self.components.insert(kind, component);
    }

    pub fn get(&self, kind: ComponentKind) -> ScalingResult<&ScaleComponent> {
        self.components.get(&kind).ok_or_else(|| missing_component(kind))
    }

    pub fn get_mut(&mut self, kind: ComponentKind) -> ScalingResult<&mut ScaleComponent> {
        self.components
            .get_mut(&kind)
            .ok_or_else(|| missing_component(kind))
    }

    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.components.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.components.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentKind, &ScaleComponent)> {
        self.components.iter().map(|(kind, component)| (*kind, component))
    }

    /// Binds every component to `table`. Either all components are rebound or none is.
    pub fn set_normalised_values(&mut self, table: &ReflectionTable) -> ScalingResult<()> {
        let mut rebound = self.components.clone();
        for component in rebound.values_mut() {
            component.set_normalised_values(table)?;
        }
        self.components = rebound;
        Ok(())
    }
}

fn missing_component(kind: ComponentKind) -> ScalingError {
    ScalingError::internal(
        "COMPONENT.MISSING",
        format!("no {kind} component has been created"),
    )
}
