//! Combination of component values into one inverse scale factor per observation.

use crate::domain::{Parameterisation, ScalingError, ScalingResult};
use crate::modules::apm::ActiveParameterManager;
use crate::modules::components::{ComponentValues, ScalingComponents};
use crate::numerics::DerivativeMatrix;
use faer::sparse::Triplet;

#[derive(Debug, Clone)]
pub struct BasisFunctionResult {
    pub inverse_scale_factors: Vec<f64>,
    /// ∂g/∂p, columns in apm order; `None` when no parameter is active.
    pub derivatives: Option<DerivativeMatrix>,
    /// ∂²g/∂p² per parameter, same layout as `derivatives`.
    pub curvatures: Option<DerivativeMatrix>,
}

/// Inverse scale factors of the bound observations under the current
/// component parameters. Components active in `apm` contribute derivative
/// columns at their apm offset; inactive components contribute values only.
pub fn update_scale_factors(
    components: &ScalingComponents,
    apm: &ActiveParameterManager,
    parameterisation: Parameterisation,
) -> ScalingResult<BasisFunctionResult> {
    let mut evaluated: Vec<(Option<usize>, ComponentValues)> = Vec::with_capacity(components.len());
    let mut n_obs = None;
    for (kind, component) in components.iter() {
        let values = component.calculate_scales_and_derivatives()?;
        match n_obs {
            None => n_obs = Some(values.values.len()),
            Some(expected) if expected != values.values.len() => {
                return Err(ScalingError::internal(
                    "BASIS.SHAPE",
                    format!(
                        "{kind} component is bound to {} observations, expected {expected}",
                        values.values.len()
                    ),
                ));
            }
            Some(_) => {}
        }
        let offset = apm.range_of(kind).map(|range| range.start_idx);
        evaluated.push((offset, values));
    }
    let n_obs = n_obs.unwrap_or(apm.n_obs());

    let inverse_scale_factors: Vec<f64> = match parameterisation {
        Parameterisation::Standard => (0..n_obs)
            .map(|row| evaluated.iter().map(|(_, c)| c.values[row]).product())
            .collect(),
        Parameterisation::Log => (0..n_obs)
            .map(|row| {
                evaluated
                    .iter()
                    .map(|(_, c)| c.values[row])
                    .sum::<f64>()
                    .exp()
            })
            .collect(),
    };

    if apm.is_empty() {
        return Ok(BasisFunctionResult {
            inverse_scale_factors,
            derivatives: None,
            curvatures: None,
        });
    }

    let mut derivative_triplets = Vec::new();
    let mut curvature_triplets = Vec::new();
    for (position, (offset, component)) in evaluated.iter().enumerate() {
        let Some(offset) = offset else {
            continue;
        };
        for row in 0..n_obs {
            let factor = match parameterisation {
                // Product of the other components, computed directly so that a
                // zero-valued component does not need a division.
                Parameterisation::Standard => evaluated
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != position)
                    .map(|(_, (_, c))| c.values[row])
                    .product::<f64>(),
                Parameterisation::Log => inverse_scale_factors[row],
            };
            let first: Vec<(usize, f64)> = component.derivatives.row(row).collect();
            for &(col, value) in &first {
                derivative_triplets.push(Triplet::new(row, offset + col, factor * value));
            }
            match parameterisation {
                Parameterisation::Standard => {
                    if let Some(curvatures) = &component.curvatures {
                        for (col, value) in curvatures.row(row) {
                            curvature_triplets.push(Triplet::new(row, offset + col, factor * value));
                        }
                    }
                }
                Parameterisation::Log => {
                    let second = component.curvatures.as_ref();
                    for &(col, value) in &first {
                        let own = second.map_or(0.0, |matrix| matrix.get(row, col));
                        curvature_triplets.push(Triplet::new(
                            row,
                            offset + col,
                            factor * (value * value + own),
                        ));
                    }
                }
            }
        }
    }

    let n_params = apm.len();
    Ok(BasisFunctionResult {
        inverse_scale_factors,
        derivatives: Some(DerivativeMatrix::from_triplets(
            n_obs,
            n_params,
            &derivative_triplets,
        )?),
        curvatures: Some(DerivativeMatrix::from_triplets(
            n_obs,
            n_params,
            &curvature_triplets,
        )?),
    })
}
