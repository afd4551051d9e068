//! Normalised coordinates and component construction for each scaling model.

use crate::common::constants::{
    ANGULAR_ABSORPTION_SECTORS, EXTENT_PADDING, RADIAL_ABSORPTION_RINGS, RADIAL_EDGE_TOLERANCE,
};
use crate::common::{AbsorptionBinning, BinningParameters, ScalingOptions};
use crate::domain::{ComponentKind, ScalingError, ScalingModelKind, ScalingResult};
use crate::modules::components::{ComponentShape, ScaleComponent, ScalingComponents};
use crate::numerics::finite_extent;
use crate::reflections::{Detector, Experiment, ReflectionTable, Scan, columns};
use std::f64::consts::PI;
use tracing::debug;

/// Adds the model's normalised-coordinate columns to `table` and creates its
/// components with grids spanning those coordinates.
pub(crate) fn bin_reflections(
    model: ScalingModelKind,
    options: &ScalingOptions,
    experiment: &Experiment,
    table: &mut ReflectionTable,
) -> ScalingResult<ScalingComponents> {
    match model {
        ScalingModelKind::Kb => Ok(bin_kb(options)),
        ScalingModelKind::Physical => bin_physical(options, experiment, table),
        ScalingModelKind::Xds => bin_xds(options, experiment, table),
    }
}

fn bin_kb(options: &ScalingOptions) -> ScalingComponents {
    let mut components = ScalingComponents::new();
    components.insert(
        ComponentKind::Scale,
        ScaleComponent::single_scale(options.parameterisation),
    );
    components.insert(
        ComponentKind::Decay,
        ScaleComponent::single_b(options.parameterisation),
    );
    components
}

fn bin_physical(
    options: &ScalingOptions,
    experiment: &Experiment,
    table: &mut ReflectionTable,
) -> ScalingResult<ScalingComponents> {
    let scan = experiment.scan()?;
    let z = table.doubles(columns::Z_VALUE)?.to_vec();
    let binning = &options.binning;

    table.set_doubles(
        columns::NORMALISED_ROTATION_ANGLE,
        normalised_rotation(&z, scan, binning.rotation_interval),
    )?;
    table.set_doubles(
        columns::NORMALISED_TIME_VALUES,
        normalised_rotation(&z, scan, binning.decay_interval),
    )?;

    let mut components = ScalingComponents::new();
    components.insert(
        ComponentKind::Scale,
        ScaleComponent::smooth(
            ComponentShape::Smooth1D,
            options.parameterisation,
            options.smoothing,
            table,
            &[columns::NORMALISED_ROTATION_ANGLE],
        )?,
    );
    components.insert(
        ComponentKind::Decay,
        ScaleComponent::smooth(
            ComponentShape::SmoothB1D,
            options.parameterisation,
            options.smoothing,
            table,
            &[columns::NORMALISED_TIME_VALUES],
        )?,
    );
    Ok(components)
}

/// Rotation in units of `interval` degrees measured from the scan start:
/// `(z·width − (start − 0.001)) / (interval + 0.001)`.
pub(crate) fn normalised_rotation(z: &[f64], scan: &Scan, interval: f64) -> Vec<f64> {
    let (start, _) = scan.oscillation_range();
    let width = scan.oscillation_width();
    z.iter()
        .map(|z| (z * width - (start - EXTENT_PADDING)) / (interval + EXTENT_PADDING))
        .collect()
}

fn bin_xds(
    options: &ScalingOptions,
    experiment: &Experiment,
    table: &mut ReflectionTable,
) -> ScalingResult<ScalingComponents> {
    let model = ScalingModelKind::Xds;
    let binning = &options.binning;
    let n_d_bins = BinningParameters::require(binning.n_d_bins, "n_d_bins", model)?;
    let n_z_bins = BinningParameters::require(binning.n_z_bins, "n_z_bins", model)?;
    let n_detector_bins =
        BinningParameters::require(binning.n_detector_bins, "n_detector_bins", model)?;

    let inverse_d_squared: Vec<f64> = table
        .doubles(columns::D)?
        .iter()
        .map(|d| 1.0 / (d * d))
        .collect();
    let x = table.doubles(columns::X_VALUE)?.to_vec();
    let y = table.doubles(columns::Y_VALUE)?.to_vec();
    let z = table.doubles(columns::Z_VALUE)?.to_vec();

    table.set_doubles(
        columns::NORMALISED_RES_VALUES,
        normalise_to_bins(&inverse_d_squared, n_d_bins, "resolution")?,
    )?;
    table.set_doubles(
        columns::NORMALISED_TIME_VALUES,
        normalise_to_bins(&z, n_z_bins, "z")?,
    )?;
    table.set_doubles(
        columns::NORMALISED_X_VALUES,
        normalise_to_bins(&x, n_detector_bins, "x")?,
    )?;
    table.set_doubles(
        columns::NORMALISED_Y_VALUES,
        normalise_to_bins(&y, n_detector_bins, "y")?,
    )?;

    let mut components = ScalingComponents::new();
    components.insert(
        ComponentKind::Decay,
        ScaleComponent::smooth(
            ComponentShape::Smooth2D,
            options.parameterisation,
            options.smoothing,
            table,
            &[columns::NORMALISED_RES_VALUES, columns::NORMALISED_TIME_VALUES],
        )?,
    );
    components.insert(
        ComponentKind::Modulation,
        ScaleComponent::smooth(
            ComponentShape::Smooth2D,
            options.parameterisation,
            options.smoothing,
            table,
            &[columns::NORMALISED_X_VALUES, columns::NORMALISED_Y_VALUES],
        )?,
    );

    let absorption = match options.absorption_binning {
        AbsorptionBinning::Grid => {
            let n_abs = binning.n_absorption_bins;
            table.set_doubles(
                columns::NORMALISED_X_ABS_VALUES,
                normalise_to_bins(&x, n_abs, "x")?,
            )?;
            table.set_doubles(
                columns::NORMALISED_Y_ABS_VALUES,
                normalise_to_bins(&y, n_abs, "y")?,
            )?;
            ScaleComponent::smooth(
                ComponentShape::Smooth3D,
                options.parameterisation,
                options.smoothing,
                table,
                &[
                    columns::NORMALISED_X_ABS_VALUES,
                    columns::NORMALISED_Y_ABS_VALUES,
                    columns::NORMALISED_TIME_VALUES,
                ],
            )?
        }
        AbsorptionBinning::Radial => {
            let detector = experiment.detector()?;
            let bins = radial_absorption_bins(&x, &y, &z, detector, n_z_bins)?;
            let n_bins = RADIAL_ABSORPTION_RINGS * ANGULAR_ABSORPTION_SECTORS * n_z_bins;
            table.set_ints(columns::A_BIN_INDEX, bins)?;
            ScaleComponent::binned(options.parameterisation, columns::A_BIN_INDEX, n_bins)
        }
    };
    components.insert(ComponentKind::Absorption, absorption);
    Ok(components)
}

fn padded_extent(values: &[f64], axis: &str) -> ScalingResult<(f64, f64)> {
    let (min, max) = finite_extent(values).ok_or_else(|| {
        ScalingError::binning(
            "BINNING.EMPTY_AXIS",
            format!("no finite {axis} values to bin"),
        )
    })?;
    Ok((min - EXTENT_PADDING, max + EXTENT_PADDING))
}

/// Maps values onto `[0, n_bins]` over their padded extent.
pub(crate) fn normalise_to_bins(
    values: &[f64],
    n_bins: usize,
    axis: &str,
) -> ScalingResult<Vec<f64>> {
    let (low, high) = padded_extent(values, axis)?;
    let width = (high - low) / n_bins as f64;
    Ok(values.iter().map(|value| (value - low) / width).collect())
}

fn in_bin(value: f64, lower: f64, upper: f64) -> bool {
    lower < value && value <= upper
}

/// Absorption bin of every observation: 3 rings × 8 angular sectors around
/// the detector centre, repeated for each of `n_z_bins` time bins.
pub(crate) fn radial_absorption_bins(
    x: &[f64],
    y: &[f64],
    z: &[f64],
    detector: &Detector,
    n_z_bins: usize,
) -> ScalingResult<Vec<i64>> {
    let (x_center, y_center) = detector.center();
    let radial_divider = x_center.max(y_center);
    let [width, height] = detector.image_size.map(|size| size as f64);
    let half_diagonal = (width * width + height * height).sqrt() / 2.0;

    let mut radial_edges = vec![-0.0001];
    for ring in 1..RADIAL_ABSORPTION_RINGS {
        radial_edges.push(ring as f64 * radial_divider / RADIAL_ABSORPTION_RINGS as f64);
    }
    radial_edges.push(half_diagonal + RADIAL_EDGE_TOLERANCE);

    let sector_width = 2.0 * PI / ANGULAR_ABSORPTION_SECTORS as f64;
    let mut angular_edges = vec![-0.0001];
    for sector in 1..=ANGULAR_ABSORPTION_SECTORS {
        angular_edges.push(sector as f64 * sector_width);
    }

    let (z_low, z_high) = padded_extent(z, "z")?;
    let z_width = (z_high - z_low) / n_z_bins as f64;
    let z_edges: Vec<f64> = (0..=n_z_bins).map(|i| z_low + i as f64 * z_width).collect();

    let positions_per_time = RADIAL_ABSORPTION_RINGS * ANGULAR_ABSORPTION_SECTORS;
    let mut bins = Vec::with_capacity(x.len());
    let mut unassigned = 0;
    for row in 0..x.len() {
        let x_rel = x[row] - x_center;
        let y_rel = y[row] - y_center;
        let radius = (x_rel * x_rel + y_rel * y_rel).sqrt();
        let mut angle = (y_rel / radius).acos();
        if x_rel < 0.0 {
            angle = 2.0 * PI - angle;
        }

        let sector = angular_edges
            .windows(2)
            .position(|edge| in_bin(angle, edge[0], edge[1]));
        let ring = radial_edges
            .windows(2)
            .position(|edge| in_bin(radius, edge[0], edge[1]));
        let time = z_edges
            .windows(2)
            .position(|edge| in_bin(z[row], edge[0], edge[1]));

        match (sector, ring, time) {
            (Some(sector), Some(ring), Some(time)) => {
                let position = sector * RADIAL_ABSORPTION_RINGS + ring;
                bins.push((position + time * positions_per_time) as i64);
            }
            _ => {
                unassigned += 1;
                bins.push(-1);
            }
        }
    }

    if unassigned > 0 {
        return Err(ScalingError::binning(
            "BINNING.UNASSIGNED",
            format!("unable to bin {unassigned} reflections for radial absorption"),
        ));
    }
    debug!(
        bins = positions_per_time * n_z_bins,
        reflections = bins.len(),
        "radial absorption binning"
    );
    Ok(bins)
}
