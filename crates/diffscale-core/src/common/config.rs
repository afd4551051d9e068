//! Scaling job configuration.
//!
//! Options are plain serde documents so they can be read from JSON, merged with
//! command-line overrides and stored alongside a persisted data manager.

use crate::domain::{Parameterisation, ScalingError, ScalingModelKind, ScalingResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::constants::{
    DEFAULT_D_MIN, DEFAULT_DECAY_INTERVAL, DEFAULT_GAUSSIAN_VARIANCE, DEFAULT_GAUSSIAN_WINDOW,
    DEFAULT_ISIGMA_MIN, DEFAULT_N_ABSORPTION_BINS, DEFAULT_ROTATION_INTERVAL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMethod {
    Sum,
    #[default]
    Prf,
    Combine,
}

impl IntegrationMethod {
    /// Column prefix of the intensity columns used for scaling.
    pub const fn column_prefix(self) -> &'static str {
        match self {
            Self::Sum => "intensity.sum",
            // Combined profile/summation intensities are not implemented yet;
            // profile-fitted values are used instead.
            Self::Prf | Self::Combine => "intensity.prf",
        }
    }
}

impl FromStr for IntegrationMethod {
    type Err = ScalingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "prf" => Ok(Self::Prf),
            "combine" => Ok(Self::Combine),
            other => Err(ScalingError::configuration(
                "CONFIG.INTEGRATION_METHOD",
                format!("unknown integration method '{other}'; expected sum, prf or combine"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Full,
    FixedIh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsorptionBinning {
    #[default]
    Grid,
    Radial,
}

/// Interpolation kernel used by the smooth grid components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kernel", rename_all = "lowercase")]
pub enum SmoothingKernel {
    #[default]
    Linear,
    Gaussian { variance: f64, window: f64 },
}

impl SmoothingKernel {
    pub fn gaussian() -> Self {
        Self::Gaussian {
            variance: DEFAULT_GAUSSIAN_VARIANCE,
            window: DEFAULT_GAUSSIAN_WINDOW,
        }
    }

    /// Grid nodes kept below floor(min) and above floor(max) of the coordinates.
    pub fn margins(self) -> (i64, i64) {
        match self {
            Self::Linear => (1, 2),
            Self::Gaussian { window, .. } => {
                let reach = window.ceil().max(1.0) as i64;
                (reach - 1, reach)
            }
        }
    }

    pub fn validate(self) -> ScalingResult<()> {
        match self {
            Self::Linear => Ok(()),
            Self::Gaussian { variance, window } => {
                if variance > 0.0 && variance.is_finite() && window > 0.0 && window.is_finite() {
                    Ok(())
                } else {
                    Err(ScalingError::configuration(
                        "CONFIG.SMOOTHING",
                        format!(
                            "gaussian smoothing needs positive variance and window, got {variance} and {window}"
                        ),
                    ))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningParameters {
    pub n_d_bins: Option<usize>,
    pub n_z_bins: Option<usize>,
    pub n_detector_bins: Option<usize>,
    pub n_absorption_bins: usize,
    pub rotation_interval: f64,
    pub decay_interval: f64,
}

impl Default for BinningParameters {
    fn default() -> Self {
        Self {
            n_d_bins: None,
            n_z_bins: None,
            n_detector_bins: None,
            n_absorption_bins: DEFAULT_N_ABSORPTION_BINS,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            decay_interval: DEFAULT_DECAY_INTERVAL,
        }
    }
}

impl BinningParameters {
    pub fn require(value: Option<usize>, name: &str, model: ScalingModelKind) -> ScalingResult<usize> {
        match value {
            Some(count) if count > 0 => Ok(count),
            Some(_) => Err(ScalingError::configuration(
                "CONFIG.BINNING",
                format!("binning parameter '{name}' must be positive for the {model} model"),
            )),
            None => Err(ScalingError::configuration(
                "CONFIG.MISSING_BINNING",
                format!("binning parameter '{name}' is required for the {model} model"),
            )),
        }
    }

    pub fn validate(&self, model: ScalingModelKind) -> ScalingResult<()> {
        if !(self.rotation_interval > 0.0 && self.decay_interval > 0.0) {
            return Err(ScalingError::configuration(
                "CONFIG.BINNING",
                "rotation_interval and decay_interval must be positive",
            ));
        }
        if self.n_absorption_bins == 0 {
            return Err(ScalingError::configuration(
                "CONFIG.BINNING",
                "n_absorption_bins must be positive",
            ));
        }
        if model == ScalingModelKind::Xds {
            Self::require(self.n_d_bins, "n_d_bins", model)?;
            Self::require(self.n_z_bins, "n_z_bins", model)?;
            Self::require(self.n_detector_bins, "n_detector_bins", model)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementOptions {
    pub max_iterations: usize,
    pub cost_tolerance: f64,
    pub gradient_tolerance: f64,
    pub initial_damping: f64,
}

impl Default for RefinementOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            cost_tolerance: 1.0e-8,
            gradient_tolerance: 1.0e-10,
            initial_damping: 1.0e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingOptions {
    pub model: ScalingModelKind,
    pub parameterisation: Parameterisation,
    pub integration_method: IntegrationMethod,
    pub isigma_min: f64,
    pub d_min: f64,
    pub outlier_rejection: bool,
    pub target: TargetKind,
    pub absorption_binning: AbsorptionBinning,
    pub smoothing: SmoothingKernel,
    pub binning: BinningParameters,
    pub n_blocks: usize,
    /// Overrides the model's default of refining all components together.
    pub concurrent: Option<bool>,
    pub refinement: RefinementOptions,
}

impl Default for ScalingOptions {
    fn default() -> Self {
        Self {
            model: ScalingModelKind::default(),
            parameterisation: Parameterisation::default(),
            integration_method: IntegrationMethod::default(),
            isigma_min: DEFAULT_ISIGMA_MIN,
            d_min: DEFAULT_D_MIN,
            outlier_rejection: true,
            target: TargetKind::default(),
            absorption_binning: AbsorptionBinning::default(),
            smoothing: SmoothingKernel::default(),
            binning: BinningParameters::default(),
            n_blocks: 1,
            concurrent: None,
            refinement: RefinementOptions::default(),
        }
    }
}

impl ScalingOptions {
    pub fn for_model(model: ScalingModelKind) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn refines_concurrently(&self) -> bool {
        self.concurrent
            .unwrap_or_else(|| self.model.refines_concurrently())
    }

    pub fn validate(&self) -> ScalingResult<()> {
        self.binning.validate(self.model)?;
        self.smoothing.validate()?;
        if self.n_blocks == 0 {
            return Err(ScalingError::configuration(
                "CONFIG.N_BLOCKS",
                "n_blocks must be at least 1",
            ));
        }
        if self.refinement.max_iterations == 0 {
            return Err(ScalingError::configuration(
                "CONFIG.MAX_ITERATIONS",
                "refinement.max_iterations must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read scaling options '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse scaling options '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<OptionsError> for ScalingError {
    fn from(error: OptionsError) -> Self {
        match error {
            OptionsError::Read { .. } => ScalingError::io_system("IO.OPTIONS_READ", error.to_string()),
            OptionsError::Parse { .. } => {
                ScalingError::configuration("CONFIG.OPTIONS_PARSE", error.to_string())
            }
        }
    }
}

pub fn load_scaling_options(path: impl AsRef<Path>) -> Result<ScalingOptions, OptionsError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| OptionsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| OptionsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
