pub mod errors;

pub use errors::{ScalingError, ScalingErrorCategory, ScalingResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingModelKind {
    #[default]
    Kb,
    Physical,
    Xds,
}

impl ScalingModelKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kb => "kb",
            Self::Physical => "physical",
            Self::Xds => "xds",
        }
    }

    /// Components created by this model, in refinement order.
    pub const fn component_kinds(self) -> &'static [ComponentKind] {
        match self {
            Self::Kb => &[ComponentKind::Scale, ComponentKind::Decay],
            Self::Physical => &[ComponentKind::Scale, ComponentKind::Decay],
            Self::Xds => &[
                ComponentKind::Decay,
                ComponentKind::Absorption,
                ComponentKind::Modulation,
            ],
        }
    }

    /// XDS-like scaling refines one component at a time with the others held constant.
    pub const fn refines_concurrently(self) -> bool {
        !matches!(self, Self::Xds)
    }
}

impl Display for ScalingModelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for ScalingModelKind {
    type Err = ScalingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kb" => Ok(Self::Kb),
            "physical" | "aimless" => Ok(Self::Physical),
            "xds" => Ok(Self::Xds),
            other => Err(ScalingError::configuration(
                "CONFIG.MODEL",
                format!("unknown scaling model '{other}'; expected kb, physical or xds"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameterisation {
    #[default]
    Standard,
    Log,
}

impl Parameterisation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Log => "log",
        }
    }

    /// Starting value of a smooth or single-scale parameter.
    pub const fn initial_scale_parameter(self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Log => 0.0,
        }
    }
}

impl Display for Parameterisation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for Parameterisation {
    type Err = ScalingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "log" => Ok(Self::Log),
            other => Err(ScalingError::configuration(
                "CONFIG.PARAMETERISATION",
                format!("unknown parameterisation '{other}'; expected standard or log"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Scale,
    Decay,
    Absorption,
    Modulation,
}

impl ComponentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scale => "scale",
            Self::Decay => "decay",
            Self::Absorption => "absorption",
            Self::Modulation => "modulation",
        }
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = ScalingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scale" => Ok(Self::Scale),
            "decay" => Ok(Self::Decay),
            "absorption" => Ok(Self::Absorption),
            "modulation" => Ok(Self::Modulation),
            other => Err(ScalingError::configuration(
                "CONFIG.COMPONENT",
                format!("unknown scaling component '{other}'"),
            )),
        }
    }
}

/// Lifecycle of a data manager. Transitions only move forward, except that
/// `Iterating` may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingStage {
    Initialized,
    Binned,
    Extracted,
    Iterating,
    Converged,
    Expanded,
}

impl ScalingStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Binned => "BINNED",
            Self::Extracted => "EXTRACTED",
            Self::Iterating => "ITERATING",
            Self::Converged => "CONVERGED",
            Self::Expanded => "EXPANDED",
        }
    }
}

impl Display for ScalingStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{ComponentKind, Parameterisation, ScalingErrorCategory, ScalingModelKind};

    #[test]
    fn model_names_parse_case_insensitively() {
        assert_eq!("KB".parse::<ScalingModelKind>().unwrap(), ScalingModelKind::Kb);
        assert_eq!(
            "aimless".parse::<ScalingModelKind>().unwrap(),
            ScalingModelKind::Physical
        );
        assert_eq!(" xds ".parse::<ScalingModelKind>().unwrap(), ScalingModelKind::Xds);
    }

    #[test]
    fn invalid_parameterisation_name_is_a_configuration_error() {
        let error = "exponential"
            .parse::<Parameterisation>()
            .expect_err("unknown parameterisation should fail");
        assert_eq!(error.category(), ScalingErrorCategory::Configuration);
        assert_eq!(error.code(), "CONFIG.PARAMETERISATION");
    }

    #[test]
    fn xds_components_are_refined_sequentially() {
        assert!(!ScalingModelKind::Xds.refines_concurrently());
        assert!(ScalingModelKind::Kb.refines_concurrently());
        assert_eq!(
            ScalingModelKind::Xds.component_kinds(),
            &[
                ComponentKind::Decay,
                ComponentKind::Absorption,
                ComponentKind::Modulation
            ]
        );
    }
}
