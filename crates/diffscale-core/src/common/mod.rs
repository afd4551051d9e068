pub mod config;
pub mod constants;

pub use config::{
    AbsorptionBinning, BinningParameters, IntegrationMethod, OptionsError, RefinementOptions,
    ScalingOptions, SmoothingKernel, TargetKind, load_scaling_options,
};
