use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ScalingResult<T> = Result<T, ScalingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalingErrorCategory {
    Configuration,
    InsufficientData,
    Binning,
    Computation,
    IoSystem,
    Internal,
}

impl ScalingErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::InsufficientData => "InsufficientDataError",
            Self::Binning => "BinningError",
            Self::Computation => "ComputationError",
            Self::IoSystem => "IoSystemError",
            Self::Internal => "InternalError",
        }
    }

    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::IoSystem => 3,
            Self::Computation => 4,
            Self::Binning => 5,
            Self::InsufficientData => 6,
            Self::Internal => 7,
        }
    }

    /// Whether a multi-experiment batch may skip the failing experiment and continue.
    pub const fn is_recoverable_per_experiment(self) -> bool {
        matches!(self, Self::InsufficientData)
    }
}

impl Display for ScalingErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingError {
    category: ScalingErrorCategory,
    code: &'static str,
    message: String,
}

impl ScalingError {
    pub fn new(
        category: ScalingErrorCategory,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub fn configuration(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::Configuration, code, message)
    }

    pub fn insufficient_data(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::InsufficientData, code, message)
    }

    pub fn binning(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::Binning, code, message)
    }

    pub fn computation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::Computation, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::IoSystem, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ScalingErrorCategory::Internal, code, message)
    }

    pub const fn category(&self) -> ScalingErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.code, self.message)
    }
}

impl Display for ScalingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.code,
            self.message
        )
    }
}

impl Error for ScalingError {}
