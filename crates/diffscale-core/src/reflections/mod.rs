//! Reflection records and the crystal geometry they are indexed against.

pub mod experiment;
pub mod symmetry;
pub mod table;

pub use experiment::{Crystal, Detector, Experiment, Scan, UnitCell};
pub use symmetry::{SpaceGroup, SymmetryError};
pub use table::{Column, ReflectionTable, TableError};

/// Miller index (h, k, l). Ordering is lexicographic.
pub type MillerIndex = [i32; 3];

/// Column names shared by the data manager, the components and the CLI.
pub mod columns {
    pub const MILLER_INDEX: &str = "miller_index";
    pub const ASU_MILLER_INDEX: &str = "asu_miller_index";
    pub const D: &str = "d";
    pub const LP: &str = "lp";
    pub const DQE: &str = "dqe";
    pub const PARTIALITY: &str = "partiality";
    pub const FLAGS: &str = "flags";
    pub const XYZOBS_PX: &str = "xyzobs.px.value";

    pub const INTENSITY: &str = "intensity";
    pub const VARIANCE: &str = "variance";
    pub const X_VALUE: &str = "x_value";
    pub const Y_VALUE: &str = "y_value";
    pub const Z_VALUE: &str = "z_value";
    pub const INVERSE_SCALE_FACTOR: &str = "inverse_scale_factor";
    pub const IH_VALUES: &str = "Ih_values";
    pub const WILSON_OUTLIER_FLAG: &str = "wilson_outlier_flag";
    pub const CENTRIC_FLAG: &str = "centric_flag";

    pub const NORMALISED_ROTATION_ANGLE: &str = "normalised_rotation_angle";
    pub const NORMALISED_TIME_VALUES: &str = "normalised_time_values";
    pub const NORMALISED_RES_VALUES: &str = "normalised_res_values";
    pub const NORMALISED_X_VALUES: &str = "normalised_x_values";
    pub const NORMALISED_Y_VALUES: &str = "normalised_y_values";
    pub const NORMALISED_X_ABS_VALUES: &str = "normalised_x_abs_values";
    pub const NORMALISED_Y_ABS_VALUES: &str = "normalised_y_abs_values";
    pub const A_BIN_INDEX: &str = "a_bin_index";

    /// Reflection flag bits marking summation and profile integration.
    pub const FLAG_INTEGRATED_SUM: i64 = 1 << 8;
    pub const FLAG_INTEGRATED_PRF: i64 = 1 << 9;
    pub const FLAG_INTEGRATED: i64 = FLAG_INTEGRATED_SUM | FLAG_INTEGRATED_PRF;

    pub fn intensity_value(prefix: &str) -> String {
        format!("{prefix}.value")
    }

    pub fn intensity_variance(prefix: &str) -> String {
        format!("{prefix}.variance")
    }
}
