/// Padding added to coordinate extents so that extreme observations fall strictly inside bins.
pub const EXTENT_PADDING: f64 = 0.001;

pub const DEFAULT_ROTATION_INTERVAL: f64 = 15.0;
pub const DEFAULT_DECAY_INTERVAL: f64 = 15.0;
pub const DEFAULT_N_ABSORPTION_BINS: usize = 4;
pub const DEFAULT_ISIGMA_MIN: f64 = -5.0;
pub const DEFAULT_D_MIN: f64 = 0.0;

pub const DEFAULT_GAUSSIAN_VARIANCE: f64 = 1.0;
pub const DEFAULT_GAUSSIAN_WINDOW: f64 = 2.5;

/// Normalised-intensity thresholds (probability ~1e-6) for Wilson outliers.
pub const ACENTRIC_E2_CUTOFF: f64 = 13.82;
pub const CENTRIC_E2_CUTOFF: f64 = 23.91;
pub const MAX_WILSON_BINS: usize = 20;
pub const MIN_REFLECTIONS_PER_WILSON_BIN: usize = 10;

pub const RADIAL_ABSORPTION_RINGS: usize = 3;
pub const ANGULAR_ABSORPTION_SECTORS: usize = 8;
/// Extra radius accepted beyond the detector half-diagonal.
pub const RADIAL_EDGE_TOLERANCE: f64 = 5.0;

#[cfg(test)]
mod tests {
    use super::{ACENTRIC_E2_CUTOFF, CENTRIC_E2_CUTOFF};

    #[test]
    fn wilson_cutoffs_match_exponential_tails() {
        // Acentric E² is exponential: P(E² > t) = exp(-t).
        assert!(((-ACENTRIC_E2_CUTOFF).exp() - 1.0e-6).abs() < 1.0e-8);
        assert!(CENTRIC_E2_CUTOFF > ACENTRIC_E2_CUTOFF);
    }
}
