//! Read-only experimental geometry: crystal, scan and detector.

use crate::domain::{ScalingError, ScalingResult};
use crate::reflections::{MillerIndex, SpaceGroup};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

type Matrix3 = [[f64; 3]; 3];

/// Unit cell lengths in Å and angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    pub fn new(parameters: [f64; 6]) -> ScalingResult<Self> {
        let [a, b, c, alpha, beta, gamma] = parameters;
        let cell = Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        };
        cell.validate()?;
        Ok(cell)
    }

    pub fn parameters(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    pub fn validate(&self) -> ScalingResult<()> {
        let lengths_ok = [self.a, self.b, self.c]
            .iter()
            .all(|length| length.is_finite() && *length > 0.0);
        let angles_ok = [self.alpha, self.beta, self.gamma]
            .iter()
            .all(|angle| angle.is_finite() && *angle > 0.0 && *angle < 180.0);
        if !(lengths_ok && angles_ok) {
            return Err(ScalingError::configuration(
                "CONFIG.UNIT_CELL",
                format!("invalid unit cell {:?}", self.parameters()),
            ));
        }
        if self.orthogonalisation().is_none() {
            return Err(ScalingError::configuration(
                "CONFIG.UNIT_CELL",
                format!("unit cell {:?} has no volume", self.parameters()),
            ));
        }
        Ok(())
    }

    /// Real-space basis vectors as columns, a along x and b in the xy plane.
    fn orthogonalisation(&self) -> Option<Matrix3> {
        let (cos_alpha, cos_beta) = (self.alpha.to_radians().cos(), self.beta.to_radians().cos());
        let (sin_gamma, cos_gamma) = self.gamma.to_radians().sin_cos();
        let cy = (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let cz_squared = 1.0 - cos_beta * cos_beta - cy * cy;
        if cz_squared <= 0.0 || sin_gamma.abs() < f64::EPSILON {
            return None;
        }
        Some([
            [self.a, self.b * cos_gamma, self.c * cos_beta],
            [0.0, self.b * sin_gamma, self.c * cy],
            [0.0, 0.0, self.c * cz_squared.sqrt()],
        ])
    }

    pub fn volume(&self) -> f64 {
        self.orthogonalisation().map_or(0.0, |m| determinant(&m))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    pub unit_cell: UnitCell,
    pub space_group: SpaceGroup,
}

impl Crystal {
    pub fn new(unit_cell: UnitCell, space_group: SpaceGroup) -> ScalingResult<Self> {
        unit_cell.validate()?;
        Ok(Self {
            unit_cell,
            space_group,
        })
    }

    /// Crystal from real-space basis vectors in Å.
    pub fn from_real_space_vectors(
        a: [f64; 3],
        b: [f64; 3],
        c: [f64; 3],
        space_group: SpaceGroup,
    ) -> ScalingResult<Self> {
        let angle = |u: [f64; 3], v: [f64; 3]| (dot(u, v) / (norm(u) * norm(v))).acos().to_degrees();
        let unit_cell = UnitCell::new([
            norm(a),
            norm(b),
            norm(c),
            angle(b, c),
            angle(a, c),
            angle(a, b),
        ])?;
        Self::new(unit_cell, space_group)
    }

    /// Reciprocal basis vectors a*, b*, c* as columns, so that `|B·h| = 1/d`.
    pub fn b_matrix(&self) -> ScalingResult<Matrix3> {
        let orthogonal = self.unit_cell.orthogonalisation().ok_or_else(|| {
            ScalingError::configuration("CONFIG.UNIT_CELL", "unit cell has no volume")
        })?;
        let inverse = invert(&orthogonal).ok_or_else(|| {
            ScalingError::computation("NUMERIC.SINGULAR_CELL", "unit cell matrix is singular")
        })?;
        Ok(transpose(&inverse))
    }

    pub fn d_spacing(&self, index: MillerIndex) -> ScalingResult<f64> {
        let b = self.b_matrix()?;
        Ok(d_from_b_matrix(&b, index))
    }

    /// d for every index, computing the B matrix once.
    pub fn d_spacings(&self, indices: &[MillerIndex]) -> ScalingResult<Vec<f64>> {
        let b = self.b_matrix()?;
        Ok(indices.iter().map(|index| d_from_b_matrix(&b, *index)).collect())
    }
}

fn d_from_b_matrix(b: &Matrix3, index: MillerIndex) -> f64 {
    let h = index.map(f64::from);
    let reciprocal = [
        dot(b[0], h),
        dot(b[1], h),
        dot(b[2], h),
    ];
    let length = norm(reciprocal);
    if length == 0.0 { f64::INFINITY } else { 1.0 / length }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// First and last image numbers, inclusive.
    pub image_range: [i64; 2],
    /// Rotation angle at the start of the first image and per-image width, in degrees.
    pub oscillation: [f64; 2],
}

impl Scan {
    pub fn num_images(&self) -> usize {
        usize::try_from(self.image_range[1] - self.image_range[0] + 1).unwrap_or(0)
    }

    pub fn oscillation_width(&self) -> f64 {
        self.oscillation[1]
    }

    pub fn oscillation_range(&self) -> (f64, f64) {
        let [start, width] = self.oscillation;
        (start, start + self.num_images() as f64 * width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    /// Image size in pixels (fast, slow).
    pub image_size: [usize; 2],
}

impl Detector {
    pub fn center(&self) -> (f64, f64) {
        (self.image_size[0] as f64 / 2.0, self.image_size[1] as f64 / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(default)]
    pub crystal: Option<Crystal>,
    #[serde(default)]
    pub scan: Option<Scan>,
    #[serde(default)]
    pub detector: Option<Detector>,
}

impl Experiment {
    pub fn crystal(&self) -> ScalingResult<&Crystal> {
        self.crystal.as_ref().ok_or_else(|| {
            ScalingError::configuration(
                "CONFIG.MISSING_CRYSTAL",
                "experiment has no crystal model (unit cell and space group)",
            )
        })
    }

    pub fn scan(&self) -> ScalingResult<&Scan> {
        self.scan.as_ref().ok_or_else(|| {
            ScalingError::configuration("CONFIG.MISSING_SCAN", "experiment has no scan model")
        })
    }

    pub fn detector(&self) -> ScalingResult<&Detector> {
        self.detector.as_ref().ok_or_else(|| {
            ScalingError::configuration(
                "CONFIG.MISSING_DETECTOR",
                "experiment has no detector model",
            )
        })
    }
}

/// Reads a JSON document holding a list of experiments.
pub fn load_experiments(path: impl AsRef<Path>) -> ScalingResult<Vec<Experiment>> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|err| {
        ScalingError::io_system(
            "IO.EXPERIMENT_READ",
            format!("failed to read experiments '{}': {err}", path.display()),
        )
    })?;
    serde_json::from_str(&source).map_err(|err| {
        ScalingError::configuration(
            "CONFIG.EXPERIMENT_PARSE",
            format!("failed to parse experiments '{}': {err}", path.display()),
        )
    })
}

fn dot(u: [f64; 3], v: [f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

fn norm(u: [f64; 3]) -> f64 {
    dot(u, u).sqrt()
}

fn determinant(m: &Matrix3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn transpose(m: &Matrix3) -> Matrix3 {
    let mut t = [[0.0; 3]; 3];
    for (row, values) in m.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            t[col][row] = *value;
        }
    }
    t
}

fn invert(m: &Matrix3) -> Option<Matrix3> {
    let det = determinant(m);
    if det.abs() < f64::EPSILON {
        return None;
    }
    let mut inverse = [[0.0; 3]; 3];
    for (row, values) in inverse.iter_mut().enumerate() {
        for (col, value) in values.iter_mut().enumerate() {
            let (r1, r2) = ((col + 1) % 3, (col + 2) % 3);
            let (c1, c2) = ((row + 1) % 3, (row + 2) % 3);
            *value = (m[r1][c1] * m[r2][c2] - m[r1][c2] * m[r2][c1]) / det;
        }
    }
    Some(inverse)
}

#[cfg(test)]
mod tests {
    use super::{Crystal, Experiment, Scan, UnitCell, invert, load_experiments};
    use crate::domain::ScalingErrorCategory;
    use crate::reflections::SpaceGroup;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn cubic_d_spacings() {
        let crystal = Crystal::new(
            UnitCell::new([10.0, 10.0, 10.0, 90.0, 90.0, 90.0]).expect("cell"),
            SpaceGroup::p1(),
        )
        .expect("crystal");
        let d = crystal
            .d_spacings(&[[1, 0, 0], [1, 1, 0], [0, 0, 2]])
            .expect("d");
        assert!((d[0] - 10.0).abs() < 1.0e-10);
        assert!((d[1] - 10.0 / 2.0_f64.sqrt()).abs() < 1.0e-10);
        assert!((d[2] - 5.0).abs() < 1.0e-10);
        assert!((crystal.unit_cell.volume() - 1000.0).abs() < 1.0e-8);
    }

    #[test]
    fn monoclinic_cell_from_real_space_vectors() {
        let beta = 100.0_f64.to_radians();
        let crystal = Crystal::from_real_space_vectors(
            [40.0, 0.0, 0.0],
            [0.0, 50.0, 0.0],
            [60.0 * beta.cos(), 0.0, 60.0 * beta.sin()],
            SpaceGroup::from_symbol("C 2").expect("C2"),
        )
        .expect("crystal");
        let cell = crystal.unit_cell;
        assert!((cell.beta - 100.0).abs() < 1.0e-9);
        assert!((cell.alpha - 90.0).abs() < 1.0e-9);
        // d(001) = c·sin(beta) for a monoclinic-b cell.
        let d = crystal.d_spacing([0, 0, 1]).expect("d");
        assert!((d - 60.0 * beta.sin()).abs() < 1.0e-9);
    }

    #[test]
    fn degenerate_cells_are_configuration_errors() {
        let error = UnitCell::new([10.0, 10.0, 0.0, 90.0, 90.0, 90.0])
            .expect_err("zero length should fail");
        assert_eq!(error.code(), "CONFIG.UNIT_CELL");
        assert!(invert(&[[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]).is_none());
    }

    #[test]
    fn scan_oscillation_range_spans_all_images() {
        let scan = Scan {
            image_range: [1, 90],
            oscillation: [0.0, 1.0],
        };
        assert_eq!(scan.num_images(), 90);
        assert_eq!(scan.oscillation_range(), (0.0, 90.0));
    }

    #[test]
    fn missing_geometry_is_reported_by_name() {
        let experiment = Experiment::default();
        let error = experiment.crystal().expect_err("no crystal");
        assert_eq!(error.category(), ScalingErrorCategory::Configuration);
        assert_eq!(error.code(), "CONFIG.MISSING_CRYSTAL");
        assert_eq!(
            experiment.detector().expect_err("no detector").code(),
            "CONFIG.MISSING_DETECTOR"
        );
    }

    #[test]
    fn experiments_load_from_json() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("experiments.json");
        fs::write(
            &path,
            r#"[{
                "crystal": {
                    "unit_cell": {"a": 50.0, "b": 60.0, "c": 70.0, "alpha": 90.0, "beta": 90.0, "gamma": 90.0},
                    "space_group": {"symbol": "P 21 21 21"}
                },
                "scan": {"image_range": [1, 180], "oscillation": [0.0, 0.5]},
                "detector": {"image_size": [2463, 2527]}
            }]"#,
        )
        .expect("write experiments");

        let experiments = load_experiments(&path).expect("experiments should load");
        assert_eq!(experiments.len(), 1);
        let crystal = experiments[0].crystal().expect("crystal");
        assert_eq!(crystal.space_group.order(), 4);
        assert_eq!(
            experiments[0].scan().expect("scan").oscillation_range(),
            (0.0, 90.0)
        );
    }
}
