//! Point-group operators acting on Miller indices.
//!
//! Operators are stored as integer matrices acting on column vectors of
//! indices, `h' = R·h`. Lattice centring and translations do not change how
//! indices merge, so a symbol only contributes its rotation part.

use crate::domain::ScalingError;
use crate::reflections::MillerIndex;
use serde::{Deserialize, Serialize};

pub type Rotation = [[i32; 3]; 3];

const IDENTITY: Rotation = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];
const INVERSION: Rotation = [[-1, 0, 0], [0, -1, 0], [0, 0, -1]];
const TWO_X: Rotation = [[1, 0, 0], [0, -1, 0], [0, 0, -1]];
const TWO_Y: Rotation = [[-1, 0, 0], [0, 1, 0], [0, 0, -1]];
const TWO_Z: Rotation = [[-1, 0, 0], [0, -1, 0], [0, 0, 1]];
const FOUR_Z: Rotation = [[0, -1, 0], [1, 0, 0], [0, 0, 1]];
const THREE_Z: Rotation = [[-1, -1, 0], [1, 0, 0], [0, 0, 1]];
const SIX_Z: Rotation = [[1, 1, 0], [-1, 0, 0], [0, 0, 1]];
const THREE_DIAGONAL: Rotation = [[0, 0, 1], [1, 0, 0], [0, 1, 0]];
/// (h, k, l) -> (k, h, -l)
const TWO_AB: Rotation = [[0, 1, 0], [1, 0, 0], [0, 0, -1]];
/// (h, k, l) -> (-k, -h, -l)
const TWO_A_MINUS_B: Rotation = [[0, -1, 0], [-1, 0, 0], [0, 0, -1]];

/// A finite group never exceeds the 48 operators of m-3m.
const MAX_GROUP_ORDER: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymmetryError {
    #[error("unsupported space group symbol '{symbol}'")]
    UnknownSymbol { symbol: String },
    #[error("generator {index} of '{symbol}' is not a unimodular integer matrix")]
    InvalidGenerator { symbol: String, index: usize },
    #[error("generators of '{symbol}' do not close into a finite point group")]
    OpenGroup { symbol: String },
}

impl From<SymmetryError> for ScalingError {
    fn from(error: SymmetryError) -> Self {
        ScalingError::configuration("CONFIG.SPACE_GROUP", error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SpaceGroupDocument", into = "SpaceGroupDocument")]
pub struct SpaceGroup {
    symbol: String,
    generators: Vec<Rotation>,
    operators: Vec<Rotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpaceGroupDocument {
    symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generators: Option<Vec<Rotation>>,
}

impl TryFrom<SpaceGroupDocument> for SpaceGroup {
    type Error = SymmetryError;

    fn try_from(document: SpaceGroupDocument) -> Result<Self, Self::Error> {
        match document.generators {
            Some(generators) => SpaceGroup::from_generators(document.symbol, &generators),
            None => SpaceGroup::from_symbol(&document.symbol),
        }
    }
}

impl From<SpaceGroup> for SpaceGroupDocument {
    fn from(group: SpaceGroup) -> Self {
        let is_tabulated = point_group_generators(&normalise_symbol(&group.symbol))
            .is_some_and(|generators| generators == group.generators.as_slice());
        Self {
            symbol: group.symbol,
            generators: (!is_tabulated).then_some(group.generators),
        }
    }
}

impl SpaceGroup {
    /// Space group from a Hermann-Mauguin symbol such as `"P 21 21 21"` or `"C 2"`.
    pub fn from_symbol(symbol: &str) -> Result<Self, SymmetryError> {
        let generators = point_group_generators(&normalise_symbol(symbol)).ok_or_else(|| {
            SymmetryError::UnknownSymbol {
                symbol: symbol.to_string(),
            }
        })?;
        Self::from_generators(symbol, generators)
    }

    /// Group generated by `generators` under matrix multiplication.
    pub fn from_generators(
        symbol: impl Into<String>,
        generators: &[Rotation],
    ) -> Result<Self, SymmetryError> {
        let symbol = symbol.into();
        for (index, generator) in generators.iter().enumerate() {
            if determinant(generator).abs() != 1 {
                return Err(SymmetryError::InvalidGenerator {
                    symbol: symbol.clone(),
                    index,
                });
            }
        }

        let mut operators = vec![IDENTITY];
        let mut frontier = vec![IDENTITY];
        while let Some(current) = frontier.pop() {
            for generator in generators {
                let product = multiply(generator, &current);
                if !operators.contains(&product) {
                    if operators.len() == MAX_GROUP_ORDER {
                        return Err(SymmetryError::OpenGroup { symbol });
                    }
                    operators.push(product);
                    frontier.push(product);
                }
            }
        }
        operators.sort_unstable();

        Ok(Self {
            symbol,
            generators: generators.to_vec(),
            operators,
        })
    }

    pub fn p1() -> Self {
        Self {
            symbol: "P 1".to_string(),
            generators: Vec::new(),
            operators: vec![IDENTITY],
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn operators(&self) -> &[Rotation] {
        &self.operators
    }

    pub fn order(&self) -> usize {
        self.operators.len()
    }

    /// Canonical representative of the symmetry-equivalent indices of `index`,
    /// Friedel mates included: the lexicographically largest of {±R·h}.
    pub fn map_to_asu(&self, index: MillerIndex) -> MillerIndex {
        self.operators
            .iter()
            .map(|op| apply(op, index))
            .flat_map(|image| [image, negate(image)])
            .max()
            .unwrap_or(index)
    }

    /// Whether some operator maps `index` onto its Friedel mate.
    pub fn is_centric(&self, index: MillerIndex) -> bool {
        if index == [0, 0, 0] {
            return false;
        }
        let mate = negate(index);
        self.operators.iter().any(|op| apply(op, index) == mate)
    }

    /// Number of operators that leave `index` unchanged.
    pub fn epsilon(&self, index: MillerIndex) -> usize {
        self.operators
            .iter()
            .filter(|op| apply(op, index) == index)
            .count()
    }
}

fn normalise_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn point_group_generators(symbol: &str) -> Option<&'static [Rotation]> {
    let generators: &'static [Rotation] = match symbol {
        "P1" => &[],
        "P-1" => &[INVERSION],
        "P2" | "P21" | "C2" | "I2" | "P121" | "P1211" | "C121" | "I121" => &[TWO_Y],
        "P222" | "P2221" | "P21212" | "P212121" | "C2221" | "C222" | "F222" | "I222"
        | "I212121" => &[TWO_Z, TWO_Y],
        "P4" | "P41" | "P42" | "P43" | "I4" | "I41" => &[FOUR_Z],
        "P422" | "P4212" | "P4122" | "P41212" | "P4222" | "P42212" | "P4322" | "P43212"
        | "I422" | "I4122" => &[FOUR_Z, TWO_X],
        "P3" | "P31" | "P32" | "R3" | "H3" => &[THREE_Z],
        "P312" | "P3112" | "P3212" => &[THREE_Z, TWO_A_MINUS_B],
        "P321" | "P3121" | "P3221" | "R32" | "H32" => &[THREE_Z, TWO_AB],
        "P6" | "P61" | "P65" | "P62" | "P64" | "P63" => &[SIX_Z],
        "P622" | "P6122" | "P6522" | "P6222" | "P6422" | "P6322" => &[SIX_Z, TWO_AB],
        "P23" | "F23" | "I23" | "P213" | "I213" => &[TWO_Z, THREE_DIAGONAL],
        "P432" | "P4232" | "F432" | "F4132" | "I432" | "P4332" | "P4132" | "I4132" => {
            &[FOUR_Z, THREE_DIAGONAL]
        }
        _ => return None,
    };
    Some(generators)
}

fn apply(op: &Rotation, index: MillerIndex) -> MillerIndex {
    let mut image = [0; 3];
    for (row, value) in image.iter_mut().enumerate() {
        *value = (0..3).map(|col| op[row][col] * index[col]).sum();
    }
    image
}

fn negate(index: MillerIndex) -> MillerIndex {
    [-index[0], -index[1], -index[2]]
}

fn multiply(lhs: &Rotation, rhs: &Rotation) -> Rotation {
    let mut product = [[0; 3]; 3];
    for (row, product_row) in product.iter_mut().enumerate() {
        for (col, value) in product_row.iter_mut().enumerate() {
            *value = (0..3).map(|k| lhs[row][k] * rhs[k][col]).sum();
        }
    }
    product
}

fn determinant(m: &Rotation) -> i32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

#[cfg(test)]
mod tests {
    use super::{SpaceGroup, SymmetryError};

    #[test]
    fn tabulated_groups_have_the_expected_order() {
        let cases = [
            ("P 1", 1),
            ("P -1", 2),
            ("C 2", 2),
            ("P 21 21 21", 4),
            ("P 41 21 2", 8),
            ("P 31 2 1", 6),
            ("P 61 2 2", 12),
            ("P 2 3", 12),
            ("I 4 3 2", 24),
        ];
        for (symbol, order) in cases {
            let group = SpaceGroup::from_symbol(symbol).expect("symbol should be known");
            assert_eq!(group.order(), order, "{symbol}");
        }
    }

    #[test]
    fn friedel_mates_and_equivalents_share_an_asu_index() {
        let group = SpaceGroup::from_symbol("C 2").expect("C2");
        let canonical = group.map_to_asu([1, 2, 3]);
        assert_eq!(group.map_to_asu([-1, 2, -3]), canonical);
        assert_eq!(group.map_to_asu([-1, -2, -3]), canonical);
        assert_eq!(group.map_to_asu([1, -2, 3]), canonical);
        assert_ne!(group.map_to_asu([1, 2, -3]), canonical);

        let p1 = SpaceGroup::p1();
        assert_eq!(p1.map_to_asu([-1, 0, 0]), [1, 0, 0]);
    }

    #[test]
    fn centric_zones_and_epsilon() {
        let group = SpaceGroup::from_symbol("P 2").expect("P2");
        assert!(group.is_centric([1, 0, 2]));
        assert!(!group.is_centric([1, 1, 2]));
        assert_eq!(group.epsilon([0, 3, 0]), 2);
        assert_eq!(group.epsilon([1, 3, 0]), 1);
    }

    #[test]
    fn unknown_symbols_and_bad_generators_are_rejected() {
        assert!(matches!(
            SpaceGroup::from_symbol("Q 7"),
            Err(SymmetryError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            SpaceGroup::from_generators("custom", &[[[2, 0, 0], [0, 1, 0], [0, 0, 1]]]),
            Err(SymmetryError::InvalidGenerator { index: 0, .. })
        ));
    }

    #[test]
    fn json_round_trip_uses_the_symbol() {
        let group = SpaceGroup::from_symbol("P 4 2 2").expect("P422");
        let encoded = serde_json::to_string(&group).expect("encode");
        assert_eq!(encoded, r#"{"symbol":"P 4 2 2"}"#);
        let decoded: SpaceGroup = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, group);
    }
}
