use crate::domain::ScalingError;
use crate::reflections::MillerIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named column of a [`ReflectionTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Column {
    Double(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Vec3(Vec<[f64; 3]>),
    Miller(Vec<MillerIndex>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Double(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Bool(values) => values.len(),
            Self::Vec3(values) => values.len(),
            Self::Miller(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Vec3(_) => "vec3",
            Self::Miller(_) => "miller",
        }
    }

    fn select(&self, mask: &[bool]) -> Self {
        fn pick<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(value, _)| value.clone())
                .collect()
        }
        match self {
            Self::Double(values) => Self::Double(pick(values, mask)),
            Self::Int(values) => Self::Int(pick(values, mask)),
            Self::Bool(values) => Self::Bool(pick(values, mask)),
            Self::Vec3(values) => Self::Vec3(pick(values, mask)),
            Self::Miller(values) => Self::Miller(pick(values, mask)),
        }
    }

    fn reorder(&self, permutation: &[usize]) -> Self {
        fn gather<T: Clone>(values: &[T], permutation: &[usize]) -> Vec<T> {
            permutation.iter().map(|&row| values[row].clone()).collect()
        }
        match self {
            Self::Double(values) => Self::Double(gather(values, permutation)),
            Self::Int(values) => Self::Int(gather(values, permutation)),
            Self::Bool(values) => Self::Bool(gather(values, permutation)),
            Self::Vec3(values) => Self::Vec3(gather(values, permutation)),
            Self::Miller(values) => Self::Miller(gather(values, permutation)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("column '{name}' has {actual} rows, table has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("reflection table has no column '{name}'")]
    MissingColumn { name: String },
    #[error("column '{name}' holds {actual} values, expected {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("selection has {actual} entries, table has {expected} rows")]
    SelectionLength { expected: usize, actual: usize },
    #[error("row order is not a permutation of {rows} rows")]
    InvalidPermutation { rows: usize },
}

impl From<TableError> for ScalingError {
    fn from(error: TableError) -> Self {
        match error {
            TableError::MissingColumn { .. } | TableError::WrongType { .. } => {
                ScalingError::configuration("INPUT.REFLECTION_COLUMN", error.to_string())
            }
            _ => ScalingError::internal("TABLE.SHAPE", error.to_string()),
        }
    }
}

/// Column-oriented reflection records. All columns share one row count and rows
/// keep their identity under column updates; only [`select`](Self::select) and
/// [`reorder`](Self::reorder) change row identity, and both return new tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "TableDocument", into = "TableDocument")]
pub struct ReflectionTable {
    nrows: usize,
    columns: BTreeMap<String, Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableDocument {
    columns: BTreeMap<String, Column>,
}

impl TryFrom<TableDocument> for ReflectionTable {
    type Error = TableError;

    fn try_from(document: TableDocument) -> Result<Self, Self::Error> {
        let mut table = ReflectionTable::new();
        for (name, column) in document.columns {
            table.insert(name, column)?;
        }
        Ok(table)
    }
}

impl From<ReflectionTable> for TableDocument {
    fn from(table: ReflectionTable) -> Self {
        Self {
            columns: table.columns,
        }
    }
}

impl ReflectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Adds or replaces a column. The first column of an empty table fixes the row count.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<(), TableError> {
        let name = name.into();
        if self.columns.is_empty() {
            self.nrows = column.len();
        } else if column.len() != self.nrows {
            return Err(TableError::LengthMismatch {
                name,
                expected: self.nrows,
                actual: column.len(),
            });
        }
        self.columns.insert(name, column);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        self.columns.remove(name)
    }

    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.columns.retain(|name, _| keep(name));
    }

    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.columns.get(name).ok_or_else(|| TableError::MissingColumn {
            name: name.to_string(),
        })
    }

    pub fn doubles(&self, name: &str) -> Result<&[f64], TableError> {
        match self.column(name)? {
            Column::Double(values) => Ok(values),
            other => Err(wrong_type(name, "double", other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<&[i64], TableError> {
        match self.column(name)? {
            Column::Int(values) => Ok(values),
            other => Err(wrong_type(name, "int", other)),
        }
    }

    pub fn bools(&self, name: &str) -> Result<&[bool], TableError> {
        match self.column(name)? {
            Column::Bool(values) => Ok(values),
            other => Err(wrong_type(name, "bool", other)),
        }
    }

    pub fn vec3s(&self, name: &str) -> Result<&[[f64; 3]], TableError> {
        match self.column(name)? {
            Column::Vec3(values) => Ok(values),
            other => Err(wrong_type(name, "vec3", other)),
        }
    }

    pub fn millers(&self, name: &str) -> Result<&[MillerIndex], TableError> {
        match self.column(name)? {
            Column::Miller(values) => Ok(values),
            other => Err(wrong_type(name, "miller", other)),
        }
    }

    /// Doubles of an optional column, or `default` for every row when it is absent.
    pub fn doubles_or(&self, name: &str, default: f64) -> Result<Vec<f64>, TableError> {
        if self.contains(name) {
            Ok(self.doubles(name)?.to_vec())
        } else {
            Ok(vec![default; self.nrows])
        }
    }

    pub fn set_doubles(&mut self, name: &str, values: Vec<f64>) -> Result<(), TableError> {
        self.insert(name, Column::Double(values))
    }

    pub fn set_bools(&mut self, name: &str, values: Vec<bool>) -> Result<(), TableError> {
        self.insert(name, Column::Bool(values))
    }

    pub fn set_ints(&mut self, name: &str, values: Vec<i64>) -> Result<(), TableError> {
        self.insert(name, Column::Int(values))
    }

    pub fn set_millers(&mut self, name: &str, values: Vec<MillerIndex>) -> Result<(), TableError> {
        self.insert(name, Column::Miller(values))
    }

    pub fn select(&self, mask: &[bool]) -> Result<Self, TableError> {
        if mask.len() != self.nrows {
            return Err(TableError::SelectionLength {
                expected: self.nrows,
                actual: mask.len(),
            });
        }
        Ok(Self {
            nrows: mask.iter().filter(|keep| **keep).count(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.select(mask)))
                .collect(),
        })
    }

    pub fn reorder(&self, permutation: &[usize]) -> Result<Self, TableError> {
        let mut seen = vec![false; self.nrows];
        if permutation.len() != self.nrows {
            return Err(TableError::InvalidPermutation { rows: self.nrows });
        }
        for &row in permutation {
            if row >= self.nrows || seen[row] {
                return Err(TableError::InvalidPermutation { rows: self.nrows });
            }
            seen[row] = true;
        }
        Ok(Self {
            nrows: self.nrows,
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.reorder(permutation)))
                .collect(),
        })
    }
}

fn wrong_type(name: &str, expected: &'static str, actual: &Column) -> TableError {
    TableError::WrongType {
        name: name.to_string(),
        expected,
        actual: actual.type_name(),
    }
}
