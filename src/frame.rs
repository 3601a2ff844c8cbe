//! In-memory rectangular dataset used by treatment design and application.
//!
//! A [`Frame`] is an ordered collection of named, equal-length columns.
//! Columns are either numeric (`f64`, with non-finite values acting as the
//! missing sentinel) or categorical (`Option<String>`, with `None` as the
//! missing sentinel). Frames are immutable inputs: every operation that
//! produces new data returns a new frame.

use crate::error::{Result, VarplanError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Level name used for missing categorical cells when they participate in
/// level statistics and indicator naming.
pub const MISSING_LEVEL: &str = "missing";

/// A single typed column
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    /// Missing predicate for a single cell. Numeric cells are missing when
    /// they are NaN or infinite; categorical cells when they are `None`.
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => !v[row].is_finite(),
            Column::Categorical(v) => v[row].is_none(),
        }
    }

    /// Count of missing cells over the given rows.
    pub fn missing_count(&self, rows: &[usize]) -> usize {
        rows.iter().filter(|&&r| self.is_missing(r)).count()
    }

    /// Numeric values at the given rows. Fails on a categorical column.
    pub fn numeric_at(&self, rows: &[usize]) -> Result<Vec<f64>> {
        match self {
            Column::Numeric(v) => Ok(rows.iter().map(|&r| v[r]).collect()),
            Column::Categorical(_) => Err(VarplanError::DataError(
                "expected numeric column, found categorical".to_string(),
            )),
        }
    }

    /// Level keys at the given rows, with missing cells mapped to
    /// [`MISSING_LEVEL`]. Fails on a numeric column.
    pub fn levels_at(&self, rows: &[usize]) -> Result<Vec<&str>> {
        match self {
            Column::Categorical(v) => Ok(rows
                .iter()
                .map(|&r| v[r].as_deref().unwrap_or(MISSING_LEVEL))
                .collect()),
            Column::Numeric(_) => Err(VarplanError::DataError(
                "expected categorical column, found numeric".to_string(),
            )),
        }
    }

    fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&r| v[r]).collect()),
            Column::Categorical(v) => {
                Column::Categorical(rows.iter().map(|&r| v[r].clone()).collect())
            }
        }
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Column::Numeric(v) => {
                for &x in v {
                    // normalize every missing sentinel to one bit pattern
                    let bits = if x.is_finite() { x.to_bits() } else { u64::MAX };
                    hasher.update(bits.to_le_bytes());
                }
            }
            Column::Categorical(v) => {
                for cell in v {
                    match cell {
                        Some(s) => {
                            hasher.update([1u8]);
                            hasher.update(s.as_bytes());
                        }
                        None => hasher.update([0u8]),
                    }
                    hasher.update([0xff]);
                }
            }
        }
    }
}

/// Ordered, named collection of equal-length columns
#[derive(Debug, Clone, Default)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, consuming and returning the frame (builder style).
    /// Fails if the name is already present or the length disagrees with
    /// existing columns.
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(VarplanError::DataError(format!(
                "duplicate column name: {name}"
            )));
        }
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(VarplanError::DataError(format!(
                "column {name} has {} rows, frame has {}",
                column.len(),
                self.n_rows()
            )));
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(column);
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// New frame holding the given rows of every column, in the given order.
    pub fn take(&self, rows: &[usize]) -> Frame {
        let mut out = Frame::new();
        for (name, col) in self.names.iter().zip(&self.columns) {
            // names are already unique and lengths agree
            out = out
                .with_column(name.clone(), col.take(rows))
                .expect("subset of a valid frame is valid");
        }
        out
    }

    /// Content fingerprint over the named columns, used to detect a
    /// transform of the exact frame a plan was fit on. Column order in
    /// `cols` is significant.
    pub fn fingerprint(&self, cols: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.n_rows().to_le_bytes());
        for name in cols {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            if let Some(col) = self.column(name) {
                col.hash_into(&mut hasher);
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(values: &[Option<&str>]) -> Column {
        Column::Categorical(values.iter().map(|v| v.map(String::from)).collect())
    }

    #[test]
    fn test_build_and_access() {
        let f = Frame::new()
            .with_column("x", Column::Numeric(vec![1.0, 2.0, f64::NAN]))
            .unwrap()
            .with_column("c", cat(&[Some("a"), None, Some("b")]))
            .unwrap();
        assert_eq!(f.n_rows(), 3);
        assert_eq!(f.n_cols(), 2);
        assert_eq!(f.column_names(), &["x", "c"]);
        assert!(f.column("x").unwrap().is_numeric());
        assert!(f.column("missing_col").is_none());
    }

    #[test]
    fn test_missing_predicate() {
        let f = Frame::new()
            .with_column("x", Column::Numeric(vec![1.0, f64::NAN, f64::INFINITY]))
            .unwrap()
            .with_column("c", cat(&[Some("a"), None, Some("b")]))
            .unwrap();
        let x = f.column("x").unwrap();
        assert!(!x.is_missing(0));
        assert!(x.is_missing(1));
        assert!(x.is_missing(2));
        let c = f.column("c").unwrap();
        assert!(c.is_missing(1));
        assert_eq!(c.missing_count(&[0, 1, 2]), 1);
    }

    #[test]
    fn test_levels_use_missing_sentinel() {
        let f = Frame::new()
            .with_column("c", cat(&[Some("a"), None, Some("b")]))
            .unwrap();
        let levels = f.column("c").unwrap().levels_at(&[0, 1, 2]).unwrap();
        assert_eq!(levels, vec!["a", MISSING_LEVEL, "b"]);
    }

    #[test]
    fn test_take_rows() {
        let f = Frame::new()
            .with_column("x", Column::Numeric(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let sub = f.take(&[3, 1]);
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.column("x").unwrap().numeric_at(&[0, 1]).unwrap(), vec![4.0, 2.0]);
    }

    #[test]
    fn test_rejects_ragged_and_duplicate_columns() {
        let f = Frame::new()
            .with_column("x", Column::Numeric(vec![1.0, 2.0]))
            .unwrap();
        assert!(f
            .clone()
            .with_column("y", Column::Numeric(vec![1.0]))
            .is_err());
        assert!(f.with_column("x", Column::Numeric(vec![3.0, 4.0])).is_err());
    }

    #[test]
    fn test_fingerprint_stability() {
        let build = || {
            Frame::new()
                .with_column("x", Column::Numeric(vec![1.0, f64::NAN, 3.0]))
                .unwrap()
                .with_column("c", cat(&[Some("a"), None, Some("b")]))
                .unwrap()
        };
        let cols = vec!["x".to_string(), "c".to_string()];
        assert_eq!(build().fingerprint(&cols), build().fingerprint(&cols));

        let other = Frame::new()
            .with_column("x", Column::Numeric(vec![1.0, f64::NAN, 3.5]))
            .unwrap()
            .with_column("c", cat(&[Some("a"), None, Some("b")]))
            .unwrap();
        assert_ne!(build().fingerprint(&cols), other.fingerprint(&cols));
    }
}
