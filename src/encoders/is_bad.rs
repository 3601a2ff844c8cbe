//! Missing-cell indicator encoder.

use crate::error::Result;
use crate::frame::Column;
use serde::{Deserialize, Serialize};

use super::Scaling;

/// Emits 1 where the origin cell is missing (or, for numeric columns, NaN
/// or infinite), else 0. Only instantiated when the training column has at
/// least one bad cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsBadEncoder {
    pub origin: String,
    pub name: String,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

impl IsBadEncoder {
    pub fn fit(origin: &str, name: &str, col: &Column, rows: &[usize]) -> Self {
        let bad = col.missing_count(rows);
        Self {
            origin: origin.to_string(),
            name: name.to_string(),
            emitted_mean: if rows.is_empty() {
                0.0
            } else {
                bad as f64 / rows.len() as f64
            },
            scaling: None,
        }
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        Ok(rows
            .iter()
            .map(|&r| if col.is_missing(r) { 1.0 } else { 0.0 })
            .collect())
    }
}
