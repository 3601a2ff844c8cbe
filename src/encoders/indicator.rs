//! Per-level dummy encoder.

use crate::error::Result;
use crate::frame::{Column, MISSING_LEVEL};
use serde::{Deserialize, Serialize};

use super::Scaling;

/// Emits 1 where the origin cell equals the fitted level, else 0. Missing
/// cells match the [`MISSING_LEVEL`] sentinel level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorEncoder {
    pub origin: String,
    pub name: String,
    /// Raw (unsanitized) level this indicator fires on.
    pub level: String,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

impl IndicatorEncoder {
    /// `levels` are the training-row level keys (missing already mapped to
    /// the sentinel); the emitted mean is the level's training prevalence.
    pub fn fit(origin: &str, name: &str, level: &str, levels: &[&str]) -> Self {
        let hits = levels.iter().filter(|&&l| l == level).count();
        Self {
            origin: origin.to_string(),
            name: name.to_string(),
            level: level.to_string(),
            emitted_mean: if levels.is_empty() {
                0.0
            } else {
                hits as f64 / levels.len() as f64
            },
            scaling: None,
        }
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let levels = col.levels_at(rows)?;
        Ok(levels
            .iter()
            .map(|&l| if l == self.level { 1.0 } else { 0.0 })
            .collect())
    }
}
