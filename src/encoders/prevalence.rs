//! Level-frequency encoder.

use crate::error::Result;
use crate::frame::Column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{mean, Scaling};

/// Maps each level to its training prevalence (count / n). Novel levels map
/// to a smoothed default of `1 / (n + 1)`, or 0 when smoothing is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrevalenceEncoder {
    pub origin: String,
    pub name: String,
    pub rates: BTreeMap<String, f64>,
    pub novel_rate: f64,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

impl PrevalenceEncoder {
    pub fn fit(origin: &str, name: &str, levels: &[&str], smoothed_novel: bool) -> Self {
        let n = levels.len() as f64;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for &l in levels {
            *counts.entry(l.to_string()).or_insert(0) += 1;
        }
        let rates: BTreeMap<String, f64> = counts
            .into_iter()
            .map(|(l, c)| (l, c as f64 / n))
            .collect();
        let novel_rate = if smoothed_novel { 1.0 / (n + 1.0) } else { 0.0 };

        let emitted: Vec<f64> = levels
            .iter()
            .map(|&l| *rates.get(l).expect("fit level is present"))
            .collect();
        Self {
            origin: origin.to_string(),
            name: name.to_string(),
            rates,
            novel_rate,
            emitted_mean: mean(&emitted),
            scaling: None,
        }
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let levels = col.levels_at(rows)?;
        Ok(levels
            .iter()
            .map(|&l| self.rates.get(l).copied().unwrap_or(self.novel_rate))
            .collect())
    }
}
