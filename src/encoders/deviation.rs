//! Per-level outcome spread encoder.

use crate::error::Result;
use crate::frame::Column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{mean, Scaling};

/// Maps each level to the sample standard deviation of the outcome within
/// that level. Levels too small to estimate, and novel levels, map to the
/// pooled (grand) standard deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationEncoder {
    pub origin: String,
    pub name: String,
    pub spreads: BTreeMap<String, f64>,
    pub pooled: f64,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

impl DeviationEncoder {
    /// `levels` and `y` are aligned over the fit rows; `y` is fully finite.
    pub fn fit(origin: &str, name: &str, levels: &[&str], y: &[f64], sm_factor: f64) -> Self {
        let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (&l, &yi) in levels.iter().zip(y) {
            groups.entry(l).or_default().push(yi);
        }

        let pooled = spread(y, sm_factor).unwrap_or(0.0);
        let spreads: BTreeMap<String, f64> = groups
            .iter()
            .map(|(&l, ys)| (l.to_string(), spread(ys, sm_factor).unwrap_or(pooled)))
            .collect();

        let emitted: Vec<f64> = levels
            .iter()
            .map(|&l| *spreads.get(l).expect("fit level is present"))
            .collect();
        Self {
            origin: origin.to_string(),
            name: name.to_string(),
            spreads,
            pooled,
            emitted_mean: mean(&emitted),
            scaling: None,
        }
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let levels = col.levels_at(rows)?;
        Ok(levels
            .iter()
            .map(|&l| self.spreads.get(l).copied().unwrap_or(self.pooled))
            .collect())
    }
}

/// Sample standard deviation with a smoothed denominator `n - 1 + sm`.
/// None when fewer than two observations.
fn spread(ys: &[f64], sm_factor: f64) -> Option<f64> {
    if ys.len() < 2 {
        return None;
    }
    let m = mean(ys);
    let ss: f64 = ys.iter().map(|&v| (v - m) * (v - m)).sum();
    Some((ss / (ys.len() as f64 - 1.0 + sm_factor)).sqrt())
}
