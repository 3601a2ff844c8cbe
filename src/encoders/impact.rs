//! Outcome-conditional level effect encoder ("impact coding").

use crate::error::Result;
use crate::frame::Column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::{mean, Scaling, EFFECT_CLAMP};

/// Key the rare levels are pooled under before estimation.
pub(crate) const RARE_POOL: &str = "_rare_";

/// Scale the per-level effects are estimated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSpace {
    /// Smoothed conditional mean of the centered outcome:
    /// `b_l = sum(y_i - y_bar) / (n_l + sm_factor)` over rows in level `l`.
    Identity,
    /// Link-space delta for a 0/1 outcome:
    /// `logit(p_l) - logit(p_bar)` with Laplace-style smoothing.
    Link,
}

/// Maps each training level to a scalar effect estimate. Novel levels map
/// to 0, which is the grand mean on either scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactEncoder {
    pub origin: String,
    pub name: String,
    /// Outcome class this code was fit against, for multinomial designs.
    pub class: Option<String>,
    pub space: ImpactSpace,
    pub scores: BTreeMap<String, f64>,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

struct LevelTally {
    count: usize,
    sum: f64,
}

impl ImpactEncoder {
    /// Fit per-level effects. `levels` and `y` are aligned over the fit
    /// rows; `y` is fully finite. Returns the encoder and whether any
    /// estimate hit the overflow clamp.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        origin: &str,
        name: &str,
        class: Option<&str>,
        levels: &[&str],
        y: &[f64],
        space: ImpactSpace,
        sm_factor: f64,
        rare_count: usize,
    ) -> (Self, bool) {
        let y_bar = mean(y);

        let mut tallies: BTreeMap<&str, LevelTally> = BTreeMap::new();
        for (&l, &yi) in levels.iter().zip(y) {
            let t = tallies.entry(l).or_insert(LevelTally { count: 0, sum: 0.0 });
            t.count += 1;
            t.sum += yi;
        }

        // pool rare levels into one bucket before estimation
        let mut rare_members: Vec<&str> = Vec::new();
        let mut pooled = LevelTally { count: 0, sum: 0.0 };
        for (&l, t) in &tallies {
            if t.count <= rare_count {
                rare_members.push(l);
                pooled.count += t.count;
                pooled.sum += t.sum;
            }
        }

        let estimate = |t: &LevelTally| -> f64 {
            match space {
                ImpactSpace::Identity => {
                    (t.sum - t.count as f64 * y_bar) / (t.count as f64 + sm_factor)
                }
                ImpactSpace::Link => {
                    let p_bar = y_bar;
                    let p_level =
                        (t.sum + sm_factor * p_bar + 0.5) / (t.count as f64 + sm_factor + 1.0);
                    logit(p_level) - logit(p_bar)
                }
            }
        };

        let pooled_estimate = if pooled.count > 0 {
            estimate(&pooled)
        } else {
            0.0
        };

        let mut clamped = false;
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for (&l, t) in &tallies {
            let raw = if rare_members.contains(&l) {
                pooled_estimate
            } else {
                estimate(t)
            };
            let value = if raw.abs() > EFFECT_CLAMP {
                clamped = true;
                raw.signum() * EFFECT_CLAMP
            } else if raw.is_finite() {
                raw
            } else {
                clamped = true;
                0.0
            };
            scores.insert(l.to_string(), value);
        }
        if clamped {
            warn!(column = %origin, clamp = EFFECT_CLAMP, "impact estimate overflowed, clamped");
        }

        let emitted: Vec<f64> = levels
            .iter()
            .map(|&l| *scores.get(l).expect("fit level is present"))
            .collect();
        let enc = Self {
            origin: origin.to_string(),
            name: name.to_string(),
            class: class.map(String::from),
            space,
            scores,
            emitted_mean: mean(&emitted),
            scaling: None,
        };
        (enc, clamped)
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let levels = col.levels_at(rows)?;
        Ok(levels
            .iter()
            .map(|&l| self.scores.get(l).copied().unwrap_or(0.0))
            .collect())
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_centered_means() {
        let levels = ["a", "a", "b", "b"];
        let y = [1.0, 3.0, 5.0, 7.0];
        // grand mean 4; a: (1-4)+(3-4) = -4 over 2 rows; b symmetric
        let (enc, clamped) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 0.0, 0);
        assert!(!clamped);
        assert_eq!(enc.scores["a"], -2.0);
        assert_eq!(enc.scores["b"], 2.0);
    }

    #[test]
    fn test_identity_smoothing_shrinks() {
        let levels = ["a", "b", "b"];
        let y = [3.0, 0.0, 0.0];
        let (plain, _) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 0.0, 0);
        let (smooth, _) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 2.0, 0);
        assert!(smooth.scores["a"].abs() < plain.scores["a"].abs());
    }

    #[test]
    fn test_link_space_signs() {
        let levels = ["a", "a", "a", "b", "b", "b"];
        let y = [1.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let (enc, _) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Link, 0.0, 0);
        // level a is all-positive, level b mostly negative; smoothing keeps both finite
        assert!(enc.scores["a"] > 0.0);
        assert!(enc.scores["b"] < 0.0);
        assert!(enc.scores["a"].is_finite());
    }

    #[test]
    fn test_rare_levels_pooled() {
        let levels = ["a", "a", "a", "a", "r1", "r2"];
        let y = [0.0, 0.0, 0.0, 0.0, 10.0, 20.0];
        let (enc, _) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 0.0, 1);
        // r1 and r2 each have count 1 <= rare_count, so they share one estimate
        assert_eq!(enc.scores["r1"], enc.scores["r2"]);
        assert_ne!(enc.scores["r1"], enc.scores["a"]);
    }

    #[test]
    fn test_novel_level_is_zero() {
        let levels = ["a", "b"];
        let y = [0.0, 1.0];
        let (enc, _) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 0.0, 0);
        let test = Column::Categorical(vec![Some("zzz".to_string())]);
        assert_eq!(enc.apply_at(&test, &[0]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_overflow_clamped() {
        let levels = ["a", "b"];
        let y = [0.0, 1e300];
        let (enc, clamped) =
            ImpactEncoder::fit("c", "c_impact", None, &levels, &y, ImpactSpace::Identity, 0.0, 0);
        assert!(clamped);
        assert!(enc.scores["b"].abs() <= EFFECT_CLAMP);
    }
}
