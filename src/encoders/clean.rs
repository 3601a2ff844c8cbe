//! Numeric passthrough encoder with imputation and optional collaring.

use crate::error::{Result, VarplanError};
use crate::frame::Column;
use crate::params::Imputation;
use serde::{Deserialize, Serialize};

use super::{mean, Scaling};

/// Numeric encoder: passes finite values through (winsorized when a collar
/// is fitted) and substitutes the fitted fill value for missing cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanEncoder {
    pub origin: String,
    pub name: String,
    /// Value substituted for missing cells.
    pub fill: f64,
    /// Winsorization bounds at the fit-time tail quantiles, when enabled.
    pub collar: Option<(f64, f64)>,
    pub emitted_mean: f64,
    pub scaling: Option<Scaling>,
}

impl CleanEncoder {
    /// Fit on training values. `xs` may contain missing cells; the caller
    /// guarantees at least one finite value.
    pub fn fit(
        origin: &str,
        name: &str,
        xs: &[f64],
        imputation: &Imputation,
        collar_prob: Option<f64>,
    ) -> Result<Self> {
        let mut finite: Vec<f64> = xs.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(VarplanError::DataError(format!(
                "column {origin} has no usable numeric values"
            )));
        }
        finite.sort_by(f64::total_cmp);

        let collar = match collar_prob {
            Some(p) if p > 0.0 => Some((quantile(&finite, p), quantile(&finite, 1.0 - p))),
            _ => None,
        };

        let fill = match imputation {
            Imputation::Mean => {
                let collared: Vec<f64> = finite.iter().map(|&v| apply_collar(v, collar)).collect();
                mean(&collared)
            }
            Imputation::Median => apply_collar(quantile(&finite, 0.5), collar),
            Imputation::Constant(c) => *c,
        };

        let mut enc = Self {
            origin: origin.to_string(),
            name: name.to_string(),
            fill,
            collar,
            emitted_mean: 0.0,
            scaling: None,
        };
        let emitted = enc.apply_values(xs);
        enc.emitted_mean = mean(&emitted);
        Ok(enc)
    }

    fn apply_values(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter()
            .map(|&x| {
                if x.is_finite() {
                    apply_collar(x, self.collar)
                } else {
                    self.fill
                }
            })
            .collect()
    }

    pub(crate) fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let xs = col.numeric_at(rows)?;
        Ok(self.apply_values(&xs))
    }
}

fn apply_collar(v: f64, collar: Option<(f64, f64)>) -> f64 {
    match collar {
        Some((lo, hi)) => v.clamp(lo, hi),
        None => v,
    }
}

/// Linear-interpolation quantile of an ascending-sorted slice.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_fill() {
        let xs = vec![1.0, 2.0, f64::NAN, 3.0];
        let enc = CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Mean, None).unwrap();
        assert_eq!(enc.fill, 2.0);
        let col = Column::Numeric(xs);
        let out = enc.apply_at(&col, &[0, 1, 2, 3]).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_median_fill() {
        let xs = vec![1.0, 10.0, 100.0, f64::NAN];
        let enc = CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Median, None).unwrap();
        assert_eq!(enc.fill, 10.0);
    }

    #[test]
    fn test_constant_fill() {
        let xs = vec![1.0, f64::NAN];
        let enc = CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Constant(-1.0), None).unwrap();
        assert_eq!(enc.fill, -1.0);
    }

    #[test]
    fn test_collar_clamps_tails() {
        let xs: Vec<f64> = (0..101).map(|i| i as f64).collect();
        let enc = CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Mean, Some(0.05)).unwrap();
        let (lo, hi) = enc.collar.unwrap();
        assert_eq!(lo, 5.0);
        assert_eq!(hi, 95.0);
        let col = Column::Numeric(vec![-10.0, 50.0, 1000.0]);
        let out = enc.apply_at(&col, &[0, 1, 2]).unwrap();
        assert_eq!(out, vec![5.0, 50.0, 95.0]);
    }

    #[test]
    fn test_infinite_treated_as_missing() {
        let xs = vec![1.0, 3.0, f64::INFINITY];
        let enc = CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Mean, None).unwrap();
        let col = Column::Numeric(xs);
        let out = enc.apply_at(&col, &[2]).unwrap();
        assert_eq!(out, vec![2.0]);
    }

    #[test]
    fn test_rejects_all_missing() {
        let xs = vec![f64::NAN, f64::NAN];
        assert!(CleanEncoder::fit("x", "x_clean", &xs, &Imputation::Mean, None).is_err());
    }
}
