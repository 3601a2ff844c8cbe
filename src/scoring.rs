//! One-variable significance scoring of derived columns.
//!
//! Each derived column is scored against the outcome with a one-variable
//! model: ordinary least squares for numeric outcomes (slope F-test) and a
//! Newton-fitted logistic regression for 0/1 outcomes (deviance
//! pseudo-R-squared, analysis-of-deviance F-test on the slope). The
//! deviance form of the slope test is asymptotically equivalent to the
//! Wald statistic but does not collapse under the quasi-separation that
//! impact-coded predictors routinely produce. Cross-validated encoders
//! charge extra model degrees of freedom, which shrink the residual
//! degrees of freedom of both tests.

use crate::encoders::EncoderKind;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Per-derived-variable statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub var_name: String,
    pub var_moves: bool,
    pub rsq: f64,
    pub sig: f64,
    pub needs_split: bool,
    pub extra_model_degrees: usize,
    pub origin: String,
    pub kind: EncoderKind,
    pub recommended: bool,
    /// Outcome class this row was scored against, for multinomial designs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outcome_level: Option<String>,
}

/// One-variable model family matching the outcome type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetModel {
    Linear,
    Logistic,
}

/// Whether a column has any variation at all.
pub(crate) fn moves(x: &[f64]) -> bool {
    x.windows(2).any(|w| w[0] != w[1])
}

/// Score a derived column against a fully-finite target. Returns
/// `(rsq, sig)`; degenerate inputs score `(0, 1)`.
pub(crate) fn significance(x: &[f64], y: &[f64], model: TargetModel, extra: usize) -> (f64, f64) {
    if x.len() != y.len() || x.len() < 3 || !moves(x) {
        return (0.0, 1.0);
    }
    match model {
        TargetModel::Linear => linear_significance(x, y, extra),
        TargetModel::Logistic => logistic_significance(x, y, extra),
    }
}

fn residual_df(n: usize, extra: usize) -> f64 {
    let df = n as f64 - 2.0 - extra as f64;
    if df < 1.0 {
        1.0
    } else {
        df
    }
}

fn linear_significance(x: &[f64], y: &[f64], extra: usize) -> (f64, f64) {
    let n = x.len();
    let x_mean = x.iter().sum::<f64>() / n as f64;
    let y_mean = y.iter().sum::<f64>() / n as f64;
    let xc = Array1::from_iter(x.iter().map(|&v| v - x_mean));
    let yc = Array1::from_iter(y.iter().map(|&v| v - y_mean));

    let sxx = xc.dot(&xc);
    let syy = yc.dot(&yc);
    if sxx <= 0.0 || syy <= 0.0 {
        return (0.0, 1.0);
    }
    let sxy = xc.dot(&yc);
    let rsq = ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0);

    let df = residual_df(n, extra);
    let f_stat = if rsq >= 1.0 {
        f64::MAX
    } else {
        rsq / (1.0 - rsq) * df
    };
    let sig = match FisherSnedecor::new(1.0, df) {
        Ok(dist) => (1.0 - dist.cdf(f_stat)).clamp(0.0, 1.0),
        Err(_) => 1.0,
    };
    (rsq, sig)
}

fn logistic_significance(x: &[f64], y: &[f64], extra: usize) -> (f64, f64) {
    let n = x.len();
    let p_bar = y.iter().sum::<f64>() / n as f64;
    if !(p_bar > 0.0 && p_bar < 1.0) {
        return (0.0, 1.0);
    }

    // standardize the predictor; the Wald statistic and deviance are
    // invariant under linear rescaling and the Newton steps stay
    // well-conditioned for extreme impact values
    let x_mean = x.iter().sum::<f64>() / n as f64;
    let x_var = x.iter().map(|&v| (v - x_mean) * (v - x_mean)).sum::<f64>() / n as f64;
    if x_var <= 0.0 {
        return (0.0, 1.0);
    }
    let x_sd = x_var.sqrt();
    let xs: Vec<f64> = x.iter().map(|&v| (v - x_mean) / x_sd).collect();

    let mut b0 = (p_bar / (1.0 - p_bar)).ln();
    let mut b1 = 0.0;
    for _ in 0..25 {
        let mut g0 = 0.0;
        let mut g1 = 0.0;
        let mut h00 = 0.0;
        let mut h01 = 0.0;
        let mut h11 = 0.0;
        for (&xi, &yi) in xs.iter().zip(y) {
            let eta = (b0 + b1 * xi).clamp(-30.0, 30.0);
            let p = 1.0 / (1.0 + (-eta).exp());
            let w = (p * (1.0 - p)).max(1e-9);
            g0 += yi - p;
            g1 += (yi - p) * xi;
            h00 += w;
            h01 += w * xi;
            h11 += w * xi * xi;
        }
        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-12 {
            break;
        }
        let d0 = (h11 * g0 - h01 * g1) / det;
        let d1 = (h00 * g1 - h01 * g0) / det;
        b0 += d0;
        b1 += d1;
        if d0.abs() + d1.abs() < 1e-10 {
            break;
        }
    }

    let deviance = |with_slope: bool| -> f64 {
        let mut d = 0.0;
        for (&xi, &yi) in xs.iter().zip(y) {
            let p = if with_slope {
                let eta = (b0 + b1 * xi).clamp(-30.0, 30.0);
                1.0 / (1.0 + (-eta).exp())
            } else {
                p_bar
            };
            let p = p.clamp(1e-12, 1.0 - 1e-12);
            d -= 2.0 * (yi * p.ln() + (1.0 - yi) * (1.0 - p).ln());
        }
        d
    };
    let null_dev = deviance(false);
    let model_dev = deviance(true);
    let rsq = if null_dev > 0.0 {
        (1.0 - model_dev / null_dev).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let df = residual_df(n, extra);
    let drop = (null_dev - model_dev).max(0.0);
    let f_stat = if model_dev > 0.0 {
        drop / (model_dev / df)
    } else {
        f64::MAX
    };
    let sig = match FisherSnedecor::new(1.0, df) {
        Ok(dist) => (1.0 - dist.cdf(f_stat)).clamp(0.0, 1.0),
        Err(_) => 1.0,
    };
    (rsq, sig)
}
