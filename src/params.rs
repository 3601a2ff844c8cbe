//! Treatment design configuration.

use crate::encoders::EncoderKind;
use crate::error::{Result, VarplanError};
use crate::outcome::OutcomeSpec;
use crate::split::SplitStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Strategy for filling missing numeric cells in the clean encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    Mean,
    Median,
    Constant(f64),
}

/// Configuration for treatment design
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentParams {
    /// Threshold prevalence for indicator emission.
    pub min_fraction: f64,

    /// Smoothing in impact/deviation estimates.
    pub sm_factor: f64,

    /// Levels with training count <= this are pooled before impact
    /// estimation.
    pub rare_count: usize,

    /// Indicator levels whose own significance is above this are
    /// suppressed; None disables the filter.
    pub rare_sig: Option<f64>,

    /// Numeric tail-clipping probability used when `do_collar` is set.
    pub collar_prob: f64,

    /// Winsorize numeric columns at fit-time quantiles.
    pub do_collar: bool,

    /// Encoder kinds permitted; None means all.
    pub code_restriction: Option<BTreeSet<EncoderKind>>,

    /// Cross-validation fold count.
    pub n_cross: usize,

    /// How training rows are partitioned into folds.
    pub split_strategy: SplitStrategy,

    /// Rescale derived columns to outcome units via one-variable slopes.
    pub scale: bool,

    /// Estimate binomial impact codes in link (logit) space. Only
    /// meaningful for binomial outcomes; setting it under a numeric
    /// outcome is rejected at fit.
    pub cat_scaling: Option<bool>,

    /// Missing-value strategy for the clean encoder.
    pub missingness_imputation: Imputation,

    /// Cross-validate every encoder, including outcome-free ones.
    pub force_split: bool,

    /// Novel categorical levels get prevalence `1/(n+1)` instead of 0.
    pub smoothed_novel_prevalence: bool,

    /// Seed for fold assignment; None draws one at fit entry.
    pub random_state: Option<u64>,
}

impl Default for TreatmentParams {
    fn default() -> Self {
        Self {
            min_fraction: 0.02,
            sm_factor: 0.0,
            rare_count: 0,
            rare_sig: None,
            collar_prob: 0.0,
            do_collar: false,
            code_restriction: None,
            n_cross: 3,
            split_strategy: SplitStrategy::Stratified,
            scale: false,
            cat_scaling: None,
            missingness_imputation: Imputation::Mean,
            force_split: false,
            smoothed_novel_prevalence: true,
            random_state: None,
        }
    }
}

impl TreatmentParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the indicator prevalence threshold
    pub fn with_min_fraction(mut self, min_fraction: f64) -> Self {
        self.min_fraction = min_fraction;
        self
    }

    /// Builder method to set impact/deviation smoothing
    pub fn with_sm_factor(mut self, sm_factor: f64) -> Self {
        self.sm_factor = sm_factor;
        self
    }

    /// Builder method to set the rare-level pooling threshold
    pub fn with_rare_count(mut self, rare_count: usize) -> Self {
        self.rare_count = rare_count;
        self
    }

    /// Builder method to set the indicator significance filter
    pub fn with_rare_sig(mut self, rare_sig: f64) -> Self {
        self.rare_sig = Some(rare_sig);
        self
    }

    /// Builder method to enable winsorization at the given tail probability
    pub fn with_collar(mut self, collar_prob: f64) -> Self {
        self.do_collar = true;
        self.collar_prob = collar_prob;
        self
    }

    /// Builder method to restrict the permitted encoder kinds
    pub fn with_code_restriction(mut self, kinds: impl IntoIterator<Item = EncoderKind>) -> Self {
        self.code_restriction = Some(kinds.into_iter().collect());
        self
    }

    /// Builder method to set the fold count
    pub fn with_n_cross(mut self, n_cross: usize) -> Self {
        self.n_cross = n_cross;
        self
    }

    /// Builder method to override the split strategy
    pub fn with_split_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.split_strategy = strategy;
        self
    }

    /// Builder method to enable y-aware scaling of derived columns
    pub fn with_scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    /// Builder method to set link- vs identity-space binomial impact
    pub fn with_cat_scaling(mut self, cat_scaling: bool) -> Self {
        self.cat_scaling = Some(cat_scaling);
        self
    }

    /// Builder method to set the clean-encoder imputation strategy
    pub fn with_imputation(mut self, imputation: Imputation) -> Self {
        self.missingness_imputation = imputation;
        self
    }

    /// Builder method to force cross-validation of every encoder
    pub fn with_force_split(mut self, force_split: bool) -> Self {
        self.force_split = force_split;
        self
    }

    /// Builder method to set the fold-assignment seed
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Whether a kind survives the code restriction.
    pub(crate) fn permits(&self, kind: EncoderKind) -> bool {
        match &self.code_restriction {
            None => true,
            Some(set) => set.contains(&kind),
        }
    }

    /// Whether binomial impact codes are estimated in link space.
    pub(crate) fn link_space_impact(&self) -> bool {
        self.cat_scaling.unwrap_or(true)
    }

    pub(crate) fn validate(&self, outcome: &OutcomeSpec) -> Result<()> {
        if !(self.min_fraction > 0.0 && self.min_fraction <= 1.0) {
            return Err(VarplanError::InvalidParameter {
                name: "min_fraction".to_string(),
                value: self.min_fraction.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if self.sm_factor < 0.0 || !self.sm_factor.is_finite() {
            return Err(VarplanError::InvalidParameter {
                name: "sm_factor".to_string(),
                value: self.sm_factor.to_string(),
                reason: "must be finite and non-negative".to_string(),
            });
        }
        if self.n_cross < 2 {
            return Err(VarplanError::InvalidParameter {
                name: "n_cross".to_string(),
                value: self.n_cross.to_string(),
                reason: "at least 2 folds are required".to_string(),
            });
        }
        if self.do_collar && !(self.collar_prob > 0.0 && self.collar_prob < 0.5) {
            return Err(VarplanError::InvalidParameter {
                name: "collar_prob".to_string(),
                value: self.collar_prob.to_string(),
                reason: "must be in (0, 0.5) when do_collar is set".to_string(),
            });
        }
        if self.cat_scaling.is_some() && matches!(outcome, OutcomeSpec::Numeric { .. }) {
            return Err(VarplanError::InvalidParameter {
                name: "cat_scaling".to_string(),
                value: format!("{:?}", self.cat_scaling),
                reason: "only defined for binomial outcomes".to_string(),
            });
        }
        if self.scale && matches!(outcome, OutcomeSpec::Multinomial { .. }) {
            return Err(VarplanError::InvalidParameter {
                name: "scale".to_string(),
                value: "true".to_string(),
                reason: "not defined for multinomial outcomes".to_string(),
            });
        }
        if let Some(sig) = self.rare_sig {
            if !(sig > 0.0 && sig <= 1.0) {
                return Err(VarplanError::InvalidParameter {
                    name: "rare_sig".to_string(),
                    value: sig.to_string(),
                    reason: "must be in (0, 1]".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = TreatmentParams::default();
        assert_eq!(p.min_fraction, 0.02);
        assert_eq!(p.n_cross, 3);
        assert!(!p.scale);
        assert!(p.link_space_impact());
    }

    #[test]
    fn test_builder_pattern() {
        let p = TreatmentParams::new()
            .with_min_fraction(0.05)
            .with_sm_factor(1.0)
            .with_rare_count(2)
            .with_n_cross(5)
            .with_random_state(7);
        assert_eq!(p.min_fraction, 0.05);
        assert_eq!(p.sm_factor, 1.0);
        assert_eq!(p.rare_count, 2);
        assert_eq!(p.n_cross, 5);
        assert_eq!(p.random_state, Some(7));
    }

    #[test]
    fn test_code_restriction() {
        let p = TreatmentParams::new()
            .with_code_restriction([EncoderKind::Clean, EncoderKind::Indicator]);
        assert!(p.permits(EncoderKind::Clean));
        assert!(!p.permits(EncoderKind::Impact));
    }

    #[test]
    fn test_cat_scaling_rejected_for_numeric_outcome() {
        let p = TreatmentParams::new().with_cat_scaling(true);
        let outcome = OutcomeSpec::Numeric {
            column: "y".to_string(),
        };
        let err = p.validate(&outcome).unwrap_err();
        assert!(matches!(err, VarplanError::InvalidParameter { .. }));
    }

    #[test]
    fn test_validate_ranges() {
        let outcome = OutcomeSpec::Unsupervised;
        assert!(TreatmentParams::new()
            .with_min_fraction(0.0)
            .validate(&outcome)
            .is_err());
        assert!(TreatmentParams::new()
            .with_n_cross(1)
            .validate(&outcome)
            .is_err());
        assert!(TreatmentParams::new()
            .with_collar(0.7)
            .validate(&outcome)
            .is_err());
        assert!(TreatmentParams::new().validate(&outcome).is_ok());
    }
}
