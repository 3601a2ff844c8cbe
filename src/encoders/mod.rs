//! Per-column fittable transforms.
//!
//! Each encoder maps one origin column to one derived numeric column.
//! Encoders are frozen after fit: the fitted-parameter records here are
//! what a treatment plan stores and what deployment-time transforms run.
//!
//! Kinds:
//! - [`clean`] - numeric passthrough with imputation and optional collaring
//! - [`is_bad`] - missing/invalid cell indicator
//! - [`indicator`] - per-level 0/1 dummy
//! - [`prevalence`] - level frequency code
//! - [`impact`] - outcome-conditional level effect code
//! - [`deviation`] - per-level outcome spread code

mod clean;
mod deviation;
mod impact;
mod indicator;
mod is_bad;
mod prevalence;

pub use clean::CleanEncoder;
pub use deviation::DeviationEncoder;
pub use impact::{ImpactEncoder, ImpactSpace};
pub use indicator::IndicatorEncoder;
pub use is_bad::IsBadEncoder;
pub use prevalence::PrevalenceEncoder;

use crate::error::Result;
use crate::frame::Column;
use serde::{Deserialize, Serialize};

/// Hard cap on any fitted level effect; estimates past this are clamped.
pub(crate) const EFFECT_CLAMP: f64 = 1e12;

/// The encoder taxonomy.
///
/// The derive order is load-bearing: derived columns are sorted by
/// `(origin index, kind, level)` and `Ord` on this enum supplies the kind
/// priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    Clean,
    IsBad,
    Prevalence,
    Impact,
    Indicator,
    Deviation,
}

impl EncoderKind {
    /// Whether fitting this kind consumes the outcome, requiring
    /// out-of-fold estimation for honest training-frame values.
    pub fn needs_split(self) -> bool {
        match self {
            EncoderKind::Clean | EncoderKind::IsBad | EncoderKind::Indicator => false,
            EncoderKind::Prevalence | EncoderKind::Impact | EncoderKind::Deviation => true,
        }
    }

    /// Extra model degrees of freedom charged against significance tests
    /// of this kind's derived columns.
    pub fn extra_degrees(self) -> usize {
        match self {
            EncoderKind::Impact => 5,
            _ => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EncoderKind::Clean => "clean",
            EncoderKind::IsBad => "is_bad",
            EncoderKind::Prevalence => "prevalence",
            EncoderKind::Impact => "impact",
            EncoderKind::Indicator => "indicator",
            EncoderKind::Deviation => "deviation",
        }
    }
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Optional y-aware rescaling applied after raw encoding:
/// `v' = (v - center) * slope`, where `slope` comes from the one-variable
/// regression of the outcome on the encoder's training output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub center: f64,
    pub slope: f64,
}

/// A fitted, frozen encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoder {
    Clean(CleanEncoder),
    IsBad(IsBadEncoder),
    Prevalence(PrevalenceEncoder),
    Impact(ImpactEncoder),
    Indicator(IndicatorEncoder),
    Deviation(DeviationEncoder),
}

impl Encoder {
    pub fn kind(&self) -> EncoderKind {
        match self {
            Encoder::Clean(_) => EncoderKind::Clean,
            Encoder::IsBad(_) => EncoderKind::IsBad,
            Encoder::Prevalence(_) => EncoderKind::Prevalence,
            Encoder::Impact(_) => EncoderKind::Impact,
            Encoder::Indicator(_) => EncoderKind::Indicator,
            Encoder::Deviation(_) => EncoderKind::Deviation,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Encoder::Clean(e) => &e.origin,
            Encoder::IsBad(e) => &e.origin,
            Encoder::Prevalence(e) => &e.origin,
            Encoder::Impact(e) => &e.origin,
            Encoder::Indicator(e) => &e.origin,
            Encoder::Deviation(e) => &e.origin,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Encoder::Clean(e) => &e.name,
            Encoder::IsBad(e) => &e.name,
            Encoder::Prevalence(e) => &e.name,
            Encoder::Impact(e) => &e.name,
            Encoder::Indicator(e) => &e.name,
            Encoder::Deviation(e) => &e.name,
        }
    }

    pub fn needs_split(&self) -> bool {
        self.kind().needs_split()
    }

    pub fn extra_degrees(&self) -> usize {
        self.kind().extra_degrees()
    }

    /// Mean of the encoder's emitted column over its fit rows; the fallback
    /// substituted wherever a finite value cannot be produced.
    pub fn emitted_mean(&self) -> f64 {
        match self {
            Encoder::Clean(e) => e.emitted_mean,
            Encoder::IsBad(e) => e.emitted_mean,
            Encoder::Prevalence(e) => e.emitted_mean,
            Encoder::Impact(e) => e.emitted_mean,
            Encoder::Indicator(e) => e.emitted_mean,
            Encoder::Deviation(e) => e.emitted_mean,
        }
    }

    pub fn scaling(&self) -> Option<Scaling> {
        match self {
            Encoder::Clean(e) => e.scaling,
            Encoder::IsBad(e) => e.scaling,
            Encoder::Prevalence(e) => e.scaling,
            Encoder::Impact(e) => e.scaling,
            Encoder::Indicator(e) => e.scaling,
            Encoder::Deviation(e) => e.scaling,
        }
    }

    pub(crate) fn set_scaling(&mut self, scaling: Scaling) {
        match self {
            Encoder::Clean(e) => e.scaling = Some(scaling),
            Encoder::IsBad(e) => e.scaling = Some(scaling),
            Encoder::Prevalence(e) => e.scaling = Some(scaling),
            Encoder::Impact(e) => e.scaling = Some(scaling),
            Encoder::Indicator(e) => e.scaling = Some(scaling),
            Encoder::Deviation(e) => e.scaling = Some(scaling),
        }
    }

    /// Secondary sort key within `(origin, kind)`: the indicator's level,
    /// or the class prefix of a multinomial impact code.
    pub(crate) fn sort_level(&self) -> &str {
        match self {
            Encoder::Indicator(e) => &e.level,
            Encoder::Impact(e) => e.class.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    /// Encode the given rows of a column. Output is aligned to `rows`,
    /// every value is finite (the emitted-mean fallback covers anything
    /// the raw mapping cannot encode), and y-aware scaling is applied
    /// when fitted.
    pub fn apply_at(&self, col: &Column, rows: &[usize]) -> Result<Vec<f64>> {
        let mut values = match self {
            Encoder::Clean(e) => e.apply_at(col, rows)?,
            Encoder::IsBad(e) => e.apply_at(col, rows)?,
            Encoder::Prevalence(e) => e.apply_at(col, rows)?,
            Encoder::Impact(e) => e.apply_at(col, rows)?,
            Encoder::Indicator(e) => e.apply_at(col, rows)?,
            Encoder::Deviation(e) => e.apply_at(col, rows)?,
        };
        let fallback = self.emitted_mean();
        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = fallback;
            }
        }
        if let Some(Scaling { center, slope }) = self.scaling() {
            for v in values.iter_mut() {
                *v = (*v - center) * slope;
            }
        }
        Ok(values)
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_priority_order() {
        // derived column ordering depends on this exact sequence
        let mut kinds = vec![
            EncoderKind::Deviation,
            EncoderKind::Indicator,
            EncoderKind::Impact,
            EncoderKind::Prevalence,
            EncoderKind::IsBad,
            EncoderKind::Clean,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                EncoderKind::Clean,
                EncoderKind::IsBad,
                EncoderKind::Prevalence,
                EncoderKind::Impact,
                EncoderKind::Indicator,
                EncoderKind::Deviation,
            ]
        );
    }

    #[test]
    fn test_needs_split_by_kind() {
        assert!(!EncoderKind::Clean.needs_split());
        assert!(!EncoderKind::IsBad.needs_split());
        assert!(!EncoderKind::Indicator.needs_split());
        assert!(EncoderKind::Prevalence.needs_split());
        assert!(EncoderKind::Impact.needs_split());
        assert!(EncoderKind::Deviation.needs_split());
    }

    #[test]
    fn test_impact_extra_degrees() {
        assert_eq!(EncoderKind::Impact.extra_degrees(), 5);
        assert_eq!(EncoderKind::Clean.extra_degrees(), 0);
    }
}
