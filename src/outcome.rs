//! Outcome descriptors and target extraction.
//!
//! An [`OutcomeSpec`] names the outcome column and how to read it: as a
//! centered regression target, a 0/1 class target against a distinguished
//! positive value, a K-class label set, or no outcome at all. Target
//! vectors are full-length and use NaN for rows whose outcome is missing;
//! those rows are excluded from every fit.

use crate::error::{Result, VarplanError};
use crate::frame::{Column, Frame};
use serde::{Deserialize, Serialize};

/// What kind of supervised signal the outcome provides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeSpec {
    /// Real-valued outcome; encoders see centered values as targets.
    Numeric { column: String },
    /// Arbitrary column plus a distinguished positive value; encoders see
    /// `column == pos_value` as a 0/1 target.
    Binomial { column: String, pos_value: String },
    /// Column whose distinct non-missing values define the class set.
    Multinomial { column: String },
    /// No outcome; only outcome-free encoders are instantiated.
    Unsupervised,
}

impl OutcomeSpec {
    pub fn column_name(&self) -> Option<&str> {
        match self {
            OutcomeSpec::Numeric { column }
            | OutcomeSpec::Binomial { column, .. }
            | OutcomeSpec::Multinomial { column } => Some(column),
            OutcomeSpec::Unsupervised => None,
        }
    }

    pub fn is_supervised(&self) -> bool {
        !matches!(self, OutcomeSpec::Unsupervised)
    }

    /// Numeric regression target; NaN marks a missing outcome.
    pub(crate) fn numeric_target(&self, frame: &Frame) -> Result<Vec<f64>> {
        let column = match self {
            OutcomeSpec::Numeric { column } => column,
            _ => {
                return Err(VarplanError::DataError(
                    "numeric target requested for non-numeric outcome".to_string(),
                ))
            }
        };
        let col = frame
            .column(column)
            .ok_or_else(|| VarplanError::DataError(format!("outcome column {column} not found")))?;
        match col {
            Column::Numeric(v) => Ok(v
                .iter()
                .map(|&x| if x.is_finite() { x } else { f64::NAN })
                .collect()),
            Column::Categorical(_) => Err(VarplanError::DataError(format!(
                "outcome column {column} is categorical, expected numeric"
            ))),
        }
    }

    /// 0/1 target for `column == pos_value`; NaN marks a missing outcome.
    /// For a numeric outcome column `pos_value` must parse as a number.
    pub(crate) fn binomial_target(&self, frame: &Frame) -> Result<Vec<f64>> {
        let (column, pos_value) = match self {
            OutcomeSpec::Binomial { column, pos_value } => (column, pos_value),
            _ => {
                return Err(VarplanError::DataError(
                    "binomial target requested for non-binomial outcome".to_string(),
                ))
            }
        };
        let col = frame
            .column(column)
            .ok_or_else(|| VarplanError::DataError(format!("outcome column {column} not found")))?;
        match col {
            Column::Categorical(v) => Ok(v
                .iter()
                .map(|cell| match cell {
                    Some(level) if level == pos_value => 1.0,
                    Some(_) => 0.0,
                    None => f64::NAN,
                })
                .collect()),
            Column::Numeric(v) => {
                let pos: f64 = pos_value.parse().map_err(|_| VarplanError::InvalidParameter {
                    name: "pos_value".to_string(),
                    value: pos_value.clone(),
                    reason: "not parseable as a number for a numeric outcome column".to_string(),
                })?;
                Ok(v.iter()
                    .map(|&x| {
                        if !x.is_finite() {
                            f64::NAN
                        } else if x == pos {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect())
            }
        }
    }

    /// Sorted distinct non-missing levels of a multinomial outcome.
    pub(crate) fn classes(&self, frame: &Frame) -> Result<Vec<String>> {
        let column = match self {
            OutcomeSpec::Multinomial { column } => column,
            _ => {
                return Err(VarplanError::DataError(
                    "class set requested for non-multinomial outcome".to_string(),
                ))
            }
        };
        let col = frame
            .column(column)
            .ok_or_else(|| VarplanError::DataError(format!("outcome column {column} not found")))?;
        match col {
            Column::Categorical(v) => {
                let mut classes: Vec<String> = v.iter().flatten().cloned().collect();
                classes.sort();
                classes.dedup();
                Ok(classes)
            }
            Column::Numeric(_) => Err(VarplanError::DataError(format!(
                "outcome column {column} is numeric, expected categorical classes"
            ))),
        }
    }

    /// Per-class 0/1 target; NaN marks a missing outcome.
    pub(crate) fn class_target(&self, frame: &Frame, class: &str) -> Result<Vec<f64>> {
        let column = match self {
            OutcomeSpec::Multinomial { column } => column,
            _ => {
                return Err(VarplanError::DataError(
                    "class target requested for non-multinomial outcome".to_string(),
                ))
            }
        };
        let col = frame
            .column(column)
            .ok_or_else(|| VarplanError::DataError(format!("outcome column {column} not found")))?;
        match col {
            Column::Categorical(v) => Ok(v
                .iter()
                .map(|cell| match cell {
                    Some(level) if level == class => 1.0,
                    Some(_) => 0.0,
                    None => f64::NAN,
                })
                .collect()),
            Column::Numeric(_) => Err(VarplanError::DataError(format!(
                "outcome column {column} is numeric, expected categorical classes"
            ))),
        }
    }
}

/// Reject outcomes a one-variable model cannot be fit against: all-missing,
/// constant, or a binomial with the positive value absent (or universal).
pub(crate) fn validate_target(target: &[f64], spec: &OutcomeSpec) -> Result<Vec<usize>> {
    let usable: Vec<usize> = (0..target.len())
        .filter(|&i| target[i].is_finite())
        .collect();
    if usable.is_empty() {
        return Err(VarplanError::DegenerateOutcome(
            "outcome has no usable values".to_string(),
        ));
    }
    let first = target[usable[0]];
    if usable.iter().all(|&i| target[i] == first) {
        let reason = match spec {
            OutcomeSpec::Binomial { pos_value, .. } if first == 0.0 => {
                format!("positive value {pos_value} never occurs")
            }
            OutcomeSpec::Binomial { pos_value, .. } => {
                format!("every outcome equals positive value {pos_value}")
            }
            _ => "outcome is constant".to_string(),
        };
        return Err(VarplanError::DegenerateOutcome(reason));
    }
    Ok(usable)
}
