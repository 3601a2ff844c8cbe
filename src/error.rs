//! Error and warning types for treatment design and application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for treatment operations
pub type Result<T> = std::result::Result<T, VarplanError>;

/// Main error type for the varplan crate
#[derive(Error, Debug)]
pub enum VarplanError {
    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("No derived variables survive filtering")]
    EmptyVariableList,

    #[error("Transform input is missing required column: {0}")]
    SchemaMismatch(String),

    #[error("Degenerate outcome: {0}")]
    DegenerateOutcome(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported treatment plan payload: {0}")]
    UnsupportedEncoderVersion(String),

    #[error("Fit cancelled")]
    Cancelled,

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Non-fatal conditions recorded on a fitted plan or a transform report.
///
/// Every warning is also emitted through `tracing` at `warn` level when it
/// occurs; the records exist so callers without a subscriber can inspect
/// what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum TreatmentWarning {
    /// `transform` was called on the frame the plan was fit on; the output
    /// is the biased deployment encoding, not the cross-validated frame.
    SameFrameTransform,
    /// A numeric column had no usable values; all of its encoders were
    /// suppressed.
    AllMissingColumn { column: String },
    /// An impact estimate overflowed and was clamped.
    OverflowClamped { column: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VarplanError::SchemaMismatch("x_cat".to_string());
        assert_eq!(
            err.to_string(),
            "Transform input is missing required column: x_cat"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VarplanError = io_err.into();
        assert!(matches!(err, VarplanError::IoError(_)));
    }

    #[test]
    fn test_warning_roundtrip() {
        let w = TreatmentWarning::AllMissingColumn {
            column: "x1".to_string(),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: TreatmentWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
