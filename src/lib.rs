//! varplan - supervised variable treatment plans
//!
//! This crate designs and applies treatment plans that turn heterogeneous
//! tabular data (numeric columns with missing values; categorical columns
//! with high-cardinality, rare, or missing levels) into purely numeric,
//! fully populated feature matrices for downstream linear or tree models.
//!
//! The statistically delicate part is the fit/transform core: naive
//! in-sample impact coding leaks the outcome into its own training rows.
//! The cross-fit driver removes that nested-model bias by refitting every
//! outcome-consuming encoder per fold and emitting each training row only
//! from encoders that never saw it, while a full-data deployment encoder
//! is retained for scoring new data.
//!
//! # Modules
//!
//! - [`frame`] - the in-memory rectangular dataset abstraction
//! - [`outcome`] - outcome descriptors (numeric, binomial, multinomial,
//!   unsupervised) and target extraction
//! - [`split`] - fold planning (k-fold, stratified, pre-computed)
//! - [`encoders`] - the six encoder kinds and their fitted parameters
//! - [`crossfit`] - out-of-fold emission and parallel fan-out
//! - [`scoring`] - one-variable significance scoring of derived columns
//! - [`plan`] - the deployable treatment plan and fit entry points
//! - [`params`] - design configuration
//! - [`names`] - derived-identifier sanitization
//!
//! # Example
//!
//! ```no_run
//! use varplan::prelude::*;
//!
//! fn run(frame: &Frame, test: &Frame) -> varplan::Result<()> {
//!     let params = TreatmentParams::new().with_random_state(42);
//!     let design =
//!         design_binomial_treatment(frame, &["x", "x_cat"], "y", "true", &params)?;
//!     // train on the cross-validated frame...
//!     let _train = &design.cross_frame;
//!     // ...and deploy the plan on new data
//!     let _scored = design.plan.transform(test)?;
//!     Ok(())
//! }
//! ```

pub mod error;

pub mod crossfit;
pub mod encoders;
pub mod frame;
pub mod names;
pub mod outcome;
pub mod params;
pub mod plan;
pub mod scoring;
pub mod split;

mod multinomial;

pub use error::{Result, TreatmentWarning, VarplanError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, TreatmentWarning, VarplanError};

    pub use crate::frame::{Column, Frame, MISSING_LEVEL};

    pub use crate::outcome::OutcomeSpec;

    pub use crate::params::{Imputation, TreatmentParams};

    pub use crate::split::{FoldSpec, SplitStrategy};

    pub use crate::encoders::{Encoder, EncoderKind};

    pub use crate::scoring::ScoreRow;

    pub use crate::crossfit::CancelToken;

    pub use crate::plan::{
        design_binomial_treatment, design_multinomial_treatment, design_numeric_treatment,
        design_unsupervised_treatment, fit_transform, fit_treatment, TreatmentDesign,
        TreatmentPlan,
    };
}
