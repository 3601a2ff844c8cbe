//! Deployable treatment plans and the outcome-typed fit entry points.
//!
//! [`fit_treatment`] (or one of the `design_*` wrappers) runs the full
//! design: split planning, per-column encoder selection, out-of-fold
//! emission, significance scoring, and recommendation. It returns a
//! [`TreatmentDesign`] holding the cross-validated training frame plus the
//! frozen [`TreatmentPlan`] that deploys the encoders on new data.
//!
//! Applying `transform` to the frame a plan was fit on yields the
//! deployment encoding, which is nested-model biased for downstream
//! training; the cross-frame is the honest training matrix. The plan
//! detects that misuse and reports [`TreatmentWarning::SameFrameTransform`].

use crate::crossfit::{self, CancelToken, DerivedColumn, EmitContext, Emission};
use crate::encoders::{Encoder, EncoderKind};
use crate::error::{Result, TreatmentWarning, VarplanError};
use crate::frame::{Column, Frame};
use crate::multinomial;
use crate::names::NameRegistry;
use crate::outcome::{validate_target, OutcomeSpec};
use crate::params::TreatmentParams;
use crate::scoring::{self, ScoreRow, TargetModel};
use crate::split::{build_split_plan, quantile_buckets, NUMERIC_STRATA};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Serialized plan layout version
pub const PLAN_VERSION: u32 = 1;

/// Immutable deployable artifact: the fitted encoder set, the score frame,
/// and enough fit metadata to detect same-frame transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub version: u32,
    pub outcome: OutcomeSpec,
    pub encoders: Vec<Encoder>,
    pub score_frame: Vec<ScoreRow>,
    pub fit_row_count: usize,
    pub fit_variables: Vec<String>,
    pub fit_fingerprint: String,
    pub warnings: Vec<TreatmentWarning>,
}

/// Result of a fit: the plan plus the cross-validated training frame
#[derive(Debug, Clone)]
pub struct TreatmentDesign {
    pub plan: TreatmentPlan,
    pub cross_frame: Frame,
}

/// Design a treatment for a real-valued outcome.
pub fn design_numeric_treatment(
    frame: &Frame,
    variables: &[&str],
    outcome_column: &str,
    params: &TreatmentParams,
) -> Result<TreatmentDesign> {
    let outcome = OutcomeSpec::Numeric {
        column: outcome_column.to_string(),
    };
    fit_treatment(frame, variables, &outcome, params, &CancelToken::new())
}

/// Design a treatment for a two-class outcome with a distinguished
/// positive value.
pub fn design_binomial_treatment(
    frame: &Frame,
    variables: &[&str],
    outcome_column: &str,
    pos_value: &str,
    params: &TreatmentParams,
) -> Result<TreatmentDesign> {
    let outcome = OutcomeSpec::Binomial {
        column: outcome_column.to_string(),
        pos_value: pos_value.to_string(),
    };
    fit_treatment(frame, variables, &outcome, params, &CancelToken::new())
}

/// Design a treatment for a K-class outcome, expanding impact codes per
/// class.
pub fn design_multinomial_treatment(
    frame: &Frame,
    variables: &[&str],
    outcome_column: &str,
    params: &TreatmentParams,
) -> Result<TreatmentDesign> {
    let outcome = OutcomeSpec::Multinomial {
        column: outcome_column.to_string(),
    };
    fit_treatment(frame, variables, &outcome, params, &CancelToken::new())
}

/// Design an outcome-free treatment (clean, is_bad, prevalence,
/// indicator only).
pub fn design_unsupervised_treatment(
    frame: &Frame,
    variables: &[&str],
    params: &TreatmentParams,
) -> Result<TreatmentDesign> {
    fit_treatment(
        frame,
        variables,
        &OutcomeSpec::Unsupervised,
        params,
        &CancelToken::new(),
    )
}

/// Shorthand for a fit that hands back the cross-validated training frame
/// directly, with the deployable plan alongside. The cross-frame, not
/// `plan.transform(frame)`, is the honest training matrix.
pub fn fit_transform(
    frame: &Frame,
    variables: &[&str],
    outcome: &OutcomeSpec,
    params: &TreatmentParams,
) -> Result<(Frame, TreatmentPlan)> {
    let design = fit_treatment(frame, variables, outcome, params, &CancelToken::new())?;
    Ok((design.cross_frame, design.plan))
}

/// Fit entry shared by every outcome type. The cancellation token is
/// checked at each column/fold unit; a cancelled fit returns
/// [`VarplanError::Cancelled`] with no partial plan.
pub fn fit_treatment(
    frame: &Frame,
    variables: &[&str],
    outcome: &OutcomeSpec,
    params: &TreatmentParams,
    cancel: &CancelToken,
) -> Result<TreatmentDesign> {
    params.validate(outcome)?;
    if frame.n_rows() == 0 {
        return Err(VarplanError::DataError("frame has no rows".to_string()));
    }
    let vars = resolve_variables(frame, variables, outcome)?;
    match outcome {
        OutcomeSpec::Multinomial { .. } => {
            multinomial::fit_multinomial(frame, &vars, outcome, params, cancel)
        }
        _ => fit_single(frame, &vars, outcome, params, cancel),
    }
}

fn fit_single(
    frame: &Frame,
    vars: &[String],
    outcome: &OutcomeSpec,
    params: &TreatmentParams,
    cancel: &CancelToken,
) -> Result<TreatmentDesign> {
    let (target, model): (Option<Vec<f64>>, Option<TargetModel>) = match outcome {
        OutcomeSpec::Numeric { .. } => (Some(outcome.numeric_target(frame)?), Some(TargetModel::Linear)),
        OutcomeSpec::Binomial { .. } => {
            (Some(outcome.binomial_target(frame)?), Some(TargetModel::Logistic))
        }
        OutcomeSpec::Unsupervised => (None, None),
        OutcomeSpec::Multinomial { .. } => unreachable!("multinomial handled separately"),
    };
    let usable: Vec<usize> = match &target {
        Some(t) => validate_target(t, outcome)?,
        None => (0..frame.n_rows()).collect(),
    };

    let seed = params.random_state.unwrap_or_else(rand::random);
    let strata: Option<Vec<usize>> = match (&target, model) {
        (Some(t), Some(TargetModel::Logistic)) => {
            Some(usable.iter().map(|&r| t[r] as usize).collect())
        }
        (Some(t), Some(TargetModel::Linear)) => {
            Some(quantile_buckets(t, &usable, NUMERIC_STRATA))
        }
        _ => None,
    };
    let split = build_split_plan(
        &usable,
        &params.split_strategy,
        params.n_cross,
        strata.as_deref(),
        seed,
    )?;

    let allowed = allowed_kinds(outcome, params);
    let mut registry = NameRegistry::new();
    if let Some(name) = outcome.column_name() {
        registry.reserve(name);
    }

    let ctx = EmitContext {
        frame,
        variables: vars,
        target: target.as_deref(),
        model,
        link_space: matches!(outcome, OutcomeSpec::Binomial { .. }) && params.link_space_impact(),
        usable: &usable,
        split: &split,
        params,
        allowed: &allowed,
        class_prefix: None,
        cancel,
    };
    let mut emission = crossfit::emit(&ctx, &mut registry)?;
    crossfit::sort_emission(&mut emission);
    if emission.encoders.is_empty() {
        return Err(VarplanError::EmptyVariableList);
    }

    let column_refs: Vec<&DerivedColumn> = emission.columns.iter().collect();
    let score_frame = score_columns(&column_refs, target.as_deref(), model, &usable, None);

    assemble_design(frame, vars, outcome.clone(), emission, score_frame)
}

/// Validate and normalize the requested variable list: unknown columns
/// fail, the outcome column and duplicates are dropped.
pub(crate) fn resolve_variables(
    frame: &Frame,
    variables: &[&str],
    outcome: &OutcomeSpec,
) -> Result<Vec<String>> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut vars: Vec<String> = Vec::with_capacity(variables.len());
    for &v in variables {
        if !frame.has_column(v) {
            return Err(VarplanError::DataError(format!(
                "treatment variable {v} not found in frame"
            )));
        }
        if Some(v) == outcome.column_name() || !seen.insert(v) {
            continue;
        }
        vars.push(v.to_string());
    }
    if vars.is_empty() {
        return Err(VarplanError::EmptyVariableList);
    }
    Ok(vars)
}

/// Encoder kinds an outcome type admits, intersected with the caller's
/// code restriction.
fn allowed_kinds(outcome: &OutcomeSpec, params: &TreatmentParams) -> BTreeSet<EncoderKind> {
    let base: &[EncoderKind] = match outcome {
        OutcomeSpec::Numeric { .. } => &[
            EncoderKind::Clean,
            EncoderKind::IsBad,
            EncoderKind::Prevalence,
            EncoderKind::Impact,
            EncoderKind::Indicator,
            EncoderKind::Deviation,
        ],
        OutcomeSpec::Binomial { .. } => &[
            EncoderKind::Clean,
            EncoderKind::IsBad,
            EncoderKind::Prevalence,
            EncoderKind::Impact,
            EncoderKind::Indicator,
        ],
        OutcomeSpec::Unsupervised => &[
            EncoderKind::Clean,
            EncoderKind::IsBad,
            EncoderKind::Prevalence,
            EncoderKind::Indicator,
        ],
        OutcomeSpec::Multinomial { .. } => unreachable!("multinomial handled separately"),
    };
    base.iter().copied().filter(|&k| params.permits(k)).collect()
}

/// Score every derived column against the target. `recommended` applies
/// the `sig < 1/derived_count` filter within this scoring group; without
/// an outcome, rsq/sig stay at their null values and recommendation falls
/// back to the variation flag.
pub(crate) fn score_columns(
    columns: &[&DerivedColumn],
    target: Option<&[f64]>,
    model: Option<TargetModel>,
    usable: &[usize],
    outcome_level: Option<&str>,
) -> Vec<ScoreRow> {
    let count = columns.len().max(1) as f64;
    columns
        .iter()
        .map(|c| {
            let (rsq, sig, recommended) = match (target, model) {
                (Some(t), Some(m)) => {
                    let x: Vec<f64> = usable.iter().map(|&r| c.values[r]).collect();
                    let y: Vec<f64> = usable.iter().map(|&r| t[r]).collect();
                    let (rsq, sig) = scoring::significance(&x, &y, m, c.extra_degrees);
                    (rsq, sig, c.var_moves && sig < 1.0 / count)
                }
                _ => (0.0, 1.0, c.var_moves),
            };
            ScoreRow {
                var_name: c.name.clone(),
                var_moves: c.var_moves,
                rsq,
                sig,
                needs_split: c.needs_split,
                extra_model_degrees: c.extra_degrees,
                origin: c.origin.clone(),
                kind: c.kind,
                recommended,
                outcome_level: outcome_level.map(String::from),
            }
        })
        .collect()
}

/// Assemble the cross-frame and freeze the plan.
pub(crate) fn assemble_design(
    frame: &Frame,
    vars: &[String],
    outcome: OutcomeSpec,
    emission: Emission,
    score_frame: Vec<ScoreRow>,
) -> Result<TreatmentDesign> {
    let Emission {
        encoders,
        columns,
        warnings,
    } = emission;

    let mut cross_frame = Frame::new();
    for column in columns {
        cross_frame = cross_frame.with_column(column.name, Column::Numeric(column.values))?;
    }
    if let Some(name) = outcome.column_name() {
        let col = frame
            .column(name)
            .ok_or_else(|| VarplanError::DataError(format!("outcome column {name} not found")))?;
        cross_frame = cross_frame.with_column(name.to_string(), col.clone())?;
    }

    info!(
        encoders = encoders.len(),
        rows = frame.n_rows(),
        "treatment design complete"
    );
    let fit_variables: Vec<String> = vars.to_vec();
    let fit_fingerprint = frame.fingerprint(&fit_variables);
    Ok(TreatmentDesign {
        plan: TreatmentPlan {
            version: PLAN_VERSION,
            outcome,
            encoders,
            score_frame,
            fit_row_count: frame.n_rows(),
            fit_variables,
            fit_fingerprint,
            warnings,
        },
        cross_frame,
    })
}

impl TreatmentPlan {
    /// Derived column names in cross-frame order.
    pub fn feature_names(&self) -> Vec<String> {
        self.encoders.iter().map(|e| e.name().to_string()).collect()
    }

    /// Derived columns passing the recommendation filter, in cross-frame
    /// order. For multinomial plans a variable counts as recommended when
    /// any outcome class recommends it.
    pub fn recommended_features(&self) -> Vec<String> {
        let recommended: BTreeSet<&str> = self
            .score_frame
            .iter()
            .filter(|r| r.recommended)
            .map(|r| r.var_name.as_str())
            .collect();
        self.encoders
            .iter()
            .map(Encoder::name)
            .filter(|n| recommended.contains(n))
            .map(String::from)
            .collect()
    }

    pub fn score_frame(&self) -> &[ScoreRow] {
        &self.score_frame
    }

    pub fn warnings(&self) -> &[TreatmentWarning] {
        &self.warnings
    }

    /// Apply the deployment encoders to a frame, reproducing the
    /// cross-frame's derived schema (without the outcome column).
    pub fn transform(&self, frame: &Frame) -> Result<Frame> {
        let (out, _) = self.transform_with_report(frame)?;
        Ok(out)
    }

    /// [`transform`](Self::transform), also returning any non-fatal
    /// warnings raised (currently only the same-frame detection).
    pub fn transform_with_report(&self, frame: &Frame) -> Result<(Frame, Vec<TreatmentWarning>)> {
        for encoder in &self.encoders {
            if !frame.has_column(encoder.origin()) {
                return Err(VarplanError::SchemaMismatch(encoder.origin().to_string()));
            }
        }

        let mut report = Vec::new();
        if frame.n_rows() == self.fit_row_count
            && frame.fingerprint(&self.fit_variables) == self.fit_fingerprint
        {
            warn!(
                "transform called on the training frame; use the cross-frame for honest training values"
            );
            report.push(TreatmentWarning::SameFrameTransform);
        }

        let all_rows: Vec<usize> = (0..frame.n_rows()).collect();
        let mut out = Frame::new();
        for encoder in &self.encoders {
            let col = frame.column(encoder.origin()).expect("schema checked");
            let values = encoder.apply_at(col, &all_rows)?;
            out = out.with_column(encoder.name().to_string(), Column::Numeric(values))?;
        }
        Ok((out, report))
    }

    /// Human-readable recap: encoder counts per kind plus the recommended
    /// variable list.
    pub fn summary(&self) -> String {
        let mut by_kind: std::collections::BTreeMap<EncoderKind, usize> =
            std::collections::BTreeMap::new();
        for encoder in &self.encoders {
            *by_kind.entry(encoder.kind()).or_insert(0) += 1;
        }
        let mut out = format!(
            "treatment plan: {} encoders over {} training rows\n",
            self.encoders.len(),
            self.fit_row_count
        );
        for (kind, count) in by_kind {
            out.push_str(&format!("  {kind}: {count}\n"));
        }
        let recommended = self.recommended_features();
        out.push_str(&format!(
            "  recommended ({}): {}\n",
            recommended.len(),
            recommended.join(", ")
        ));
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VarplanError::SerializationError(e.to_string()))
    }

    /// Parse a serialized plan, rejecting payloads from a newer layout
    /// version or carrying unknown encoder kinds.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| VarplanError::SerializationError(e.to_string()))?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                VarplanError::UnsupportedEncoderVersion("missing version field".to_string())
            })?;
        if version > u64::from(PLAN_VERSION) {
            return Err(VarplanError::UnsupportedEncoderVersion(format!(
                "plan version {version} is newer than supported {PLAN_VERSION}"
            )));
        }
        serde_json::from_value(value).map_err(|e| {
            let message = e.to_string();
            if message.contains("unknown variant") {
                VarplanError::UnsupportedEncoderVersion(message)
            } else {
                VarplanError::SerializationError(message)
            }
        })
    }

    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }
}
