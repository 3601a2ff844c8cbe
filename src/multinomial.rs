//! K-class orchestration over binomial sub-problems.
//!
//! A multinomial design builds the outcome-free encoder set once, then
//! treats each outcome class as its own binomial target: impact codes are
//! refit per class under a class-name prefix, and the score frame carries
//! one block per class covering that class's sub-problem (the shared
//! columns plus its own impact columns), labeled via `outcome_level`.

use crate::crossfit::{self, CancelToken, DerivedColumn, EmitContext, Emission};
use crate::encoders::EncoderKind;
use crate::error::{Result, VarplanError};
use crate::frame::Frame;
use crate::names::{sanitize_identifier, NameRegistry};
use crate::outcome::OutcomeSpec;
use crate::params::TreatmentParams;
use crate::plan::{assemble_design, score_columns, TreatmentDesign};
use crate::scoring::{ScoreRow, TargetModel};
use crate::split::build_split_plan;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub(crate) fn fit_multinomial(
    frame: &Frame,
    vars: &[String],
    outcome: &OutcomeSpec,
    params: &TreatmentParams,
    cancel: &CancelToken,
) -> Result<TreatmentDesign> {
    let classes = outcome.classes(frame)?;
    if classes.len() < 2 {
        return Err(VarplanError::DegenerateOutcome(format!(
            "multinomial outcome has {} distinct class(es)",
            classes.len()
        )));
    }
    let outcome_name = outcome.column_name().expect("multinomial names a column");
    let outcome_col = frame
        .column(outcome_name)
        .ok_or_else(|| VarplanError::DataError(format!("outcome column {outcome_name} not found")))?;

    let usable: Vec<usize> = (0..frame.n_rows())
        .filter(|&r| !outcome_col.is_missing(r))
        .collect();
    if usable.is_empty() {
        return Err(VarplanError::DegenerateOutcome(
            "outcome has no usable values".to_string(),
        ));
    }

    let class_index: BTreeMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let class_levels = outcome_col.levels_at(&usable)?;
    let strata: Vec<usize> = class_levels.iter().map(|&l| class_index[l]).collect();

    let seed = params.random_state.unwrap_or_else(rand::random);
    let split = build_split_plan(
        &usable,
        &params.split_strategy,
        params.n_cross,
        Some(&strata),
        seed,
    )?;

    let mut registry = NameRegistry::new();
    registry.reserve(outcome_name);

    // shared outcome-free encoder set, built once
    let shared_allowed: BTreeSet<EncoderKind> = [
        EncoderKind::Clean,
        EncoderKind::IsBad,
        EncoderKind::Prevalence,
        EncoderKind::Indicator,
    ]
    .into_iter()
    .filter(|&k| params.permits(k))
    .collect();
    let shared_ctx = EmitContext {
        frame,
        variables: vars,
        target: None,
        model: None,
        link_space: false,
        usable: &usable,
        split: &split,
        params,
        allowed: &shared_allowed,
        class_prefix: None,
        cancel,
    };
    let shared = crossfit::emit(&shared_ctx, &mut registry)?;

    // one impact sweep per outcome class
    let impact_allowed: BTreeSet<EncoderKind> = [EncoderKind::Impact]
        .into_iter()
        .filter(|&k| params.permits(k))
        .collect();
    let mut class_targets: Vec<Vec<f64>> = Vec::with_capacity(classes.len());
    let mut class_emissions: Vec<Emission> = Vec::with_capacity(classes.len());
    for class in &classes {
        if cancel.is_cancelled() {
            return Err(VarplanError::Cancelled);
        }
        let target = outcome.class_target(frame, class)?;
        let prefix = sanitize_identifier(class);
        debug!(class = %class, "fitting per-class impact encoders");
        let ctx = EmitContext {
            frame,
            variables: vars,
            target: Some(&target),
            model: Some(TargetModel::Logistic),
            link_space: params.link_space_impact(),
            usable: &usable,
            split: &split,
            params,
            allowed: &impact_allowed,
            class_prefix: Some(&prefix),
            cancel,
        };
        let emission = crossfit::emit(&ctx, &mut registry)?;
        class_targets.push(target);
        class_emissions.push(emission);
    }

    let mut merged = shared;
    for emission in class_emissions {
        merged.encoders.extend(emission.encoders);
        merged.columns.extend(emission.columns);
        for w in emission.warnings {
            if !merged.warnings.contains(&w) {
                merged.warnings.push(w);
            }
        }
    }
    crossfit::sort_emission(&mut merged);
    if merged.encoders.is_empty() {
        return Err(VarplanError::EmptyVariableList);
    }

    // per-class score block: shared columns plus the class's own impact
    // columns, against the class's 0/1 target
    let mut score_frame: Vec<ScoreRow> = Vec::new();
    for (class, target) in classes.iter().zip(&class_targets) {
        let prefix = sanitize_identifier(class);
        let sub: Vec<&DerivedColumn> = merged
            .columns
            .iter()
            .filter(|c| c.kind != EncoderKind::Impact || c.level == prefix)
            .collect();
        score_frame.extend(score_columns(
            &sub,
            Some(target),
            Some(TargetModel::Logistic),
            &usable,
            Some(class),
        ));
    }

    assemble_design(frame, vars, outcome.clone(), merged, score_frame)
}
