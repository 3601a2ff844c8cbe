//! Out-of-fold fitting and emission of derived columns.
//!
//! The driver walks the variable list, decides which encoder kinds each
//! origin column gets, fits a deployment encoder for every derived column
//! on the full training data, and fills the cross-frame: outcome-free
//! encoders emit their in-sample values directly, while outcome-consuming
//! encoders are refit per fold and only emit inside each fold's
//! application slice. The emitted training-frame values are therefore
//! honest estimates a deployment-time transform would also have produced
//! for unseen rows.
//!
//! Units of work are `(origin column, fold)` pairs; they run on the rayon
//! pool, share nothing mutable, and the assembled output is post-sorted so
//! column order never depends on scheduling.

use crate::encoders::{
    CleanEncoder, DeviationEncoder, Encoder, EncoderKind, ImpactEncoder, ImpactSpace,
    IndicatorEncoder, IsBadEncoder, PrevalenceEncoder, Scaling,
};
use crate::error::{Result, TreatmentWarning, VarplanError};
use crate::frame::{Column, Frame};
use crate::names::{sanitize_identifier, NameRegistry};
use crate::params::TreatmentParams;
use crate::scoring::{self, TargetModel};
use crate::split::SplitPlan;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cooperative cancellation for a running fit. Checked at every
/// `(column, fold)` boundary; a cancelled fit returns
/// [`VarplanError::Cancelled`] and discards all partial state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One assembled derived column plus its bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct DerivedColumn {
    pub name: String,
    pub origin: String,
    pub origin_index: usize,
    pub kind: EncoderKind,
    /// Secondary sort key within `(origin, kind)`: indicator level or
    /// multinomial class prefix.
    pub level: String,
    pub needs_split: bool,
    pub extra_degrees: usize,
    pub values: Vec<f64>,
    pub var_moves: bool,
}

/// Output of one emission pass
#[derive(Debug, Default)]
pub(crate) struct Emission {
    pub encoders: Vec<Encoder>,
    pub columns: Vec<DerivedColumn>,
    pub warnings: Vec<TreatmentWarning>,
}

/// Everything one emission pass needs
pub(crate) struct EmitContext<'a> {
    pub frame: &'a Frame,
    pub variables: &'a [String],
    /// Full-length target, finite exactly at the usable rows. None for
    /// outcome-free emission.
    pub target: Option<&'a [f64]>,
    pub model: Option<TargetModel>,
    /// Binomial impact codes in link (logit) space.
    pub link_space: bool,
    pub usable: &'a [usize],
    pub split: &'a SplitPlan,
    pub params: &'a TreatmentParams,
    /// Encoder kinds permitted for this pass (outcome compatibility
    /// already intersected with any code restriction).
    pub allowed: &'a BTreeSet<EncoderKind>,
    /// Sanitized outcome-class prefix for multinomial impact names.
    pub class_prefix: Option<&'a str>,
    pub cancel: &'a CancelToken,
}

struct PlannedEncoder {
    origin: String,
    origin_index: usize,
    name: String,
    kind: EncoderKind,
    /// Indicator level, when the kind is Indicator.
    level: Option<String>,
}

/// Run one emission pass: plan encoders per column, fit deployment
/// encoders on the full usable data, and fill the cross-frame values.
pub(crate) fn emit(ctx: &EmitContext<'_>, registry: &mut NameRegistry) -> Result<Emission> {
    if ctx.cancel.is_cancelled() {
        return Err(VarplanError::Cancelled);
    }
    let n = ctx.frame.n_rows();
    let mut warnings: Vec<TreatmentWarning> = Vec::new();
    let specs = plan_encoders(ctx, registry, &mut warnings)?;
    if specs.is_empty() {
        return Ok(Emission {
            warnings,
            ..Emission::default()
        });
    }

    // deployment encoders: fit on all usable rows, retained by the plan
    let mut encoders: Vec<Encoder> = Vec::with_capacity(specs.len());
    for spec in &specs {
        let col = ctx
            .frame
            .column(&spec.origin)
            .ok_or_else(|| VarplanError::DataError(format!("column {} not found", spec.origin)))?;
        let (encoder, clamped) = fit_one(spec, col, ctx.usable, ctx)?;
        if clamped {
            push_overflow_warning(&mut warnings, &spec.origin);
        }
        encoders.push(encoder);
    }

    // cross-frame values: excluded rows fall back to each encoder's
    // training mean, then in-sample or out-of-fold emission overwrites
    // the usable positions
    let all_rows: Vec<usize> = (0..n).collect();
    let mut values: Vec<Vec<f64>> = encoders
        .iter()
        .map(|e| vec![e.emitted_mean(); n])
        .collect();

    let mut split_ids: Vec<usize> = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        if spec.kind.needs_split() || ctx.params.force_split {
            split_ids.push(i);
        } else {
            let col = ctx.frame.column(&spec.origin).expect("checked above");
            let emitted = encoders[i].apply_at(col, &all_rows)?;
            let vals = &mut values[i];
            for &r in ctx.usable {
                vals[r] = emitted[r];
            }
        }
    }

    // out-of-fold emission, parallel over (origin column, fold) units
    let mut by_column: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &i in &split_ids {
        by_column.entry(specs[i].origin_index).or_default().push(i);
    }
    let units: Vec<(usize, usize)> = by_column
        .keys()
        .flat_map(|&c| (0..ctx.split.folds.len()).map(move |f| (c, f)))
        .collect();

    let mut fold_outputs: Vec<(usize, usize, Vec<(usize, Vec<f64>)>)> = units
        .par_iter()
        .map(|&(col_key, fold_idx)| {
            if ctx.cancel.is_cancelled() {
                return Err(VarplanError::Cancelled);
            }
            let fold = &ctx.split.folds[fold_idx];
            let mut chunk: Vec<(usize, Vec<f64>)> = Vec::new();
            for &i in &by_column[&col_key] {
                let spec = &specs[i];
                let col = ctx.frame.column(&spec.origin).expect("checked above");
                match fit_one(spec, col, &fold.train_indices, ctx) {
                    Ok((fold_encoder, _)) => {
                        let out = fold_encoder.apply_at(col, &fold.app_indices)?;
                        chunk.push((i, out));
                    }
                    Err(_) => {
                        // a fold slice can lack usable values entirely;
                        // the prefilled training mean stands in
                        warn!(
                            column = %spec.origin,
                            fold = fold_idx,
                            "fold encoder could not be fit, emitting training mean"
                        );
                    }
                }
            }
            debug!(column = col_key, fold = fold_idx, "fold unit complete");
            Ok((col_key, fold_idx, chunk))
        })
        .collect::<Result<Vec<_>>>()?;
    if ctx.cancel.is_cancelled() {
        return Err(VarplanError::Cancelled);
    }
    fold_outputs.sort_by_key(|&(c, f, _)| (c, f));

    for (_, fold_idx, chunk) in fold_outputs {
        let fold = &ctx.split.folds[fold_idx];
        for (i, out) in chunk {
            let vals = &mut values[i];
            for (&r, &v) in fold.app_indices.iter().zip(&out) {
                vals[r] = v;
            }
        }
    }

    // y-aware rescaling of every derived column, when requested
    if ctx.params.scale {
        if let Some(target) = ctx.target {
            for (i, spec) in specs.iter().enumerate() {
                let col = ctx.frame.column(&spec.origin).expect("checked above");
                let deployed = encoders[i].apply_at(col, ctx.usable)?;
                let y: Vec<f64> = ctx.usable.iter().map(|&r| target[r]).collect();
                let scaling = fit_scaling(&deployed, &y);
                encoders[i].set_scaling(scaling);
                for v in values[i].iter_mut() {
                    *v = (*v - scaling.center) * scaling.slope;
                }
            }
        }
    }

    let columns: Vec<DerivedColumn> = specs
        .iter()
        .zip(values)
        .map(|(spec, vals)| {
            let at_usable: Vec<f64> = ctx.usable.iter().map(|&r| vals[r]).collect();
            DerivedColumn {
                name: spec.name.clone(),
                origin: spec.origin.clone(),
                origin_index: spec.origin_index,
                kind: spec.kind,
                level: match spec.kind {
                    EncoderKind::Indicator => spec.level.clone().unwrap_or_default(),
                    EncoderKind::Impact => ctx.class_prefix.unwrap_or("").to_string(),
                    _ => String::new(),
                },
                needs_split: spec.kind.needs_split() || ctx.params.force_split,
                extra_degrees: spec.kind.extra_degrees(),
                values: vals,
                var_moves: scoring::moves(&at_usable),
            }
        })
        .collect();

    Ok(Emission {
        encoders,
        columns,
        warnings,
    })
}

/// Decide which encoders each origin column gets. Names are claimed in
/// kind-priority order per column, so collision suffixes are stable.
fn plan_encoders(
    ctx: &EmitContext<'_>,
    registry: &mut NameRegistry,
    warnings: &mut Vec<TreatmentWarning>,
) -> Result<Vec<PlannedEncoder>> {
    let mut specs: Vec<PlannedEncoder> = Vec::new();

    for (origin_index, var) in ctx.variables.iter().enumerate() {
        let col = ctx
            .frame
            .column(var)
            .ok_or_else(|| VarplanError::DataError(format!("column {var} not found")))?;
        let base = sanitize_identifier(var);
        let has_bad = col.missing_count(ctx.usable) > 0;

        match col {
            Column::Numeric(_) => {
                let finite = ctx.usable.len() - col.missing_count(ctx.usable);
                if finite == 0 {
                    warn!(column = %var, "numeric column has no usable values, suppressed");
                    warnings.push(TreatmentWarning::AllMissingColumn {
                        column: var.clone(),
                    });
                    continue;
                }
                if ctx.allowed.contains(&EncoderKind::Clean) {
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&format!("{base}_clean")),
                        kind: EncoderKind::Clean,
                        level: None,
                    });
                }
                if has_bad && ctx.allowed.contains(&EncoderKind::IsBad) {
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&format!("{base}_is_bad")),
                        kind: EncoderKind::IsBad,
                        level: None,
                    });
                }
            }
            Column::Categorical(_) => {
                let levels = col.levels_at(ctx.usable)?;
                let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                for &l in &levels {
                    *counts.entry(l).or_insert(0) += 1;
                }
                let multi_level = counts.len() > 1;

                if has_bad && ctx.allowed.contains(&EncoderKind::IsBad) {
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&format!("{base}_is_bad")),
                        kind: EncoderKind::IsBad,
                        level: None,
                    });
                }
                if ctx.allowed.contains(&EncoderKind::Prevalence) {
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&format!("{base}_prevalence")),
                        kind: EncoderKind::Prevalence,
                        level: None,
                    });
                }
                if multi_level
                    && ctx.target.is_some()
                    && ctx.allowed.contains(&EncoderKind::Impact)
                {
                    let name = match ctx.class_prefix {
                        Some(prefix) => format!("{prefix}_{base}_impact"),
                        None => format!("{base}_impact"),
                    };
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&name),
                        kind: EncoderKind::Impact,
                        level: None,
                    });
                }
                if multi_level && ctx.allowed.contains(&EncoderKind::Indicator) {
                    for level in indicator_levels(ctx, &counts, &levels) {
                        let name =
                            registry.claim(&format!("{base}_lev_{}", sanitize_identifier(&level)));
                        specs.push(PlannedEncoder {
                            origin: var.clone(),
                            origin_index,
                            name,
                            kind: EncoderKind::Indicator,
                            level: Some(level),
                        });
                    }
                }
                if multi_level
                    && ctx.model == Some(TargetModel::Linear)
                    && ctx.allowed.contains(&EncoderKind::Deviation)
                {
                    specs.push(PlannedEncoder {
                        origin: var.clone(),
                        origin_index,
                        name: registry.claim(&format!("{base}_deviation")),
                        kind: EncoderKind::Deviation,
                        level: None,
                    });
                }
            }
        }
    }
    Ok(specs)
}

/// Indicator levels for one origin: prevalence at least `min_fraction`,
/// capped at `floor(1/min_fraction)` by descending count, and optionally
/// filtered by each level's own significance. Returned in level lex order.
fn indicator_levels(
    ctx: &EmitContext<'_>,
    counts: &BTreeMap<&str, usize>,
    levels: &[&str],
) -> Vec<String> {
    let n = ctx.usable.len();
    let threshold = ctx.params.min_fraction;
    let cap = ((1.0 / threshold).floor() as usize).max(1);

    let mut qualifying: Vec<(&str, usize)> = counts
        .iter()
        .filter(|(_, &c)| c as f64 / n as f64 >= threshold)
        .map(|(&l, &c)| (l, c))
        .collect();
    // cap by descending prevalence, ties by level
    qualifying.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    qualifying.truncate(cap);

    let mut selected: Vec<String> = qualifying.into_iter().map(|(l, _)| l.to_string()).collect();
    selected.sort();

    if let (Some(max_sig), Some(target), Some(model)) =
        (ctx.params.rare_sig, ctx.target, ctx.model)
    {
        let y: Vec<f64> = ctx.usable.iter().map(|&r| target[r]).collect();
        selected.retain(|level| {
            let x: Vec<f64> = levels
                .iter()
                .map(|&l| if l == level.as_str() { 1.0 } else { 0.0 })
                .collect();
            let (_, sig) = scoring::significance(&x, &y, model, 0);
            sig <= max_sig
        });
    }
    selected
}

/// Fit one encoder on the given rows. Returns the encoder and whether an
/// impact estimate hit the overflow clamp.
fn fit_one(
    spec: &PlannedEncoder,
    col: &Column,
    rows: &[usize],
    ctx: &EmitContext<'_>,
) -> Result<(Encoder, bool)> {
    let params = ctx.params;
    let collar = if params.do_collar {
        Some(params.collar_prob)
    } else {
        None
    };
    match spec.kind {
        EncoderKind::Clean => {
            let xs = col.numeric_at(rows)?;
            let enc = CleanEncoder::fit(
                &spec.origin,
                &spec.name,
                &xs,
                &params.missingness_imputation,
                collar,
            )?;
            Ok((Encoder::Clean(enc), false))
        }
        EncoderKind::IsBad => Ok((
            Encoder::IsBad(IsBadEncoder::fit(&spec.origin, &spec.name, col, rows)),
            false,
        )),
        EncoderKind::Indicator => {
            let levels = col.levels_at(rows)?;
            let level = spec.level.as_deref().unwrap_or_default();
            Ok((
                Encoder::Indicator(IndicatorEncoder::fit(
                    &spec.origin,
                    &spec.name,
                    level,
                    &levels,
                )),
                false,
            ))
        }
        EncoderKind::Prevalence => {
            let levels = col.levels_at(rows)?;
            Ok((
                Encoder::Prevalence(PrevalenceEncoder::fit(
                    &spec.origin,
                    &spec.name,
                    &levels,
                    params.smoothed_novel_prevalence,
                )),
                false,
            ))
        }
        EncoderKind::Impact => {
            let target = ctx.target.ok_or_else(|| {
                VarplanError::ComputationError("impact encoder requires an outcome".to_string())
            })?;
            let levels = col.levels_at(rows)?;
            let y: Vec<f64> = rows.iter().map(|&r| target[r]).collect();
            let space = if ctx.link_space {
                ImpactSpace::Link
            } else {
                ImpactSpace::Identity
            };
            let (enc, clamped) = ImpactEncoder::fit(
                &spec.origin,
                &spec.name,
                ctx.class_prefix,
                &levels,
                &y,
                space,
                params.sm_factor,
                params.rare_count,
            );
            Ok((Encoder::Impact(enc), clamped))
        }
        EncoderKind::Deviation => {
            let target = ctx.target.ok_or_else(|| {
                VarplanError::ComputationError("deviation encoder requires an outcome".to_string())
            })?;
            let levels = col.levels_at(rows)?;
            let y: Vec<f64> = rows.iter().map(|&r| target[r]).collect();
            Ok((
                Encoder::Deviation(DeviationEncoder::fit(
                    &spec.origin,
                    &spec.name,
                    &levels,
                    &y,
                    params.sm_factor,
                )),
                false,
            ))
        }
    }
}

fn fit_scaling(deployed: &[f64], y: &[f64]) -> Scaling {
    let n = deployed.len() as f64;
    let center = deployed.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&v, &yi) in deployed.iter().zip(y) {
        sxx += (v - center) * (v - center);
        sxy += (v - center) * (yi - y_mean);
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    Scaling { center, slope }
}

fn push_overflow_warning(warnings: &mut Vec<TreatmentWarning>, column: &str) {
    let w = TreatmentWarning::OverflowClamped {
        column: column.to_string(),
    };
    if !warnings.contains(&w) {
        warnings.push(w);
    }
}

/// Sort derived output into the stable cross-frame order.
pub(crate) fn sort_emission(emission: &mut Emission) {
    let columns = std::mem::take(&mut emission.columns);
    let encoders = std::mem::take(&mut emission.encoders);
    let mut paired: Vec<(DerivedColumn, Encoder)> = columns.into_iter().zip(encoders).collect();
    paired.sort_by(|(a, _), (b, _)| {
        (a.origin_index, a.kind, a.level.as_str(), a.name.as_str()).cmp(&(
            b.origin_index,
            b.kind,
            b.level.as_str(),
            b.name.as_str(),
        ))
    });
    for (column, encoder) in paired {
        emission.columns.push(column);
        emission.encoders.push(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fit_scaling_recovers_slope() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![1.0, 3.0, 5.0, 7.0];
        let s = fit_scaling(&x, &y);
        assert!((s.slope - 2.0).abs() < 1e-12);
        assert!((s.center - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_fit_scaling_constant_column() {
        let x = vec![1.0; 4];
        let y = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(fit_scaling(&x, &y).slope, 0.0);
    }
}
