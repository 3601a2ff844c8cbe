//! Fold planning for out-of-fold encoder estimation.
//!
//! A split plan partitions the usable training rows into k disjoint
//! application folds. Each fold's encoders are fit on the complement
//! (`train_indices`) and emit values only inside the fold (`app_indices`),
//! so no row is ever encoded by a model that saw it.

use crate::error::{Result, VarplanError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Number of outcome-quantile buckets used to stratify numeric outcomes.
pub const NUMERIC_STRATA: usize = 10;

/// How training rows are partitioned into folds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Random shuffle, then consecutive slices.
    KFold,
    /// Preserve outcome class (or numeric-outcome quantile bucket)
    /// proportions per fold. Falls back to plain k-fold when there is no
    /// outcome to stratify on.
    Stratified,
    /// Caller-supplied folds, validated for disjointness and coverage.
    Precomputed(Vec<FoldSpec>),
}

/// Caller-supplied fold for [`SplitStrategy::Precomputed`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldSpec {
    pub train_indices: Vec<usize>,
    pub app_indices: Vec<usize>,
}

/// A single fit/emit fold
#[derive(Debug, Clone)]
pub struct FoldPlan {
    pub train_indices: Vec<usize>,
    pub app_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// The full fold partition of the usable rows
#[derive(Debug, Clone)]
pub struct SplitPlan {
    pub folds: Vec<FoldPlan>,
}

/// Build a split plan over `rows` (the usable training rows, ascending).
/// `strata` is aligned with `rows` and carries a class/bucket id per row;
/// the planner is deterministic given `seed`.
pub fn build_split_plan(
    rows: &[usize],
    strategy: &SplitStrategy,
    k: usize,
    strata: Option<&[usize]>,
    seed: u64,
) -> Result<SplitPlan> {
    if let SplitStrategy::Precomputed(specs) = strategy {
        return validate_precomputed(specs, rows);
    }
    if rows.len() < 2 {
        return Err(VarplanError::InvalidSplit(format!(
            "cannot fold {} usable rows",
            rows.len()
        )));
    }
    let k = k.min(rows.len());

    let assignments = match (strategy, strata) {
        (SplitStrategy::Stratified, Some(strata)) => stratified_assignment(rows, strata, k, seed),
        _ => k_fold_assignment(rows, k, seed),
    };

    let row_set: BTreeSet<usize> = rows.iter().copied().collect();
    let mut folds = Vec::with_capacity(k);
    for (fold_idx, app) in assignments.into_iter().enumerate() {
        let app_set: BTreeSet<usize> = app.iter().copied().collect();
        let train_indices: Vec<usize> = row_set.difference(&app_set).copied().collect();
        let mut app_indices = app;
        app_indices.sort_unstable();
        folds.push(FoldPlan {
            train_indices,
            app_indices,
            fold_idx,
        });
    }
    Ok(SplitPlan { folds })
}

fn k_fold_assignment(rows: &[usize], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut shuffled: Vec<usize> = rows.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let n = shuffled.len();
    let mut assignments = Vec::with_capacity(k);
    let mut current = 0;
    for i in 0..k {
        let base = n / k;
        let fold_size = if i < n % k { base + 1 } else { base };
        assignments.push(shuffled[current..current + fold_size].to_vec());
        current += fold_size;
    }
    assignments
}

fn stratified_assignment(rows: &[usize], strata: &[usize], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&row, &stratum) in rows.iter().zip(strata) {
        groups.entry(stratum).or_default().push(row);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut offset = 0usize;
    for members in groups.values_mut() {
        members.shuffle(&mut rng);
        for (i, &row) in members.iter().enumerate() {
            assignments[(offset + i) % k].push(row);
        }
        // stagger the round-robin start so small strata do not pile into fold 0
        offset = (offset + members.len()) % k;
    }
    assignments
}

fn validate_precomputed(specs: &[FoldSpec], rows: &[usize]) -> Result<SplitPlan> {
    if specs.len() < 2 {
        return Err(VarplanError::InvalidSplit(
            "precomputed plan needs at least 2 folds".to_string(),
        ));
    }
    let row_set: BTreeSet<usize> = rows.iter().copied().collect();

    let mut seen_app: BTreeSet<usize> = BTreeSet::new();
    for (fold_idx, spec) in specs.iter().enumerate() {
        for &r in spec.app_indices.iter().chain(&spec.train_indices) {
            if !row_set.contains(&r) {
                return Err(VarplanError::InvalidSplit(format!(
                    "fold {fold_idx} references row {r} outside the usable set"
                )));
            }
        }
        for &r in &spec.app_indices {
            if !seen_app.insert(r) {
                return Err(VarplanError::InvalidSplit(format!(
                    "row {r} appears in more than one application fold"
                )));
            }
        }
        let app_set: BTreeSet<usize> = spec.app_indices.iter().copied().collect();
        let expected_train: BTreeSet<usize> = row_set.difference(&app_set).copied().collect();
        let train_set: BTreeSet<usize> = spec.train_indices.iter().copied().collect();
        if train_set != expected_train {
            return Err(VarplanError::InvalidSplit(format!(
                "fold {fold_idx} training set is not the complement of its application set"
            )));
        }
    }
    if seen_app != row_set {
        return Err(VarplanError::InvalidSplit(
            "application folds do not cover every usable row".to_string(),
        ));
    }

    Ok(SplitPlan {
        folds: specs
            .iter()
            .enumerate()
            .map(|(fold_idx, spec)| {
                let mut train_indices = spec.train_indices.clone();
                let mut app_indices = spec.app_indices.clone();
                train_indices.sort_unstable();
                app_indices.sort_unstable();
                FoldPlan {
                    train_indices,
                    app_indices,
                    fold_idx,
                }
            })
            .collect(),
    })
}

/// Rank-based quantile bucket per row, for stratifying numeric outcomes.
/// Ties break by row index.
pub(crate) fn quantile_buckets(y: &[f64], rows: &[usize], n_buckets: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        y[rows[a]]
            .partial_cmp(&y[rows[b]])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(rows[a].cmp(&rows[b]))
    });
    let mut buckets = vec![0usize; rows.len()];
    for (rank, &pos) in order.iter().enumerate() {
        buckets[pos] = rank * n_buckets / rows.len();
    }
    buckets
}
