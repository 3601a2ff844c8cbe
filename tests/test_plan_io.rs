//! Integration tests: plan application, restriction, warnings, and the
//! parameter surface.

use varplan::crossfit::CancelToken;
use varplan::plan::fit_treatment;
use varplan::prelude::*;

fn demo_frame(n: usize) -> Frame {
    let mut x = Vec::with_capacity(n);
    let mut cat: Vec<Option<String>> = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut yc: Vec<Option<String>> = Vec::with_capacity(n);
    for i in 0..n {
        let xi = (i as f64) / 7.0;
        let wave = (1.7 * xi).sin();
        x.push(if i % 11 == 0 { f64::NAN } else { xi });
        cat.push(if i % 9 == 0 {
            None
        } else {
            Some(["low", "mid", "high"][((wave + 1.0) * 1.4) as usize % 3].to_string())
        });
        y.push(wave * 3.0 + (0.31 * i as f64).sin());
        yc.push(Some(if wave > 0.0 { "yes" } else { "no" }.to_string()));
    }
    Frame::new()
        .with_column("x", Column::Numeric(x))
        .unwrap()
        .with_column("cat", Column::Categorical(cat))
        .unwrap()
        .with_column("y", Column::Numeric(y))
        .unwrap()
        .with_column("yc", Column::Categorical(yc))
        .unwrap()
}

fn params() -> TreatmentParams {
    TreatmentParams::new().with_random_state(7)
}

#[test]
fn test_code_restriction_limits_outputs() {
    let frame = demo_frame(240);
    let restricted = params().with_code_restriction([
        EncoderKind::Indicator,
        EncoderKind::Clean,
        EncoderKind::IsBad,
    ]);
    let design =
        design_binomial_treatment(&frame, &["x", "cat"], "yc", "yes", &restricted).unwrap();

    for row in design.plan.score_frame() {
        assert!(
            matches!(
                row.kind,
                EncoderKind::Indicator | EncoderKind::Clean | EncoderKind::IsBad
            ),
            "restricted fit emitted {}",
            row.kind
        );
    }
    // width: x_clean + x_is_bad + cat_is_bad + one indicator per level
    // (low/mid/high/missing), plus the outcome column
    let expected_width = 2 + 1 + 4;
    assert_eq!(design.plan.encoders.len(), expected_width);
    assert_eq!(design.cross_frame.n_cols(), expected_width + 1);
}

#[test]
fn test_same_frame_transform_warns() {
    let frame = demo_frame(180);
    let design = design_numeric_treatment(&frame, &["x", "cat"], "y", &params()).unwrap();

    let (_, report) = design.plan.transform_with_report(&frame).unwrap();
    assert!(report.contains(&TreatmentWarning::SameFrameTransform));

    // a disjoint frame of the same shape does not warn
    let other = demo_frame(180);
    let mut shifted = Frame::new();
    for name in other.column_names() {
        let col = match other.column(name).unwrap() {
            Column::Numeric(v) => Column::Numeric(v.iter().map(|&a| a + 0.25).collect()),
            c @ Column::Categorical(_) => c.clone(),
        };
        shifted = shifted.with_column(name.clone(), col).unwrap();
    }
    let (_, report) = design.plan.transform_with_report(&shifted).unwrap();
    assert!(report.is_empty());

    // different row count never warns
    let (_, report) = design.plan.transform_with_report(&demo_frame(60)).unwrap();
    assert!(report.is_empty());
}

#[test]
fn test_unsupervised_design_is_outcome_free() {
    let frame = demo_frame(120);
    let design = design_unsupervised_treatment(&frame, &["x", "cat"], &params()).unwrap();
    for row in design.plan.score_frame() {
        assert!(matches!(
            row.kind,
            EncoderKind::Clean | EncoderKind::IsBad | EncoderKind::Prevalence | EncoderKind::Indicator
        ));
        assert_eq!(row.rsq, 0.0);
        assert_eq!(row.sig, 1.0);
        assert_eq!(row.recommended, row.var_moves);
    }
    // the plan still deploys
    let out = design.plan.transform(&demo_frame(30)).unwrap();
    assert_eq!(out.n_rows(), 30);
}

#[test]
fn test_cancellation_discards_fit() {
    let frame = demo_frame(200);
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = OutcomeSpec::Numeric {
        column: "y".to_string(),
    };
    let err = fit_treatment(&frame, &["x", "cat"], &outcome, &params(), &cancel).unwrap_err();
    assert!(matches!(err, VarplanError::Cancelled));
}

#[test]
fn test_force_split_marks_outcome_free_encoders() {
    let frame = demo_frame(150);
    let forced = params().with_force_split(true);
    let design = design_numeric_treatment(&frame, &["x", "cat"], "y", &forced).unwrap();
    assert!(design.plan.score_frame().iter().all(|r| r.needs_split));

    let unforced = design_numeric_treatment(&frame, &["x", "cat"], "y", &params()).unwrap();
    let clean = unforced
        .plan
        .score_frame()
        .iter()
        .find(|r| r.var_name == "x_clean")
        .unwrap();
    assert!(!clean.needs_split);
}

#[test]
fn test_scale_rescales_to_outcome_units() {
    let n = 60;
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|&v| 3.0 * v + 1.0).collect();
    let frame = Frame::new()
        .with_column("x", Column::Numeric(x.clone()))
        .unwrap()
        .with_column("y", Column::Numeric(y))
        .unwrap();
    let scaled = params()
        .with_scale(true)
        .with_code_restriction([EncoderKind::Clean]);
    let design = design_numeric_treatment(&frame, &["x"], "y", &scaled).unwrap();

    let out = design.plan.transform(&frame).unwrap();
    let rows: Vec<usize> = (0..n).collect();
    let values = out.column("x_clean").unwrap().numeric_at(&rows).unwrap();
    let center = (n as f64 - 1.0) / 2.0;
    for (i, v) in values.iter().enumerate() {
        let expected = 3.0 * (i as f64 - center);
        assert!((v - expected).abs() < 1e-9, "row {i}: {v} vs {expected}");
    }
}

#[test]
fn test_median_imputation_through_pipeline() {
    let frame = Frame::new()
        .with_column(
            "x",
            Column::Numeric(vec![1.0, 2.0, 100.0, f64::NAN, 3.0, 2.5, 1.5, 2.2]),
        )
        .unwrap()
        .with_column(
            "y",
            Column::Numeric(vec![0.1, 0.4, 0.2, 0.8, 0.3, 0.9, 0.2, 0.6]),
        )
        .unwrap();
    let p = params()
        .with_imputation(Imputation::Median)
        .with_code_restriction([EncoderKind::Clean]);
    let design = design_numeric_treatment(&frame, &["x"], "y", &p).unwrap();
    let rows: Vec<usize> = (0..8).collect();
    let values = design
        .cross_frame
        .column("x_clean")
        .unwrap()
        .numeric_at(&rows)
        .unwrap();
    // median of {1, 1.5, 2, 2.2, 2.5, 3, 100}
    assert_eq!(values[3], 2.2);
}

#[test]
fn test_rare_level_pooling() {
    let mut cat: Vec<Option<String>> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    for i in 0..40 {
        cat.push(Some(if i % 2 == 0 { "big_a" } else { "big_b" }.to_string()));
        y.push(if i % 2 == 0 { 1.0 } else { 5.0 });
    }
    cat.push(Some("stray_1".to_string()));
    y.push(40.0);
    cat.push(Some("stray_2".to_string()));
    y.push(44.0);
    let frame = Frame::new()
        .with_column("cat", Column::Categorical(cat))
        .unwrap()
        .with_column("y", Column::Numeric(y))
        .unwrap();

    let pooled = params()
        .with_rare_count(1)
        .with_code_restriction([EncoderKind::Impact]);
    let design = design_numeric_treatment(&frame, &["cat"], "y", &pooled).unwrap();

    let test = Frame::new()
        .with_column(
            "cat",
            Column::Categorical(vec![
                Some("stray_1".to_string()),
                Some("stray_2".to_string()),
            ]),
        )
        .unwrap();
    let out = design.plan.transform(&test).unwrap();
    let values = out.column("cat_impact").unwrap().numeric_at(&[0, 1]).unwrap();
    assert_eq!(values[0], values[1]);
}

#[test]
fn test_rare_sig_suppresses_noise_indicators() {
    // "signal"/"none" track the outcome exactly; "j1"/"j2" are assigned
    // independently of it
    let n = 200;
    let mut cat: Vec<Option<String>> = Vec::with_capacity(n);
    let mut yc: Vec<Option<String>> = Vec::with_capacity(n);
    for i in 0..n {
        let pos = (0.91 * i as f64).sin() > 0.0;
        let level = if i % 2 == 0 {
            if pos {
                "signal"
            } else {
                "none"
            }
        } else if (i / 2) % 2 == 0 {
            "j1"
        } else {
            "j2"
        };
        cat.push(Some(level.to_string()));
        yc.push(Some(if pos { "y" } else { "n" }.to_string()));
    }
    let frame = Frame::new()
        .with_column("cat", Column::Categorical(cat))
        .unwrap()
        .with_column("yc", Column::Categorical(yc))
        .unwrap();

    let filtered = params()
        .with_rare_sig(0.01)
        .with_code_restriction([EncoderKind::Indicator]);
    let design = design_binomial_treatment(&frame, &["cat"], "yc", "y", &filtered).unwrap();
    let names = design.plan.feature_names();
    assert!(names.iter().any(|n| n == "cat_lev_signal"));
    assert!(names.iter().any(|n| n == "cat_lev_none"));
    assert!(!names.iter().any(|n| n == "cat_lev_j1"));
    assert!(!names.iter().any(|n| n == "cat_lev_j2"));

    let unfiltered = params().with_code_restriction([EncoderKind::Indicator]);
    let full = design_binomial_treatment(&frame, &["cat"], "yc", "y", &unfiltered).unwrap();
    assert!(full.plan.feature_names().iter().any(|n| n == "cat_lev_j1"));
    assert!(full.plan.feature_names().iter().any(|n| n == "cat_lev_j2"));
}

#[test]
fn test_collar_winsorizes_numeric_input() {
    let n = 101;
    let mut x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    x[100] = 1e6;
    let y: Vec<f64> = (0..n).map(|i| (i as f64).sqrt()).collect();
    let frame = Frame::new()
        .with_column("x", Column::Numeric(x))
        .unwrap()
        .with_column("y", Column::Numeric(y))
        .unwrap();
    let collared = params()
        .with_collar(0.05)
        .with_code_restriction([EncoderKind::Clean]);
    let design = design_numeric_treatment(&frame, &["x"], "y", &collared).unwrap();
    let rows: Vec<usize> = (0..n).collect();
    let values = design
        .cross_frame
        .column("x_clean")
        .unwrap()
        .numeric_at(&rows)
        .unwrap();
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max < 1000.0, "outlier survived the collar: {max}");
}

#[test]
fn test_all_missing_numeric_column_is_suppressed_with_warning() {
    let n = 40;
    let frame = Frame::new()
        .with_column("dead", Column::Numeric(vec![f64::NAN; n]))
        .unwrap()
        .with_column("x", Column::Numeric((0..n).map(|i| i as f64).collect()))
        .unwrap()
        .with_column("y", Column::Numeric((0..n).map(|i| (i as f64) * 0.5).collect()))
        .unwrap();
    let design = design_numeric_treatment(&frame, &["dead", "x"], "y", &params()).unwrap();
    assert!(design.plan.encoders.iter().all(|e| e.origin() != "dead"));
    assert!(design.plan.warnings().contains(&TreatmentWarning::AllMissingColumn {
        column: "dead".to_string()
    }));
}

#[test]
fn test_degenerate_outcomes_rejected() {
    let n = 20;
    let frame = Frame::new()
        .with_column("x", Column::Numeric((0..n).map(|i| i as f64).collect()))
        .unwrap()
        .with_column("y_const", Column::Numeric(vec![5.0; n]))
        .unwrap()
        .with_column(
            "yc",
            Column::Categorical((0..n).map(|_| Some("only".to_string())).collect()),
        )
        .unwrap();

    let err = design_numeric_treatment(&frame, &["x"], "y_const", &params()).unwrap_err();
    assert!(matches!(err, VarplanError::DegenerateOutcome(_)));

    let err =
        design_binomial_treatment(&frame, &["x"], "yc", "absent_value", &params()).unwrap_err();
    assert!(matches!(err, VarplanError::DegenerateOutcome(_)));
}

#[test]
fn test_cat_scaling_identity_space() {
    let n = 80;
    let cat: Vec<Option<String>> = (0..n)
        .map(|i| Some(if i % 4 == 0 { "hot" } else { "cold" }.to_string()))
        .collect();
    let yc: Vec<Option<String>> = (0..n)
        .map(|i| Some(if i % 4 == 0 { "y" } else { "n" }.to_string()))
        .collect();
    let frame = Frame::new()
        .with_column("cat", Column::Categorical(cat))
        .unwrap()
        .with_column("yc", Column::Categorical(yc))
        .unwrap();
    let identity = params()
        .with_cat_scaling(false)
        .with_code_restriction([EncoderKind::Impact]);
    let design = design_binomial_treatment(&frame, &["cat"], "yc", "y", &identity).unwrap();

    // identity-space impact is a centered rate difference, bounded by 1
    let test = Frame::new()
        .with_column(
            "cat",
            Column::Categorical(vec![Some("hot".to_string()), Some("cold".to_string())]),
        )
        .unwrap();
    let out = design.plan.transform(&test).unwrap();
    let values = out.column("cat_impact").unwrap().numeric_at(&[0, 1]).unwrap();
    assert!(values[0] > 0.0 && values[0] < 1.0);
    assert!(values[1] < 0.0 && values[1] > -1.0);
}

#[test]
fn test_plan_survives_serialization_roundtrip() {
    let frame = demo_frame(150);
    let design = design_binomial_treatment(&frame, &["x", "cat"], "yc", "yes", &params()).unwrap();
    let json = design.plan.to_json().unwrap();
    let reloaded = TreatmentPlan::from_json(&json).unwrap();

    let test = demo_frame(40);
    let a = design.plan.transform(&test).unwrap();
    let b = reloaded.transform(&test).unwrap();
    let rows: Vec<usize> = (0..40).collect();
    for name in design.plan.feature_names() {
        assert_eq!(
            a.column(&name).unwrap().numeric_at(&rows).unwrap(),
            b.column(&name).unwrap().numeric_at(&rows).unwrap(),
            "column {name} changed across serialization"
        );
    }
}
