use super::*;
use crate::dataset::CanonicalFrame;

#[test]
fn legacy_alias_fast_slow_normalizes_to_window_names() {
    let mut raw = BTreeMap::new();
    raw.insert("fast".to_string(), 5.0);
    raw.insert("slow".to_string(), 20.0);
    let params = normalize_param_aliases(raw);
    assert_eq!(params.get("short_window"), Some(5.0));
    assert_eq!(params.get("long_window"), Some(20.0));
}

#[test]
fn dual_sma_rejects_fast_not_less_than_slow() {
    let strategy = DualSmaStrategy;
    let mut values = BTreeMap::new();
    values.insert("short_window".to_string(), 20.0);
    values.insert("long_window".to_string(), 20.0);
    let params = StrategyParams { values };
    assert!(strategy.validate_params(&params).is_err());
}

#[test]
fn dual_sma_signal_follows_crossover() {
    let strategy = DualSmaStrategy;
    let mut features = FeatureFrame {
        base: CanonicalFrame::default(),
        feature_order: vec!["legacy_sma_fast_5".to_string(), "legacy_sma_slow_20".to_string()],
        features: BTreeMap::new(),
    };
    features.base.ts = vec![0, 1, 2];
    features
        .features
        .insert("legacy_sma_fast_5".to_string(), vec![10.0, 5.0, f64::NAN]);
    features
        .features
        .insert("legacy_sma_slow_20".to_string(), vec![5.0, 10.0, 5.0]);
    let mut values = BTreeMap::new();
    values.insert("short_window".to_string(), 5.0);
    values.insert("long_window".to_string(), 20.0);
    let params = StrategyParams { values };
    let signal = strategy.compute_signal(&features, &params);
    assert_eq!(signal, vec![1.0, -1.0, 0.0]);
}

#[test]
fn strict_guard_raises_on_first_violation() {
    let mut guard = CausalityGuard::new(CausalityMode::Strict);
    assert!(guard.record("sma", 0).is_ok());
    assert!(guard.record("sma", 1).is_err());
    assert_eq!(guard.report().violations, 1);
}

#[test]
fn permissive_guard_counts_and_continues() {
    let mut guard = CausalityGuard::new(CausalityMode::Permissive);
    assert!(guard.record("sma", 1).is_ok());
    assert!(guard.record("ema", 2).is_ok());
    let report = guard.report();
    assert_eq!(report.violations, 2);
    assert_eq!(report.mode_name, "permissive");
}
