use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use super::*;
use crate::config::AppConfig;
use crate::orchestrator::config::{ExecutionSpec, IndicatorSpec, RiskSpec, StrategySpec, ValidationSpecConfig};
use crate::registry::RunRegistry;

fn write_sample_csv(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("dataset.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "timestamp,open,high,low,close,volume").unwrap();
    let base = 100.0;
    for i in 0..40i64 {
        let ts = 1_700_000_000i64 + i * 60;
        let dt = chrono::DateTime::from_timestamp(ts, 0).unwrap();
        let close = base + (i as f64 * 0.3).sin() * 3.0 + i as f64 * 0.1;
        writeln!(
            f,
            "{},{:.4},{:.4},{:.4},{:.4},{:.2}",
            dt.format("%Y-%m-%d %H:%M:%S"),
            close - 0.1,
            close + 0.2,
            close - 0.2,
            close,
            100.0 + i as f64,
        )
        .unwrap();
    }
    path
}

fn sample_run_config(dataset_path: &std::path::Path) -> RunConfig {
    let mut strategy_params = BTreeMap::new();
    strategy_params.insert("short_window".to_string(), 3.0);
    strategy_params.insert("long_window".to_string(), 8.0);

    let mut indicator_params = BTreeMap::new();
    indicator_params.insert("short_window".to_string(), 3.0);
    indicator_params.insert("long_window".to_string(), 8.0);

    RunConfig {
        symbol: "TEST".to_string(),
        timeframe: "1m".to_string(),
        start: "2020-01-01".to_string(),
        end: "2030-01-01".to_string(),
        indicators: vec![IndicatorSpec { name: "dual_sma_legacy".to_string(), params: indicator_params }],
        strategy: StrategySpec { name: "dual_sma".to_string(), params: strategy_params },
        risk: RiskSpec { model: "fixed_fraction".to_string(), params: BTreeMap::new() },
        execution: ExecutionSpec::default(),
        validation: ValidationSpecConfig::default(),
        causality_mode: CausalityModeConfig::Permissive,
        seed: Some(7),
        dataset_path: dataset_path.to_string_lossy().to_string(),
        tz_name: "UTC".to_string(),
        calendar_id: None,
        adjustment_policy: AdjustmentPolicy::None,
        chunk_size: 0,
        overlap: 0,
    }
}

fn test_app_config(artifact_root: &std::path::Path) -> AppConfig {
    AppConfig {
        artifact_root: artifact_root.to_path_buf(),
        cold_storage_enabled: false,
        cold_storage_provider: crate::config::ColdStorageProviderKind::Local,
        cold_storage_bucket: None,
        cold_storage_prefix: String::new(),
        audit_rotate_bytes: 1_000_000,
        validation_caution_pvalue: None,
        validation_caution_metrics: None,
        log_level: "error".to_string(),
        canonical_float_precision: 12,
        retention_keep_last: 50,
        retention_top_k_per_strategy: 5,
        retention_max_full_bytes: None,
    }
}

#[test]
fn submit_runs_full_pipeline_and_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset_path = write_sample_csv(tmp.path());
    let artifact_root = tmp.path().join("artifacts");
    let registry = Arc::new(RunRegistry::new());
    let orchestrator = Orchestrator::new(test_app_config(&artifact_root), registry);

    let cfg = sample_run_config(&dataset_path);
    let record = orchestrator.submit(cfg).expect("pipeline should complete");
    assert_eq!(record.status.as_str(), "COMPLETE");
    assert!(record.metrics_hash.is_some());
    assert!(record.manifest_hash.is_some());
}

#[test]
fn resubmitting_identical_config_returns_cached_record_without_rerunning() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset_path = write_sample_csv(tmp.path());
    let artifact_root = tmp.path().join("artifacts");
    let registry = Arc::new(RunRegistry::new());
    let orchestrator = Orchestrator::new(test_app_config(&artifact_root), registry);

    let cfg1 = sample_run_config(&dataset_path);
    let cfg2 = sample_run_config(&dataset_path);
    let first = orchestrator.submit(cfg1).expect("first run completes");
    let second = orchestrator.submit(cfg2).expect("second run hits cache");
    assert_eq!(first.run_hash, second.run_hash);
    assert_eq!(first.manifest_hash, second.manifest_hash);
}

#[test]
fn unknown_strategy_name_fails_the_run_with_a_computation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset_path = write_sample_csv(tmp.path());
    let artifact_root = tmp.path().join("artifacts");
    let registry = Arc::new(RunRegistry::new());
    let orchestrator = Orchestrator::new(test_app_config(&artifact_root), registry);

    let mut cfg = sample_run_config(&dataset_path);
    cfg.strategy.name = "does_not_exist".to_string();
    let err = orchestrator.submit(cfg).expect_err("unknown strategy should fail");
    match err {
        CoreError::Computation(e) => assert_eq!(e.error_code, "unknown_strategy"),
        other => panic!("expected computation error, got {other:?}"),
    }
}

#[test]
fn empty_symbol_is_rejected_before_any_run_is_created() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset_path = write_sample_csv(tmp.path());
    let artifact_root = tmp.path().join("artifacts");
    let registry = Arc::new(RunRegistry::new());
    let orchestrator = Orchestrator::new(test_app_config(&artifact_root), registry);

    let mut cfg = sample_run_config(&dataset_path);
    cfg.symbol = "".to_string();
    let err = orchestrator.submit(cfg).expect_err("empty symbol should be rejected");
    assert!(matches!(err, CoreError::Config(_)));
}
