//! Run orchestration (spec §4.8): the staged state machine that turns a
//! submitted [`config::RunConfig`] into a finished [`registry::RunRecord`].
//!
//! Stages run in order — ingest, features, strategy, risk, execution,
//! metrics, validation, artifact-write — with a cooperative cancellation
//! check at each boundary and a progress event pushed to the run's
//! [`events::EventRingBuffer`] after every stage.

pub mod config;
pub mod events;
pub mod single_flight;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::artifacts::{self, ArtifactInputs, ManifestChain};
use crate::canonical::{self, DatasetBinding};
use crate::config::AppConfig;
use crate::dataset::{self, adjustments::AdjustmentPolicy, IngestOptions};
use crate::errors::{ComputationError, CoreError};
use crate::execution::{self, ExecutionConfig, ExtendedSlippageModel};
use crate::features::{self, indicator};
use crate::metrics;
use crate::registry::{ErrorDetail, PValues, RunRecord, RunRegistry, RunStatus};
use crate::risk;
use crate::strategy::{self, CausalityGuard, CausalityMode, StrategyRegistry};
use crate::validation;
use crate::value::Value;

use config::{CausalityModeConfig, RunConfig};

pub const ENGINE_VERSION: &str = "af-brain-1";

/// Process-wide cooperative cancellation flags, one per in-flight run.
#[derive(Default)]
struct CancelTable {
    flags: Mutex<BTreeMap<String, Arc<AtomicBool>>>,
}

impl CancelTable {
    fn flag_for(&self, run_hash: &str) -> Arc<AtomicBool> {
        self.flags
            .lock()
            .unwrap()
            .entry(run_hash.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn clear(&self, run_hash: &str) {
        self.flags.lock().unwrap().remove(run_hash);
    }
}

/// Ties the registry, single-flight lock table, manifest chain, and app
/// config together behind one submission entry point.
pub struct Orchestrator {
    app_config: AppConfig,
    registry: Arc<RunRegistry>,
    single_flight: single_flight::SingleFlight,
    manifest_chain: ManifestChain,
    cancel_table: CancelTable,
}

impl Orchestrator {
    pub fn new(app_config: AppConfig, registry: Arc<RunRegistry>) -> Self {
        Self {
            app_config,
            registry,
            single_flight: single_flight::SingleFlight::new(),
            manifest_chain: ManifestChain::new(),
            cancel_table: CancelTable::default(),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Request cancellation of an in-flight run. A no-op if the run isn't
    /// currently running (spec §4.8: cancellation only affects RUNNING /
    /// VALIDATING runs, checked cooperatively at stage boundaries).
    pub fn cancel(&self, run_hash: &str) {
        self.cancel_table.flag_for(run_hash).store(true, Ordering::SeqCst);
    }

    fn push_event(&self, run_hash: &str, event_type: &str, data: Value) {
        let buf = self.registry.event_buffer(run_hash);
        buf.write().push(event_type, data);
    }

    fn is_cancelled(&self, run_hash: &str) -> bool {
        self.cancel_table.flag_for(run_hash).load(Ordering::SeqCst)
    }

    /// Submit a run. Returns the (possibly already-cached) final record.
    /// Concurrent submissions sharing `run_hash` serialize on the
    /// single-flight lock and observe the same outcome (spec property #6).
    pub fn submit(&self, raw_config: RunConfig) -> Result<RunRecord, CoreError> {
        config::validate(&raw_config)?;

        let dataset_path = PathBuf::from(&raw_config.dataset_path);
        let ingest_opts = IngestOptions {
            symbol: raw_config.symbol.clone(),
            timeframe: raw_config.timeframe.clone(),
            tz_name: raw_config.tz_name.clone(),
            calendar_id: raw_config.calendar_id.clone(),
            adjustment_policy: raw_config.adjustment_policy,
            adjustment_factors: None,
            now_ms: now_ms_ceiling(),
        };
        let (frame, dataset_meta) = dataset::load_csv(&dataset_path, &ingest_opts)?;

        let binding = DatasetBinding {
            symbol: dataset_meta.symbol.clone(),
            timeframe: dataset_meta.timeframe.clone(),
            data_hash: dataset_meta.data_hash.clone(),
        };
        let config_value = config::to_canonical_value(&raw_config);
        let run_hash = canonical::run_hash(&config_value, Some(&binding));

        if self.registry.has_cached(&run_hash) {
            return Ok(self.registry.get(&run_hash).expect("just checked has_cached"));
        }

        let result = self.single_flight.run(&run_hash, || {
            if self.registry.has_cached(&run_hash) {
                return Ok(self.registry.get(&run_hash).expect("checked under lock"));
            }
            self.run_pipeline(&run_hash, raw_config, frame, &dataset_meta)
        });
        self.cancel_table.clear(&run_hash);
        result
    }

    fn run_pipeline(
        &self,
        run_hash: &str,
        raw_config: RunConfig,
        frame: dataset::CanonicalFrame,
        dataset_meta: &dataset::DatasetMetadata,
    ) -> Result<RunRecord, CoreError> {
        let created_at = dataset_meta.created_at_ms;
        let mut record = RunRecord::new_pending(run_hash.to_string(), created_at);
        record.strategy_name = Some(raw_config.strategy.name.clone());
        self.registry.insert(record.clone());
        self.push_event(run_hash, "submitted", Value::map().set("run_hash", run_hash).build());

        self.registry.update(run_hash, |r| r.status = RunStatus::Running);
        self.push_event(run_hash, "stage", Value::map().set("stage", "ingest").set("status", "ok").build());

        match self.execute_stages(run_hash, &raw_config, frame, dataset_meta) {
            Ok(outcome) => {
                self.registry.update(run_hash, |r| {
                    r.status = RunStatus::Complete;
                    r.summary = outcome.summary;
                    r.validation_summary = outcome.validation_summary;
                    r.validation_raw = outcome.validation_raw;
                    r.p_values = outcome.p_values;
                    r.seed = raw_config.seed;
                    r.metrics_hash = Some(outcome.metrics_hash);
                    r.equity_curve_hash = Some(outcome.equity_curve_hash);
                    r.manifest_hash = Some(outcome.manifest_hash);
                    r.primary_metric_value = Some(outcome.primary_metric_value);
                });
                self.push_event(run_hash, "complete", Value::map().set("run_hash", run_hash).build());
                Ok(self.registry.get(run_hash).expect("just inserted"))
            }
            Err(CoreError::Causality(violation)) => {
                let detail = ErrorDetail {
                    error_code: "causality_violation".to_string(),
                    message: violation.to_string(),
                    stack_hash: ComputationError::new("causality_violation", violation.to_string()).stack_hash(),
                };
                self.fail(run_hash, detail);
                Err(CoreError::Causality(violation))
            }
            Err(CoreError::Computation(e)) if e.error_code == "cancelled" => {
                self.registry.update(run_hash, |r| r.status = RunStatus::Cancelled);
                self.push_event(run_hash, "cancelled", Value::map().set("run_hash", run_hash).build());
                Ok(self.registry.get(run_hash).expect("just inserted"))
            }
            Err(other) => {
                let detail = ErrorDetail {
                    error_code: error_code_of(&other),
                    message: other.to_string(),
                    stack_hash: ComputationError::new(error_code_of(&other), other.to_string()).stack_hash(),
                };
                self.fail(run_hash, detail);
                Err(other)
            }
        }
    }

    fn fail(&self, run_hash: &str, detail: ErrorDetail) {
        warn!(run_hash = %run_hash, error_code = %detail.error_code, "run failed");
        self.registry.update(run_hash, |r| {
            r.status = RunStatus::Error;
            r.error = Some(detail.clone());
        });
        self.push_event(
            run_hash,
            "error",
            Value::map().set("error_code", detail.error_code).set("message", detail.message).build(),
        );
    }

    fn check_cancel(&self, run_hash: &str) -> Result<(), CoreError> {
        if self.is_cancelled(run_hash) {
            return Err(CoreError::Computation(ComputationError::new("cancelled", "run cancelled by caller")));
        }
        Ok(())
    }

    fn execute_stages(
        &self,
        run_hash: &str,
        raw_config: &RunConfig,
        frame: dataset::CanonicalFrame,
        dataset_meta: &dataset::DatasetMetadata,
    ) -> Result<StageOutcome, CoreError> {
        self.check_cancel(run_hash)?;

        // --- features ---
        let indicators: Vec<Box<dyn indicator::Indicator>> = raw_config
            .indicators
            .iter()
            .filter_map(|spec| indicator::build_indicator(&spec.name, &spec.params))
            .collect();
        let cache_root = self.app_config.artifact_root.join(".feature_cache");
        let feature_columns: Vec<String> = {
            let mut cols: Vec<String> = indicators.iter().flat_map(|i| i.feature_columns()).collect();
            cols.sort();
            cols
        };
        let cache_path = features::cache::cache_path(&cache_root, &dataset_meta.data_hash, &indicators, ENGINE_VERSION);
        let feature_frame = match features::cache::try_load(&cache_path, &feature_columns) {
            Some(cached) => cached,
            None => {
                let built = if raw_config.chunk_size > 0 {
                    features::build_features_chunked(&frame, &indicators, raw_config.chunk_size, raw_config.overlap)
                } else {
                    features::build_features(&frame, &indicators)
                }
                .map_err(CoreError::Computation)?;
                if let Err(e) = std::fs::create_dir_all(&cache_root) {
                    warn!(error = %e, "could not create feature cache directory");
                } else if let Err(e) = features::cache::store(&cache_path, &built) {
                    warn!(error = %e, "feature cache write failed, continuing uncached");
                }
                built
            }
        };
        self.push_event(run_hash, "stage", Value::map().set("stage", "features").set("status", "ok").build());
        self.check_cancel(run_hash)?;

        // --- causality guard ---
        let causality_mode = match raw_config.causality_mode {
            CausalityModeConfig::Strict => CausalityMode::Strict,
            CausalityModeConfig::Permissive => CausalityMode::Permissive,
        };
        let mut guard = CausalityGuard::new(causality_mode);
        for ind in &indicators {
            guard.record(ind.name(), 0).map_err(CoreError::Causality)?;
        }
        let causality_report = guard.report();

        // --- strategy ---
        let strategy = StrategyRegistry::load(&raw_config.strategy.name).ok_or_else(|| {
            CoreError::Computation(ComputationError::new(
                "unknown_strategy",
                format!("no strategy registered as '{}'", raw_config.strategy.name),
            ))
        })?;
        let params = strategy::normalize_param_aliases(raw_config.strategy.params.clone());
        strategy.validate_params(&params).map_err(CoreError::Config)?;
        let signal = strategy.compute_signal(&feature_frame, &params);
        self.push_event(run_hash, "stage", Value::map().set("stage", "strategy").set("status", "ok").build());
        self.check_cancel(run_hash)?;

        // --- risk sizing ---
        let position_size = compute_position_sizes(&signal, &frame.close, &raw_config.risk, raw_config.execution.initial_cash);
        self.push_event(run_hash, "stage", Value::map().set("stage", "risk").set("status", "ok").build());
        self.check_cancel(run_hash)?;

        // --- execution ---
        let exec_cfg = ExecutionConfig {
            fee_bps: raw_config.execution.fee_bps,
            slippage_bps: raw_config.execution.slippage_bps,
            slippage_model: raw_config.execution.slippage_model.as_ref().map(|m| ExtendedSlippageModel {
                spread_pct: m.spread_pct,
                participation_rate_pct: m.participation_rate_pct,
            }),
            skip_zero_volume: raw_config.execution.skip_zero_volume,
            flatten_end: raw_config.execution.flatten_end,
            initial_cash: raw_config.execution.initial_cash,
        };
        let exec_result = execution::simulate(
            &frame.ts,
            &frame.open,
            &frame.close,
            &frame.volume,
            &signal,
            &position_size,
            &exec_cfg,
        );
        self.push_event(run_hash, "stage", Value::map().set("stage", "execution").set("status", "ok").build());
        self.check_cancel(run_hash)?;

        // --- metrics ---
        let run_metrics = metrics::compute(&exec_result);
        let metrics_map = run_metrics.to_value_map();
        let metrics_hash = canonical::metrics_hash(&metrics_map, self.app_config.canonical_float_precision);
        let curve_rows = metrics::equity_curve_rows(&exec_result);
        let equity_curve_hash = canonical::equity_curve_hash(&curve_rows, self.app_config.canonical_float_precision);
        self.registry.update(run_hash, |r| r.status = RunStatus::Validating);
        self.push_event(run_hash, "stage", Value::map().set("stage", "metrics").set("status", "ok").build());
        self.check_cancel(run_hash)?;

        // --- validation ---
        let trade_returns = metrics::trade_returns(&exec_result.fills);
        let validation_spec = raw_config.validation.to_validation_spec();
        let validation_outcome = validation::run_all(&trade_returns, &validation_spec, raw_config.seed.unwrap_or(0));
        self.push_event(run_hash, "stage", Value::map().set("stage", "validation").set("status", "ok").build());

        // --- artifact write ---
        let summary_json = serde_json::json!({
            "run_hash": run_hash,
            "symbol": dataset_meta.symbol,
            "timeframe": dataset_meta.timeframe,
            "strategy": raw_config.strategy.name,
            "causality_mode": causality_report.mode_name,
            "causality_violations": causality_report.violations,
            "metrics_hash": metrics_hash,
            "equity_curve_hash": equity_curve_hash,
        });
        let metrics_json = metrics_value_to_json(&metrics_map);
        let validation_json = serde_json::json!({
            "permutation_p": validation_outcome.permutation.as_ref().map(|d| d.p_value),
            "block_bootstrap_p": validation_outcome.block_bootstrap.as_ref().map(|d| d.p_value),
            "hadj_bb_p": validation_outcome.hadj_bb.as_ref().map(|d| d.p_value),
            "monte_carlo_p": validation_outcome.monte_carlo.as_ref().map(|d| d.p_value),
            "gate_passed": validation_outcome.gate_passed,
        });
        let validation_detail_json = serde_json::json!({
            "hadj_bb": validation_outcome.hadj_bb.as_ref().map(|h| serde_json::json!({
                "block_length": h.block_length,
                "jitter": h.jitter,
                "fallback": h.fallback,
                "method": h.method,
                "ci": [h.ci.0, h.ci.1],
            })),
            "walk_forward": validation_outcome.walk_forward.as_ref().map(|w| serde_json::json!({
                "sharpe_mean": w.sharpe_mean,
                "sharpe_min": w.sharpe_min,
                "sharpe_max": w.sharpe_max,
                "max_dd_worst": w.max_dd_worst,
                "n_folds": w.folds.len(),
            })),
        });

        let run_dir = artifacts::run_dir_path(&self.app_config.artifact_root, run_hash);
        let artifact_inputs = ArtifactInputs {
            summary: &summary_json,
            metrics: &metrics_json,
            validation: &validation_json,
            validation_detail: &validation_detail_json,
            execution: &exec_result,
            data_hash: Some(dataset_meta.data_hash.clone()),
            calendar_id: dataset_meta.calendar_id.clone(),
            symbol: dataset_meta.symbol.clone(),
            timeframe: dataset_meta.timeframe.clone(),
        };
        let manifest = artifacts::write_run_artifacts(&run_dir, &artifact_inputs, &self.manifest_chain)
            .map_err(CoreError::Io)?;
        self.push_event(
            run_hash,
            "stage",
            Value::map().set("stage", "artifact_write").set("status", "ok").build(),
        );
        info!(run_hash = %run_hash, manifest_hash = %manifest.manifest_hash, "run complete");

        let mut summary = BTreeMap::new();
        summary.insert("symbol".to_string(), Value::String(dataset_meta.symbol.clone()));
        summary.insert("timeframe".to_string(), Value::String(dataset_meta.timeframe.clone()));
        summary.insert("total_return_pct".to_string(), Value::Float(run_metrics.total_return_pct));
        summary.insert("sharpe_ratio".to_string(), Value::Float(run_metrics.sharpe_ratio));

        let mut validation_summary = BTreeMap::new();
        if let Some(gate) = validation_outcome.gate_passed {
            validation_summary.insert("gate_passed".to_string(), Value::Bool(gate));
        }

        let mut validation_raw = BTreeMap::new();
        if let Some(p) = validation_outcome.permutation.as_ref() {
            validation_raw.insert("permutation_p_value".to_string(), Value::Float(p.p_value));
        }

        Ok(StageOutcome {
            summary,
            validation_summary,
            validation_raw,
            p_values: PValues {
                perm: validation_outcome.permutation.as_ref().map(|d| d.p_value),
                bb: validation_outcome.block_bootstrap.as_ref().map(|d| d.p_value),
                mc: validation_outcome.monte_carlo.as_ref().map(|d| d.p_value),
            },
            metrics_hash,
            equity_curve_hash,
            manifest_hash: manifest.manifest_hash,
            primary_metric_value: run_metrics.sharpe_ratio,
        })
    }
}

struct StageOutcome {
    summary: BTreeMap<String, Value>,
    validation_summary: BTreeMap<String, Value>,
    validation_raw: BTreeMap<String, Value>,
    p_values: PValues,
    metrics_hash: String,
    equity_curve_hash: String,
    manifest_hash: String,
    primary_metric_value: f64,
}

fn error_code_of(e: &CoreError) -> String {
    match e {
        CoreError::Config(_) => "config_error".to_string(),
        CoreError::Dataset(_) => "dataset_error".to_string(),
        CoreError::Causality(_) => "causality_violation".to_string(),
        CoreError::Computation(c) => c.error_code.clone(),
        CoreError::Io(_) => "io_error".to_string(),
        CoreError::NotFound(_) => "not_found".to_string(),
        CoreError::RateLimited(_) => "rate_limited".to_string(),
    }
}

fn metrics_value_to_json(metrics: &BTreeMap<String, Value>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in metrics {
        let jv = match v {
            Value::Float(f) => serde_json::json!(f),
            Value::Int(i) => serde_json::json!(i),
            Value::Bool(b) => serde_json::json!(b),
            Value::String(s) => serde_json::json!(s),
            _ => serde_json::Value::Null,
        };
        map.insert(k.clone(), jv);
    }
    serde_json::Value::Object(map)
}

/// Per-row position sizing, dispatched by risk model name (spec §4.5).
/// Sizing is computed against `initial_cash` rather than a path-dependent
/// running equity, since [`execution::simulate`] takes the size series as
/// an input rather than folding sizing into the fill loop itself.
fn compute_position_sizes(
    signal: &[f64],
    close: &[f64],
    risk_spec: &config::RiskSpec,
    initial_cash: f64,
) -> Vec<f64> {
    let n = signal.len();
    match risk_spec.model.as_str() {
        "volatility_target" => {
            let lookback = risk_spec.params.get("lookback").copied().unwrap_or(20.0) as usize;
            let base_fraction = risk_spec.params.get("base_fraction").copied().unwrap_or(0.1);
            let target_vol = risk_spec.params.get("target_vol").copied().unwrap_or(0.01);
            let returns = close_returns(close);
            (0..n)
                .map(|i| {
                    let upto = i.min(returns.len());
                    risk::volatility_target(
                        signal[i],
                        initial_cash,
                        close[i],
                        &returns[..upto],
                        lookback,
                        base_fraction,
                        target_vol,
                    )
                })
                .collect()
        }
        "kelly" | "kelly_fraction" => {
            let p_win = risk_spec.params.get("p_win").copied().unwrap_or(0.5);
            let payoff_ratio = risk_spec.params.get("payoff_ratio").copied().unwrap_or(1.0);
            let base_fraction = risk_spec.params.get("base_fraction").copied().unwrap_or(1.0);
            (0..n)
                .map(|i| risk::kelly_fraction(signal[i], initial_cash, close[i], p_win, payoff_ratio, base_fraction))
                .collect()
        }
        _ => {
            let fraction = risk_spec.params.get("fraction").copied().unwrap_or(0.1);
            (0..n).map(|i| risk::fixed_fraction(signal[i], initial_cash, close[i], fraction)).collect()
        }
    }
}

fn close_returns(close: &[f64]) -> Vec<f64> {
    close
        .windows(2)
        .map(|w| if w[0].abs() > f64::EPSILON { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Wall-clock ceiling used to drop future-dated rows during ingestion and
/// to stamp a run's `created_at` (spec §4.2 "discards strictly-future
/// rows"; §3 `RunRecord.created_at`).
fn now_ms_ceiling() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
