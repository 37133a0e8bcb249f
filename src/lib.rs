//! AlphaForge-Brain: a deterministic backtesting engine.
//!
//! [`Engine`] is the facade spec §6 calls "core operations exposed to
//! adapters" — `submit`, `get_record`, `stream_events`, pin/unpin/
//! rehydrate/restore, retention planning, and hash lookups. Everything
//! underneath (ingestion, features, strategy, risk, execution, metrics,
//! validation, orchestration, artifacts, retention) is reachable directly
//! by name for adapters or tests that need finer-grained control.

pub mod artifacts;
pub mod canonical;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod execution;
pub mod features;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retention;
pub mod risk;
pub mod strategy;
pub mod validation;
pub mod value;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use errors::{CoreError, NotFoundError};
use orchestrator::config::RunConfig;
use orchestrator::events::Event;
use orchestrator::Orchestrator;
use registry::{RunRecord, RunRegistry};
use retention::audit::AuditLog;
use retention::cold_storage::{ColdStorageProvider, LocalColdStorage};
use retention::{RetentionConfig, RetentionPlan};
use value::Value;

/// `submit` result (spec §6): `created` is `false` when an identical
/// config/dataset pair was already cached and the orchestrator skipped
/// recomputation.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub run_hash: String,
    pub created: bool,
    pub record: RunRecord,
}

/// `restore` result (spec §6): mirrors the original's `{restored, noop}`
/// pair so a caller can tell "nothing to do" apart from "did the work".
#[derive(Debug, Clone, Copy)]
pub struct RestoreOutcome {
    pub restored: bool,
    pub noop: bool,
}

/// `hashes(run_hash)` result (spec §6).
#[derive(Debug, Clone, Default)]
pub struct RunHashes {
    pub manifest_hash: Option<String>,
    pub metrics_hash: Option<String>,
    pub equity_curve_hash: Option<String>,
    pub provenance_hash: Option<String>,
}

/// Owns the registry, orchestrator, audit log, and (optional) cold
/// storage provider for one process. Adapters (HTTP server, CLI) hold one
/// `Engine` and drive it through the methods below rather than reaching
/// into the submodules directly.
pub struct Engine {
    app_config: config::AppConfig,
    registry: Arc<RunRegistry>,
    orchestrator: Orchestrator,
    audit: AuditLog,
    cold_storage: Option<Box<dyn ColdStorageProvider>>,
}

impl Engine {
    pub fn new(app_config: config::AppConfig) -> Self {
        let registry = Arc::new(RunRegistry::new());
        let audit = AuditLog::new(app_config.artifact_root.join("audit.log"), app_config.audit_rotate_bytes);
        let cold_storage: Option<Box<dyn ColdStorageProvider>> = if app_config.cold_storage_enabled {
            Some(Box::new(LocalColdStorage::new(app_config.artifact_root.join(".cold"))))
        } else {
            None
        };
        let orchestrator = Orchestrator::new(app_config.clone(), registry.clone());
        Self { app_config, registry, orchestrator, audit, cold_storage }
    }

    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Submit a run configuration (spec §6 `submit`). The dataset is read
    /// twice on a cache miss — once here to learn whether the resulting
    /// `run_hash` is already registered, once inside the orchestrator to
    /// actually execute the pipeline — since the orchestrator only
    /// computes `run_hash` after loading the dataset itself. Cheap
    /// relative to the pipeline it gates; noted as a known duplication
    /// rather than restructured.
    pub fn submit(&self, config: RunConfig) -> Result<SubmitOutcome, CoreError> {
        orchestrator::config::validate(&config)?;
        let ingest_opts = dataset::IngestOptions {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe.clone(),
            tz_name: config.tz_name.clone(),
            calendar_id: config.calendar_id.clone(),
            adjustment_policy: config.adjustment_policy,
            adjustment_factors: None,
            now_ms: self.now_ms(),
        };
        let (_frame, dataset_meta) = dataset::load_csv(&PathBuf::from(&config.dataset_path), &ingest_opts)?;
        let binding = canonical::DatasetBinding {
            symbol: dataset_meta.symbol.clone(),
            timeframe: dataset_meta.timeframe.clone(),
            data_hash: dataset_meta.data_hash.clone(),
        };
        let config_value = orchestrator::config::to_canonical_value(&config);
        let run_hash = canonical::run_hash(&config_value, Some(&binding));
        let existed = self.registry.has_cached(&run_hash);

        let record = self.orchestrator.submit(config)?;
        let created = !existed;
        let ts = self.now_ms();
        if let Err(e) = self.audit.append(
            ts,
            "RUN_SUBMITTED",
            Some(&record.run_hash),
            Value::map().set("created", created).build(),
        ) {
            warn!(error = %e, "audit log write failed for RUN_SUBMITTED");
        }
        Ok(SubmitOutcome { run_hash: record.run_hash.clone(), created, record })
    }

    /// Look up a run record (spec §6 `get_record`).
    pub fn get_record(&self, run_hash: &str) -> Result<RunRecord, NotFoundError> {
        self.registry
            .get(run_hash)
            .ok_or_else(|| NotFoundError { run_hash: run_hash.to_string() })
    }

    /// Replay events newer than `since_id` (spec §6 `stream_events`,
    /// property #6 event monotonicity). Returns an empty vec for an
    /// unknown `run_hash` rather than erroring, matching a ring buffer
    /// that hasn't been allocated yet.
    pub fn stream_events(&self, run_hash: &str, since_id: Option<u64>) -> Vec<Event> {
        self.registry.event_buffer(run_hash).read().since(since_id)
    }

    /// Request cooperative cancellation of an in-flight run.
    pub fn cancel(&self, run_hash: &str) {
        self.orchestrator.cancel(run_hash);
    }

    pub fn pin(&self, run_hash: &str) -> Result<(), NotFoundError> {
        self.touch_pin(run_hash, true, "PIN")
    }

    pub fn unpin(&self, run_hash: &str) -> Result<(), NotFoundError> {
        self.touch_pin(run_hash, false, "UNPIN")
    }

    fn touch_pin(&self, run_hash: &str, pinned: bool, event: &str) -> Result<(), NotFoundError> {
        if self.registry.get(run_hash).is_none() {
            return Err(NotFoundError { run_hash: run_hash.to_string() });
        }
        self.registry.update(run_hash, |r| r.pinned = pinned);
        let ts = self.now_ms();
        if let Err(e) = self.audit.append(ts, event, Some(run_hash), Value::Null) {
            warn!(error = %e, run_hash = %run_hash, "audit log write failed for {}", event);
        }
        Ok(())
    }

    /// Move `.evicted/` content back to the run root (spec §6
    /// `rehydrate`).
    pub fn rehydrate(&self, run_hash: &str) -> Result<(), CoreError> {
        if self.registry.get(run_hash).is_none() {
            return Err(CoreError::NotFound(NotFoundError { run_hash: run_hash.to_string() }));
        }
        retention::rehydrate_run(&self.app_config, &self.registry, run_hash).map_err(CoreError::Io)?;
        let ts = self.now_ms();
        if let Err(e) = self.audit.append(ts, "REHYDRATE", Some(run_hash), Value::Null) {
            warn!(error = %e, run_hash = %run_hash, "audit log write failed for REHYDRATE");
        }
        Ok(())
    }

    /// Restore a demoted run (spec §6 `restore`). This engine only ever
    /// demotes into a local `.evicted/` directory (it does not yet ship
    /// cold-storage offload wired into the demote path itself — see
    /// `apply_retention` below), so restore always resolves to the local
    /// rehydrate path; the `{restored, noop}` contract still holds.
    pub fn restore(&self, run_hash: &str) -> Result<RestoreOutcome, CoreError> {
        if self.registry.get(run_hash).is_none() {
            return Err(CoreError::NotFound(NotFoundError { run_hash: run_hash.to_string() }));
        }
        let run_dir = self.app_config.run_dir(run_hash);
        let evicted = run_dir.join(artifacts::EVICTED_DIR);
        let noop = !evicted.is_dir();
        retention::rehydrate_run(&self.app_config, &self.registry, run_hash).map_err(CoreError::Io)?;
        let ts = self.now_ms();
        if let Err(e) = self.audit.append(
            ts,
            "RESTORE",
            Some(run_hash),
            Value::map().set("noop", noop).build(),
        ) {
            warn!(error = %e, run_hash = %run_hash, "audit log write failed for RESTORE");
        }
        Ok(RestoreOutcome { restored: !noop, noop })
    }

    pub fn plan_retention(&self) -> RetentionPlan {
        retention::plan_retention(&self.registry, &self.app_config, &RetentionConfig::from(&self.app_config))
    }

    /// Apply a plan (spec §6 `apply_retention`). If cold storage is
    /// configured, evicted content is additionally archived and a
    /// `cold_manifest.json` written alongside `manifest.json`; archival
    /// failures are logged and swallowed (spec §4.11 best-effort
    /// retention semantics) rather than undoing the already-applied local
    /// demotion.
    pub fn apply_retention(&self, plan: &RetentionPlan) -> Result<(), CoreError> {
        let ts = self.now_ms();
        retention::apply_retention(&self.app_config, &self.registry, plan, &self.audit, ts).map_err(CoreError::Io)?;

        if let Some(cold) = &self.cold_storage {
            for run_hash in &plan.demote {
                let run_dir = self.app_config.run_dir(run_hash);
                let evicted = run_dir.join(artifacts::EVICTED_DIR);
                if !evicted.is_dir() {
                    continue;
                }
                match cold.offload(&evicted, run_hash) {
                    Ok(key) => {
                        if let Err(e) = write_cold_manifest(&run_dir, &self.app_config, &evicted, run_hash, &key, ts) {
                            warn!(error = %e, run_hash = %run_hash, "cold manifest write failed");
                        }
                    }
                    Err(e) => warn!(error = %e, run_hash = %run_hash, "cold storage offload failed"),
                }
            }
        }
        Ok(())
    }

    pub fn diff_retention(&self, alt_config: &RetentionConfig) -> Vec<String> {
        let current = retention::plan_retention(&self.registry, &self.app_config, &RetentionConfig::from(&self.app_config));
        let alt = retention::plan_retention(&self.registry, &self.app_config, alt_config);
        retention::diff_retention(&current, &alt)
    }

    /// `hashes(run_hash)` (spec §6): derives `provenance_hash` on the fly
    /// from whatever subset of `{manifest_hash, metrics_hash,
    /// equity_curve_hash}` the record actually has.
    pub fn hashes(&self, run_hash: &str) -> Result<RunHashes, NotFoundError> {
        let record = self
            .registry
            .get(run_hash)
            .ok_or_else(|| NotFoundError { run_hash: run_hash.to_string() })?;
        let provenance_hash = if record.manifest_hash.is_some() || record.metrics_hash.is_some() || record.equity_curve_hash.is_some() {
            Some(canonical::provenance_hash(
                record.manifest_hash.as_deref(),
                record.metrics_hash.as_deref(),
                record.equity_curve_hash.as_deref(),
            ))
        } else {
            None
        };
        Ok(RunHashes {
            manifest_hash: record.manifest_hash,
            metrics_hash: record.metrics_hash,
            equity_curve_hash: record.equity_curve_hash,
            provenance_hash,
        })
    }
}

fn cold_storage_provider_name(kind: &config::ColdStorageProviderKind) -> &'static str {
    match kind {
        config::ColdStorageProviderKind::Local => "local",
        config::ColdStorageProviderKind::S3 => "s3",
        config::ColdStorageProviderKind::Gcs => "gcs",
    }
}

/// Write `cold_manifest.json` (spec §4.10 `ColdManifest`) alongside
/// `manifest.json` once an evicted run's content has been archived.
fn write_cold_manifest(
    run_dir: &std::path::Path,
    app_config: &config::AppConfig,
    evicted_dir: &std::path::Path,
    run_hash: &str,
    key: &str,
    created_at: i64,
) -> Result<(), errors::IoError> {
    let mut files = Vec::new();
    let mut bytes_total: u64 = 0;
    for entry in fs::read_dir(evicted_dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        bytes_total += meta.len();
        files.push(entry.file_name().to_string_lossy().to_string());
    }
    files.sort();
    let manifest = serde_json::json!({
        "provider": cold_storage_provider_name(&app_config.cold_storage_provider),
        "key": key,
        "run_hash": run_hash,
        "created_at": created_at,
        "files": files,
        "bytes": bytes_total,
        "count": files.len(),
        "restored_at": serde_json::Value::Null,
    });
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| errors::IoError { message: e.to_string() })?;
    fs::write(run_dir.join(artifacts::COLD_MANIFEST_FILE), bytes)?;
    Ok(())
}
