//! Retention planning & demotion (spec §4.10) plus cold storage and the
//! audit hash-chain log, which both hang off the same lifecycle.

pub mod audit;
pub mod cold_storage;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::artifacts::EVICTED_DIR;
use crate::config::AppConfig;
use crate::errors::IoError;
use crate::registry::{RetentionState, RunRecord, RunRegistry};
use crate::value::Value;
use audit::AuditLog;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub keep_last: usize,
    pub top_k_per_strategy: usize,
    pub max_full_bytes: Option<u64>,
}

impl From<&AppConfig> for RetentionConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            keep_last: cfg.retention_keep_last,
            top_k_per_strategy: cfg.retention_top_k_per_strategy,
            max_full_bytes: cfg.retention_max_full_bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    pub pinned: Vec<String>,
    pub keep_full: Vec<String>,
    pub top_k: Vec<String>,
    pub demote: Vec<String>,
}

/// Sum of file sizes under `path`, recursively. Missing directories
/// contribute zero rather than erroring — a run whose artifacts were
/// already evicted or never materialized simply doesn't count against the
/// budget.
fn dir_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = fs::read_dir(path) else { return 0 };
    for entry in entries.flatten() {
        let p = entry.path();
        if p.is_dir() {
            total += dir_size(&p);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Decide the retention fate of every COMPLETE run in the registry (spec
/// §4.10). Only completed runs are considered: PENDING/RUNNING/ERROR runs
/// have no artifacts worth retaining decisions over.
///
/// When `config.max_full_bytes` is set, a final budget pass iterates the
/// non-pinned runs slated to stay `full`/`top_k`, oldest first, demoting
/// them until the on-disk total fits the budget. This does not re-run
/// top-k selection afterward (spec Open Question #4, retained as-is).
pub fn plan_retention(registry: &RunRegistry, app_config: &AppConfig, config: &RetentionConfig) -> RetentionPlan {
    let mut records: Vec<RunRecord> = registry
        .all()
        .into_iter()
        .filter(|r| r.status.as_str() == "COMPLETE")
        .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut plan = RetentionPlan::default();
    let mut decided: BTreeMap<String, ()> = BTreeMap::new();

    for r in &records {
        if r.pinned {
            plan.pinned.push(r.run_hash.clone());
            decided.insert(r.run_hash.clone(), ());
        }
    }

    for r in records.iter().take(config.keep_last) {
        if decided.contains_key(&r.run_hash) {
            continue;
        }
        plan.keep_full.push(r.run_hash.clone());
        decided.insert(r.run_hash.clone(), ());
    }

    let mut by_strategy: BTreeMap<String, Vec<&RunRecord>> = BTreeMap::new();
    for r in &records {
        let key = r.strategy_name.clone().unwrap_or_default();
        by_strategy.entry(key).or_default().push(r);
    }
    for (_strategy, mut group) in by_strategy {
        group.sort_by(|a, b| {
            b.primary_metric_value
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&a.primary_metric_value.unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for r in group.into_iter().take(config.top_k_per_strategy) {
            if decided.contains_key(&r.run_hash) {
                continue;
            }
            plan.top_k.push(r.run_hash.clone());
            decided.insert(r.run_hash.clone(), ());
        }
    }

    for r in &records {
        if !decided.contains_key(&r.run_hash) {
            plan.demote.push(r.run_hash.clone());
        }
    }

    if let Some(budget) = config.max_full_bytes {
        let mut kept: Vec<&RunRecord> = records
            .iter()
            .filter(|r| plan.keep_full.contains(&r.run_hash) || plan.top_k.contains(&r.run_hash))
            .collect();
        kept.sort_by_key(|r| r.created_at);
        let mut total: u64 = kept.iter().map(|r| dir_size(&app_config.run_dir(&r.run_hash))).sum();
        for r in kept {
            if total <= budget {
                break;
            }
            let size = dir_size(&app_config.run_dir(&r.run_hash));
            plan.keep_full.retain(|h| h != &r.run_hash);
            plan.top_k.retain(|h| h != &r.run_hash);
            plan.demote.push(r.run_hash.clone());
            total = total.saturating_sub(size);
        }
    }

    plan
}

/// Diff two plans (spec §6 `diff_retention`): run hashes whose fate
/// changed between `before` and `after`.
pub fn diff_retention(before: &RetentionPlan, after: &RetentionPlan) -> Vec<String> {
    let before_map = plan_states(before);
    let after_map = plan_states(after);
    let mut changed: Vec<String> = after_map
        .iter()
        .filter(|(hash, state)| before_map.get(*hash) != Some(*state))
        .map(|(hash, _)| hash.clone())
        .collect();
    changed.sort();
    changed.dedup();
    changed
}

fn plan_states(plan: &RetentionPlan) -> BTreeMap<String, &'static str> {
    let mut m = BTreeMap::new();
    for h in &plan.pinned {
        m.insert(h.clone(), "pinned");
    }
    for h in &plan.keep_full {
        m.entry(h.clone()).or_insert("full");
    }
    for h in &plan.top_k {
        m.entry(h.clone()).or_insert("top_k");
    }
    for h in &plan.demote {
        m.entry(h.clone()).or_insert("manifest-only");
    }
    m
}

/// Demote `run_hash` to manifest-only: move every content file except
/// `manifest.json` into `.evicted/` under the run directory (spec
/// §4.9/§4.10 — only the manifest itself stays at the run root without
/// rehydration; invariant #12 permits nothing else).
fn demote_run_dir(run_dir: &Path) -> Result<(), IoError> {
    let evicted = run_dir.join(EVICTED_DIR);
    fs::create_dir_all(&evicted)?;
    for entry in crate::artifacts::CONTENT_FILES {
        if *entry == "manifest.json" {
            continue;
        }
        let src = run_dir.join(entry);
        if src.is_file() {
            fs::rename(&src, evicted.join(entry))?;
        }
    }
    Ok(())
}

/// Restore a previously-demoted run by moving its `.evicted/` contents
/// back to the run root (spec §6 `rehydrate`/`restore`).
fn rehydrate_run_dir(run_dir: &Path) -> Result<(), IoError> {
    let evicted = run_dir.join(EVICTED_DIR);
    if !evicted.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(&evicted)? {
        let entry = entry?;
        let name = entry.file_name();
        fs::rename(entry.path(), run_dir.join(&name))?;
    }
    let _ = fs::remove_dir(&evicted);
    Ok(())
}

/// Rehydrate a single run by hash (spec §6 `rehydrate`): restore any
/// `.evicted/` content and return its registry-tracked retention_state to
/// whatever it should be absent a fresh `plan_retention`/`apply_retention`
/// pass (pinned runs stay pinned, everything else goes back to full).
pub fn rehydrate_run(app_config: &AppConfig, registry: &RunRegistry, run_hash: &str) -> Result<(), IoError> {
    let run_dir = app_config.run_dir(run_hash);
    if !run_dir.is_dir() {
        return Ok(());
    }
    rehydrate_run_dir(&run_dir)?;
    registry.update(run_hash, |r| {
        r.retention_state = if r.pinned { RetentionState::Pinned } else { RetentionState::Full };
    });
    Ok(())
}

/// Apply a computed plan: physically demote every run in `plan.demote`
/// that isn't already manifest-only, and make sure everything else is
/// rehydrated (spec §4.10). Updates `registry`'s retention_state on
/// every touched record. Retention operations are best-effort per spec
/// §4.11: an audit-log write failure is logged and swallowed rather than
/// rolling back the (already-applied) filesystem change.
pub fn apply_retention(
    app_config: &AppConfig,
    registry: &RunRegistry,
    plan: &RetentionPlan,
    audit: &AuditLog,
    ts_ms: i64,
) -> Result<(), IoError> {
    if let Err(e) = audit.append(ts_ms, "RETENTION_APPLY", None, Value::Null) {
        tracing::warn!(error = %e, "audit log write failed for RETENTION_APPLY");
    }
    for hash in &plan.pinned {
        apply_state(app_config, registry, hash, RetentionState::Pinned, false, audit, ts_ms)?;
    }
    for hash in &plan.keep_full {
        apply_state(app_config, registry, hash, RetentionState::Full, false, audit, ts_ms)?;
    }
    for hash in &plan.top_k {
        apply_state(app_config, registry, hash, RetentionState::TopK, false, audit, ts_ms)?;
    }
    for hash in &plan.demote {
        apply_state(app_config, registry, hash, RetentionState::ManifestOnly, true, audit, ts_ms)?;
    }
    Ok(())
}

fn apply_state(
    app_config: &AppConfig,
    registry: &RunRegistry,
    run_hash: &str,
    state: RetentionState,
    demote: bool,
    audit: &AuditLog,
    ts_ms: i64,
) -> Result<(), IoError> {
    let run_dir = app_config.run_dir(run_hash);
    if !run_dir.is_dir() {
        return Ok(());
    }
    let event = if demote {
        demote_run_dir(&run_dir)?;
        "DEMOTE"
    } else {
        rehydrate_run_dir(&run_dir)?;
        "REHYDRATE"
    };
    registry.update(run_hash, |r| r.retention_state = state);
    if let Err(e) = audit.append(ts_ms, event, Some(run_hash), Value::Null) {
        tracing::warn!(error = %e, run_hash = %run_hash, "audit log write failed for {}", event);
    }
    info!(run_hash = %run_hash, state = state.as_str(), "applied retention state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RunRecord;

    fn completed(run_hash: &str, created_at: i64, strategy: &str, metric: f64, pinned: bool) -> RunRecord {
        let mut r = RunRecord::new_pending(run_hash.to_string(), created_at);
        r.status = crate::registry::RunStatus::Complete;
        r.strategy_name = Some(strategy.to_string());
        r.primary_metric_value = Some(metric);
        r.pinned = pinned;
        r
    }

    fn test_app_config(root: &Path) -> AppConfig {
        AppConfig {
            artifact_root: root.to_path_buf(),
            cold_storage_enabled: false,
            cold_storage_provider: crate::config::ColdStorageProviderKind::Local,
            cold_storage_bucket: None,
            cold_storage_prefix: String::new(),
            audit_rotate_bytes: 1_000_000,
            validation_caution_pvalue: None,
            validation_caution_metrics: None,
            log_level: "error".to_string(),
            canonical_float_precision: 12,
            retention_keep_last: 0,
            retention_top_k_per_strategy: 0,
            retention_max_full_bytes: None,
        }
    }

    #[test]
    fn keep_last_retains_the_most_recent_n_unpinned_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let registry = RunRegistry::new();
        for i in 0..5 {
            registry.insert(completed(&format!("h{i}"), i, "dual_sma", 1.0, false));
        }
        let config = RetentionConfig { keep_last: 2, top_k_per_strategy: 0, max_full_bytes: None };
        let plan = plan_retention(&registry, &app_config, &config);
        assert_eq!(plan.keep_full.len(), 2);
        assert!(plan.keep_full.contains(&"h4".to_string()));
        assert!(plan.keep_full.contains(&"h3".to_string()));
    }

    #[test]
    fn pinned_runs_are_never_demoted_regardless_of_keep_last() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let registry = RunRegistry::new();
        registry.insert(completed("old_pinned", 0, "dual_sma", 1.0, true));
        for i in 1..10 {
            registry.insert(completed(&format!("h{i}"), i, "dual_sma", 1.0, false));
        }
        let config = RetentionConfig { keep_last: 2, top_k_per_strategy: 0, max_full_bytes: None };
        let plan = plan_retention(&registry, &app_config, &config);
        assert!(plan.pinned.contains(&"old_pinned".to_string()));
        assert!(!plan.demote.contains(&"old_pinned".to_string()));
    }

    #[test]
    fn top_k_keeps_best_metric_runs_per_strategy_even_if_old() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let registry = RunRegistry::new();
        registry.insert(completed("best_old", 0, "dual_sma", 99.0, false));
        for i in 1..10 {
            registry.insert(completed(&format!("h{i}"), i, "dual_sma", 1.0, false));
        }
        let config = RetentionConfig { keep_last: 2, top_k_per_strategy: 1, max_full_bytes: None };
        let plan = plan_retention(&registry, &app_config, &config);
        assert!(plan.top_k.contains(&"best_old".to_string()));
        assert!(!plan.demote.contains(&"best_old".to_string()));
    }

    #[test]
    fn unreferenced_runs_are_demoted() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let registry = RunRegistry::new();
        registry.insert(completed("stale", 0, "dual_sma", 0.0, false));
        for i in 1..10 {
            registry.insert(completed(&format!("h{i}"), i, "dual_sma", 5.0, false));
        }
        let config = RetentionConfig { keep_last: 2, top_k_per_strategy: 1, max_full_bytes: None };
        let plan = plan_retention(&registry, &app_config, &config);
        assert!(plan.demote.contains(&"stale".to_string()));
    }

    #[test]
    fn max_full_bytes_demotes_oldest_kept_runs_first_until_under_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let registry = RunRegistry::new();
        for i in 0..3 {
            let run_hash = format!("h{i}");
            registry.insert(completed(&run_hash, i, "dual_sma", 1.0, false));
            let run_dir = app_config.run_dir(&run_hash);
            fs::create_dir_all(&run_dir).unwrap();
            fs::write(run_dir.join("equity.parquet"), vec![0u8; 100]).unwrap();
        }
        let config = RetentionConfig { keep_last: 3, top_k_per_strategy: 0, max_full_bytes: Some(150) };
        let plan = plan_retention(&registry, &app_config, &config);
        assert!(plan.demote.contains(&"h0".to_string()));
        assert!(plan.keep_full.contains(&"h2".to_string()));
    }

    #[test]
    fn apply_retention_moves_heavy_artifacts_into_evicted_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let app_config = test_app_config(tmp.path());
        let run_dir = app_config.run_dir("h0");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("manifest.json"), b"{}").unwrap();
        fs::write(run_dir.join("equity.parquet"), b"data").unwrap();

        let registry = RunRegistry::new();
        registry.insert(completed("h0", 0, "dual_sma", 1.0, false));

        let config = RetentionConfig { keep_last: 0, top_k_per_strategy: 0, max_full_bytes: None };
        let plan = plan_retention(&registry, &app_config, &config);
        assert!(plan.demote.contains(&"h0".to_string()));
        let audit = AuditLog::new(tmp.path().join("audit.log"), 1_000_000);
        apply_retention(&app_config, &registry, &plan, &audit, 0).unwrap();

        assert!(!run_dir.join("equity.parquet").is_file());
        assert!(run_dir.join(EVICTED_DIR).join("equity.parquet").is_file());
        assert!(run_dir.join("manifest.json").is_file());
        assert_eq!(registry.get("h0").unwrap().retention_state.as_str(), "manifest-only");
    }
}
