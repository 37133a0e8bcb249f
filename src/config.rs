//! Environment-variable configuration (spec §6).
//!
//! No config-file crate: variables are read with `std::env::var` and given
//! explicit defaults, the same way the teacher's `main.rs` resolves
//! `DB_PATH`, `INITIAL_BANKROLL`, etc.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum ColdStorageProviderKind {
    Local,
    S3,
    Gcs,
}

impl ColdStorageProviderKind {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Self::S3,
            "gcs" => Self::Gcs,
            _ => Self::Local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub artifact_root: PathBuf,
    pub cold_storage_enabled: bool,
    pub cold_storage_provider: ColdStorageProviderKind,
    pub cold_storage_bucket: Option<String>,
    pub cold_storage_prefix: String,
    pub audit_rotate_bytes: u64,
    pub validation_caution_pvalue: Option<f64>,
    pub validation_caution_metrics: Option<f64>,
    pub log_level: String,
    pub canonical_float_precision: u32,
    pub retention_keep_last: usize,
    pub retention_top_k_per_strategy: usize,
    pub retention_max_full_bytes: Option<u64>,
}

const DEFAULT_AUDIT_ROTATE_BYTES: u64 = 1_000_000;
const MAX_AUDIT_ROTATE_BYTES: u64 = 100_000_000;

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            artifact_root: env::var("ALPHAFORGEB_ARTIFACT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./artifacts")),
            cold_storage_enabled: env::var("AF_COLD_STORAGE_ENABLED")
                .map(|v| v == "1")
                .unwrap_or(false),
            cold_storage_provider: env::var("AF_COLD_STORAGE_PROVIDER")
                .map(|v| ColdStorageProviderKind::parse(&v))
                .unwrap_or(ColdStorageProviderKind::Local),
            cold_storage_bucket: env::var("AF_COLD_STORAGE_BUCKET").ok(),
            cold_storage_prefix: env::var("AF_COLD_STORAGE_PREFIX").unwrap_or_default(),
            audit_rotate_bytes: env::var("AF_AUDIT_ROTATE_BYTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .map(|v| (v as u64).min(MAX_AUDIT_ROTATE_BYTES))
                .unwrap_or(DEFAULT_AUDIT_ROTATE_BYTES),
            validation_caution_pvalue: env::var("AF_VALIDATION_CAUTION_PVALUE")
                .ok()
                .and_then(|v| v.parse::<f64>().ok()),
            validation_caution_metrics: env::var("AF_VALIDATION_CAUTION_METRICS")
                .ok()
                .and_then(|v| v.parse::<f64>().ok()),
            log_level: env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            canonical_float_precision: env::var("APP_CANONICAL_FLOAT_PRECISION")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(12),
            retention_keep_last: env::var("APP_RETENTION_KEEP_LAST")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(50),
            retention_top_k_per_strategy: env::var("APP_RETENTION_TOP_K_PER_STRATEGY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(5),
            retention_max_full_bytes: env::var("APP_RETENTION_MAX_FULL_BYTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok()),
        }
    }

    pub fn run_dir(&self, run_hash: &str) -> PathBuf {
        self.artifact_root.join(run_hash)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Initialize the global `tracing` subscriber. Idempotent-enough for tests
/// that call it more than once (errors from double-init are ignored), the
/// same posture as the teacher's `init_tracing`.
pub fn init_tracing(cfg: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("alphaforge_brain={}", cfg.log_level).into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Avoid bleeding env vars from a concurrently-running test into this one.
        let cfg = AppConfig {
            artifact_root: PathBuf::from("./artifacts"),
            cold_storage_enabled: false,
            cold_storage_provider: ColdStorageProviderKind::Local,
            cold_storage_bucket: None,
            cold_storage_prefix: String::new(),
            audit_rotate_bytes: DEFAULT_AUDIT_ROTATE_BYTES,
            validation_caution_pvalue: None,
            validation_caution_metrics: None,
            log_level: "info".to_string(),
            canonical_float_precision: 12,
            retention_keep_last: 50,
            retention_top_k_per_strategy: 5,
            retention_max_full_bytes: None,
        };
        assert_eq!(cfg.audit_rotate_bytes, 1_000_000);
        assert_eq!(cfg.canonical_float_precision, 12);
        assert_eq!(cfg.retention_keep_last, 50);
    }
}
