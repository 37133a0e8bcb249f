//! In-memory run registry (spec §3 `RunRecord`, §4.8). SQLite persistence
//! is an external adapter concern per spec §1 Non-goals/out-of-scope; the
//! core only needs the invariants a persistence driver must uphold, which
//! this in-memory map satisfies directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::orchestrator::events::EventRingBuffer;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Validating,
    Complete,
    Cancelled,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Validating => "VALIDATING",
            Self::Complete => "COMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionState {
    Full,
    Pinned,
    TopK,
    ManifestOnly,
}

impl RetentionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Pinned => "pinned",
            Self::TopK => "top_k",
            Self::ManifestOnly => "manifest-only",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PValues {
    pub perm: Option<f64>,
    pub bb: Option<f64>,
    pub mc: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub error_code: String,
    pub message: String,
    pub stack_hash: String,
}

/// Owned-by-the-registry run record (spec §3). `metrics_hash` and
/// `equity_curve_hash` are derived from canonically-rounded values, so
/// two runs sharing `run_hash` always share them (spec invariant).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_hash: String,
    pub created_at: i64,
    pub status: RunStatus,
    pub summary: BTreeMap<String, Value>,
    pub validation_summary: BTreeMap<String, Value>,
    pub validation_raw: BTreeMap<String, Value>,
    pub p_values: PValues,
    pub seed: Option<u64>,
    pub strategy_hash: Option<String>,
    pub metrics_hash: Option<String>,
    pub equity_curve_hash: Option<String>,
    pub manifest_hash: Option<String>,
    pub pinned: bool,
    pub retention_state: RetentionState,
    pub primary_metric_value: Option<f64>,
    pub strategy_name: Option<String>,
    pub error: Option<ErrorDetail>,
}

impl RunRecord {
    pub fn new_pending(run_hash: String, created_at: i64) -> Self {
        Self {
            run_hash,
            created_at,
            status: RunStatus::Pending,
            summary: BTreeMap::new(),
            validation_summary: BTreeMap::new(),
            validation_raw: BTreeMap::new(),
            p_values: PValues::default(),
            seed: None,
            strategy_hash: None,
            metrics_hash: None,
            equity_curve_hash: None,
            manifest_hash: None,
            pinned: false,
            retention_state: RetentionState::Full,
            primary_metric_value: None,
            strategy_name: None,
            error: None,
        }
    }
}

const DEFAULT_EVENT_RING_CAPACITY: usize = 256;

/// `run_hash -> record`, plus the per-run event buffer the registry owns
/// for the lifetime of the record (spec §9 "Event buffer ownership").
#[derive(Default)]
pub struct RunRegistry {
    records: RwLock<BTreeMap<String, RunRecord>>,
    buffers: RwLock<BTreeMap<String, Arc<RwLock<EventRingBuffer>>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_hash: &str) -> Option<RunRecord> {
        self.records.read().get(run_hash).cloned()
    }

    pub fn contains_cacheable(&self, run_hash: &str) -> bool {
        matches!(
            self.records.read().get(run_hash).map(|r| r.status),
            Some(RunStatus::Complete) | Some(RunStatus::Cancelled)
        )
    }

    pub fn insert(&self, record: RunRecord) {
        self.records.write().insert(record.run_hash.clone(), record);
    }

    pub fn update(&self, run_hash: &str, f: impl FnOnce(&mut RunRecord)) {
        if let Some(record) = self.records.write().get_mut(run_hash) {
            f(record);
        }
    }

    pub fn all(&self) -> Vec<RunRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Errored runs are not cached by default (spec §4.8 failure
    /// semantics) — re-submission with the same hash re-runs. Returns
    /// `true` if a cached (non-error) record already exists.
    pub fn has_cached(&self, run_hash: &str) -> bool {
        matches!(
            self.records.read().get(run_hash).map(|r| r.status),
            Some(s) if s != RunStatus::Error
        )
    }

    pub fn event_buffer(&self, run_hash: &str) -> Arc<RwLock<EventRingBuffer>> {
        self.buffers
            .write()
            .entry(run_hash.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(EventRingBuffer::new(DEFAULT_EVENT_RING_CAPACITY))))
            .clone()
    }

    pub fn remove_event_buffer(&self, run_hash: &str) {
        self.buffers.write().remove(run_hash);
    }
}
