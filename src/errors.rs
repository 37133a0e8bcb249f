//! Error taxonomy for the deterministic run pipeline.
//!
//! Mirrors the teacher's hand-rolled error style (`backtest_v2::artifact_store::ArtifactStoreError`):
//! plain enums, manual `Display`/`Error` impls, `From` conversions at the
//! boundary. No `thiserror` — the teacher never reaches for it and neither
//! do we.

use std::fmt;

/// Submission-time validation failure. No run is created.
#[derive(Debug, Clone)]
pub enum ConfigError {
    MissingField(String),
    InvalidRange { field: String, detail: String },
    CrossField(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::InvalidRange { field, detail } => {
                write!(f, "invalid value for {field}: {detail}")
            }
            Self::CrossField(detail) => write!(f, "cross-field validation failed: {detail}"),
        }
    }
}
impl std::error::Error for ConfigError {}

/// Dataset ingestion failures. Fatal for the run.
#[derive(Debug, Clone)]
pub enum DatasetError {
    MissingFile(String),
    UnknownCalendar(String),
    UnrecognizedSchema(Vec<String>),
    IncompleteAdjustmentFactors,
    Io(String),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile(p) => write!(f, "dataset file not found: {p}"),
            Self::UnknownCalendar(id) => write!(f, "unknown calendar: {id}"),
            Self::UnrecognizedSchema(missing) => {
                write!(f, "unrecognized CSV schema, missing columns: {missing:?}")
            }
            Self::IncompleteAdjustmentFactors => {
                write!(f, "adjustment policy requires full factor coverage")
            }
            Self::Io(msg) => write!(f, "dataset I/O error: {msg}"),
        }
    }
}
impl std::error::Error for DatasetError {}

impl From<std::io::Error> for DatasetError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
impl From<csv::Error> for DatasetError {
    fn from(e: csv::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// A feature or strategy computation used information from a future row.
#[derive(Debug, Clone)]
pub struct CausalityViolation {
    pub feature_name: String,
    pub offset: i64,
}

impl fmt::Display for CausalityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "causality violation in '{}' at offset {}",
            self.feature_name, self.offset
        )
    }
}
impl std::error::Error for CausalityViolation {}

/// Unexpected failure within a pipeline stage. Recorded on the run as
/// `{error_code, message, stack_hash}` per spec §4.8.
#[derive(Debug, Clone)]
pub struct ComputationError {
    pub error_code: String,
    pub message: String,
}

impl ComputationError {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Stable digest of the error identity, stored alongside the message
    /// so repeated failures of the same kind are comparable without
    /// diffing free-text messages.
    pub fn stack_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.error_code.as_bytes());
        hasher.update(b"|");
        hasher.update(self.message.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code, self.message)
    }
}
impl std::error::Error for ComputationError {}

/// Artifact/cache/cold-storage/audit write failure. Retried once by the
/// caller, then reported; on failure the artifact set is considered
/// incomplete (manifest not written).
#[derive(Debug, Clone)]
pub struct IoError {
    pub message: String,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I/O error: {}", self.message)
    }
}
impl std::error::Error for IoError {}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Run hash unknown to the registry.
#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub run_hash: String,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run not found: {}", self.run_hash)
    }
}
impl std::error::Error for NotFoundError {}

/// Reserved for adapter use (HTTP rate limiting etc.); the core never
/// raises this itself but the variant exists so adapters can convert into
/// a shared error type.
#[derive(Debug, Clone)]
pub struct RateLimited {
    pub retry_after_ms: Option<u64>,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limited")
    }
}
impl std::error::Error for RateLimited {}

/// Unifying error for operations that cross stage boundaries.
#[derive(Debug, Clone)]
pub enum CoreError {
    Config(ConfigError),
    Dataset(DatasetError),
    Causality(CausalityViolation),
    Computation(ComputationError),
    Io(IoError),
    NotFound(NotFoundError),
    RateLimited(RateLimited),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Dataset(e) => write!(f, "{e}"),
            Self::Causality(e) => write!(f, "{e}"),
            Self::Computation(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "{e}"),
            Self::NotFound(e) => write!(f, "{e}"),
            Self::RateLimited(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for CoreError {}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
impl From<DatasetError> for CoreError {
    fn from(e: DatasetError) -> Self {
        Self::Dataset(e)
    }
}
impl From<CausalityViolation> for CoreError {
    fn from(e: CausalityViolation) -> Self {
        Self::Causality(e)
    }
}
impl From<ComputationError> for CoreError {
    fn from(e: ComputationError) -> Self {
        Self::Computation(e)
    }
}
impl From<IoError> for CoreError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}
impl From<NotFoundError> for CoreError {
    fn from(e: NotFoundError) -> Self {
        Self::NotFound(e)
    }
}
