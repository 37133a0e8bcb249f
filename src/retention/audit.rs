//! Append-only audit hash chain (spec §3/§4.10 `AuditRecord`).
//!
//! Each record's `hash` covers its own fields plus the previous record's
//! `hash`, so truncating or reordering the log is detectable by replaying
//! the chain. Rotation moves the current log to a gzip-compressed file
//! named by the rotation timestamp and writes an integrity snapshot
//! alongside it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde_json::json;

use crate::canonical::hash_canonical;
use crate::errors::IoError;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ts_ms: i64,
    pub event: String,
    pub run_hash: Option<String>,
    pub details: Value,
    pub prev_hash: Option<String>,
    pub hash: String,
}

fn record_canonical_value(
    ts_ms: i64,
    event: &str,
    run_hash: Option<&str>,
    details: &Value,
    prev_hash: Option<&str>,
) -> Value {
    Value::map()
        .set("ts_ms", ts_ms)
        .set("event", event)
        .set_opt("run_hash", run_hash.map(|s| s.to_string()))
        .set("details", details.clone())
        .set_opt("prev_hash", prev_hash.map(|s| s.to_string()))
        .build()
}

fn record_to_json(r: &AuditRecord) -> serde_json::Value {
    json!({
        "ts_ms": r.ts_ms,
        "event": r.event,
        "run_hash": r.run_hash,
        "details": crate::canonical::canonical_json(&r.details),
        "prev_hash": r.prev_hash,
        "hash": r.hash,
    })
}

/// Append-only, rotation-aware audit log. One instance per process; the
/// in-memory `last_hash` is the chain tip, persisted across rotations by
/// the integrity snapshot rather than re-read from disk on every append.
pub struct AuditLog {
    path: PathBuf,
    rotate_bytes: u64,
    state: Mutex<AuditState>,
}

struct AuditState {
    last_hash: Option<String>,
    record_count: u64,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, rotate_bytes: u64) -> Self {
        Self {
            path: path.into(),
            rotate_bytes: rotate_bytes.max(1),
            state: Mutex::new(AuditState { last_hash: None, record_count: 0 }),
        }
    }

    /// Append one record to the chain, rotating first if the log file is
    /// already at or past `rotate_bytes`.
    pub fn append(
        &self,
        ts_ms: i64,
        event: &str,
        run_hash: Option<&str>,
        details: Value,
    ) -> Result<AuditRecord, IoError> {
        self.maybe_rotate(ts_ms)?;

        let mut state = self.state.lock();
        let prev_hash = state.last_hash.clone();
        let canonical_value = record_canonical_value(ts_ms, event, run_hash, &details, prev_hash.as_deref());
        let hash = hash_canonical(&canonical_value);
        let record = AuditRecord {
            ts_ms,
            event: event.to_string(),
            run_hash: run_hash.map(|s| s.to_string()),
            details,
            prev_hash,
            hash: hash.clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(&record_to_json(&record)).map_err(|e| IoError { message: e.to_string() })?;
        line.push(b'\n');
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        f.write_all(&line)?;

        state.last_hash = Some(hash);
        state.record_count += 1;
        Ok(record)
    }

    fn maybe_rotate(&self, ts_ms: i64) -> Result<(), IoError> {
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size < self.rotate_bytes {
            return Ok(());
        }
        self.rotate(ts_ms)
    }

    /// Move the current log to `audit.log.<ts_ms>.gz` (gzip-compressed)
    /// and write `audit_integrity.json` recording the chain tip and
    /// record count at the moment of rotation, so a verifier can resume
    /// chain validation from the rotated file without re-reading it.
    pub fn rotate(&self, ts_ms: i64) -> Result<(), IoError> {
        if !self.path.is_file() {
            return Ok(());
        }
        let rotated_name = format!(
            "{}.{}.gz",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("audit.log"),
            ts_ms
        );
        let rotated_path = self.path.with_file_name(rotated_name);
        let contents = fs::read(&self.path)?;
        {
            let out = fs::File::create(&rotated_path)?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            encoder.write_all(&contents)?;
            encoder.finish()?;
        }
        fs::remove_file(&self.path)?;

        let state = self.state.lock();
        let integrity = json!({
            "rotated_at_ms": ts_ms,
            "rotated_file": rotated_path.file_name().and_then(|n| n.to_str()),
            "chain_tip": state.last_hash,
            "record_count": state.record_count,
        });
        let integrity_path = self.path.with_file_name("audit_integrity.json");
        fs::write(&integrity_path, serde_json::to_vec_pretty(&integrity).map_err(|e| IoError { message: e.to_string() })?)?;
        Ok(())
    }
}

/// Replay a plain-text (non-rotated) audit log and verify every record's
/// `hash` matches its recomputed canonical digest and that `prev_hash`
/// chains correctly. Returns the index of the first broken record, if
/// any.
pub fn verify_chain(path: &Path) -> Result<Option<usize>, IoError> {
    let contents = fs::read_to_string(path)?;
    let mut prev: Option<String> = None;
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: serde_json::Value =
            serde_json::from_str(line).map_err(|e| IoError { message: e.to_string() })?;
        let ts_ms = parsed["ts_ms"].as_i64().unwrap_or(0);
        let event = parsed["event"].as_str().unwrap_or("").to_string();
        let run_hash = parsed["run_hash"].as_str().map(|s| s.to_string());
        let recorded_prev = parsed["prev_hash"].as_str().map(|s| s.to_string());
        let recorded_hash = parsed["hash"].as_str().unwrap_or("").to_string();
        if recorded_prev != prev {
            return Ok(Some(idx));
        }
        let details_raw = parsed["details"].as_str().unwrap_or("null");
        let details_json: serde_json::Value =
            serde_json::from_str(details_raw).unwrap_or(serde_json::Value::Null);
        let details = crate::value::from_json(&details_json, 17);
        let canonical_value = record_canonical_value(ts_ms, &event, run_hash.as_deref(), &details, recorded_prev.as_deref());
        let recomputed = hash_canonical(&canonical_value);
        if recomputed != recorded_hash {
            return Ok(Some(idx));
        }
        prev = Some(recorded_hash);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_records_chain_prev_hash_to_prior_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path().join("audit.log"), 1_000_000);
        let r1 = log.append(0, "run_submitted", Some("h1"), Value::Null).unwrap();
        let r2 = log.append(1, "run_complete", Some("h1"), Value::Null).unwrap();
        assert!(r1.prev_hash.is_none());
        assert_eq!(r2.prev_hash, Some(r1.hash));
    }

    #[test]
    fn verify_chain_accepts_an_untouched_log() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::new(&path, 1_000_000);
        log.append(0, "a", None, Value::Null).unwrap();
        log.append(1, "b", None, Value::Null).unwrap();
        log.append(2, "c", None, Value::Null).unwrap();
        assert_eq!(verify_chain(&path).unwrap(), None);
    }

    #[test]
    fn rotate_compresses_the_log_and_writes_an_integrity_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::new(&path, 1_000_000);
        log.append(0, "a", None, Value::Null).unwrap();
        log.rotate(42).unwrap();
        assert!(!path.is_file());
        let rotated = tmp.path().join("audit.log.42.gz");
        assert!(rotated.is_file());
        let integrity = tmp.path().join("audit_integrity.json");
        assert!(integrity.is_file());
    }
}
