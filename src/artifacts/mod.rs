//! Artifact writer & manifest chain (spec §4.9).
//!
//! Writes `summary.json`, `metrics.json`, `validation.json`,
//! `validation_detail.json`, `equity.parquet`, `trades.parquet`, an
//! optional `plots.png`, and finally `manifest.json` under
//! `artifact_root/<run_hash>/`. The manifest chain (`chain_prev`) is a
//! process-local pointer to the previously-written manifest hash.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use serde_json::json;
use tracing::info;

use crate::canonical::{hash_canonical, sha256_hex};
use crate::errors::IoError;
use crate::execution::{ExecutionResult, Fill, PositionSnapshot};
use crate::value::Value;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const COLD_MANIFEST_FILE: &str = "cold_manifest.json";
pub const EVICTED_DIR: &str = ".evicted";

/// Whitelisted content files (spec §4.9's "artifact index... filters to
/// a whitelist"). `.evicted` and `cold_manifest.json` are excluded.
pub const CONTENT_FILES: &[&str] = &[
    "summary.json",
    "metrics.json",
    "validation.json",
    "validation_detail.json",
    "equity.parquet",
    "trades.parquet",
    "plots.png",
];

#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub name: String,
    pub kind: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactManifest {
    pub entries: Vec<ManifestEntry>,
    pub chain_prev: Option<String>,
    pub data_hash: Option<String>,
    pub calendar_id: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub manifest_hash: String,
}

/// Canonical `Value` form of the manifest — only the hash-participating
/// fields (spec §6 "Manifest canonical schema"): `manifest_hash` itself
/// and other runtime-only fields are written to disk but excluded here.
fn manifest_canonical_value(
    entries: &[ManifestEntry],
    chain_prev: Option<&str>,
    data_hash: Option<&str>,
    calendar_id: Option<&str>,
    symbol: Option<&str>,
    timeframe: Option<&str>,
) -> Value {
    let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let entry_values: Vec<Value> = sorted
        .iter()
        .map(|e| {
            Value::map()
                .set("name", e.name.clone())
                .set("kind", e.kind.clone())
                .set("sha256", e.sha256.clone())
                .set("bytes", e.bytes as i64)
                .build()
        })
        .collect();
    Value::map()
        .set("entries", Value::List(entry_values))
        .set_opt("chain_prev", chain_prev.map(|s| s.to_string()))
        .set_opt("data_hash", data_hash.map(|s| s.to_string()))
        .set_opt("calendar_id", calendar_id.map(|s| s.to_string()))
        .set_opt("symbol", symbol.map(|s| s.to_string()))
        .set_opt("timeframe", timeframe.map(|s| s.to_string()))
        .build()
}

/// Process-local chain of finalized manifest hashes (spec §4.9,
/// §5 "Ordering guarantees" — chain_prev is process-local, not
/// cross-process).
#[derive(Default)]
pub struct ManifestChain {
    last_hash: Mutex<Option<String>>,
}

impl ManifestChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_prev(&self) -> Option<String> {
        self.last_hash.lock().unwrap().clone()
    }

    fn advance(&self, manifest_hash: String) {
        *self.last_hash.lock().unwrap() = Some(manifest_hash);
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(u64, String), IoError> {
    let bytes = serde_json::to_vec(value).map_err(|e| IoError { message: e.to_string() })?;
    fs::write(path, &bytes)?;
    Ok((bytes.len() as u64, sha256_hex(&bytes)))
}

fn write_equity_parquet(path: &Path, positions: &[PositionSnapshot]) -> Result<(u64, String), IoError> {
    let schema = std::sync::Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("position", DataType::Float64, false),
        Field::new("cash", DataType::Float64, false),
        Field::new("equity", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            std::sync::Arc::new(Int64Array::from(positions.iter().map(|p| p.timestamp).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(positions.iter().map(|p| p.position).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(positions.iter().map(|p| p.cash).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(positions.iter().map(|p| p.equity).collect::<Vec<_>>())),
        ],
    )
    .map_err(|e| IoError { message: e.to_string() })?;
    write_parquet_file(path, batch)
}

fn write_trades_parquet(path: &Path, fills: &[Fill]) -> Result<(u64, String), IoError> {
    let schema = std::sync::Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("side", DataType::Int64, false),
        Field::new("qty", DataType::Float64, false),
        Field::new("price", DataType::Float64, false),
        Field::new("cost_basis", DataType::Float64, false),
        Field::new("cash_after", DataType::Float64, false),
        Field::new("position_after", DataType::Float64, false),
        Field::new("synthetic", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            std::sync::Arc::new(Int64Array::from(fills.iter().map(|f| f.timestamp).collect::<Vec<_>>())),
            std::sync::Arc::new(Int64Array::from(fills.iter().map(|f| f.side).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(fills.iter().map(|f| f.qty).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(fills.iter().map(|f| f.price).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(fills.iter().map(|f| f.cost_basis).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(fills.iter().map(|f| f.cash_after).collect::<Vec<_>>())),
            std::sync::Arc::new(Float64Array::from(fills.iter().map(|f| f.position_after).collect::<Vec<_>>())),
            std::sync::Arc::new(Int64Array::from(
                fills.iter().map(|f| if f.synthetic { 1i64 } else { 0 }).collect::<Vec<_>>(),
            )),
        ],
    )
    .map_err(|e| IoError { message: e.to_string() })?;
    write_parquet_file(path, batch)
}

fn write_parquet_file(path: &Path, batch: RecordBatch) -> Result<(u64, String), IoError> {
    let tmp_path = path.with_extension("parquet.tmp");
    {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
            .map_err(|e| IoError { message: e.to_string() })?;
        writer.write(&batch).map_err(|e| IoError { message: e.to_string() })?;
        writer.close().map_err(|e| IoError { message: e.to_string() })?;
    }
    fs::rename(&tmp_path, path)?;
    let bytes = fs::metadata(path)?.len();
    let content = fs::read(path)?;
    Ok((bytes, sha256_hex(&content)))
}

/// Everything the writer needs beyond the execution result: precomputed
/// summary/metrics/validation JSON blobs so this module stays agnostic of
/// `orchestrator`'s specific stage types.
pub struct ArtifactInputs<'a> {
    pub summary: &'a serde_json::Value,
    pub metrics: &'a serde_json::Value,
    pub validation: &'a serde_json::Value,
    pub validation_detail: &'a serde_json::Value,
    pub execution: &'a ExecutionResult,
    pub data_hash: Option<String>,
    pub calendar_id: Option<String>,
    pub symbol: String,
    pub timeframe: String,
}

/// Write every content file then the manifest, returning the finalized
/// manifest (spec §4.9). `run_dir` must already exist.
pub fn write_run_artifacts(
    run_dir: &Path,
    inputs: &ArtifactInputs,
    chain: &ManifestChain,
) -> Result<ArtifactManifest, IoError> {
    fs::create_dir_all(run_dir)?;

    let mut entries = Vec::new();

    let (bytes, sha) = write_json(&run_dir.join("summary.json"), inputs.summary)?;
    entries.push(ManifestEntry { name: "summary.json".to_string(), kind: "json".to_string(), sha256: sha, bytes });

    let (bytes, sha) = write_json(&run_dir.join("metrics.json"), inputs.metrics)?;
    entries.push(ManifestEntry { name: "metrics.json".to_string(), kind: "json".to_string(), sha256: sha, bytes });

    let (bytes, sha) = write_json(&run_dir.join("validation.json"), inputs.validation)?;
    entries.push(ManifestEntry { name: "validation.json".to_string(), kind: "json".to_string(), sha256: sha, bytes });

    let (bytes, sha) = write_json(&run_dir.join("validation_detail.json"), inputs.validation_detail)?;
    entries.push(ManifestEntry {
        name: "validation_detail.json".to_string(),
        kind: "json".to_string(),
        sha256: sha,
        bytes,
    });

    let (bytes, sha) = write_equity_parquet(&run_dir.join("equity.parquet"), &inputs.execution.positions)?;
    entries.push(ManifestEntry { name: "equity.parquet".to_string(), kind: "parquet".to_string(), sha256: sha, bytes });

    let (bytes, sha) = write_trades_parquet(&run_dir.join("trades.parquet"), &inputs.execution.fills)?;
    entries.push(ManifestEntry { name: "trades.parquet".to_string(), kind: "parquet".to_string(), sha256: sha, bytes });

    let chain_prev = chain.take_prev();
    let canonical_value = manifest_canonical_value(
        &entries,
        chain_prev.as_deref(),
        inputs.data_hash.as_deref(),
        inputs.calendar_id.as_deref(),
        Some(&inputs.symbol),
        Some(&inputs.timeframe),
    );
    let manifest_hash = hash_canonical(&canonical_value);

    let mut sorted_entries = entries.clone();
    sorted_entries.sort_by(|a, b| a.name.cmp(&b.name));
    let manifest_json = json!({
        "entries": sorted_entries.iter().map(|e| json!({
            "name": e.name, "kind": e.kind, "sha256": e.sha256, "bytes": e.bytes,
        })).collect::<Vec<_>>(),
        "chain_prev": chain_prev,
        "data_hash": inputs.data_hash,
        "calendar_id": inputs.calendar_id,
        "symbol": inputs.symbol,
        "timeframe": inputs.timeframe,
        "manifest_hash": manifest_hash,
    });
    write_json(&run_dir.join(MANIFEST_FILE), &manifest_json)?;

    chain.advance(manifest_hash.clone());
    info!(run_dir = %run_dir.display(), manifest_hash = %manifest_hash, "wrote run manifest");

    Ok(ArtifactManifest {
        entries: sorted_entries,
        chain_prev,
        data_hash: inputs.data_hash.clone(),
        calendar_id: inputs.calendar_id.clone(),
        symbol: Some(inputs.symbol.clone()),
        timeframe: Some(inputs.timeframe.clone()),
        manifest_hash,
    })
}

/// Files present at the run root, filtered to the content whitelist and
/// excluding `.evicted` (spec §4.9 "artifact index").
pub fn list_artifact_index(run_dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    for name in CONTENT_FILES {
        if run_dir.join(name).is_file() {
            out.push((*name).to_string());
        }
    }
    out
}

pub fn run_dir_path(artifact_root: &Path, run_hash: &str) -> PathBuf {
    artifact_root.join(run_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PositionSnapshot;

    #[test]
    fn manifest_hash_is_stable_for_equivalent_input_regardless_of_entry_order() {
        let a = vec![
            ManifestEntry { name: "b.json".to_string(), kind: "json".to_string(), sha256: "x".to_string(), bytes: 1 },
            ManifestEntry { name: "a.json".to_string(), kind: "json".to_string(), sha256: "y".to_string(), bytes: 2 },
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        let va = manifest_canonical_value(&a, None, None, None, None, None);
        let vb = manifest_canonical_value(&b, None, None, None, None, None);
        assert_eq!(hash_canonical(&va), hash_canonical(&vb));
    }

    #[test]
    fn manifest_hash_changes_with_chain_prev() {
        let entries = vec![ManifestEntry { name: "a.json".to_string(), kind: "json".to_string(), sha256: "x".to_string(), bytes: 1 }];
        let v1 = manifest_canonical_value(&entries, None, None, None, None, None);
        let v2 = manifest_canonical_value(&entries, Some("prevhash"), None, None, None, None);
        assert_ne!(hash_canonical(&v1), hash_canonical(&v2));
    }

    #[test]
    fn write_run_artifacts_chains_manifests_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let chain = ManifestChain::new();
        let exec = ExecutionResult {
            fills: vec![],
            positions: vec![PositionSnapshot { timestamp: 0, position: 0.0, cash: 100.0, equity: 100.0 }],
        };
        let summary = json!({});
        let inputs = ArtifactInputs {
            summary: &summary,
            metrics: &summary,
            validation: &summary,
            validation_detail: &summary,
            execution: &exec,
            data_hash: Some("dh".to_string()),
            calendar_id: None,
            symbol: "TEST".to_string(),
            timeframe: "1m".to_string(),
        };
        let run1 = tmp.path().join("run1");
        let manifest1 = write_run_artifacts(&run1, &inputs, &chain).unwrap();
        assert!(manifest1.chain_prev.is_none());

        let run2 = tmp.path().join("run2");
        let manifest2 = write_run_artifacts(&run2, &inputs, &chain).unwrap();
        assert_eq!(manifest2.chain_prev, Some(manifest1.manifest_hash));
    }
}
