//! Content-addressed feature cache (spec §4.3).
//!
//! Key = `candle_hash` + sha256(sorted indicator signatures + engine
//! version) truncated to 16 hex chars. Primary format is columnar
//! (Parquet); when the columnar writer is unavailable the cache falls
//! back to writing CSV bytes under the same `.parquet` name, logging a
//! one-time structured warning (spec §4.3). All writes are tmp-then-rename
//! so a concurrent reader never observes a partial file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, warn};

use crate::canonical::sha256_hex;
use crate::features::indicator::Indicator;
use crate::features::FeatureFrame;

static CSV_FALLBACK_WARNED: Once = Once::new();

/// `sha256(sorted("name[:window=W]", ...).join("|") + "|" + engine_version)[:16]`.
fn indicator_signature_digest(indicators: &[Box<dyn Indicator>], engine_version: &str) -> String {
    let mut sigs: Vec<String> = indicators
        .iter()
        .map(|ind| format!("{}:window={}", ind.name(), ind.required_window()))
        .collect();
    sigs.sort();
    let key = format!("{}|{}", sigs.join("|"), engine_version);
    sha256_hex(key.as_bytes())[..16].to_string()
}

pub fn cache_path(
    root: &Path,
    candle_hash: &str,
    indicators: &[Box<dyn Indicator>],
    engine_version: &str,
) -> PathBuf {
    let digest = indicator_signature_digest(indicators, engine_version);
    root.join(format!("{candle_hash}_{digest}.parquet"))
}

/// Load the cached frame at `path` if present and readable; on read
/// failure (corruption), remove the stale file and report a cache miss
/// rather than propagating the error.
pub fn try_load(path: &Path, feature_columns: &[String]) -> Option<FeatureFrame> {
    if !path.exists() {
        return None;
    }
    match read_parquet(path, feature_columns) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "feature cache file unreadable, rebuilding");
            let _ = fs::remove_file(path);
            None
        }
    }
}

fn read_parquet(path: &Path, feature_columns: &[String]) -> Result<FeatureFrame, String> {
    let file = fs::File::open(path).map_err(|e| e.to_string())?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| e.to_string())?;
    let reader = builder.build().map_err(|e| e.to_string())?;

    let mut frame = FeatureFrame::default();
    frame.feature_order = feature_columns.to_vec();
    for col in feature_columns {
        frame.features.insert(col.clone(), Vec::new());
    }

    for batch in reader {
        let batch = batch.map_err(|e| e.to_string())?;
        append_batch(&mut frame, &batch)?;
    }
    Ok(frame)
}

fn column_f64(batch: &RecordBatch, name: &str) -> Result<Vec<f64>, String> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| format!("missing column {name}"))?;
    let arr = col
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| format!("column {name} is not float64"))?;
    Ok(arr.values().to_vec())
}

fn column_i64(batch: &RecordBatch, name: &str) -> Result<Vec<i64>, String> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| format!("missing column {name}"))?;
    let arr = col
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| format!("column {name} is not int64"))?;
    Ok(arr.values().to_vec())
}

fn append_batch(frame: &mut FeatureFrame, batch: &RecordBatch) -> Result<(), String> {
    frame.base.ts.extend(column_i64(batch, "ts")?);
    frame.base.open.extend(column_f64(batch, "open")?);
    frame.base.high.extend(column_f64(batch, "high")?);
    frame.base.low.extend(column_f64(batch, "low")?);
    frame.base.close.extend(column_f64(batch, "close")?);
    frame.base.volume.extend(column_f64(batch, "volume")?);
    frame
        .base
        .zero_volume
        .extend(column_i64(batch, "zero_volume")?.into_iter().map(|v| v != 0));
    for col in frame.feature_order.clone() {
        let values = column_f64(batch, &col)?;
        frame.features.get_mut(&col).unwrap().extend(values);
    }
    Ok(())
}

/// Build the arrow schema + record batch for `frame`, preferring the
/// Parquet writer; falls back to a CSV byte dump under the same filename
/// if batch construction or the writer itself fails.
pub fn store(path: &Path, frame: &FeatureFrame) -> Result<(), crate::errors::IoError> {
    match write_parquet(path, frame) {
        Ok(()) => Ok(()),
        Err(e) => {
            CSV_FALLBACK_WARNED.call_once(|| {
                warn!(error = %e, "columnar feature cache writer unavailable, falling back to CSV under .parquet name");
            });
            write_csv_fallback(path, frame)
        }
    }
}

fn build_record_batch(frame: &FeatureFrame) -> Result<RecordBatch, String> {
    let mut fields = vec![
        Field::new("ts", DataType::Int64, false),
        Field::new("open", DataType::Float64, false),
        Field::new("high", DataType::Float64, false),
        Field::new("low", DataType::Float64, false),
        Field::new("close", DataType::Float64, false),
        Field::new("volume", DataType::Float64, false),
        Field::new("zero_volume", DataType::Int64, false),
    ];
    for col in &frame.feature_order {
        fields.push(Field::new(col, DataType::Float64, true));
    }
    let schema = std::sync::Arc::new(Schema::new(fields));

    let mut columns: Vec<std::sync::Arc<dyn arrow::array::Array>> = vec![
        std::sync::Arc::new(Int64Array::from(frame.base.ts.clone())),
        std::sync::Arc::new(Float64Array::from(frame.base.open.clone())),
        std::sync::Arc::new(Float64Array::from(frame.base.high.clone())),
        std::sync::Arc::new(Float64Array::from(frame.base.low.clone())),
        std::sync::Arc::new(Float64Array::from(frame.base.close.clone())),
        std::sync::Arc::new(Float64Array::from(frame.base.volume.clone())),
        std::sync::Arc::new(Int64Array::from(
            frame
                .base
                .zero_volume
                .iter()
                .map(|b| if *b { 1i64 } else { 0i64 })
                .collect::<Vec<_>>(),
        )),
    ];
    for col in &frame.feature_order {
        columns.push(std::sync::Arc::new(Float64Array::from(
            frame.features[col].clone(),
        )));
    }

    RecordBatch::try_new(schema, columns).map_err(|e| e.to_string())
}

fn write_parquet(path: &Path, frame: &FeatureFrame) -> Result<(), String> {
    let batch = build_record_batch(frame)?;
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| e.to_string())?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).map_err(|e| e.to_string())?;
    writer.write(&batch).map_err(|e| e.to_string())?;
    writer.close().map_err(|e| e.to_string())?;
    fs::rename(&tmp_path, path).map_err(|e| e.to_string())?;
    debug!(path = %path.display(), "wrote feature cache entry");
    Ok(())
}

fn write_csv_fallback(path: &Path, frame: &FeatureFrame) -> Result<(), crate::errors::IoError> {
    let tmp_path = path.with_extension("parquet.tmp");
    {
        let mut f = fs::File::create(&tmp_path)?;
        let mut header = "ts,open,high,low,close,volume,zero_volume".to_string();
        for col in &frame.feature_order {
            header.push(',');
            header.push_str(col);
        }
        writeln!(f, "{header}")?;
        for i in 0..frame.len() {
            let mut row = format!(
                "{},{},{},{},{},{},{}",
                frame.base.ts[i],
                frame.base.open[i],
                frame.base.high[i],
                frame.base.low[i],
                frame.base.close[i],
                frame.base.volume[i],
                if frame.base.zero_volume[i] { 1 } else { 0 },
            );
            for col in &frame.feature_order {
                row.push(',');
                row.push_str(&frame.features[col][i].to_string());
            }
            writeln!(f, "{row}")?;
        }
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::indicator::SmaIndicator;

    #[test]
    fn cache_path_is_stable_for_same_indicator_set() {
        let indicators: Vec<Box<dyn Indicator>> = vec![Box::new(SmaIndicator { window: 10 })];
        let a = cache_path(Path::new("/cache"), "candlehash", &indicators, "v1");
        let b = cache_path(Path::new("/cache"), "candlehash", &indicators, "v1");
        assert_eq!(a, b);
        assert!(a.starts_with("/cache"));
        assert!(a.to_string_lossy().starts_with("/cache/candlehash_"));
        assert!(a.extension().unwrap() == "parquet");
    }

    #[test]
    fn cache_path_changes_with_engine_version() {
        let indicators: Vec<Box<dyn Indicator>> = vec![Box::new(SmaIndicator { window: 10 })];
        let a = cache_path(Path::new("/cache"), "candlehash", &indicators, "v1");
        let b = cache_path(Path::new("/cache"), "candlehash", &indicators, "v2");
        assert_ne!(a, b);
    }

    #[test]
    fn missing_cache_file_is_a_clean_miss() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let path = tmp.path().join("nonexistent_abc.parquet");
        assert!(try_load(&path, &[]).is_none());
    }

    #[test]
    fn corrupted_cache_file_triggers_rebuild_not_panic() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let path = tmp.path().join("corrupt_abc.parquet");
        fs::write(&path, b"not a parquet file").unwrap();
        assert!(try_load(&path, &["sma_10".to_string()]).is_none());
        assert!(!path.exists());
    }
}
