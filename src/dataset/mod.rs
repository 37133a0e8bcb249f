//! Dataset ingestion (spec §4.2).
//!
//! Reads a CSV into a [`CanonicalFrame`]: parses timestamps against a
//! named zone, sorts, dedupes, drops incomplete/future rows, classifies
//! calendar gaps, optionally back-adjusts for splits, and produces the
//! `data_hash` that downstream runs bind to.

pub mod adjustments;
pub mod calendar;

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

use crate::canonical::sha256_hex;
use crate::errors::DatasetError;

use adjustments::{AdjustmentFactors, AdjustmentPolicy};
use calendar::CalendarId;

pub const REQUIRED_COLUMNS: &[&str] = &["timestamp", "open", "high", "low", "close", "volume"];
const LEGACY_REQUIRED_COLUMNS: &[&str] =
    &["Date", "Close/Last", "Volume", "Open", "High", "Low"];

/// Columnar OHLCV frame, ascending by `ts`, after all ingestion cleanup
/// (spec §4.2). One entry per row, all vectors the same length.
#[derive(Debug, Clone, Default)]
pub struct CanonicalFrame {
    pub ts: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub zero_volume: Vec<bool>,
}

impl CanonicalFrame {
    pub fn len(&self) -> usize {
        self.ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    fn push_row(&mut self, ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64) {
        self.ts.push(ts);
        self.open.push(o);
        self.high.push(h);
        self.low.push(l);
        self.close.push(c);
        self.volume.push(v);
        self.zero_volume.push(v == 0.0);
    }
}

/// Anomaly counters accumulated during ingestion, persisted on
/// [`DatasetMetadata::anomaly_counters`] (spec §4.2, plus the
/// `timeframe_mismatch` counter supplemented from the Python original).
#[derive(Debug, Clone, Default)]
pub struct AnomalyCounters {
    pub duplicates_dropped: u64,
    pub rows_dropped_missing: u64,
    pub zero_volume_rows: u64,
    pub future_rows_dropped: u64,
    pub unexpected_gaps: u64,
    pub expected_closures: u64,
    pub timeframe_mismatch: u64,
}

#[derive(Debug, Clone)]
pub struct DatasetMetadata {
    pub symbol: String,
    pub timeframe: String,
    pub data_hash: String,
    pub calendar_id: Option<String>,
    pub row_count_raw: usize,
    pub row_count_canonical: usize,
    pub first_ts: i64,
    pub last_ts: i64,
    pub anomaly_counters: AnomalyCounters,
    pub created_at_ms: i64,
    pub observed_bar_seconds: Option<i64>,
    pub declared_bar_seconds: Option<i64>,
    pub timeframe_ok: Option<bool>,
    pub adjustment_policy: AdjustmentPolicy,
    pub adjustment_factors_digest: Option<String>,
}

struct RawRow {
    naive_dt: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: Option<f64>,
}

/// Read `path` as CSV, accepting either the standard schema
/// (`timestamp,open,high,low,close,volume`) or the legacy vendor schema
/// (`Date,Close/Last,Volume,Open,High,Low` with `$`/`,`-formatted
/// numbers), auto-detected by header (spec §4.2, `ingest_csv.py`).
fn read_rows(path: &Path) -> Result<Vec<RawRow>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| DatasetError::Io(e.to_string()))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DatasetError::Io(e.to_string()))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(|c| c.to_string())
        .collect();

    if missing.is_empty() {
        read_standard_rows(&mut reader, &headers)
    } else if LEGACY_REQUIRED_COLUMNS
        .iter()
        .all(|c| headers.iter().any(|h| h == c))
    {
        read_legacy_rows(&mut reader, &headers)
    } else {
        Err(DatasetError::UnrecognizedSchema(missing))
    }
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn read_standard_rows(
    reader: &mut csv::Reader<std::fs::File>,
    headers: &[String],
) -> Result<Vec<RawRow>, DatasetError> {
    let ts_idx = column_index(headers, "timestamp").expect("checked present");
    let o_idx = column_index(headers, "open").expect("checked present");
    let h_idx = column_index(headers, "high").expect("checked present");
    let l_idx = column_index(headers, "low").expect("checked present");
    let c_idx = column_index(headers, "close").expect("checked present");
    let v_idx = column_index(headers, "volume").expect("checked present");

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Io(e.to_string()))?;
        let naive_dt = match parse_naive_timestamp(record.get(ts_idx).unwrap_or("")) {
            Some(dt) => dt,
            None => continue,
        };
        let open = record.get(o_idx).and_then(|s| s.parse::<f64>().ok());
        let high = record.get(h_idx).and_then(|s| s.parse::<f64>().ok());
        let low = record.get(l_idx).and_then(|s| s.parse::<f64>().ok());
        let close = record.get(c_idx).and_then(|s| s.parse::<f64>().ok());
        let volume = record.get(v_idx).and_then(|s| s.parse::<f64>().ok());
        if let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) {
            out.push(RawRow {
                naive_dt,
                open,
                high,
                low,
                close,
                volume,
            });
        }
    }
    Ok(out)
}

fn clean_numeric(s: &str) -> String {
    s.replace('$', "").replace(',', "")
}

fn read_legacy_rows(
    reader: &mut csv::Reader<std::fs::File>,
    headers: &[String],
) -> Result<Vec<RawRow>, DatasetError> {
    let date_idx = column_index(headers, "Date").expect("checked present");
    let close_idx = column_index(headers, "Close/Last").expect("checked present");
    let volume_idx = column_index(headers, "Volume").expect("checked present");
    let open_idx = column_index(headers, "Open").expect("checked present");
    let high_idx = column_index(headers, "High").expect("checked present");
    let low_idx = column_index(headers, "Low").expect("checked present");

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Io(e.to_string()))?;
        let naive_dt = match NaiveDate::parse_from_str(record.get(date_idx).unwrap_or(""), "%m/%d/%Y")
        {
            Ok(d) => d.and_hms_opt(0, 0, 0).expect("midnight is always valid"),
            Err(_) => continue,
        };
        let open = record
            .get(open_idx)
            .and_then(|s| clean_numeric(s).parse::<f64>().ok());
        let high = record
            .get(high_idx)
            .and_then(|s| clean_numeric(s).parse::<f64>().ok());
        let low = record
            .get(low_idx)
            .and_then(|s| clean_numeric(s).parse::<f64>().ok());
        let close = record
            .get(close_idx)
            .and_then(|s| clean_numeric(s).parse::<f64>().ok());
        let volume = record
            .get(volume_idx)
            .and_then(|s| clean_numeric(s).parse::<f64>().ok());
        if let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) {
            out.push(RawRow {
                naive_dt,
                open,
                high,
                low,
                close,
                volume,
            });
        }
    }
    Ok(out)
}

fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

/// Localize a naive timestamp against `tz` (assuming the wall-clock time
/// belongs to that zone), then convert to UTC epoch milliseconds.
/// Ambiguous/nonexistent local times (DST folds/gaps) resolve to the
/// earliest valid UTC instant.
fn to_epoch_ms(naive_dt: NaiveDateTime, tz: Tz) -> i64 {
    let localized = tz.from_local_datetime(&naive_dt).earliest().unwrap_or_else(|| {
        tz.from_utc_datetime(&naive_dt)
    });
    localized.timestamp_millis()
}

/// Ingestion options (spec §4.2 + §6 defaults).
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub symbol: String,
    pub timeframe: String,
    pub tz_name: String,
    pub calendar_id: Option<String>,
    pub adjustment_policy: AdjustmentPolicy,
    pub adjustment_factors: Option<AdjustmentFactors>,
    /// Wall-clock "now" in epoch ms, used to discard strictly-future rows.
    /// Threaded in explicitly so ingestion stays deterministic under test.
    pub now_ms: i64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            timeframe: "1d".to_string(),
            tz_name: "America/New_York".to_string(),
            calendar_id: None,
            adjustment_policy: AdjustmentPolicy::None,
            adjustment_factors: None,
            now_ms: 0,
        }
    }
}

pub fn load_csv(
    path: &Path,
    opts: &IngestOptions,
) -> Result<(CanonicalFrame, DatasetMetadata), DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.display().to_string()));
    }
    let tz: Tz = opts
        .tz_name
        .parse()
        .map_err(|_| DatasetError::Io(format!("unknown timezone: {}", opts.tz_name)))?;

    let raw_rows = read_rows(path)?;
    let row_count_raw = raw_rows.len();

    let mut rows: Vec<(i64, f64, f64, f64, f64, Option<f64>)> = raw_rows
        .into_iter()
        .map(|r| {
            (
                to_epoch_ms(r.naive_dt, tz),
                r.open,
                r.high,
                r.low,
                r.close,
                r.volume,
            )
        })
        .collect();
    rows.sort_by_key(|r| r.0);

    let mut deduped: Vec<(i64, f64, f64, f64, f64, Option<f64>)> = Vec::with_capacity(rows.len());
    let mut duplicates_dropped = 0u64;
    for row in rows {
        if deduped.last().map(|p| p.0) == Some(row.0) {
            duplicates_dropped += 1;
            continue;
        }
        deduped.push(row);
    }

    let mut rows_dropped_missing = 0u64;
    let mut frame = CanonicalFrame::default();
    for (ts, o, h, l, c, v) in deduped {
        match v {
            Some(v) => frame.push_row(ts, o, h, l, c, v),
            None => rows_dropped_missing += 1,
        }
    }

    let mut future_rows_dropped = 0u64;
    if opts.now_ms > 0 {
        let keep: Vec<usize> = frame
            .ts
            .iter()
            .enumerate()
            .filter(|(_, ts)| **ts <= opts.now_ms)
            .map(|(i, _)| i)
            .collect();
        future_rows_dropped = (frame.len() - keep.len()) as u64;
        frame = select_rows(&frame, &keep);
    }

    let zero_volume_rows = frame.zero_volume.iter().filter(|z| **z).count() as u64;

    let calendar = opts.calendar_id.as_deref().and_then(CalendarId::parse);
    let (expected_closures, unexpected_gaps) = match calendar {
        Some(cal) if !frame.is_empty() => {
            let present_days: BTreeSet<NaiveDate> = frame
                .ts
                .iter()
                .map(|ts| epoch_ms_to_utc_date(*ts))
                .collect();
            let first = epoch_ms_to_utc_date(frame.ts[0]);
            let last = epoch_ms_to_utc_date(*frame.ts.last().unwrap());
            calendar::classify_gaps(cal, first, last, &present_days)
        }
        _ => (0, 0),
    };

    if opts.adjustment_policy == AdjustmentPolicy::FullAdjusted {
        if let Some(factors) = &opts.adjustment_factors {
            adjustments::apply_full_adjustments(
                &frame.ts,
                &mut frame.open,
                &mut frame.high,
                &mut frame.low,
                &mut frame.close,
                factors,
            )?;
        } else {
            return Err(DatasetError::IncompleteAdjustmentFactors);
        }
    }

    let factors_digest = adjustments::compute_factors_digest(
        opts.adjustment_policy,
        opts.adjustment_factors.as_ref(),
    );
    let raw_digest = stable_frame_hash(&frame);
    let data_hash = adjustments::incorporate_policy_into_hash(
        &raw_digest,
        opts.adjustment_policy,
        factors_digest.as_deref(),
    );

    let observed_bar_seconds = observed_bar_seconds(&frame.ts);
    let declared_bar_seconds = declared_bar_seconds(&opts.timeframe);
    let timeframe_ok = match (observed_bar_seconds, declared_bar_seconds) {
        (Some(o), Some(d)) => Some(o == d),
        _ => None,
    };

    let mut counters = AnomalyCounters {
        duplicates_dropped,
        rows_dropped_missing,
        zero_volume_rows,
        future_rows_dropped,
        unexpected_gaps,
        expected_closures,
        timeframe_mismatch: 0,
    };
    if timeframe_ok == Some(false) {
        counters.timeframe_mismatch = 1;
    }

    let meta = DatasetMetadata {
        symbol: opts.symbol.to_ascii_uppercase(),
        timeframe: opts.timeframe.clone(),
        data_hash,
        calendar_id: opts.calendar_id.clone(),
        row_count_raw,
        row_count_canonical: frame.len(),
        first_ts: frame.ts.first().copied().unwrap_or(0),
        last_ts: frame.ts.last().copied().unwrap_or(0),
        anomaly_counters: counters,
        created_at_ms: opts.now_ms,
        observed_bar_seconds,
        declared_bar_seconds,
        timeframe_ok,
        adjustment_policy: opts.adjustment_policy,
        adjustment_factors_digest: factors_digest,
    };

    Ok((frame, meta))
}

fn select_rows(frame: &CanonicalFrame, keep: &[usize]) -> CanonicalFrame {
    let mut out = CanonicalFrame::default();
    for &i in keep {
        out.ts.push(frame.ts[i]);
        out.open.push(frame.open[i]);
        out.high.push(frame.high[i]);
        out.low.push(frame.low[i]);
        out.close.push(frame.close[i]);
        out.volume.push(frame.volume[i]);
        out.zero_volume.push(frame.zero_volume[i]);
    }
    out
}

fn epoch_ms_to_utc_date(ts_ms: i64) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .expect("timestamp in range")
        .date_naive()
}

fn observed_bar_seconds(ts: &[i64]) -> Option<i64> {
    if ts.len() < 2 {
        return None;
    }
    let mut deltas: Vec<i64> = ts.windows(2).map(|w| (w[1] - w[0]) / 1000).collect();
    deltas.sort_unstable();
    Some(deltas[deltas.len() / 2])
}

fn declared_bar_seconds(timeframe: &str) -> Option<i64> {
    match timeframe {
        "1d" => Some(86_400),
        "1h" => Some(3_600),
        "1m" => Some(60),
        _ => None,
    }
}

/// `sha256` over the canonical CSV bytes of the frame: ascending `ts`,
/// 8-decimal float format, `\n` terminator (spec §4.2).
fn stable_frame_hash(frame: &CanonicalFrame) -> String {
    let mut buf = String::from("ts,open,high,low,close,volume,zero_volume\n");
    for i in 0..frame.len() {
        buf.push_str(&format!(
            "{},{:.8},{:.8},{:.8},{:.8},{:.8},{}\n",
            frame.ts[i],
            frame.open[i],
            frame.high[i],
            frame.low[i],
            frame.close[i],
            frame.volume[i],
            if frame.zero_volume[i] { 1 } else { 0 },
        ));
    }
    sha256_hex(buf.as_bytes())
}

/// Slice `frame` to rows with `start_ms <= ts <= end_ms` (either bound
/// optional), preserving order.
pub fn slice_frame(frame: &CanonicalFrame, start_ms: Option<i64>, end_ms: Option<i64>) -> CanonicalFrame {
    let keep: Vec<usize> = frame
        .ts
        .iter()
        .enumerate()
        .filter(|(_, ts)| {
            start_ms.map(|s| **ts >= s).unwrap_or(true) && end_ms.map(|e| **ts <= e).unwrap_or(true)
        })
        .map(|(i, _)| i)
        .collect();
    select_rows(frame, &keep)
}
