//! Feature engine (spec §4.3): applies registered indicators to a
//! [`CanonicalFrame`] in deterministic column order, in chunked or
//! monolithic mode, with a content-addressed on-disk cache.

pub mod cache;
pub mod chunking;
pub mod indicator;

use std::collections::BTreeMap;

use crate::dataset::CanonicalFrame;
use crate::errors::ComputationError;
use indicator::Indicator;

pub const BASE_COLUMNS: &[&str] = &["timestamp", "open", "high", "low", "close", "volume", "zero_volume"];

/// Base OHLCV columns plus the indicator-produced feature columns, in
/// deterministic append order (spec §4.3: sorted by the segment before
/// the first `_` in the column name, then by full column name).
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    pub base: CanonicalFrame,
    /// Feature columns in the deterministic order they were appended.
    pub feature_order: Vec<String>,
    pub features: BTreeMap<String, Vec<f64>>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(|v| v.as_slice())
    }
}

fn sort_key(col: &str) -> (String, String) {
    let group = col.split('_').next().unwrap_or(col).to_string();
    (group, col.to_string())
}

/// Run every indicator against `frame` and append feature columns in
/// deterministic order. Duplicate column names (across indicators) or a
/// collision with a base column is rejected before any column is appended.
pub fn build_features(
    frame: &CanonicalFrame,
    indicators: &[Box<dyn Indicator>],
) -> Result<FeatureFrame, ComputationError> {
    let mut planned: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for ind in indicators {
        let produced = ind.compute(frame);
        let declared = ind.feature_columns();
        for col in &declared {
            if BASE_COLUMNS.contains(&col.as_str()) {
                return Err(ComputationError::new(
                    "feature_base_collision",
                    format!("feature column collides with base column: {col}"),
                ));
            }
            if planned.contains_key(col) {
                return Err(ComputationError::new(
                    "feature_duplicate_column",
                    format!("duplicate feature column: {col}"),
                ));
            }
        }
        for col in declared {
            if let Some(series) = produced.get(&col) {
                planned.insert(col, series.clone());
            }
        }
    }

    let mut ordered: Vec<String> = planned.keys().cloned().collect();
    ordered.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    Ok(FeatureFrame {
        base: frame.clone(),
        feature_order: ordered,
        features: planned,
    })
}

/// Chunked equivalent of [`build_features`]: splits the frame per
/// [`chunking::chunk_slices`], computes each slice independently, drops
/// the overlap prefix, and stitches results back into row order. Must be
/// bit-identical to the monolithic build for `chunk_size/overlap >=
/// required_overlap` (spec §4.3 equivalence property).
pub fn build_features_chunked(
    frame: &CanonicalFrame,
    indicators: &[Box<dyn Indicator>],
    chunk_size: i64,
    overlap: i64,
) -> Result<FeatureFrame, ComputationError> {
    let n = frame.len();
    if chunk_size <= 0 || chunk_size as usize >= n {
        return build_features(frame, indicators);
    }

    let slices = chunking::chunk_slices(n, chunk_size, overlap);
    let mut feature_order: Option<Vec<String>> = None;
    let mut features: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for (read_start, read_end, drop_prefix) in slices {
        let window = select_rows(frame, read_start, read_end);
        let built = build_features(&window, indicators)?;
        if feature_order.is_none() {
            feature_order = Some(built.feature_order.clone());
            for col in built.feature_order.iter() {
                features.insert(col.clone(), vec![f64::NAN; n]);
            }
        }
        let order = feature_order.as_ref().unwrap();
        let target_start = read_start + drop_prefix;
        for col in order {
            let src = &built.features[col];
            for (offset, value) in src.iter().enumerate().skip(drop_prefix) {
                let target_idx = target_start + (offset - drop_prefix);
                if target_idx < n {
                    features.get_mut(col).unwrap()[target_idx] = *value;
                }
            }
        }
    }

    Ok(FeatureFrame {
        base: frame.clone(),
        feature_order: feature_order.unwrap_or_default(),
        features,
    })
}

fn select_rows(frame: &CanonicalFrame, start: usize, end: usize) -> CanonicalFrame {
    CanonicalFrame {
        ts: frame.ts[start..end].to_vec(),
        open: frame.open[start..end].to_vec(),
        high: frame.high[start..end].to_vec(),
        low: frame.low[start..end].to_vec(),
        close: frame.close[start..end].to_vec(),
        volume: frame.volume[start..end].to_vec(),
        zero_volume: frame.zero_volume[start..end].to_vec(),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
