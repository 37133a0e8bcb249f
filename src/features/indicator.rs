//! Indicator trait and the built-in indicator set.
//!
//! Spec §4.3 distinguishes object-style indicators (expose `compute` and
//! `feature_columns`) from legacy function-style ones (return a frame
//! whose new columns are detected against the base columns). Both are
//! modeled here as one `Indicator` trait; "function-style" indicators
//! are just ones that derive their column names and required window from
//! their own parameters rather than a fixed `feature_columns()` list.

use std::collections::BTreeMap;

use crate::dataset::CanonicalFrame;

/// One computed indicator. `compute` returns the final column names keyed
/// to their values — the engine does not rename anything, matching the
/// Python original's `ind.feature_columns()` contract.
pub trait Indicator: Send + Sync {
    fn name(&self) -> &str;
    fn feature_columns(&self) -> Vec<String>;
    fn required_window(&self) -> usize;
    fn compute(&self, frame: &CanonicalFrame) -> BTreeMap<String, Vec<f64>>;
}

fn sma(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 {
        return out;
    }
    let mut sum = 0.0;
    for i in 0..n {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out[i] = sum / window as f64;
        }
    }
    out
}

/// Simple moving average of `close` over `window` bars. Object-style:
/// emits a single column `sma_<window>`.
pub struct SmaIndicator {
    pub window: usize,
}

impl Indicator for SmaIndicator {
    fn name(&self) -> &str {
        "sma"
    }
    fn feature_columns(&self) -> Vec<String> {
        vec![format!("sma_{}", self.window)]
    }
    fn required_window(&self) -> usize {
        self.window
    }
    fn compute(&self, frame: &CanonicalFrame) -> BTreeMap<String, Vec<f64>> {
        let mut out = BTreeMap::new();
        out.insert(format!("sma_{}", self.window), sma(&frame.close, self.window));
        out
    }
}

/// Legacy function-style dual-SMA indicator: emits `sma_fast_<short>` and
/// `sma_slow_<long>`, matching the reference strategy's parameter pair and
/// exercised here as the "implicit window from column name" case (spec
/// §4.3's overlap-inference note).
pub struct DualSmaLegacyIndicator {
    pub short_window: usize,
    pub long_window: usize,
}

impl Indicator for DualSmaLegacyIndicator {
    fn name(&self) -> &str {
        "legacy"
    }
    fn feature_columns(&self) -> Vec<String> {
        vec![
            format!("legacy_sma_fast_{}", self.short_window),
            format!("legacy_sma_slow_{}", self.long_window),
        ]
    }
    fn required_window(&self) -> usize {
        self.short_window.max(self.long_window)
    }
    fn compute(&self, frame: &CanonicalFrame) -> BTreeMap<String, Vec<f64>> {
        let mut out = BTreeMap::new();
        out.insert(
            format!("legacy_sma_fast_{}", self.short_window),
            sma(&frame.close, self.short_window),
        );
        out.insert(
            format!("legacy_sma_slow_{}", self.long_window),
            sma(&frame.close, self.long_window),
        );
        out
    }
}

/// Build an indicator instance from its submitted `(name, params)` pair
/// (spec §3 `IndicatorSpec`). Mirrors `StrategyRegistry::load`'s by-name
/// dispatch table in `strategy/mod.rs`. Only finite-window indicators are
/// registered: a recursive/infinite-memory smoother (EMA, Wilder's RSI)
/// can never be bit-identical between `build_features` and
/// `build_features_chunked` for any finite overlap, which would violate
/// the chunked == monolithic equivalence spec §4.3 guarantees for every
/// registered indicator.
pub fn build_indicator(name: &str, params: &BTreeMap<String, f64>) -> Option<Box<dyn Indicator>> {
    match name {
        "sma" => {
            let window = params.get("window").copied().unwrap_or(0.0) as usize;
            Some(Box::new(SmaIndicator { window }))
        }
        "dual_sma_legacy" => {
            let short_window = params
                .get("short_window")
                .or_else(|| params.get("fast"))
                .copied()
                .unwrap_or(0.0) as usize;
            let long_window = params
                .get("long_window")
                .or_else(|| params.get("slow"))
                .copied()
                .unwrap_or(0.0) as usize;
            Some(Box::new(DualSmaLegacyIndicator {
                short_window,
                long_window,
            }))
        }
        _ => None,
    }
}

/// Stable per-indicator signature string used by the feature cache key
/// (spec §4.3: `sorted(indicator_signatures)`).
pub fn signature(name: &str, params: &BTreeMap<String, f64>) -> String {
    let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.sort();
    format!("{name}({})", parts.join(","))
}

/// Parse the largest run of digits embedded in a column name as an
/// implicit window size, the way the Python engine infers overlap for
/// function-style indicators whose `required_window()` isn't declared.
pub fn infer_window_from_column_name(col: &str) -> Option<usize> {
    col.split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse::<usize>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_is_nan_before_full_window_then_averages() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&values, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn infer_window_from_column_name_takes_largest_embedded_number() {
        assert_eq!(infer_window_from_column_name("legacy_sma_fast_10"), Some(10));
        assert_eq!(infer_window_from_column_name("sma_200"), Some(200));
        assert_eq!(infer_window_from_column_name("no_digits"), None);
    }
}
