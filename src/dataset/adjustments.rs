//! Corporate-action adjustment policy (spec §4.2, supplemented from
//! `adjustments.py`'s FR-104 split back-adjustment and factors digest).

use std::collections::BTreeMap;

use crate::canonical::sha256_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentPolicy {
    None,
    FullAdjusted,
}

impl AdjustmentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FullAdjusted => "full_adjusted",
        }
    }
}

/// A single corporate-action event: split ratio and/or dividend amount
/// at a given bar timestamp. Either may be zero/absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustmentEvent {
    pub split: f64,
    pub dividend: f64,
}

/// Full adjustment-factor coverage for a dataset. `coverage_full = false`
/// is rejected by `full_adjusted` (spec: "policy requires full factor
/// coverage").
#[derive(Debug, Clone, Default)]
pub struct AdjustmentFactors {
    pub events: BTreeMap<i64, AdjustmentEvent>,
    pub coverage_full: bool,
}

/// Stable digest over sorted `(ts, split, dividend)` rows plus the policy
/// string. `None` only for `AdjustmentPolicy::None`; dividends affect the
/// digest even though price adjustment is split-only (spec §4.2).
pub fn compute_factors_digest(
    policy: AdjustmentPolicy,
    factors: Option<&AdjustmentFactors>,
) -> Option<String> {
    if policy == AdjustmentPolicy::None {
        return None;
    }
    let factors = factors.expect("full_adjusted policy requires AdjustmentFactors");
    let mut buf = format!("policy={}\n", policy.as_str());
    for (ts, ev) in &factors.events {
        buf.push_str(&format!("{},{:.8},{:.8}\n", ts, ev.split, ev.dividend));
    }
    Some(sha256_hex(buf.as_bytes()))
}

/// Back-adjust a price series for splits using a backward cumulative
/// factor: walking from the newest row to the oldest, each split event
/// folds into the running cumulative divisor applied to every earlier row.
pub fn apply_split_back_adjustment(prices: &[f64], split_at_row: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; prices.len()];
    let mut cum = 1.0_f64;
    for i in (0..prices.len()).rev() {
        let s = split_at_row.get(i).copied().unwrap_or(0.0);
        if s > 0.0 {
            cum *= s;
        }
        out[i] = if cum != 0.0 {
            prices[i] / cum
        } else {
            f64::NAN
        };
    }
    out
}

/// Apply `factors` to `{open, high, low, close}` columns of a canonical
/// frame's rows (aligned by index), in-place. Volume is left untouched.
pub fn apply_full_adjustments(
    ts: &[i64],
    open: &mut [f64],
    high: &mut [f64],
    low: &mut [f64],
    close: &mut [f64],
    factors: &AdjustmentFactors,
) -> Result<(), crate::errors::DatasetError> {
    if !factors.coverage_full {
        return Err(crate::errors::DatasetError::IncompleteAdjustmentFactors);
    }
    if ts.is_empty() {
        return Ok(());
    }
    let split_at_row: Vec<f64> = ts
        .iter()
        .map(|t| factors.events.get(t).map(|e| e.split).unwrap_or(0.0))
        .collect();
    for col in [open, high, low, close] {
        let adjusted = apply_split_back_adjustment(col, &split_at_row);
        col.copy_from_slice(&adjusted);
    }
    Ok(())
}

/// Combine the raw frame digest with policy and factors digest so the
/// dataset hash changes whenever either changes, even if the adjusted
/// series is numerically identical to the raw one.
pub fn incorporate_policy_into_hash(
    raw_digest: &str,
    policy: AdjustmentPolicy,
    factors_digest: Option<&str>,
) -> String {
    if policy == AdjustmentPolicy::None {
        return raw_digest.to_string();
    }
    let payload = format!(
        "raw={};policy={};factors={}",
        raw_digest,
        policy.as_str(),
        factors_digest.unwrap_or("none")
    );
    sha256_hex(payload.as_bytes())
}
