//! Canonical hashing & provenance (spec §4.1).
//!
//! `canonical_json` serializes a `Value` with sorted keys and `,`/`:`
//! separators; `hash_canonical` sha256's that. Everything else in this
//! module (`run_hash`, `metrics_hash`, `equity_curve_hash`,
//! `provenance_hash`) is a specific composition of those two primitives.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::value::Value;

/// Emit canonical UTF-8 JSON for a `Value`: sorted map keys, `,`/`:`
/// separators, list order preserved.
pub fn canonical_json(v: &Value) -> String {
    let mut out = String::new();
    write_value(v, &mut out);
    out
}

fn write_value(v: &Value, out: &mut String) {
    match v {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => write_float(*f, out),
        Value::String(s) => write_json_string(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            // BTreeMap already iterates in sorted key order.
            for (i, (k, val)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_value(val, out);
            }
            out.push('}');
        }
    }
}

fn write_float(f: f64, out: &mut String) {
    if f.is_nan() || f.is_infinite() {
        // Not valid JSON; callers should have rounded/validated before
        // reaching the canonical layer. Fall back to null rather than
        // emitting invalid JSON.
        out.push_str("null");
        return;
    }
    if f == f.trunc() && f.abs() < 1e15 {
        out.push_str(&format!("{:.1}", f));
    } else {
        out.push_str(&format!("{}", f));
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `hash_canonical(obj) = sha256(canonical_json(obj))`.
pub fn hash_canonical(v: &Value) -> String {
    sha256_hex(canonical_json(v).as_bytes())
}

/// Dataset provenance attached to a run hash when resolvable (spec §4.1).
#[derive(Debug, Clone)]
pub struct DatasetBinding {
    pub symbol: String,
    pub timeframe: String,
    pub data_hash: String,
}

/// `run_hash(config, dataset_meta)`: hash the config plus `_dataset`
/// binding when resolvable, else the bare config (legacy path).
pub fn run_hash(config: &Value, dataset: Option<&DatasetBinding>) -> String {
    let augmented = match (config, dataset) {
        (Value::Map(map), Some(ds)) => {
            let mut m = map.clone();
            let dataset_value = Value::map()
                .set("symbol", ds.symbol.clone())
                .set("timeframe", ds.timeframe.clone())
                .set("data_hash", ds.data_hash.clone())
                .build();
            m.insert("_dataset".to_string(), dataset_value);
            Value::Map(m)
        }
        _ => config.clone(),
    };
    hash_canonical(&augmented)
}

/// Round every numeric leaf of `metrics` to canonical precision, coerce
/// non-numeric values to their string form, sort keys, and hash.
pub fn metrics_hash(metrics: &BTreeMap<String, Value>, float_digits: u32) -> String {
    let mut out = BTreeMap::new();
    for (k, v) in metrics {
        out.insert(k.clone(), canonicalize_metric_value(v, float_digits));
    }
    hash_canonical(&Value::Map(out))
}

fn canonicalize_metric_value(v: &Value, float_digits: u32) -> Value {
    match v {
        Value::Float(f) => Value::Float(crate::value::round_significant(*f, float_digits)),
        Value::Int(_) | Value::Bool(_) | Value::String(_) | Value::Null => v.clone(),
        other => Value::String(canonical_json(other)),
    }
}

/// `equity_curve_hash({curve: [(index, nav, drawdown), ...]})` with `nav`
/// and `drawdown` rounded to canonical precision.
pub fn equity_curve_hash(curve: &[(i64, f64, f64)], float_digits: u32) -> String {
    let rows: Vec<Value> = curve
        .iter()
        .map(|(idx, nav, dd)| {
            Value::List(vec![
                Value::Int(*idx),
                Value::Float(crate::value::round_significant(*nav, float_digits)),
                Value::Float(crate::value::round_significant(*dd, float_digits)),
            ])
        })
        .collect();
    let wrapper = Value::map().set("curve", Value::List(rows)).build();
    hash_canonical(&wrapper)
}

/// `provenance_hash = hash_canonical({manifest_hash?, metrics_hash?, equity_curve_hash?})`,
/// omitting absent fields. Order-independence (spec property #9) falls out
/// of `Value::Map` being a `BTreeMap`.
pub fn provenance_hash(
    manifest_hash: Option<&str>,
    metrics_hash: Option<&str>,
    equity_curve_hash: Option<&str>,
) -> String {
    let v = Value::map()
        .set_opt("manifest_hash", manifest_hash.map(|s| s.to_string()))
        .set_opt("metrics_hash", metrics_hash.map(|s| s.to_string()))
        .set_opt("equity_curve_hash", equity_curve_hash.map(|s| s.to_string()))
        .build();
    hash_canonical(&v)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
