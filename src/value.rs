//! Canonical value model.
//!
//! A restricted, self-describing value used as the single serialization
//! target for everything that participates in a content hash: run
//! configs, manifests, metrics, audit records. Centralizing on one enum
//! means every hash-bearing type converts into it once, instead of each
//! caller hand-rolling its own canonical JSON.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Canonical value: null, bool, integer, float, string, ordered list, or a
/// string-keyed mapping. Mappings are re-sorted by key at serialization
/// time so that construction order never affects the digest; lists are
/// not reordered since list order is semantically meaningful (spec §4.1).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> ValueMapBuilder {
        ValueMapBuilder::default()
    }

    /// Convert a UTC datetime to its canonical ISO-8601 form with `Z` in
    /// place of `+00:00` (spec §4.1).
    pub fn from_datetime(dt: DateTime<Utc>) -> Value {
        Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }

    pub fn from_date(d: chrono::NaiveDate) -> Value {
        Value::String(d.format("%Y-%m-%d").to_string())
    }

    pub fn from_path(p: &Path) -> Value {
        Value::String(p.to_string_lossy().replace('\\', "/"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValueMapBuilder {
    inner: BTreeMap<String, Value>,
}

impl ValueMapBuilder {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn build(self) -> Value {
        Value::Map(self.inner)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(x) => x.into(),
            None => Value::Null,
        }
    }
}

/// Truncate a float to `digits` significant digits via the `%.Ng`-style
/// round trip: format, then parse back. This has to match exactly across
/// implementations per spec §9 (Canonical value model note), so the
/// algorithm is pinned here rather than left to a float-formatting crate.
pub fn round_significant(v: f64, digits: u32) -> f64 {
    if !v.is_finite() || v == 0.0 {
        return v;
    }
    let formatted = format_significant(v, digits);
    formatted.parse::<f64>().unwrap_or(v)
}

fn format_significant(v: f64, digits: u32) -> String {
    // Emulates C's `%.<digits>g`: digits significant figures, trimming
    // insignificant trailing zeros, switching to exponential form for very
    // large/small magnitudes the way `%g` does.
    let digits = digits.max(1);
    let magnitude = v.abs().log10().floor() as i32;
    let use_exp = magnitude < -4 || magnitude >= digits as i32;
    if use_exp {
        let precision = (digits as i32 - 1).max(0) as usize;
        let s = format!("{:.*e}", precision, v);
        trim_exp(&s)
    } else {
        let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
        let s = format!("{:.*}", decimals, v);
        trim_fixed(&s)
    }
}

fn trim_fixed(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn trim_exp(s: &str) -> String {
    // Rust formats as `1.2300000e2`; normalize mantissa trailing zeros and
    // the exponent sign the way `%g` would (`1.23e+02`-ish, but since we
    // round-trip through `parse::<f64>()` the exact text doesn't have to
    // match C, only the rounded value).
    let (mantissa, exp) = s.split_once('e').unwrap_or((s, "0"));
    let mantissa = if mantissa.contains('.') {
        let t = mantissa.trim_end_matches('0');
        let t = t.trim_end_matches('.');
        if t.is_empty() || t == "-" {
            "0"
        } else {
            t
        }
    } else {
        mantissa
    };
    format!("{}e{}", mantissa, exp)
}

/// Convert an arbitrary `serde_json::Value` (e.g. a `RunConfig` serialized
/// via serde) into our canonical `Value`, applying float rounding. Used as
/// the bridge between serde-derived config structs and the hashing layer.
pub fn from_json(json: &JsonValue, float_digits: u32) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(round_significant(f, float_digits))
            } else {
                Value::Null
            }
        }
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(items) => {
            Value::List(items.iter().map(|v| from_json(v, float_digits)).collect())
        }
        JsonValue::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), from_json(v, float_digits));
            }
            Value::Map(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_significant_matches_expected_precision() {
        assert_eq!(round_significant(1.0 / 3.0, 12), 0.333333333333);
        assert_eq!(round_significant(100.0, 12), 100.0);
        assert_eq!(round_significant(0.0, 12), 0.0);
    }

    #[test]
    fn map_builder_sorts_keys_on_build() {
        let v = Value::map().set("b", 2i64).set("a", 1i64).build();
        match v {
            Value::Map(m) => {
                let keys: Vec<_> = m.keys().cloned().collect();
                assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected map"),
        }
    }
}
