//! Strategy runner & causality guard (spec §4.4).

use std::collections::BTreeMap;

use crate::errors::CausalityViolation;
use crate::features::FeatureFrame;

/// Causality guard posture. STRICT raises on the first violation;
/// PERMISSIVE records and continues (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalityMode {
    Strict,
    Permissive,
}

/// Report attached to the manifest and as a metric row after run
/// completion (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct CausalityReport {
    pub mode_name: String,
    pub violations: u64,
}

/// Accumulates causality violations during feature + strategy execution,
/// raising immediately in STRICT mode.
pub struct CausalityGuard {
    mode: CausalityMode,
    violations: u64,
}

impl CausalityGuard {
    pub fn new(mode: CausalityMode) -> Self {
        Self { mode, violations: 0 }
    }

    /// Record a use of information from `offset` rows ahead of the
    /// current row in `feature_name`'s computation. `offset > 0` means a
    /// genuine causality violation (future information).
    pub fn record(&mut self, feature_name: &str, offset: i64) -> Result<(), CausalityViolation> {
        if offset <= 0 {
            return Ok(());
        }
        self.violations += 1;
        let violation = CausalityViolation {
            feature_name: feature_name.to_string(),
            offset,
        };
        match self.mode {
            CausalityMode::Strict => Err(violation),
            CausalityMode::Permissive => Ok(()),
        }
    }

    pub fn report(&self) -> CausalityReport {
        CausalityReport {
            mode_name: match self.mode {
                CausalityMode::Strict => "strict".to_string(),
                CausalityMode::Permissive => "permissive".to_string(),
            },
            violations: self.violations,
        }
    }
}

/// A strategy parameter set after legacy alias normalization.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    pub values: BTreeMap<String, f64>,
}

impl StrategyParams {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Legacy parameter aliases normalized before strategy construction (spec
/// §4.4: e.g. `fast -> short_window`).
const PARAM_ALIASES: &[(&str, &str)] = &[
    ("fast", "short_window"),
    ("slow", "long_window"),
    ("fast_window", "short_window"),
    ("slow_window", "long_window"),
];

pub fn normalize_param_aliases(raw: BTreeMap<String, f64>) -> StrategyParams {
    let mut values = BTreeMap::new();
    for (k, v) in raw {
        let canonical_key = PARAM_ALIASES
            .iter()
            .find(|(alias, _)| *alias == k)
            .map(|(_, canon)| canon.to_string())
            .unwrap_or(k);
        values.insert(canonical_key, v);
    }
    StrategyParams { values }
}

/// A strategy produces a `signal` column from the input columns; the
/// signal at row `i` must derive only from rows `<= i`.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn validate_params(&self, params: &StrategyParams) -> Result<(), crate::errors::ConfigError>;
    fn compute_signal(&self, features: &FeatureFrame, params: &StrategyParams) -> Vec<f64>;
}

/// Reference dual-SMA crossover strategy: long when the short SMA is
/// above the long SMA, flat/short otherwise. Expects
/// `legacy_sma_fast_<short_window>` / `legacy_sma_slow_<long_window>`
/// feature columns to already be present on the frame.
pub struct DualSmaStrategy;

impl Strategy for DualSmaStrategy {
    fn name(&self) -> &str {
        "dual_sma"
    }

    fn validate_params(&self, params: &StrategyParams) -> Result<(), crate::errors::ConfigError> {
        let short = params.get("short_window").ok_or_else(|| {
            crate::errors::ConfigError::MissingField("short_window".to_string())
        })?;
        let long = params
            .get("long_window")
            .ok_or_else(|| crate::errors::ConfigError::MissingField("long_window".to_string()))?;
        if !(short < long) {
            return Err(crate::errors::ConfigError::CrossField(
                "dual_sma.short_window must be < dual_sma.long_window".to_string(),
            ));
        }
        Ok(())
    }

    fn compute_signal(&self, features: &FeatureFrame, params: &StrategyParams) -> Vec<f64> {
        let short = params.get("short_window").unwrap_or(0.0) as usize;
        let long = params.get("long_window").unwrap_or(0.0) as usize;
        let fast_col = format!("legacy_sma_fast_{short}");
        let slow_col = format!("legacy_sma_slow_{long}");
        let fast = features.column(&fast_col);
        let slow = features.column(&slow_col);
        let n = features.len();
        match (fast, slow) {
            (Some(fast), Some(slow)) => (0..n)
                .map(|i| {
                    if fast[i].is_nan() || slow[i].is_nan() {
                        0.0
                    } else if fast[i] > slow[i] {
                        1.0
                    } else {
                        -1.0
                    }
                })
                .collect(),
            _ => vec![0.0; n],
        }
    }
}

pub struct StrategyRegistry;

impl StrategyRegistry {
    pub fn load(name: &str) -> Option<Box<dyn Strategy>> {
        match name {
            "dual_sma" => Some(Box::new(DualSmaStrategy)),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
