//! Run configuration types (spec §3 `RunConfig`). Immutable once
//! constructed from a submission payload; never mutated afterward.

use std::collections::BTreeMap;

use crate::errors::ConfigError;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct IndicatorSpec {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct StrategySpec {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct RiskSpec {
    pub model: String,
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ExtendedSlippageSpec {
    pub spread_pct: Option<f64>,
    pub participation_rate_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub slippage_model: Option<ExtendedSlippageSpec>,
    pub skip_zero_volume: bool,
    pub flatten_end: bool,
    pub initial_cash: f64,
}

impl Default for ExecutionSpec {
    fn default() -> Self {
        Self {
            fee_bps: 0.0,
            slippage_bps: 0.0,
            slippage_model: None,
            skip_zero_volume: false,
            flatten_end: false,
            initial_cash: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationSpecConfig {
    pub permutation_n_iter: Option<u64>,
    pub block_bootstrap_block_size: Option<usize>,
    pub block_bootstrap_n_iter: Option<u64>,
    pub hadj_bb_n_iter: Option<u64>,
    pub hadj_bb_ci_level: f64,
    pub hadj_bb_tau: f64,
    pub monte_carlo_n_iter: Option<u64>,
    pub monte_carlo_model: Option<crate::validation::SlippageNoiseModel>,
    pub walk_forward_n_folds: Option<usize>,
    pub gate_max_ci_width: Option<f64>,
}

impl ValidationSpecConfig {
    pub fn to_validation_spec(&self) -> crate::validation::ValidationSpec {
        crate::validation::ValidationSpec {
            permutation_n_iter: self.permutation_n_iter,
            block_bootstrap_block_size: self.block_bootstrap_block_size,
            block_bootstrap_n_iter: self.block_bootstrap_n_iter,
            hadj_bb_n_iter: self.hadj_bb_n_iter,
            hadj_bb_ci_level: if self.hadj_bb_ci_level > 0.0 { self.hadj_bb_ci_level } else { 0.95 },
            hadj_bb_tau: if self.hadj_bb_tau > 0.0 { self.hadj_bb_tau } else { 0.1 },
            monte_carlo_n_iter: self.monte_carlo_n_iter,
            monte_carlo_model: self.monte_carlo_model,
            walk_forward_n_folds: self.walk_forward_n_folds,
            gate_max_ci_width: self.gate_max_ci_width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalityModeConfig {
    Strict,
    Permissive,
}

impl Default for CausalityModeConfig {
    fn default() -> Self {
        Self::Permissive
    }
}

/// Immutable run submission payload (spec §3 `RunConfig`).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start: String,
    pub end: String,
    pub indicators: Vec<IndicatorSpec>,
    pub strategy: StrategySpec,
    pub risk: RiskSpec,
    pub execution: ExecutionSpec,
    pub validation: ValidationSpecConfig,
    pub causality_mode: CausalityModeConfig,
    pub seed: Option<u64>,
    pub dataset_path: String,
    pub tz_name: String,
    pub calendar_id: Option<String>,
    pub adjustment_policy: crate::dataset::adjustments::AdjustmentPolicy,
    pub chunk_size: i64,
    pub overlap: i64,
}

/// Cross-field validation (spec §3 invariant, §7 `ConfigError`). Strategy
/// parameter aliases are normalized before this runs.
pub fn validate(config: &RunConfig) -> Result<(), ConfigError> {
    if config.symbol.trim().is_empty() {
        return Err(ConfigError::MissingField("symbol".to_string()));
    }
    if config.start >= config.end {
        return Err(ConfigError::InvalidRange {
            field: "start/end".to_string(),
            detail: "start must precede end".to_string(),
        });
    }
    if config.strategy.name == "dual_sma" {
        let fast = config.strategy.params.get("fast").or_else(|| config.strategy.params.get("short_window"));
        let slow = config.strategy.params.get("slow").or_else(|| config.strategy.params.get("long_window"));
        if let (Some(f), Some(s)) = (fast, slow) {
            if !(f < s) {
                return Err(ConfigError::CrossField(
                    "dual_sma.fast must be < dual_sma.slow".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn params_to_value(params: &BTreeMap<String, f64>) -> Value {
    let mut v = Value::map();
    for (k, val) in params {
        v = v.set(k.clone(), *val);
    }
    v.build()
}

/// Canonical `Value` projection of the config, used as the input to
/// `canonical::run_hash` (spec §4.1). Field order here is irrelevant —
/// `Value::Map` sorts on serialization — but every hash-participating
/// field must be represented.
pub fn to_canonical_value(config: &RunConfig) -> Value {
    let indicators: Vec<Value> = config
        .indicators
        .iter()
        .map(|ind| {
            Value::map()
                .set("name", ind.name.clone())
                .set("params", params_to_value(&ind.params))
                .build()
        })
        .collect();

    Value::map()
        .set("symbol", config.symbol.clone())
        .set("timeframe", config.timeframe.clone())
        .set("start", config.start.clone())
        .set("end", config.end.clone())
        .set("indicators", Value::List(indicators))
        .set(
            "strategy",
            Value::map()
                .set("name", config.strategy.name.clone())
                .set("params", params_to_value(&config.strategy.params))
                .build(),
        )
        .set(
            "risk",
            Value::map()
                .set("model", config.risk.model.clone())
                .set("params", params_to_value(&config.risk.params))
                .build(),
        )
        .set(
            "execution",
            Value::map()
                .set("fee_bps", config.execution.fee_bps)
                .set("slippage_bps", config.execution.slippage_bps)
                .set("skip_zero_volume", config.execution.skip_zero_volume)
                .set("flatten_end", config.execution.flatten_end)
                .build(),
        )
        .set_opt("seed", config.seed.map(|s| s as i64))
        .build()
}
