//! `af-brain` — command-line entrypoint over [`alphaforge_brain::Engine`]
//! (spec §6 core operations). One process per invocation: there is no
//! long-lived server here, so `submit` blocks until the run reaches a
//! terminal state and prints its final record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use alphaforge_brain::config::AppConfig;
use alphaforge_brain::dataset::adjustments::AdjustmentPolicy;
use alphaforge_brain::orchestrator::config::{
    CausalityModeConfig, ExecutionSpec, ExtendedSlippageSpec, IndicatorSpec, RiskSpec, RunConfig,
    StrategySpec, ValidationSpecConfig,
};
use alphaforge_brain::Engine;

#[derive(Parser, Debug)]
#[command(name = "af-brain")]
#[command(about = "Deterministic backtesting engine for financial trading strategies")]
struct Cli {
    /// Artifact root directory (overrides ALPHAFORGEB_ARTIFACT_ROOT).
    #[arg(long, global = true)]
    artifact_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a run configuration (JSON file) and block until it completes.
    Submit {
        /// Path to a JSON run-config file (see `RunConfigFile`).
        config: PathBuf,
    },
    /// Print the current record for a run hash.
    Get { run_hash: String },
    /// Print events newer than `--since`, if any.
    Events {
        run_hash: String,
        #[arg(long)]
        since: Option<u64>,
    },
    /// Pin a run so retention never demotes it.
    Pin { run_hash: String },
    /// Remove a pin.
    Unpin { run_hash: String },
    /// Restore a demoted run's artifacts from `.evicted/`.
    Rehydrate { run_hash: String },
    /// Restore a demoted run, preferring cold storage when configured.
    Restore { run_hash: String },
    /// Print the retention plan the current registry would produce.
    PlanRetention,
    /// Compute and physically apply the current retention plan.
    ApplyRetention,
    /// Print `{manifest_hash, metrics_hash, equity_curve_hash, provenance_hash}`.
    Hashes { run_hash: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut app_config = AppConfig::from_env();
    if let Some(root) = cli.artifact_root {
        app_config.artifact_root = root;
    }
    alphaforge_brain::config::init_tracing(&app_config);

    let engine = Engine::new(app_config);

    match cli.command {
        Commands::Submit { config } => cmd_submit(&engine, &config),
        Commands::Get { run_hash } => cmd_get(&engine, &run_hash),
        Commands::Events { run_hash, since } => cmd_events(&engine, &run_hash, since),
        Commands::Pin { run_hash } => {
            engine.pin(&run_hash).with_context(|| format!("pinning {run_hash}"))?;
            println!("pinned {run_hash}");
            Ok(())
        }
        Commands::Unpin { run_hash } => {
            engine.unpin(&run_hash).with_context(|| format!("unpinning {run_hash}"))?;
            println!("unpinned {run_hash}");
            Ok(())
        }
        Commands::Rehydrate { run_hash } => {
            engine.rehydrate(&run_hash).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("rehydrated {run_hash}");
            Ok(())
        }
        Commands::Restore { run_hash } => {
            let outcome = engine.restore(&run_hash).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!(
                "{}",
                serde_json::json!({"restored": outcome.restored, "noop": outcome.noop})
            );
            Ok(())
        }
        Commands::PlanRetention => {
            let plan = engine.plan_retention();
            println!("{}", serde_json::to_string_pretty(&plan_to_json(&plan))?);
            Ok(())
        }
        Commands::ApplyRetention => {
            let plan = engine.plan_retention();
            engine.apply_retention(&plan).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&plan_to_json(&plan))?);
            Ok(())
        }
        Commands::Hashes { run_hash } => cmd_hashes(&engine, &run_hash),
    }
}

fn cmd_submit(engine: &Engine, config_path: &PathBuf) -> Result<()> {
    let config = load_run_config(config_path)?;
    // A run that fails mid-pipeline surfaces as `Err` here (the
    // orchestrator records the failure on the run before propagating it),
    // so a successful return always carries a terminal COMPLETE or
    // CANCELLED record.
    let outcome = engine.submit(config).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!(
        "{}",
        serde_json::json!({
            "run_hash": outcome.run_hash,
            "created": outcome.created,
            "status": outcome.record.status.as_str(),
        })
    );
    Ok(())
}

fn cmd_get(engine: &Engine, run_hash: &str) -> Result<()> {
    let record = engine.get_record(run_hash).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!(
        "{}",
        serde_json::json!({
            "run_hash": record.run_hash,
            "status": record.status.as_str(),
            "retention_state": record.retention_state.as_str(),
            "pinned": record.pinned,
            "metrics_hash": record.metrics_hash,
            "equity_curve_hash": record.equity_curve_hash,
            "manifest_hash": record.manifest_hash,
            "p_values": {
                "perm": record.p_values.perm,
                "bb": record.p_values.bb,
                "mc": record.p_values.mc,
            },
        })
    );
    Ok(())
}

fn cmd_events(engine: &Engine, run_hash: &str, since: Option<u64>) -> Result<()> {
    for event in engine.stream_events(run_hash, since) {
        println!("{} {} {}", event.id, event.event_type, alphaforge_brain::canonical::canonical_json(&event.data));
    }
    Ok(())
}

fn cmd_hashes(engine: &Engine, run_hash: &str) -> Result<()> {
    let hashes = engine.hashes(run_hash).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!(
        "{}",
        serde_json::json!({
            "manifest_hash": hashes.manifest_hash,
            "metrics_hash": hashes.metrics_hash,
            "equity_curve_hash": hashes.equity_curve_hash,
            "provenance_hash": hashes.provenance_hash,
        })
    );
    Ok(())
}

fn plan_to_json(plan: &alphaforge_brain::retention::RetentionPlan) -> serde_json::Value {
    serde_json::json!({
        "pinned": plan.pinned,
        "keep_full": plan.keep_full,
        "top_k": plan.top_k,
        "demote": plan.demote,
    })
}

/// JSON shape accepted by `submit`. Mirrors [`RunConfig`] field-for-field;
/// unset optional sections fall back to their orchestrator defaults, the
/// same posture `RunConfig`'s own `Default` impls take internally.
#[derive(serde::Deserialize)]
struct RunConfigFile {
    symbol: String,
    timeframe: String,
    start: String,
    end: String,
    dataset_path: String,
    #[serde(default)]
    indicators: Vec<IndicatorSpecFile>,
    strategy: StrategySpecFile,
    risk: RiskSpecFile,
    #[serde(default)]
    execution: Option<ExecutionSpecFile>,
    #[serde(default)]
    validation: Option<ValidationSpecFile>,
    #[serde(default)]
    causality_mode: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default = "default_tz")]
    tz_name: String,
    #[serde(default)]
    calendar_id: Option<String>,
    #[serde(default)]
    adjustment_policy: Option<String>,
    #[serde(default)]
    chunk_size: i64,
    #[serde(default)]
    overlap: i64,
}

fn default_tz() -> String {
    "America/New_York".to_string()
}

#[derive(serde::Deserialize)]
struct IndicatorSpecFile {
    name: String,
    #[serde(default)]
    params: BTreeMap<String, f64>,
}

#[derive(serde::Deserialize)]
struct StrategySpecFile {
    name: String,
    #[serde(default)]
    params: BTreeMap<String, f64>,
}

#[derive(serde::Deserialize)]
struct RiskSpecFile {
    model: String,
    #[serde(default)]
    params: BTreeMap<String, f64>,
}

#[derive(serde::Deserialize, Default)]
struct ExtendedSlippageSpecFile {
    spread_pct: Option<f64>,
    participation_rate_pct: Option<f64>,
}

#[derive(serde::Deserialize)]
struct ExecutionSpecFile {
    #[serde(default)]
    fee_bps: f64,
    #[serde(default)]
    slippage_bps: f64,
    #[serde(default)]
    slippage_model: Option<ExtendedSlippageSpecFile>,
    #[serde(default)]
    skip_zero_volume: bool,
    #[serde(default)]
    flatten_end: bool,
    #[serde(default = "default_initial_cash")]
    initial_cash: f64,
}

fn default_initial_cash() -> f64 {
    100_000.0
}

#[derive(serde::Deserialize, Default)]
struct ValidationSpecFile {
    permutation_n_iter: Option<u64>,
    block_bootstrap_block_size: Option<usize>,
    block_bootstrap_n_iter: Option<u64>,
    hadj_bb_n_iter: Option<u64>,
    #[serde(default)]
    hadj_bb_ci_level: f64,
    #[serde(default)]
    hadj_bb_tau: f64,
    monte_carlo_n_iter: Option<u64>,
    walk_forward_n_folds: Option<usize>,
    gate_max_ci_width: Option<f64>,
}

fn load_run_config(path: &PathBuf) -> Result<RunConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: RunConfigFile = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let execution = file.execution.map(|e| ExecutionSpec {
        fee_bps: e.fee_bps,
        slippage_bps: e.slippage_bps,
        slippage_model: e.slippage_model.map(|m| ExtendedSlippageSpec {
            spread_pct: m.spread_pct,
            participation_rate_pct: m.participation_rate_pct,
        }),
        skip_zero_volume: e.skip_zero_volume,
        flatten_end: e.flatten_end,
        initial_cash: e.initial_cash,
    });

    let validation = file.validation.map(|v| ValidationSpecConfig {
        permutation_n_iter: v.permutation_n_iter,
        block_bootstrap_block_size: v.block_bootstrap_block_size,
        block_bootstrap_n_iter: v.block_bootstrap_n_iter,
        hadj_bb_n_iter: v.hadj_bb_n_iter,
        hadj_bb_ci_level: v.hadj_bb_ci_level,
        hadj_bb_tau: v.hadj_bb_tau,
        monte_carlo_n_iter: v.monte_carlo_n_iter,
        monte_carlo_model: None,
        walk_forward_n_folds: v.walk_forward_n_folds,
        gate_max_ci_width: v.gate_max_ci_width,
    });

    let causality_mode = match file.causality_mode.as_deref() {
        Some("strict") => CausalityModeConfig::Strict,
        _ => CausalityModeConfig::Permissive,
    };
    let adjustment_policy = match file.adjustment_policy.as_deref() {
        Some("full_adjusted") => AdjustmentPolicy::FullAdjusted,
        _ => AdjustmentPolicy::None,
    };

    Ok(RunConfig {
        symbol: file.symbol,
        timeframe: file.timeframe,
        start: file.start,
        end: file.end,
        indicators: file
            .indicators
            .into_iter()
            .map(|i| IndicatorSpec { name: i.name, params: i.params })
            .collect(),
        strategy: StrategySpec { name: file.strategy.name, params: file.strategy.params },
        risk: RiskSpec { model: file.risk.model, params: file.risk.params },
        execution: execution.unwrap_or_default(),
        validation: validation.unwrap_or_default(),
        causality_mode,
        seed: file.seed,
        dataset_path: file.dataset_path,
        tz_name: file.tz_name,
        calendar_id: file.calendar_id,
        adjustment_policy,
        chunk_size: file.chunk_size,
        overlap: file.overlap,
    })
}

