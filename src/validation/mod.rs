//! Statistical validation subsystem (spec §4.7): permutation test, simple
//! block bootstrap, HADJ-BB (ACF-selected block length with discrete
//! jitter), Monte-Carlo slippage stress, and walk-forward evaluation.
//! Every sub-method is seeded; identical `(seed, n_iter, inputs)` produce
//! identical distributions (spec property #7/#8).

pub mod utils;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rand::SeedableRng;

use utils::{concat_blocks, mean, one_sided_p_value, population_stddev, quantile, sample_block_indices, sub_seed};

/// Causality-safe trade return extraction: prefers `return_pct`, falls
/// back to `pnl / (qty * entry_price)` (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct TradeReturn {
    pub return_pct: Option<f64>,
    pub pnl: Option<f64>,
    pub qty: Option<f64>,
    pub entry_price: Option<f64>,
    pub entry_ts: i64,
    pub exit_ts: i64,
}

pub fn resolve_return(t: &TradeReturn) -> f64 {
    if let Some(r) = t.return_pct {
        return r;
    }
    match (t.pnl, t.qty, t.entry_price) {
        (Some(pnl), Some(qty), Some(price)) if qty.abs() > f64::EPSILON && price.abs() > f64::EPSILON => {
            pnl / (qty * price)
        }
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct DistributionResult {
    pub distribution: Vec<f64>,
    pub p_value: f64,
    pub observed_mean: f64,
}

/// Permutation test: shuffles the per-trade return series `n_iter` times
/// and reports the one-sided p-value of the observed mean against the
/// null (shuffled) means (spec §4.7, matching the original's
/// `rng.shuffle(shuffled)` then mean).
pub fn permutation_test(returns: &[f64], n_iter: u64, seed: u64) -> DistributionResult {
    let observed_mean = mean(returns);
    let mut distribution = Vec::with_capacity(n_iter as usize);
    let mut count_ge = 0u64;
    let mut shuffled: Vec<f64> = returns.to_vec();
    for i in 0..n_iter {
        let mut rng = ChaCha8Rng::seed_from_u64(sub_seed(seed, i));
        shuffled.copy_from_slice(returns);
        shuffled.shuffle(&mut rng);
        let shuffled_mean = mean(&shuffled);
        if shuffled_mean >= observed_mean {
            count_ge += 1;
        }
        distribution.push(shuffled_mean);
    }
    DistributionResult {
        distribution,
        p_value: one_sided_p_value(count_ge, n_iter),
        observed_mean,
    }
}

/// Simple block bootstrap: samples fixed-size blocks with replacement
/// until covering `N` observations, truncates to `N`, repeats `n_iter`
/// times, computes the one-sided p-value the same way as the permutation
/// test (spec §4.7).
pub fn simple_block_bootstrap(
    returns: &[f64],
    block_size: usize,
    n_iter: u64,
    seed: u64,
) -> DistributionResult {
    let observed_mean = mean(returns);
    let n = returns.len();
    let mut distribution = Vec::with_capacity(n_iter as usize);
    let mut count_ge = 0u64;
    for i in 0..n_iter {
        let mut rng = ChaCha8Rng::seed_from_u64(sub_seed(seed, i));
        let blocks = sample_block_indices(n, block_size, &mut rng);
        let resampled = concat_blocks(returns, &blocks, n);
        let trial_mean = mean(&resampled);
        if trial_mean >= observed_mean {
            count_ge += 1;
        }
        distribution.push(trial_mean);
    }
    DistributionResult {
        distribution,
        p_value: one_sided_p_value(count_ge, n_iter),
        observed_mean,
    }
}

/// Sample autocorrelation at `lag` (biased/denominator-N estimator, the
/// common convention for short trade-return series).
pub fn acf(series: &[f64], lag: usize) -> f64 {
    let n = series.len();
    if lag == 0 || lag >= n {
        return 0.0;
    }
    let m = mean(series);
    let denom: f64 = series.iter().map(|x| (x - m).powi(2)).sum();
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let numer: f64 = (0..n - lag).map(|i| (series[i] - m) * (series[i + lag] - m)).sum();
    numer / denom
}

#[derive(Debug, Clone)]
pub struct HadjBbResult {
    pub distribution: Vec<f64>,
    pub p_value: f64,
    pub ci: (f64, f64),
    pub block_length: usize,
    pub jitter: i32,
    pub fallback: bool,
    pub method: String,
}

/// Select the HADJ-BB block length from a precomputed ACF array (`acfs[i]`
/// is `ACF(lag = i + 1)`): the first lag `m` where the ACF descends from
/// its previous value (first-descent, not a strict local minimum), then
/// the smallest `k >= m` where both `ACF(k)` and `ACF(k+1)` fall below
/// `tau` (spec §4.7, matching the original's `_choose_block_length`
/// first-descent search on the raw, unsigned ACF values).
fn select_block_length(acfs: &[f64], tau: f64) -> usize {
    let l = acfs.len();
    if l == 0 {
        return 1;
    }
    let mut m = 1usize;
    for i in 1..l {
        if acfs[i] < acfs[i - 1] {
            m = i + 1;
            break;
        }
    }
    if acfs[m - 1] >= tau && acfs[l - 1] >= tau {
        return l;
    }
    for j in (m - 1)..l.saturating_sub(1) {
        if acfs[j] < tau && acfs[j + 1] < tau {
            return j + 1;
        }
    }
    l
}

/// HADJ-BB (Hybrid Adaptive Discrete Jitter Block Bootstrap): ACF-selected
/// block length, a single seeded discrete jitter draw in `{-1, 0, 1}`
/// applied once for the whole call, with an IID fallback for short or
/// weakly autocorrelated series (spec §4.7). Jitter is drawn once (not
/// per trial) and the reported `block_length` is the post-jitter
/// effective block, matching the original's single `rng.integers(-1, 2)`
/// draw and `block_length = eff_block`.
pub fn hadj_bb(
    returns: &[f64],
    n_iter: u64,
    seed: u64,
    ci_level: f64,
    tau: f64,
) -> HadjBbResult {
    let n = returns.len();
    let l = 50usize.min(n / 4).max(1);
    let acfs: Vec<f64> = (1..=l).map(|lag| acf(returns, lag)).collect();
    let k = select_block_length(&acfs, tau);
    let k_floor = k.max(((l as f64) * 0.9).ceil() as usize);
    let take = k.max(1).min(acfs.len());
    let mean_abs_acf: f64 = acfs[..take].iter().map(|v| v.abs()).sum::<f64>() / take as f64;

    let fallback = n < 5 * k_floor || mean_abs_acf < 0.05;

    if fallback {
        let block_size = 1usize;
        let mut distribution = Vec::with_capacity(n_iter as usize);
        let observed_mean = mean(returns);
        let mut count_ge = 0u64;
        for i in 0..n_iter {
            let mut rng = ChaCha8Rng::seed_from_u64(sub_seed(seed, i));
            let blocks = sample_block_indices(n, block_size, &mut rng);
            let resampled = concat_blocks(returns, &blocks, n);
            let trial_mean = mean(&resampled);
            if trial_mean >= observed_mean {
                count_ge += 1;
            }
            distribution.push(trial_mean);
        }
        let mut sorted = distribution.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let alpha = 1.0 - ci_level;
        let ci = (quantile(&sorted, alpha / 2.0), quantile(&sorted, 1.0 - alpha / 2.0));
        return HadjBbResult {
            distribution,
            p_value: one_sided_p_value(count_ge, n_iter),
            ci,
            block_length: block_size,
            jitter: 0,
            fallback: true,
            method: "simple".to_string(),
        };
    }

    let mut jitter_rng = ChaCha8Rng::seed_from_u64(seed);
    let jitter = if k >= 2 { jitter_rng.gen_range(-1i32..=1i32) } else { 0 };
    let effective_block = ((k as i64 + jitter as i64).max(2)) as usize;

    let observed_mean = mean(returns);
    let mut distribution = Vec::with_capacity(n_iter as usize);
    let mut count_ge = 0u64;
    for i in 0..n_iter {
        let mut rng = ChaCha8Rng::seed_from_u64(sub_seed(seed, i));
        let blocks = sample_block_indices(n, effective_block, &mut rng);
        let resampled = concat_blocks(returns, &blocks, n);
        let trial_mean = mean(&resampled);
        if trial_mean >= observed_mean {
            count_ge += 1;
        }
        distribution.push(trial_mean);
    }
    let mut sorted = distribution.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let alpha = 1.0 - ci_level;
    let ci = (quantile(&sorted, alpha / 2.0), quantile(&sorted, 1.0 - alpha / 2.0));

    HadjBbResult {
        distribution,
        p_value: one_sided_p_value(count_ge, n_iter),
        ci,
        block_length: effective_block,
        jitter,
        fallback: false,
        method: "hadj_bb".to_string(),
    }
}

/// Per-method gate: `gate_passed = (ci_width <= max_ci_width)` when
/// configured (spec §4.7).
pub fn gate_passed(ci: (f64, f64), max_ci_width: Option<f64>) -> Option<bool> {
    max_ci_width.map(|max_width| (ci.1 - ci.0) <= max_width)
}

#[derive(Debug, Clone, Copy)]
pub enum SlippageNoiseModel {
    Normal { mean: f64, std_dev: f64 },
    Uniform { low: f64, high: f64 },
}

#[derive(Debug, Clone)]
pub struct MonteCarloResult {
    pub distribution: Vec<f64>,
    pub p_value: f64,
    pub baseline_sharpe: f64,
}

fn sharpe(returns: &[f64]) -> f64 {
    let sd = population_stddev(returns);
    if sd < 1e-12 {
        return 0.0;
    }
    mean(returns) / sd * crate::metrics::annualization_factor()
}

/// Monte-Carlo slippage stress: perturbs returns with additive negative
/// noise, recomputes annualized Sharpe on each stressed series, and
/// reports the distribution of Sharpe deltas vs baseline plus the
/// fraction of deltas `>= 0` (spec §4.7).
pub fn monte_carlo_slippage(
    returns: &[f64],
    n_iter: u64,
    seed: u64,
    model: SlippageNoiseModel,
) -> MonteCarloResult {
    let baseline_sharpe = sharpe(returns);
    let mut distribution = Vec::with_capacity(n_iter as usize);
    let mut count_ge = 0u64;
    for i in 0..n_iter {
        let mut rng = ChaCha8Rng::seed_from_u64(sub_seed(seed, i));
        let stressed: Vec<f64> = returns
            .iter()
            .map(|r| r - draw_noise(model, &mut rng))
            .collect();
        let delta = sharpe(&stressed) - baseline_sharpe;
        if delta >= 0.0 {
            count_ge += 1;
        }
        distribution.push(delta);
    }
    MonteCarloResult {
        distribution,
        p_value: one_sided_p_value(count_ge, n_iter),
        baseline_sharpe,
    }
}

fn draw_noise(model: SlippageNoiseModel, rng: &mut ChaCha8Rng) -> f64 {
    match model {
        SlippageNoiseModel::Normal { mean, std_dev } => {
            let dist = Normal::new(mean, std_dev.max(1e-9)).expect("valid normal params");
            dist.sample(rng).max(0.0)
        }
        SlippageNoiseModel::Uniform { low, high } => {
            if high <= low {
                low.max(0.0)
            } else {
                rng.gen_range(low..high).max(0.0)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FoldMetrics {
    pub sharpe: f64,
    pub total_return: f64,
    pub max_drawdown_pct: f64,
    pub n_trades: usize,
}

#[derive(Debug, Clone, Default)]
pub struct WalkForwardResult {
    pub folds: Vec<FoldMetrics>,
    pub sharpe_mean: f64,
    pub sharpe_min: f64,
    pub sharpe_max: f64,
    pub max_dd_worst: f64,
}

fn fold_metrics(returns: &[f64]) -> FoldMetrics {
    let mut equity = 1.0;
    let mut curve = vec![equity];
    for r in returns {
        equity *= 1.0 + r;
        curve.push(equity);
    }
    let total_return = (curve.last().copied().unwrap_or(1.0) - 1.0) * 100.0;
    FoldMetrics {
        sharpe: sharpe(returns),
        total_return,
        max_drawdown_pct: crate::metrics::max_drawdown_pct(&curve),
        n_trades: returns.len(),
    }
}

/// Partitions a trade-return sequence (already ordered by `exit_ts`, per
/// spec §4.7) into `n_folds` contiguous, nearly-equal folds and computes
/// per-fold Sharpe/return/max-drawdown plus the cross-fold aggregate.
pub fn walk_forward(returns: &[f64], n_folds: usize) -> WalkForwardResult {
    if n_folds == 0 || returns.is_empty() {
        return WalkForwardResult::default();
    }
    let n = returns.len();
    let base = n / n_folds;
    let remainder = n % n_folds;
    let mut folds = Vec::with_capacity(n_folds);
    let mut start = 0usize;
    for i in 0..n_folds {
        let size = base + if i < remainder { 1 } else { 0 };
        let end = (start + size).min(n);
        if start < end {
            folds.push(fold_metrics(&returns[start..end]));
        } else {
            folds.push(FoldMetrics::default());
        }
        start = end;
    }
    let sharpes: Vec<f64> = folds.iter().map(|f| f.sharpe).collect();
    let sharpe_mean = mean(&sharpes);
    let sharpe_min = sharpes.iter().cloned().fold(f64::INFINITY, f64::min);
    let sharpe_max = sharpes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let max_dd_worst = folds
        .iter()
        .map(|f| f.max_drawdown_pct)
        .fold(0.0_f64, f64::max);
    WalkForwardResult {
        folds,
        sharpe_mean,
        sharpe_min,
        sharpe_max,
        max_dd_worst,
    }
}

/// All configured validation sub-methods, run against the same trade
/// returns and seed (spec §4.7 `run_all` aggregator — named in SPEC_FULL's
/// module listing).
#[derive(Debug, Clone, Default)]
pub struct ValidationSpec {
    pub permutation_n_iter: Option<u64>,
    pub block_bootstrap_block_size: Option<usize>,
    pub block_bootstrap_n_iter: Option<u64>,
    pub hadj_bb_n_iter: Option<u64>,
    pub hadj_bb_ci_level: f64,
    pub hadj_bb_tau: f64,
    pub monte_carlo_n_iter: Option<u64>,
    pub monte_carlo_model: Option<SlippageNoiseModel>,
    pub walk_forward_n_folds: Option<usize>,
    pub gate_max_ci_width: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub permutation: Option<DistributionResult>,
    pub block_bootstrap: Option<DistributionResult>,
    pub hadj_bb: Option<HadjBbResult>,
    pub monte_carlo: Option<MonteCarloResult>,
    pub walk_forward: Option<WalkForwardResult>,
    pub gate_passed: Option<bool>,
}

pub fn run_all(returns: &[f64], spec: &ValidationSpec, seed: u64) -> ValidationOutcome {
    let permutation = spec
        .permutation_n_iter
        .map(|n| permutation_test(returns, n, seed));
    let block_bootstrap = spec.block_bootstrap_n_iter.map(|n| {
        let block_size = spec.block_bootstrap_block_size.unwrap_or(5);
        simple_block_bootstrap(returns, block_size, n, seed)
    });
    let hadj_bb_result = spec
        .hadj_bb_n_iter
        .map(|n| hadj_bb(returns, n, seed, spec.hadj_bb_ci_level, spec.hadj_bb_tau));
    let monte_carlo = match (spec.monte_carlo_n_iter, spec.monte_carlo_model) {
        (Some(n), Some(model)) => Some(monte_carlo_slippage(returns, n, seed, model)),
        _ => None,
    };
    let walk_forward_result = spec.walk_forward_n_folds.map(|n| walk_forward(returns, n));
    let gate = hadj_bb_result
        .as_ref()
        .and_then(|r| gate_passed(r.ci, spec.gate_max_ci_width));

    ValidationOutcome {
        permutation,
        block_bootstrap,
        hadj_bb: hadj_bb_result,
        monte_carlo,
        walk_forward: walk_forward_result,
        gate_passed: gate,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
