use super::*;

fn synthetic_returns(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-0.02..0.02)).collect()
}

fn correlated_returns(n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n);
    let mut prev = 0.01;
    for i in 0..n {
        prev = 0.6 * prev + 0.01 * (i as f64 * 0.37).sin();
        out.push(prev);
    }
    out
}

#[test]
fn permutation_test_is_seeded_reproducible() {
    let returns = vec![0.01, -0.02, 0.03, 0.01, -0.01, 0.02];
    let a = permutation_test(&returns, 200, 7);
    let b = permutation_test(&returns, 200, 7);
    assert_eq!(a.distribution, b.distribution);
    assert_eq!(a.p_value, b.p_value);
}

#[test]
fn permutation_test_prefix_stability() {
    let returns = vec![0.01, -0.02, 0.03, 0.01, -0.01, 0.02, 0.015];
    let full = permutation_test(&returns, 100, 11);
    let prefix = permutation_test(&returns, 40, 11);
    assert_eq!(&full.distribution[..40], &prefix.distribution[..]);
}

#[test]
fn simple_block_bootstrap_is_seeded_reproducible() {
    let returns = synthetic_returns(30, 3);
    let a = simple_block_bootstrap(&returns, 4, 300, 42);
    let b = simple_block_bootstrap(&returns, 4, 300, 42);
    assert_eq!(a.distribution, b.distribution);
}

#[test]
fn hadj_bb_falls_back_on_weakly_correlated_short_series() {
    let returns = synthetic_returns(10, 99);
    let result = hadj_bb(&returns, 500, 7, 0.95, 0.1);
    assert!(result.fallback);
    assert_eq!(result.method, "simple");
    assert_eq!(result.distribution.len(), 500);
}

#[test]
fn hadj_bb_uses_adaptive_block_length_on_correlated_series() {
    let returns = correlated_returns(60);
    let result = hadj_bb(&returns, 500, 7, 0.95, 0.1);
    assert!(result.block_length >= 2);
    assert_eq!(result.distribution.len(), 500);
    let again = hadj_bb(&returns, 500, 7, 0.95, 0.1);
    assert_eq!(result.distribution, again.distribution);
}

#[test]
fn gate_passed_compares_ci_width_to_budget() {
    assert_eq!(gate_passed((0.0, 0.5), Some(1.0)), Some(true));
    assert_eq!(gate_passed((0.0, 1.5), Some(1.0)), Some(false));
    assert_eq!(gate_passed((0.0, 1.5), None), None);
}

#[test]
fn monte_carlo_distribution_is_seeded_reproducible() {
    let returns = synthetic_returns(50, 5);
    let model = SlippageNoiseModel::Normal { mean: 0.001, std_dev: 0.0005 };
    let a = monte_carlo_slippage(&returns, 200, 13, model);
    let b = monte_carlo_slippage(&returns, 200, 13, model);
    assert_eq!(a.distribution, b.distribution);
}

#[test]
fn monte_carlo_noise_never_improves_returns() {
    let returns = vec![0.01; 20];
    let model = SlippageNoiseModel::Uniform { low: 0.0, high: 0.005 };
    let result = monte_carlo_slippage(&returns, 50, 1, model);
    // Additive negative noise can only push Sharpe down or leave it flat.
    assert!(result.distribution.iter().all(|d| *d <= 1e-9));
}

#[test]
fn walk_forward_partitions_into_nearly_equal_folds() {
    let returns = synthetic_returns(103, 2);
    let result = walk_forward(&returns, 4);
    assert_eq!(result.folds.len(), 4);
    let total: usize = result.folds.iter().map(|f| f.n_trades).sum();
    assert_eq!(total, 103);
    let sizes: Vec<usize> = result.folds.iter().map(|f| f.n_trades).collect();
    assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
}

#[test]
fn walk_forward_aggregate_bounds_match_fold_extremes() {
    let returns = synthetic_returns(40, 9);
    let result = walk_forward(&returns, 4);
    let expected_min = result.folds.iter().map(|f| f.sharpe).fold(f64::INFINITY, f64::min);
    let expected_max = result.folds.iter().map(|f| f.sharpe).fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(result.sharpe_min, expected_min);
    assert_eq!(result.sharpe_max, expected_max);
}

#[test]
fn resolve_return_prefers_return_pct_over_pnl() {
    let t = TradeReturn {
        return_pct: Some(0.1),
        pnl: Some(999.0),
        qty: Some(1.0),
        entry_price: Some(1.0),
        entry_ts: 0,
        exit_ts: 1,
    };
    assert_eq!(resolve_return(&t), 0.1);
}

#[test]
fn resolve_return_falls_back_to_pnl_over_qty_times_price() {
    let t = TradeReturn {
        return_pct: None,
        pnl: Some(10.0),
        qty: Some(2.0),
        entry_price: Some(50.0),
        entry_ts: 0,
        exit_ts: 1,
    };
    assert_eq!(resolve_return(&t), 0.1);
}

#[test]
fn run_all_only_computes_configured_methods() {
    let returns = synthetic_returns(30, 4);
    let spec = ValidationSpec {
        permutation_n_iter: Some(50),
        ..Default::default()
    };
    let outcome = run_all(&returns, &spec, 1);
    assert!(outcome.permutation.is_some());
    assert!(outcome.block_bootstrap.is_none());
    assert!(outcome.hadj_bb.is_none());
}
