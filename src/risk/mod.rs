//! Risk sizing models (spec §4.5). Each transforms a signal + context
//! into a position size; all three return `0.0` on invalid inputs
//! (non-positive price, out-of-range probability, non-finite result).

/// `size = (equity * fraction) / price` when `signal` is non-null (i.e.
/// nonzero), else 0.
pub fn fixed_fraction(signal: f64, equity: f64, price: f64, fraction: f64) -> f64 {
    if signal == 0.0 || price <= 0.0 {
        return 0.0;
    }
    let size = (equity * fraction) / price;
    guard_finite(size)
}

/// Scales `base_fraction` down by the ratio of `target_vol` to the
/// `lookback`-bar realized volatility of `returns`, capped at 1.
pub fn volatility_target(
    signal: f64,
    equity: f64,
    price: f64,
    returns: &[f64],
    lookback: usize,
    base_fraction: f64,
    target_vol: f64,
) -> f64 {
    if signal == 0.0 || price <= 0.0 {
        return 0.0;
    }
    let realized_vol = trailing_stddev(returns, lookback);
    if !realized_vol.is_finite() || realized_vol <= 0.0 {
        return 0.0;
    }
    let effective_fraction = (base_fraction * target_vol / realized_vol).min(1.0);
    let size = (equity * effective_fraction) / price;
    guard_finite(size)
}

fn trailing_stddev(returns: &[f64], lookback: usize) -> f64 {
    if returns.len() < 2 || lookback == 0 {
        return f64::NAN;
    }
    let window = &returns[returns.len().saturating_sub(lookback)..];
    let n = window.len() as f64;
    if n < 2.0 {
        return f64::NAN;
    }
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Kelly-criterion sizing: `f* = clamp(p_win - (1-p_win)/payoff_ratio, 0, 1)`,
/// `effective = min(1, f* * base_fraction)`.
pub fn kelly_fraction(
    signal: f64,
    equity: f64,
    price: f64,
    p_win: f64,
    payoff_ratio: f64,
    base_fraction: f64,
) -> f64 {
    if signal == 0.0 || price <= 0.0 {
        return 0.0;
    }
    if !(0.0..=1.0).contains(&p_win) || payoff_ratio <= 0.0 {
        return 0.0;
    }
    let kelly = (p_win - (1.0 - p_win) / payoff_ratio).clamp(0.0, 1.0);
    let effective_fraction = (kelly * base_fraction).min(1.0);
    let size = (equity * effective_fraction) / price;
    guard_finite(size)
}

fn guard_finite(size: f64) -> f64 {
    if size.is_finite() {
        size
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_fraction_sizes_proportional_to_equity() {
        assert_eq!(fixed_fraction(1.0, 10_000.0, 100.0, 0.1), 10.0);
    }

    #[test]
    fn fixed_fraction_is_zero_on_flat_signal() {
        assert_eq!(fixed_fraction(0.0, 10_000.0, 100.0, 0.1), 0.0);
    }

    #[test]
    fn fixed_fraction_is_zero_on_non_positive_price() {
        assert_eq!(fixed_fraction(1.0, 10_000.0, 0.0, 0.1), 0.0);
        assert_eq!(fixed_fraction(1.0, 10_000.0, -5.0, 0.1), 0.0);
    }

    #[test]
    fn volatility_target_shrinks_size_when_vol_exceeds_target() {
        let returns = vec![0.01, -0.02, 0.03, -0.01, 0.02, -0.03, 0.01];
        let size = volatility_target(1.0, 10_000.0, 100.0, &returns, 5, 0.2, 0.01);
        assert!(size > 0.0);
        assert!(size <= (10_000.0 * 0.2) / 100.0);
    }

    #[test]
    fn volatility_target_is_zero_when_vol_is_zero_or_nan() {
        let flat_returns = vec![0.0, 0.0, 0.0, 0.0];
        assert_eq!(
            volatility_target(1.0, 10_000.0, 100.0, &flat_returns, 3, 0.2, 0.01),
            0.0
        );
        assert_eq!(volatility_target(1.0, 10_000.0, 100.0, &[], 3, 0.2, 0.01), 0.0);
    }

    #[test]
    fn kelly_fraction_clamps_negative_edge_to_zero() {
        let size = kelly_fraction(1.0, 10_000.0, 100.0, 0.2, 1.0, 1.0);
        assert_eq!(size, 0.0);
    }

    #[test]
    fn kelly_fraction_rejects_out_of_range_probability() {
        assert_eq!(kelly_fraction(1.0, 10_000.0, 100.0, 1.5, 1.0, 1.0), 0.0);
        assert_eq!(kelly_fraction(1.0, 10_000.0, 100.0, -0.1, 1.0, 1.0), 0.0);
    }

    #[test]
    fn kelly_fraction_sizes_positive_edge() {
        let size = kelly_fraction(1.0, 10_000.0, 100.0, 0.6, 1.5, 1.0);
        assert!(size > 0.0);
    }
}
