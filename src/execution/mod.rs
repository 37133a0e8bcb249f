//! T+1 execution simulator (spec §4.6).
//!
//! Each row may open a fill corresponding to the **previous** row's
//! signal, priced off the current row's open and pushed through a
//! slippage chain: optional spread/participation model, then fixed-bps
//! slippage, then fees.

#[derive(Debug, Clone, Default)]
pub struct ExtendedSlippageModel {
    pub spread_pct: Option<f64>,
    pub participation_rate_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub slippage_model: Option<ExtendedSlippageModel>,
    pub skip_zero_volume: bool,
    pub flatten_end: bool,
    pub initial_cash: f64,
}

impl Default for ExecutionConfig {
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

#[derive(Debug, Clone)]
pub struct Fill {
    pub timestamp: i64,
    pub side: i64,
    pub qty: f64,
    pub price: f64,
    pub cost_basis: f64,
    pub cash_after: f64,
    pub position_after: f64,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub timestamp: i64,
    pub position: f64,
    pub cash: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub fills: Vec<Fill>,
    pub positions: Vec<PositionSnapshot>,
}

fn apply_spread(price: f64, side: f64, spread_pct: f64) -> f64 {
    // Spread works against the trade: buys pay up, sells receive less.
    price + side * (spread_pct / 2.0) * price
}

fn apply_participation(price: f64, side: f64, qty: f64, volume: f64, participation_pct: f64) -> f64 {
    if volume <= 0.0 {
        return price;
    }
    let impact = (qty / volume * participation_pct).min(1.0);
    price * (1.0 + side * impact)
}

fn apply_fixed_bps(price: f64, side: f64, bps: f64) -> f64 {
    price * (1.0 + side * bps / 10_000.0)
}

/// Run the full slippage chain against a base `open` price for a trade of
/// `side` (+1 buy, -1 sell) and `qty`.
fn execute_price(base_price: f64, side: f64, qty: f64, volume: f64, cfg: &ExecutionConfig) -> f64 {
    let mut price = base_price;
    if let Some(model) = &cfg.slippage_model {
        if let Some(spread_pct) = model.spread_pct {
            price = apply_spread(price, side, spread_pct);
        }
        if let Some(participation_pct) = model.participation_rate_pct {
            price = apply_participation(price, side, qty, volume, participation_pct);
        }
    }
    price = apply_fixed_bps(price, side, cfg.slippage_bps);
    price = apply_fixed_bps(price, side, cfg.fee_bps);
    price
}

/// Simulate fills and equity over a frame given a `position_size` series
/// (output of a risk-sizing model) aligned to `open`/`close`/`volume`.
pub fn simulate(
    ts: &[i64],
    open: &[f64],
    close: &[f64],
    volume: &[f64],
    signal: &[f64],
    position_size: &[f64],
    cfg: &ExecutionConfig,
) -> ExecutionResult {
    let n = ts.len();
    let mut result = ExecutionResult::default();
    let mut cash = cfg.initial_cash;
    let mut position = 0.0_f64;

    for i in 0..n {
        if i > 0 {
            let prev_signal = signal[i - 1];
            let direction = prev_signal.signum();
            let target = direction * position_size[i - 1];
            let delta = target - position;
            if delta != 0.0 {
                let zero_volume = volume[i] <= 0.0;
                if !(cfg.skip_zero_volume && zero_volume) {
                    let side = delta.signum();
                    let qty = delta.abs();
                    let price = execute_price(open[i], side, qty, volume[i], cfg);
                    let cost_basis = side * qty * price;
                    cash -= cost_basis;
                    position += delta;
                    result.fills.push(Fill {
                        timestamp: ts[i],
                        side: side as i64,
                        qty,
                        price,
                        cost_basis,
                        cash_after: cash,
                        position_after: position,
                        synthetic: false,
                    });
                }
            }
        }
        let equity = cash + position * close[i];
        result.positions.push(PositionSnapshot {
            timestamp: ts[i],
            position,
            cash,
            equity,
        });
    }

    if cfg.flatten_end && position != 0.0 && n > 0 {
        let last = n - 1;
        let side = -position.signum();
        let qty = position.abs();
        let price = close[last];
        let cost_basis = side * qty * price;
        cash -= cost_basis;
        position = 0.0;
        result.fills.push(Fill {
            timestamp: ts[last],
            side: side as i64,
            qty,
            price,
            cost_basis,
            cash_after: cash,
            position_after: position,
            synthetic: true,
        });
        let equity = cash + position * close[last];
        result.positions.push(PositionSnapshot {
            timestamp: ts[last],
            position,
            cash,
            equity,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_opens_one_bar_after_signal_at_current_open() {
        let ts = vec![0, 1, 2];
        let open = vec![100.0, 101.0, 102.0];
        let close = vec![100.0, 101.0, 102.0];
        let volume = vec![10.0, 10.0, 10.0];
        let signal = vec![1.0, 1.0, 1.0];
        let size = vec![5.0, 5.0, 5.0];
        let cfg = ExecutionConfig::default();
        let result = simulate(&ts, &open, &close, &volume, &signal, &size, &cfg);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].timestamp, 1);
        assert_eq!(result.fills[0].price, 101.0);
    }

    #[test]
    fn fixed_bps_slippage_and_fees_move_price_against_the_trade() {
        let ts = vec![0, 1];
        let open = vec![100.0, 100.0];
        let close = vec![100.0, 100.0];
        let volume = vec![10.0, 10.0];
        let signal = vec![1.0, 1.0];
        let size = vec![1.0, 1.0];
        let cfg = ExecutionConfig {
            fee_bps: 10.0,
            slippage_bps: 20.0,
            ..Default::default()
        };
        let result = simulate(&ts, &open, &close, &volume, &signal, &size, &cfg);
        assert!(result.fills[0].price > 100.0);
    }

    #[test]
    fn skip_zero_volume_misses_the_fill() {
        let ts = vec![0, 1];
        let open = vec![100.0, 100.0];
        let close = vec![100.0, 100.0];
        let volume = vec![10.0, 0.0];
        let signal = vec![1.0, 1.0];
        let size = vec![1.0, 1.0];
        let cfg = ExecutionConfig {
            skip_zero_volume: true,
            ..Default::default()
        };
        let result = simulate(&ts, &open, &close, &volume, &signal, &size, &cfg);
        assert!(result.fills.is_empty());
    }

    #[test]
    fn flatten_end_appends_synthetic_closing_fill() {
        let ts = vec![0, 1];
        let open = vec![100.0, 100.0];
        let close = vec![100.0, 105.0];
        let volume = vec![10.0, 10.0];
        let signal = vec![1.0, 1.0];
        let size = vec![1.0, 1.0];
        let cfg = ExecutionConfig {
            flatten_end: true,
            ..Default::default()
        };
        let result = simulate(&ts, &open, &close, &volume, &signal, &size, &cfg);
        let last = result.fills.last().unwrap();
        assert!(last.synthetic);
        assert_eq!(last.position_after, 0.0);
    }

    #[test]
    fn equity_equals_cash_plus_position_times_close() {
        let ts = vec![0, 1];
        let open = vec![100.0, 100.0];
        let close = vec![100.0, 110.0];
        let volume = vec![10.0, 10.0];
        let signal = vec![1.0, 1.0];
        let size = vec![1.0, 1.0];
        let cfg = ExecutionConfig::default();
        let result = simulate(&ts, &open, &close, &volume, &signal, &size, &cfg);
        let last = result.positions.last().unwrap();
        assert_eq!(last.equity, last.cash + last.position * 110.0);
    }
}
