//! Run-level metrics computed from the execution result (spec §4.9
//! `metrics.json`, fed into `metrics_hash`/`equity_curve_hash` per §4.1).

use std::collections::BTreeMap;

use crate::execution::{ExecutionResult, Fill};
use crate::value::Value;

const MINUTES_PER_YEAR: f64 = 252.0 * 24.0 * 60.0;

/// Per-bar minute-scale annualization factor, matching the Monte-Carlo
/// stress subsystem's hardcoded `sqrt(252*24*60)` (spec §4.7, Open
/// Question #3 — retained as-is rather than parameterized by timeframe).
pub fn annualization_factor() -> f64 {
    MINUTES_PER_YEAR.sqrt()
}

#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub total_return_pct: f64,
    pub final_equity: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub total_fills: u64,
    pub avg_trade_pnl: f64,
}

impl RunMetrics {
    pub fn to_value_map(&self) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("total_return_pct".to_string(), Value::Float(self.total_return_pct));
        m.insert("final_equity".to_string(), Value::Float(self.final_equity));
        m.insert("sharpe_ratio".to_string(), Value::Float(self.sharpe_ratio));
        m.insert("max_drawdown_pct".to_string(), Value::Float(self.max_drawdown_pct));
        m.insert("win_rate".to_string(), Value::Float(self.win_rate));
        m.insert("total_fills".to_string(), Value::Int(self.total_fills as i64));
        m.insert("avg_trade_pnl".to_string(), Value::Float(self.avg_trade_pnl));
        m
    }
}

/// Per-bar returns derived from the equity curve (used by the
/// permutation/bootstrap validation subsystem and here for Sharpe).
pub fn equity_returns(result: &ExecutionResult) -> Vec<f64> {
    result
        .positions
        .windows(2)
        .map(|w| {
            if w[0].equity.abs() < f64::EPSILON {
                0.0
            } else {
                (w[1].equity - w[0].equity) / w[0].equity
            }
        })
        .collect()
}

fn sharpe_from_returns(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev < 1e-9 {
        return 0.0;
    }
    mean / std_dev * annualization_factor()
}

/// Maximum peak-to-trough drawdown, as a fraction of the running peak.
pub fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0;
    for &e in equity {
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            let dd = (peak - e) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst * 100.0
}

/// Per-trade return percentage: closed round trips paired by matching
/// opposite-side fills in order. Used by the permutation test, which
/// prefers `return_pct` when present (spec §4.7).
pub fn trade_returns(fills: &[Fill]) -> Vec<f64> {
    let mut returns = Vec::new();
    let mut open_side = 0i64;
    let mut open_price = 0.0;
    for fill in fills {
        if open_side == 0 {
            open_side = fill.side;
            open_price = fill.price;
            continue;
        }
        if fill.side != open_side {
            let pct = open_side as f64 * (fill.price - open_price) / open_price;
            returns.push(pct);
            open_side = 0;
        } else {
            open_side = fill.side;
            open_price = fill.price;
        }
    }
    returns
}

pub fn compute(result: &ExecutionResult) -> RunMetrics {
    let equity: Vec<f64> = result.positions.iter().map(|p| p.equity).collect();
    let initial_equity = equity.first().copied().unwrap_or(0.0);
    let final_equity = equity.last().copied().unwrap_or(0.0);
    let total_return_pct = if initial_equity.abs() > f64::EPSILON {
        (final_equity - initial_equity) / initial_equity * 100.0
    } else {
        0.0
    };
    let returns = equity_returns(result);
    let sharpe_ratio = sharpe_from_returns(&returns);
    let max_dd = max_drawdown_pct(&equity);

    let trade_pcts = trade_returns(&result.fills);
    let win_rate = if trade_pcts.is_empty() {
        0.0
    } else {
        trade_pcts.iter().filter(|r| **r > 0.0).count() as f64 / trade_pcts.len() as f64
    };
    let avg_trade_pnl = if trade_pcts.is_empty() {
        0.0
    } else {
        trade_pcts.iter().sum::<f64>() / trade_pcts.len() as f64
    };

    RunMetrics {
        total_return_pct,
        final_equity,
        sharpe_ratio,
        max_drawdown_pct: max_dd,
        win_rate,
        total_fills: result.fills.len() as u64,
        avg_trade_pnl,
    }
}

/// `{curve: [(index, nav, drawdown), ...]}` input rows for
/// `canonical::equity_curve_hash` (spec §4.1).
pub fn equity_curve_rows(result: &ExecutionResult) -> Vec<(i64, f64, f64)> {
    let mut peak = f64::MIN;
    result
        .positions
        .iter()
        .enumerate()
        .map(|(idx, snapshot)| {
            if snapshot.equity > peak {
                peak = snapshot.equity;
            }
            let drawdown = if peak > 0.0 {
                (peak - snapshot.equity) / peak
            } else {
                0.0
            };
            (idx as i64, snapshot.equity, drawdown)
        })
        .collect()
}
