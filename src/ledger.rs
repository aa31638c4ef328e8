use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::types::{Holding, LedgerSummary, PortfolioStats, Trade};

/// Running position for one symbol during a single aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HoldingAccumulator {
    pub quantity: f64,
    pub cost_basis: f64,
}

impl HoldingAccumulator {
    pub fn average_price(&self) -> f64 {
        if self.quantity > 0.0 {
            self.cost_basis / self.quantity
        } else {
            0.0
        }
    }
}

/// Per-symbol accumulators in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    positions: Vec<(String, HoldingAccumulator)>,
    pub summary: LedgerSummary,
}

impl Ledger {
    pub fn get(&self, symbol: &str) -> Option<&HoldingAccumulator> {
        self.positions
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, acc)| acc)
    }

    /// Symbols with a positive running quantity, in first-appearance order.
    pub fn active(&self) -> impl Iterator<Item = (&str, &HoldingAccumulator)> {
        self.positions
            .iter()
            .filter(|(_, acc)| acc.quantity > 0.0)
            .map(|(s, acc)| (s.as_str(), acc))
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.active().map(|(s, _)| s.to_string()).collect()
    }
}

enum Action {
    Acquire,
    Sell,
    Unrecognized,
}

fn classify(action: &str) -> Action {
    match action.trim().to_ascii_uppercase().as_str() {
        "BUY" | "AVERAGE" => Action::Acquire,
        "SELL" => Action::Sell,
        _ => Action::Unrecognized,
    }
}

/// Replay `trades` in order using a moving weighted-average cost basis.
///
/// BUY/AVERAGE add quantity and cost. SELL removes quantity at the running
/// average price; a SELL against a non-positive quantity changes nothing and
/// is counted in `summary.ignored_sells`. Other actions are counted in
/// `summary.unrecognized_actions` and skipped.
pub fn accumulate(trades: &[Trade]) -> Ledger {
    let mut ledger = Ledger::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for trade in trades {
        let symbol = trade.symbol.trim();
        let slot = match index.get(symbol) {
            Some(&i) => i,
            None => {
                ledger
                    .positions
                    .push((symbol.to_string(), HoldingAccumulator::default()));
                index.insert(symbol.to_string(), ledger.positions.len() - 1);
                ledger.positions.len() - 1
            }
        };
        let acc = &mut ledger.positions[slot].1;

        match classify(&trade.action) {
            Action::Acquire => {
                acc.quantity += trade.quantity;
                acc.cost_basis += trade.total_cost;
            }
            Action::Sell => {
                if acc.quantity > 0.0 {
                    let avg_price = acc.cost_basis / acc.quantity;
                    acc.quantity -= trade.quantity;
                    acc.cost_basis -= trade.quantity * avg_price;
                } else {
                    ledger.summary.ignored_sells += 1;
                    warn!(
                        "Ignoring SELL of {} {symbol} (trade {}): no quantity held",
                        trade.quantity, trade.id
                    );
                }
            }
            Action::Unrecognized => {
                ledger.summary.unrecognized_actions += 1;
                warn!(
                    "Skipping trade {} for {symbol}: unrecognized action '{}'",
                    trade.id, trade.action
                );
            }
        }
    }

    ledger
}

/// Turn a ledger into holdings, pricing each from `prices` when a positive
/// price is known and falling back to the average price otherwise.
pub fn holdings(ledger: &Ledger, prices: &HashMap<String, f64>) -> Vec<Holding> {
    ledger
        .active()
        .map(|(symbol, acc)| {
            let average_price = acc.average_price();
            let current_price = prices
                .get(symbol)
                .copied()
                .filter(|p| *p > 0.0)
                .unwrap_or(average_price);
            Holding {
                symbol: symbol.to_string(),
                quantity: acc.quantity,
                average_price,
                current_price,
            }
        })
        .collect()
}

/// Aggregate a trade list straight into holdings.
pub fn aggregate(trades: &[Trade], prices: &HashMap<String, f64>) -> Vec<Holding> {
    holdings(&accumulate(trades), prices)
}

/// Totals across held symbols. Symbols without a positive price are valued at cost.
pub fn portfolio_stats(
    ledger: &Ledger,
    total_trades: usize,
    prices: &HashMap<String, f64>,
) -> PortfolioStats {
    let mut total_cost = 0.0;
    let mut total_value = 0.0;
    for (symbol, acc) in ledger.active() {
        total_cost += acc.cost_basis;
        total_value += match prices.get(symbol).copied().filter(|p| *p > 0.0) {
            Some(ltp) => acc.quantity * ltp,
            None => acc.cost_basis,
        };
    }
    PortfolioStats {
        total_trades,
        total_cost,
        total_value,
    }
}

/// Read an ordered trade list from a JSON array file.
pub fn load_trades(path: &Path) -> Result<Vec<Trade>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trades: Vec<Trade> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse trades in {}", path.display()))?;
    debug!("Loaded {} trades from {}", trades.len(), path.display());
    Ok(trades)
}
