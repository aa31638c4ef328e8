use serde::Serialize;

use crate::types::{Holding, LedgerSummary, PortfolioStats, StatusSnapshot};

/// Log lines as returned to clients that ask for them explicitly.
#[derive(Debug, Serialize)]
pub struct LogsReport<'a> {
    pub logs: &'a [String],
}

/// Holdings plus the ledger rows that could not be applied.
#[derive(Debug, Serialize)]
pub struct HoldingsReport<'a> {
    pub holdings: &'a [Holding],
    pub skipped: LedgerSummary,
}

/// Stats plus the ledger rows that could not be applied.
#[derive(Debug, Serialize)]
pub struct StatsReport<'a> {
    #[serde(flatten)]
    pub stats: &'a PortfolioStats,
    pub skipped: LedgerSummary,
}

/// Emit a value as a single JSON line to stdout.
pub fn report<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

/// Emit a status snapshot (counts only, no log content).
pub fn report_status(status: &StatusSnapshot) {
    report(status);
}

/// Emit the buffered log lines, oldest first.
pub fn report_logs(logs: &[String]) {
    report(&LogsReport { logs });
}

/// Emit holdings as pretty-printed JSON to stdout.
pub fn report_holdings(holdings: &[Holding], skipped: LedgerSummary) {
    if let Ok(json) = serde_json::to_string_pretty(&HoldingsReport { holdings, skipped }) {
        println!("{json}");
    }
}

/// Emit portfolio stats as pretty-printed JSON to stdout.
pub fn report_stats(stats: &PortfolioStats, skipped: LedgerSummary) {
    if let Ok(json) = serde_json::to_string_pretty(&StatsReport { stats, skipped }) {
        println!("{json}");
    }
}
