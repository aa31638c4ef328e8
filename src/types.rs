use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the trade ledger, as recorded by the trading bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    pub symbol: String,
    /// `BUY`, `SELL`, `AVERAGE` (any case). Anything else is skipped by the ledger.
    pub action: String,
    pub quantity: f64,
    #[serde(default)]
    pub price: f64,
    pub total_cost: f64,
}

/// A currently held position derived from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub average_price: f64,
    pub current_price: f64,
}

/// Portfolio totals over all held symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total_trades: usize,
    /// Remaining cost basis of everything still held.
    pub total_cost: f64,
    /// Market value at looked-up prices, cost basis where no price is known.
    pub total_value: f64,
}

/// Trades the ledger could not apply, kept so they are visible to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub unrecognized_actions: usize,
    /// SELLs against a symbol whose running quantity was not positive.
    pub ignored_sells: usize,
}

/// Lifecycle status of the supervised bot process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    #[default]
    Idle,
    Running,
    Error,
}

/// How the trading bot should be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Login,
    #[serde(rename = "run_now_dry")]
    DryRunImmediate,
    #[serde(rename = "schedule_dry")]
    DryRunScheduled,
    #[serde(rename = "run_now_real")]
    RealImmediate,
    #[serde(rename = "schedule_real")]
    RealScheduled,
}

impl BotMode {
    pub const ALL: [BotMode; 5] = [
        BotMode::Login,
        BotMode::DryRunImmediate,
        BotMode::DryRunScheduled,
        BotMode::RealImmediate,
        BotMode::RealScheduled,
    ];

    /// Wire name accepted by `FromStr` and emitted in status reports.
    pub fn as_str(self) -> &'static str {
        match self {
            BotMode::Login => "login",
            BotMode::DryRunImmediate => "run_now_dry",
            BotMode::DryRunScheduled => "schedule_dry",
            BotMode::RealImmediate => "run_now_real",
            BotMode::RealScheduled => "schedule_real",
        }
    }

    /// Command-line flags passed to the bot for this mode.
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            BotMode::Login => &["--login"],
            BotMode::DryRunImmediate => &["--run-now", "--dry-run"],
            BotMode::DryRunScheduled => &["--schedule", "--dry-run"],
            BotMode::RealImmediate => &["--run-now", "--real"],
            BotMode::RealScheduled => &["--schedule", "--real"],
        }
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mode '{0}' (expected one of: login, run_now_dry, schedule_dry, run_now_real, schedule_real)")]
pub struct ParseModeError(pub String);

impl FromStr for BotMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BotMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// Lightweight view of the supervisor for polling clients (no log content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: BotStatus,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub mode: Option<BotMode>,
    pub log_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_every_wire_name() {
        for mode in BotMode::ALL {
            assert_eq!(mode.as_str().parse::<BotMode>(), Ok(mode));
        }
    }

    #[test]
    fn mode_rejects_unknown() {
        let err = "run_later".parse::<BotMode>().unwrap_err();
        assert_eq!(err, ParseModeError("run_later".to_string()));
    }

    #[test]
    fn mode_flags_table() {
        assert_eq!(BotMode::Login.flags(), &["--login"]);
        assert_eq!(BotMode::DryRunImmediate.flags(), &["--run-now", "--dry-run"]);
        assert_eq!(BotMode::DryRunScheduled.flags(), &["--schedule", "--dry-run"]);
        assert_eq!(BotMode::RealImmediate.flags(), &["--run-now", "--real"]);
        assert_eq!(BotMode::RealScheduled.flags(), &["--schedule", "--real"]);
    }

    #[test]
    fn mode_serde_matches_wire_name() {
        for mode in BotMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&BotStatus::Running).unwrap(), "\"RUNNING\"");
    }

    #[test]
    fn snapshot_uses_camel_case() {
        let snap = StatusSnapshot {
            status: BotStatus::Idle,
            pid: None,
            start_time: None,
            mode: None,
            log_count: 3,
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["logCount"], 3);
        assert!(v["startTime"].is_null());
    }

    #[test]
    fn trade_deserializes_with_defaults() {
        let t: Trade = serde_json::from_value(serde_json::json!({
            "symbol": "INFY",
            "action": "BUY",
            "quantity": 10,
            "total_cost": 1500.0
        }))
        .unwrap();
        assert_eq!(t.symbol, "INFY");
        assert_eq!(t.id, 0);
        assert_eq!(t.quantity, 10.0);
    }
}
