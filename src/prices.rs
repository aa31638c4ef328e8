use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::launch::resolve_interpreter;

/// External price-lookup tool: `program args... SYMBOL...` printing a JSON
/// object of symbol → last traded price on stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTool {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PriceTool {
    /// The configured fetch script run with the bot's interpreter.
    pub fn from_config(config: &AppConfig) -> Self {
        let program = resolve_interpreter(config.bot.interpreter.as_deref(), &config.bot.project_root);
        Self {
            program,
            args: vec![config.price_script_path().display().to_string()],
        }
    }

    /// Look up prices for `symbols`. An empty list never spawns the tool.
    pub async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(symbols)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run price tool {}", self.program.display()))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            bail!("price tool exited with {}: {}", output.status, err.trim());
        }

        let prices = parse_prices(&output.stdout)?;
        debug!("Fetched {} of {} prices", prices.len(), symbols.len());
        Ok(prices)
    }

    /// Like `fetch`, but logs failures and returns an empty map so callers can
    /// fall back to cost-based values.
    pub async fn fetch_or_empty(&self, symbols: &[String]) -> HashMap<String, f64> {
        match self.fetch(symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("Error fetching live prices: {e:#}");
                HashMap::new()
            }
        }
    }
}

/// Parse the tool's stdout. Non-numeric or non-finite entries are dropped.
pub fn parse_prices(stdout: &[u8]) -> Result<HashMap<String, f64>> {
    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_slice(stdout).context("price tool output is not a JSON object")?;
    Ok(raw
        .into_iter()
        .filter_map(|(symbol, v)| v.as_f64().filter(|p| p.is_finite()).map(|p| (symbol, p)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numeric_prices() {
        let prices = parse_prices(br#"{"ITC": 332.65, "TCS": 4100}"#).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["ITC"], 332.65);
        assert_eq!(prices["TCS"], 4100.0);
    }

    #[test]
    fn parse_drops_non_numeric() {
        let prices = parse_prices(br#"{"ITC": null, "TCS": "n/a", "INFY": 1500.5}"#).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["INFY"], 1500.5);
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_prices(b"[1, 2]").is_err());
        assert!(parse_prices(b"Traceback (most recent call last)").is_err());
    }

    #[test]
    fn from_config_uses_script_under_root() {
        let mut config = AppConfig::default();
        config.bot.project_root = PathBuf::from("/srv/bot");
        config.bot.interpreter = Some(PathBuf::from("/srv/bot/.venv/bin/python3"));
        let tool = PriceTool::from_config(&config);
        assert_eq!(tool.program, PathBuf::from("/srv/bot/.venv/bin/python3"));
        assert_eq!(tool.args, vec!["/srv/bot/src/tools/fetch_prices.py"]);
    }

    #[tokio::test]
    async fn empty_symbols_skip_tool() {
        let tool = PriceTool {
            program: PathBuf::from("/nonexistent/price-tool"),
            args: vec![],
        };
        assert!(tool.fetch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_error() {
        let tool = PriceTool {
            program: PathBuf::from("/nonexistent/price-tool"),
            args: vec![],
        };
        assert!(tool.fetch(&["ITC".to_string()]).await.is_err());
        assert!(tool.fetch_or_empty(&["ITC".to_string()]).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_tool_with_symbols() {
        // Echo each symbol back with a fixed price.
        let script = r#"printf '{'; sep=''; for s in "$@"; do printf '%s"%s": 10.5' "$sep" "$s"; sep=','; done; printf '}'"#;
        let tool = PriceTool {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string(), "fetch".to_string()],
        };
        let prices = tool
            .fetch(&["ITC".to_string(), "TCS".to_string()])
            .await
            .unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["ITC"], 10.5);
        assert_eq!(prices["TCS"], 10.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_is_error() {
        let tool = PriceTool {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "echo boom >&2; exit 3".to_string(), "fetch".to_string()],
        };
        let err = tool.fetch(&["ITC".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
