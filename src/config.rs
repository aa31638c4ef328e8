use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file path.
pub const CONFIG_PATH: &str = "dashboard.toml";

/// Environment variable that overrides `bot.interpreter`.
pub const INTERPRETER_ENV: &str = "PYTHON_PATH";

/// Top-level application config deserialized from `dashboard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub prices: PriceConfig,
}

/// How the trading bot process is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Root of the bot's project; the child runs here.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Explicit interpreter. When unset, a local `.venv` is preferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
    /// Arguments placed before the mode flags.
    #[serde(default = "default_entry_args")]
    pub entry_args: Vec<String>,
    /// Extra environment variable pointing the child at `project_root`.
    #[serde(default = "default_path_hint_var")]
    pub path_hint_var: String,
    /// Maximum number of buffered log lines.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// External price-lookup tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_prices_enabled")]
    pub enabled: bool,
    /// Script path, relative to `bot.project_root` unless absolute.
    #[serde(default = "default_price_script")]
    pub script: PathBuf,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_entry_args() -> Vec<String> {
    vec!["-m".to_string(), "src.main".to_string()]
}

fn default_path_hint_var() -> String {
    "PYTHONPATH".to_string()
}

fn default_log_capacity() -> usize {
    crate::state::DEFAULT_LOG_CAPACITY
}

fn default_prices_enabled() -> bool {
    true
}

fn default_price_script() -> PathBuf {
    PathBuf::from("src/tools/fetch_prices.py")
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            interpreter: None,
            entry_args: default_entry_args(),
            path_hint_var: default_path_hint_var(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: default_prices_enabled(),
            script: default_price_script(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply the `PYTHON_PATH` override, if one was provided.
    pub fn with_interpreter_override(mut self, value: Option<String>) -> Self {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            self.bot.interpreter = Some(PathBuf::from(v));
        }
        self
    }

    /// Absolute-or-root-relative path of the price script.
    pub fn price_script_path(&self) -> PathBuf {
        if self.prices.script.is_absolute() {
            self.prices.script.clone()
        } else {
            self.bot.project_root.join(&self.prices.script)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bot.log_capacity, 200);
        assert_eq!(config.bot.entry_args, vec!["-m", "src.main"]);
        assert_eq!(config.bot.path_hint_var, "PYTHONPATH");
        assert!(config.prices.enabled);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [bot]
            project_root = "/opt/bot"
            interpreter = "/usr/bin/python3.12"

            [prices]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.bot.project_root, PathBuf::from("/opt/bot"));
        assert_eq!(config.bot.interpreter, Some(PathBuf::from("/usr/bin/python3.12")));
        assert_eq!(config.bot.log_capacity, 200);
        assert!(!config.prices.enabled);
        assert_eq!(
            config.price_script_path(),
            PathBuf::from("/opt/bot/src/tools/fetch_prices.py")
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        let mut config = AppConfig::default();
        config.bot.log_capacity = 50;
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn interpreter_override() {
        let config = AppConfig::default().with_interpreter_override(Some("/venv/python".into()));
        assert_eq!(config.bot.interpreter, Some(PathBuf::from("/venv/python")));

        let config = AppConfig::default().with_interpreter_override(Some("  ".into()));
        assert_eq!(config.bot.interpreter, None);
    }
}
