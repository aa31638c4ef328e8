use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::BotConfig;
use crate::types::BotMode;

/// Interpreter used when no override and no local virtualenv exist.
pub const FALLBACK_INTERPRETER: &str = "python3";

/// Everything needed to spawn the bot for a given mode.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub interpreter: PathBuf,
    pub working_dir: PathBuf,
    /// Leading arguments, before the mode flags.
    pub entry_args: Vec<String>,
    /// Extra `(name, value)` environment entry on top of the inherited environment.
    pub path_hint: Option<(String, OsString)>,
}

impl LaunchSpec {
    /// Resolve interpreter and working directory from config.
    pub fn from_config(config: &BotConfig) -> Self {
        let interpreter = resolve_interpreter(config.interpreter.as_deref(), &config.project_root);
        let path_hint = if config.path_hint_var.is_empty() {
            None
        } else {
            Some((
                config.path_hint_var.clone(),
                config.project_root.clone().into_os_string(),
            ))
        };
        Self {
            interpreter,
            working_dir: config.project_root.clone(),
            entry_args: config.entry_args.clone(),
            path_hint,
        }
    }

    /// Full argument vector for `mode`.
    pub fn args(&self, mode: BotMode) -> Vec<String> {
        self.entry_args
            .iter()
            .cloned()
            .chain(mode.flags().iter().map(|f| f.to_string()))
            .collect()
    }

    /// Human-readable command line, used in the launch log entry.
    pub fn display_command(&self, mode: BotMode) -> String {
        let mut parts = vec![self.interpreter.display().to_string()];
        parts.extend(self.args(mode));
        parts.join(" ")
    }
}

/// Interpreter lookup: explicit override, then `<root>/.venv`, then the bare fallback name.
pub fn resolve_interpreter(explicit: Option<&Path>, project_root: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let venv = venv_interpreter(project_root);
    if venv.exists() {
        venv
    } else {
        PathBuf::from(FALLBACK_INTERPRETER)
    }
}

fn venv_interpreter(project_root: &Path) -> PathBuf {
    let venv = project_root.join(".venv");
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python3")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_interpreter_wins() {
        let dir = tempfile::tempdir().unwrap();
        let got = resolve_interpreter(Some(Path::new("/custom/python")), dir.path());
        assert_eq!(got, PathBuf::from("/custom/python"));
    }

    #[test]
    fn falls_back_without_venv() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_interpreter(None, dir.path()), PathBuf::from("python3"));
    }

    #[test]
    fn detects_local_venv() {
        let dir = tempfile::tempdir().unwrap();
        let venv = venv_interpreter(dir.path());
        std::fs::create_dir_all(venv.parent().unwrap()).unwrap();
        std::fs::write(&venv, b"").unwrap();
        assert_eq!(resolve_interpreter(None, dir.path()), venv);
    }

    #[test]
    fn args_follow_entry_then_flags() {
        let config = BotConfig {
            interpreter: Some(PathBuf::from("py")),
            ..BotConfig::default()
        };
        let spec = LaunchSpec::from_config(&config);
        assert_eq!(
            spec.args(BotMode::DryRunImmediate),
            vec!["-m", "src.main", "--run-now", "--dry-run"]
        );
        assert_eq!(spec.args(BotMode::Login), vec!["-m", "src.main", "--login"]);
        assert_eq!(
            spec.display_command(BotMode::RealScheduled),
            "py -m src.main --schedule --real"
        );
    }

    #[test]
    fn path_hint_points_at_root() {
        let config = BotConfig {
            project_root: PathBuf::from("/srv/bot"),
            ..BotConfig::default()
        };
        let spec = LaunchSpec::from_config(&config);
        assert_eq!(spec.working_dir, PathBuf::from("/srv/bot"));
        assert_eq!(
            spec.path_hint,
            Some(("PYTHONPATH".to_string(), OsString::from("/srv/bot")))
        );
    }
}
