use crate::tool::Tool;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Problems found while loading, logged once tracing is up.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else {
            let default_path = PathBuf::from("ai-usage.toml");
            if default_path.exists() {
                Self::from_file(&default_path)?
            } else {
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| "failed to parse configuration TOML")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(output) = env::var("AI_USAGE_OUTPUT") {
            self.report.output_path = PathBuf::from(output);
        }
        if let Ok(url) = env::var("AI_USAGE_DIRECTORY_URL") {
            self.directory.base_url = Some(url);
        }
        if let Ok(secs) = env::var("AI_USAGE_COLLECTOR_TIMEOUT_SECS") {
            match secs.trim().parse() {
                Ok(secs) => self.report.collector_timeout_secs = secs,
                Err(err) => self.warnings.push(format!(
                    "ignoring invalid AI_USAGE_COLLECTOR_TIMEOUT_SECS {secs:?}: {err}"
                )),
            }
        }
        if let Ok(log_path) = env::var("AI_USAGE_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(log_path));
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// `-` writes the report to stdout.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            collector_timeout_secs: default_collector_timeout(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl ReportConfig {
    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_directory_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// One provider export set. `tool` is kept as text so an unknown id only disables
/// that entry instead of rejecting the whole file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub tool: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub usage_path: Option<PathBuf>,
    #[serde(default)]
    pub spending_path: Option<PathBuf>,
    #[serde(default)]
    pub users_path: Option<PathBuf>,
}

impl SourceConfig {
    pub fn tool(&self) -> Option<Tool> {
        match self.tool.parse() {
            Ok(tool) => Some(tool),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring source with unknown tool");
                None
            }
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("ai-usage-report.json")
}

fn default_collector_timeout() -> u64 {
    60
}

fn default_lookback_days() -> u32 {
    30
}

fn default_directory_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "ai-usage-report/0.1".to_string()
}

fn default_enabled() -> bool {
    true
}
