use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.hatchline/config.toml`.
///
/// **Security**: this struct never stores API keys or secrets. Credentials
/// are read from environment variables at runtime (`ANTHROPIC_API_KEY`,
/// `OPENAI_API_KEY`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load config from `~/.hatchline/config.toml`. On first run the default
    /// config is materialized there so operators have a file to edit; a
    /// failed write (read-only home, tests) is not fatal and the defaults are
    /// used as-is.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            cfg.write_to(&path).ok();
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Write this config as TOML, creating parent directories as needed.
    pub fn write_to(&self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        std::fs::write(&path, self.to_toml()?).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_turns == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_turns must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid(format!(
                "model.temperature must be in [0, 2], got {}",
                self.model.temperature
            )));
        }
        if self.daemon.analysis_workers == 0 || self.daemon.illustration_workers == 0 {
            return Err(ConfigError::Invalid(
                "daemon worker counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hatchline")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Chat model used by both agent loops.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Image model used for chick and composite illustrations.
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_chat_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model turns per agent-loop invocation. A model that keeps
    /// requesting tools past this budget surfaces as a loop error instead of
    /// running indefinitely.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Wall-clock timeout for a single model turn.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

fn default_max_turns() -> u32 {
    8
}

fn default_turn_timeout_secs() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Blob storage bucket for generated images.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Queue carrying freshly stored eggs to the viability workers.
    #[serde(default = "default_analyze_queue")]
    pub analyze_queue: String,
    /// Queue carrying analyzed eggs to the illustration workers.
    #[serde(default = "default_illustrate_queue")]
    pub illustrate_queue: String,
}

fn default_bucket() -> String {
    "hatchline-images".to_string()
}

fn default_analyze_queue() -> String {
    "to-be-analyzed".to_string()
}

fn default_illustrate_queue() -> String {
    "to-illustrate".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            analyze_queue: default_analyze_queue(),
            illustrate_queue: default_illustrate_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_workers")]
    pub analysis_workers: u32,
    #[serde(default = "default_workers")]
    pub illustration_workers: u32,
}

fn default_workers() -> u32 {
    2
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            analysis_workers: default_workers(),
            illustration_workers: default_workers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
