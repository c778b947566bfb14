use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentConfig;
use crate::api::GenerationConfig;
use crate::storage::default_db_path;

const LOCAL_CONFIG: &str = "pagepilot.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Falls back to GEMINI_API_KEY.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub max_steps: u32,
    pub step_pause_ms: u64,
    pub screenshot_settle_ms: u64,
    /// DevTools endpoint of an already running Chrome. Auto-discovered when unset.
    pub chrome_url: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-computer-use-preview-10-2025".to_string(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
            max_steps: 100,
            step_pause_ms: 1000,
            screenshot_settle_ms: 500,
            chrome_url: None,
            db_path: None,
        }
    }
}

impl Config {
    /// Load `.env`, the first config file found, then environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env loaded");
        }

        let mut config = match explicit.map(Path::to_path_buf).or_else(Self::discover) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("pagepilot").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| get(var).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = get("PAGEPILOT_MODEL") {
            self.model = model;
        }
        if let Some(url) = get("PAGEPILOT_CHROME_URL") {
            self.chrome_url = Some(url);
        }
        if let Some(steps) = get("PAGEPILOT_MAX_STEPS") {
            self.max_steps = steps.trim().parse().map_err(|_| ConfigError::Env {
                var: "PAGEPILOT_MAX_STEPS",
                value: steps,
            })?;
        }
        Ok(())
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn agent(&self) -> AgentConfig {
        AgentConfig {
            max_steps: self.max_steps,
            step_pause: Duration::from_millis(self.step_pause_ms),
        }
    }

    pub fn screenshot_settle(&self) -> Duration {
        Duration::from_millis(self.screenshot_settle_ms)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}
