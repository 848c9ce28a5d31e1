//! Configuration loading.
//!
//! Reads `contentforge.yaml`, interpolates `${VAR}` / `${VAR:-default}`
//! environment references, then deserializes. Every field has a default, so
//! an empty file (or no file at all) yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CONTENTFORGE_CONFIG";

/// Relative path probed while walking up from the working directory.
const CONFIG_RELATIVE_PATH: &str = "config/contentforge.yaml";

const DEFAULT_SYSTEM_PROMPT: &str = "You are the content assistant of a marketing agency. \
Use the available tools to look up clients and manage content items. \
Answer concisely once you have what you need.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find config/contentforge.yaml (set CONTENTFORGE_CONFIG to override)")]
    NotFound,

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentSettings,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

/// OpenAI-compatible gateway endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Sent as a bearer token when non-empty.
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for non-streaming calls.
    pub request_timeout_secs: u64,
    /// Whole-request timeout for streaming calls.
    pub stream_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000/v1".to_string(),
            api_key: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            stream_timeout_secs: 180,
        }
    }
}

impl GatewayConfig {
    /// API key, treating an empty interpolation result as absent.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum model-call-then-tool-execution cycles per run.
    pub max_turns: u32,
    /// Model id used for the single retry after a provider failure.
    /// When unset, the route's fallback model is used.
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on one model call, including the whole stream.
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Execute multiple tool calls from one response concurrently.
    pub parallel_tool_calls: bool,
    pub max_tool_result_chars: usize,
    /// Prepended when the caller's history has no system message.
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: 8,
            fallback_model: None,
            temperature: 0.4,
            max_tokens: 2048,
            model_timeout_secs: 120,
            tool_timeout_secs: 30,
            parallel_tool_calls: true,
            max_tool_result_chars: 6_000,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

impl AgentSettings {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Tool result cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
            max_entries: 256,
        }
    }
}

/// Record store location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file; defaults to `records.db` in the data directory.
    pub path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(expand_tilde(p)),
            None => crate::data_dir().join("records.db"),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Search order:
/// 1. `CONTENTFORGE_CONFIG` env var (path to the file)
/// 2. `config/contentforge.yaml` in `start` and each of its ancestors
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound)
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&raw)
}

/// Parse config text (after env interpolation).
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

/// Find and load the config, falling back to defaults when none exists.
pub fn load_or_default(start: &Path) -> Result<AppConfig, ConfigError> {
    match find_config_path(start) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "loading config");
            load_config(&path)
        }
        Err(ConfigError::NotFound) => {
            tracing::info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
