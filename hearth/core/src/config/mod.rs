//! TOML Configuration File Support
//!
//! Centralized configuration loading for the hearth client, supporting a TOML
//! configuration file at `~/.config/hearth/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! endpoint = "http://localhost:8080/api/chat/stream"
//! connect_timeout_ms = 10000
//!
//! [generation]
//! model = "llama3.2"
//! temperature = 0.7
//! top_p = 0.9
//! top_k = 40
//! repeat_penalty = 1.1
//!
//! [render]
//! frame_rate_hz = 60
//!
//! [budget]
//! context_limit = 8192
//! near_limit_fraction = 0.8
//!
//! [session]
//! persist_partial_on_cancel = false
//! max_messages = 0
//! max_content_bytes = 0
//!
//! [wire]
//! event_prefix = "data: "
//! start_sentinel = "[START]"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::GenerationParams;
use crate::streaming::WireFormat;

/// Default summarization directive appended to the system instruction
pub const DEFAULT_SUMMARIZE_DIRECTIVE: &str = "The conversation is close to the context limit. \
Before answering, write a short summary of the conversation so far, then answer the latest message.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Streaming chat endpoint
    pub endpoint: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Overall request timeout in seconds (0 = none)
    pub request_timeout_secs: Option<u64>,
}

/// Generation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Model identifier
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold
    pub top_p: Option<f32>,
    /// Top-k cutoff
    pub top_k: Option<u32>,
    /// Repetition penalty
    pub repeat_penalty: Option<f32>,
    /// System instruction sent with every message
    pub system_prompt: Option<String>,
}

/// Render section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderToml {
    /// Display repaint rate the scheduler aligns to
    pub frame_rate_hz: Option<u32>,
}

/// Budget section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetToml {
    /// Context window in tokens
    pub context_limit: Option<u32>,
    /// Fraction of the window that counts as "near the limit"
    pub near_limit_fraction: Option<f32>,
    /// Directive appended when the user accepts summarization
    pub summarize_directive: Option<String>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Persist the partial assistant text when a stream is cancelled
    pub persist_partial_on_cancel: Option<bool>,
    /// Records kept in the transcript (0 = unlimited)
    pub max_messages: Option<usize>,
    /// Transcript content bytes kept (0 = unlimited)
    pub max_content_bytes: Option<usize>,
}

/// Wire section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireToml {
    /// Literal marker that starts every event line
    pub event_prefix: Option<String>,
    /// Start-of-stream payload to ignore
    pub start_sentinel: Option<String>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server settings
    pub server: ServerToml,
    /// Generation settings
    pub generation: GenerationToml,
    /// Render settings
    pub render: RenderToml,
    /// Context budget settings
    pub budget: BudgetToml,
    /// Session settings
    pub session: SessionToml,
    /// Wire format settings
    pub wire: WireToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Streaming chat endpoint
    pub endpoint: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Overall request timeout (`None` = streams may run indefinitely)
    pub request_timeout: Option<Duration>,
    /// Model identifier
    pub model: String,
    /// Sampling parameters
    pub params: GenerationParams,
    /// System instruction sent with every message
    pub system_prompt: Option<String>,
    /// Display repaint rate
    pub frame_rate_hz: u32,
    /// Context window in tokens
    pub context_limit: u32,
    /// Fraction of the window that triggers the summarization offer
    pub near_limit_fraction: f32,
    /// Directive appended when summarization is accepted
    pub summarize_directive: String,
    /// Persist partial text on cancellation
    pub persist_partial_on_cancel: bool,
    /// Records kept in the transcript (0 = unlimited)
    pub history_max_messages: usize,
    /// Transcript content bytes kept (0 = unlimited)
    pub history_max_bytes: usize,
    /// Event-line conventions
    pub wire: WireFormat,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/chat/stream".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            model: "llama3.2".to_string(),
            params: GenerationParams::default(),
            system_prompt: None,
            frame_rate_hz: 60,
            context_limit: 8192,
            near_limit_fraction: 0.8,
            summarize_directive: DEFAULT_SUMMARIZE_DIRECTIVE.to_string(),
            persist_partial_on_cancel: false,
            history_max_messages: 0,
            history_max_bytes: 0,
            wire: WireFormat::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Duration of one display frame
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate_hz.max(1)))
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.endpoint must not be empty".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "generation.model must not be empty".to_string(),
            ));
        }
        if !(1..=240).contains(&self.frame_rate_hz) {
            return Err(ConfigError::ValidationError(format!(
                "render.frame_rate_hz must be between 1 and 240, got {}",
                self.frame_rate_hz
            )));
        }
        if self.context_limit == 0 {
            return Err(ConfigError::ValidationError(
                "budget.context_limit must be positive".to_string(),
            ));
        }
        if !(self.near_limit_fraction > 0.0 && self.near_limit_fraction <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "budget.near_limit_fraction must be in (0, 1], got {}",
                self.near_limit_fraction
            )));
        }
        if self.wire.event_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "wire.event_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/hearth/client.toml` or
/// `~/.config/hearth/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hearth").join("client.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref endpoint) = toml.server.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(ms) = toml.server.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.server.request_timeout_secs {
        config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    if let Some(ref model) = toml.generation.model {
        config.model = model.clone();
    }
    if let Some(temperature) = toml.generation.temperature {
        config.params.temperature = temperature.clamp(0.0, 2.0);
    }
    if let Some(top_p) = toml.generation.top_p {
        config.params.top_p = top_p.clamp(0.0, 1.0);
    }
    if let Some(top_k) = toml.generation.top_k {
        config.params.top_k = top_k;
    }
    if let Some(penalty) = toml.generation.repeat_penalty {
        config.params.repeat_penalty = penalty;
    }
    if toml.generation.system_prompt.is_some() {
        config.system_prompt = toml.generation.system_prompt.clone();
    }

    if let Some(rate) = toml.render.frame_rate_hz {
        config.frame_rate_hz = rate;
    }

    if let Some(limit) = toml.budget.context_limit {
        config.context_limit = limit;
    }
    if let Some(fraction) = toml.budget.near_limit_fraction {
        config.near_limit_fraction = fraction;
    }
    if let Some(ref directive) = toml.budget.summarize_directive {
        config.summarize_directive = directive.clone();
    }

    if let Some(persist) = toml.session.persist_partial_on_cancel {
        config.persist_partial_on_cancel = persist;
    }
    if let Some(max) = toml.session.max_messages {
        config.history_max_messages = max;
    }
    if let Some(max) = toml.session.max_content_bytes {
        config.history_max_bytes = max;
    }

    if let Some(ref prefix) = toml.wire.event_prefix {
        config.wire.event_prefix = prefix.clone();
    }
    if let Some(ref sentinel) = toml.wire.start_sentinel {
        config.wire.start_sentinel = sentinel.clone();
    }
}

/// Parse an environment variable, warning (not failing) on bad values
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig) {
    if let Ok(endpoint) = std::env::var("HEARTH_ENDPOINT") {
        config.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("HEARTH_MODEL") {
        config.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(temperature) = env_parse::<f32>("HEARTH_TEMPERATURE") {
        config.params.temperature = temperature.clamp(0.0, 2.0);
        config.source = ConfigSource::Env;
    }
    if let Ok(system) = std::env::var("HEARTH_SYSTEM_PROMPT") {
        config.system_prompt = Some(system);
        config.source = ConfigSource::Env;
    }
    if let Some(rate) = env_parse::<u32>("HEARTH_FRAME_RATE") {
        config.frame_rate_hz = rate;
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = env_parse::<u32>("HEARTH_CONTEXT_LIMIT") {
        config.context_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Ok(persist) = std::env::var("HEARTH_PERSIST_PARTIAL") {
        config.persist_partial_on_cancel = persist == "1" || persist.eq_ignore_ascii_case("true");
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub endpoint: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// System prompt override
    pub system_prompt: Option<String>,
    /// Temperature override
    pub temperature: Option<f32>,
    /// Frame rate override
    pub frame_rate_hz: Option<u32>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Override the model
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Override the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system: String) -> Self {
        self.system_prompt = Some(system);
        self
    }

    /// Override the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the frame rate
    #[must_use]
    pub fn with_frame_rate(mut self, rate: u32) -> Self {
        self.frame_rate_hz = Some(rate);
        self
    }

    /// Apply the overrides; marks the config as CLI-sourced if anything changed
    pub fn apply(&self, config: &mut ClientConfig) {
        let mut changed = false;

        if let Some(ref endpoint) = self.endpoint {
            config.endpoint = endpoint.clone();
            changed = true;
        }
        if let Some(ref model) = self.model {
            config.model = model.clone();
            changed = true;
        }
        if let Some(ref system) = self.system_prompt {
            config.system_prompt = Some(system.clone());
            changed = true;
        }
        if let Some(temperature) = self.temperature {
            config.params.temperature = temperature.clamp(0.0, 2.0);
            changed = true;
        }
        if let Some(rate) = self.frame_rate_hz {
            config.frame_rate_hz = rate;
            changed = true;
        }

        if changed {
            config.source = ConfigSource::Cli;
        }
    }
}
