//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).
//! Every option has a default, so `AppConfig::default()` is a usable config.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    pub app: AppSettings,
    #[validate(nested)]
    pub transport: TransportConfig,
    #[validate(nested)]
    pub presence: PresenceConfig,
    #[validate(nested)]
    pub typing: TypingConfig,
    #[validate(nested)]
    pub fanout: FanoutConfig,
    #[validate(nested)]
    pub history: HistoryConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Real-time connection settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[validate(length(min = 1, message = "Transport URL must not be empty"))]
    #[serde(default = "default_transport_url")]
    pub url: String,
    /// First reconnect delay
    #[validate(range(min = 1))]
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap
    #[validate(range(min = 1))]
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[validate(range(min = 1.0))]
    #[serde(default = "default_reconnect_factor")]
    pub reconnect_factor: f64,
    /// Interval between keepalive pings while connected
    #[validate(range(min = 1))]
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

/// Presence tracker settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresenceConfig {
    /// Entries silent for longer than this are evicted
    #[validate(range(min = 1))]
    #[serde(default = "default_presence_timeout_ms")]
    pub presence_timeout_ms: u64,
    #[validate(range(min = 1))]
    #[serde(default = "default_presence_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// How often an open topic re-announces the local user
    #[validate(range(min = 1))]
    #[serde(default = "default_presence_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// Typing indicator settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TypingConfig {
    #[validate(range(min = 1))]
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,
    /// At most one outbound typing signal per window
    #[validate(range(min = 1))]
    #[serde(default = "default_typing_debounce_ms")]
    pub typing_debounce_ms: u64,
}

/// Event fanout settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FanoutConfig {
    /// Delivered sequence numbers remembered per topic for duplicate detection
    #[validate(range(min = 1))]
    #[serde(default = "default_resync_buffer_size")]
    pub resync_buffer_size: usize,
    /// Out-of-order events held per topic before a resync is forced
    #[validate(range(min = 1))]
    #[serde(default = "default_reorder_buffer_size")]
    pub reorder_buffer_size: usize,
    /// How long a sequence gap may stay open
    #[validate(range(min = 1))]
    #[serde(default = "default_reorder_window_ms")]
    pub reorder_window_ms: u64,
    /// Grace period before an unsubscribed topic's state is discarded
    #[serde(default = "default_topic_grace_ms")]
    pub topic_grace_ms: u64,
    /// Engine timer resolution
    #[validate(range(min = 1))]
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// History (resync) API settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    #[validate(length(min = 1, message = "History base URL must not be empty"))]
    #[serde(default = "default_history_base_url")]
    pub base_url: String,
    #[validate(range(min = 1))]
    #[serde(default = "default_history_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_app_name() -> String {
    "presence-engine".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_transport_url() -> String {
    "ws://127.0.0.1:8081/realtime".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_reconnect_factor() -> f64 {
    2.0
}

fn default_keepalive_interval_ms() -> u64 {
    25_000
}

fn default_presence_timeout_ms() -> u64 {
    60_000
}

fn default_presence_sweep_interval_ms() -> u64 {
    15_000
}

fn default_presence_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_typing_timeout_ms() -> u64 {
    5_000
}

fn default_typing_debounce_ms() -> u64 {
    2_000
}

fn default_resync_buffer_size() -> usize {
    200
}

fn default_reorder_buffer_size() -> usize {
    50
}

fn default_reorder_window_ms() -> u64 {
    2_000
}

fn default_topic_grace_ms() -> u64 {
    30_000
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_history_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_history_timeout_ms() -> u64 {
    5_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: default_transport_url(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_factor: default_reconnect_factor(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_timeout_ms: default_presence_timeout_ms(),
            sweep_interval_ms: default_presence_sweep_interval_ms(),
            heartbeat_interval_ms: default_presence_heartbeat_interval_ms(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            typing_timeout_ms: default_typing_timeout_ms(),
            typing_debounce_ms: default_typing_debounce_ms(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            resync_buffer_size: default_resync_buffer_size(),
            reorder_buffer_size: default_reorder_buffer_size(),
            reorder_window_ms: default_reorder_window_ms(),
            topic_grace_ms: default_topic_grace_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_history_base_url(),
            timeout_ms: default_history_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            transport: TransportConfig::default(),
            presence: PresenceConfig::default(),
            typing: TypingConfig::default(),
            fanout: FanoutConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Read an optional variable, failing if it is set but does not parse
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unparsable value or the
    /// resulting configuration fails validation
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            transport: TransportConfig {
                url: env::var("TRANSPORT_URL").unwrap_or_else(|_| default_transport_url()),
                reconnect_base_ms: parse_var("RECONNECT_BASE_MS", default_reconnect_base_ms())?,
                reconnect_max_ms: parse_var("RECONNECT_MAX_MS", default_reconnect_max_ms())?,
                reconnect_factor: parse_var("RECONNECT_FACTOR", default_reconnect_factor())?,
                keepalive_interval_ms: parse_var(
                    "KEEPALIVE_INTERVAL_MS",
                    default_keepalive_interval_ms(),
                )?,
            },
            presence: PresenceConfig {
                presence_timeout_ms: parse_var(
                    "PRESENCE_TIMEOUT_MS",
                    default_presence_timeout_ms(),
                )?,
                sweep_interval_ms: parse_var(
                    "PRESENCE_SWEEP_INTERVAL_MS",
                    default_presence_sweep_interval_ms(),
                )?,
                heartbeat_interval_ms: parse_var(
                    "PRESENCE_HEARTBEAT_INTERVAL_MS",
                    default_presence_heartbeat_interval_ms(),
                )?,
            },
            typing: TypingConfig {
                typing_timeout_ms: parse_var("TYPING_TIMEOUT_MS", default_typing_timeout_ms())?,
                typing_debounce_ms: parse_var("TYPING_DEBOUNCE_MS", default_typing_debounce_ms())?,
            },
            fanout: FanoutConfig {
                resync_buffer_size: parse_var("RESYNC_BUFFER_SIZE", default_resync_buffer_size())?,
                reorder_buffer_size: parse_var(
                    "REORDER_BUFFER_SIZE",
                    default_reorder_buffer_size(),
                )?,
                reorder_window_ms: parse_var("REORDER_WINDOW_MS", default_reorder_window_ms())?,
                topic_grace_ms: parse_var("TOPIC_GRACE_MS", default_topic_grace_ms())?,
                tick_interval_ms: parse_var("TICK_INTERVAL_MS", default_tick_interval_ms())?,
            },
            history: HistoryConfig {
                base_url: env::var("HISTORY_BASE_URL")
                    .unwrap_or_else(|_| default_history_base_url()),
                timeout_ms: parse_var("HISTORY_TIMEOUT_MS", default_history_timeout_ms())?,
            },
        };

        config.check()?;
        Ok(config)
    }

    /// Validate ranges and cross-field constraints
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.transport.reconnect_max_ms < self.transport.reconnect_base_ms {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_MAX_MS",
                format!(
                    "{} is below RECONNECT_BASE_MS ({})",
                    self.transport.reconnect_max_ms, self.transport.reconnect_base_ms
                ),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
