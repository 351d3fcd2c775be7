//! Configuration management

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::errors::ConfigError;
use crate::application::services::DeliveryPolicy;

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub in_memory: bool,
    /// Lifetime of sessions registered by the service itself
    pub session_ttl_hours: i64,
    /// Users and session tokens registered at startup
    pub seed: Vec<SeedSession>,
}

/// A user and session token registered when the store opens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedSession {
    pub user_id: u64,
    pub nick_name: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Drop,
    BoundedWait,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeliveryConfig {
    pub policy: PolicyKind,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
    /// Drops tolerated before a recipient is evicted; 0 disables eviction
    pub slow_consumer_drops: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pinset-chat.db"),
            in_memory: false,
            session_ttl_hours: 24,
            seed: Vec::new(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::BoundedWait,
            timeout_ms: 500,
            queue_capacity: 64,
            slow_consumer_drops: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "pinset_chat=info".to_string(),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(PolicyKind::Drop),
            "bounded-wait" | "bounded_wait" => Ok(PolicyKind::BoundedWait),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown delivery policy '{}'",
                other
            ))),
        }
    }
}

/// Parses `user_id:nick_name:token`
impl std::str::FromStr for SeedSession {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue(format!("expected user_id:nick_name:token, got '{}'", s));
        let mut parts = s.splitn(3, ':');
        let user_id = parts
            .next()
            .and_then(|id| id.trim().parse().ok())
            .ok_or_else(invalid)?;
        let nick_name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;
        let token = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        Ok(Self {
            user_id,
            nick_name: nick_name.to_string(),
            token: token.to_string(),
        })
    }
}

/// Expiry of a session created now and valid for `hours`
pub fn session_expiry(hours: i64) -> Result<DateTime<Utc>, ConfigError> {
    if hours <= 0 {
        return Err(ConfigError::InvalidValue(format!(
            "session lifetime must be positive, got {} hours",
            hours
        )));
    }
    TimeDelta::try_hours(hours)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ConfigError::InvalidValue(format!("session lifetime of {} hours is out of range", hours)))
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(bind) = std::env::var("PINSET_BIND") {
            config.server.bind = bind;
        }

        if let Ok(path) = std::env::var("PINSET_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }

        if let Ok(policy) = std::env::var("PINSET_DELIVERY_POLICY") {
            config.delivery.policy = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "delivery.queue-capacity must be greater than zero".to_string(),
            ));
        }
        if self.delivery.policy == PolicyKind::BoundedWait && self.delivery.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "delivery.timeout-ms must be greater than zero for bounded-wait".to_string(),
            ));
        }
        if !self.database.seed.is_empty() {
            session_expiry(self.database.session_ttl_hours)?;
        }
        if self.server.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "server.max-frame-bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        match self.delivery.policy {
            PolicyKind::Drop => DeliveryPolicy::Drop,
            PolicyKind::BoundedWait => {
                DeliveryPolicy::BoundedWait(Duration::from_millis(self.delivery.timeout_ms))
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}
