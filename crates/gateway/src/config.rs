//! Application configuration

use std::env;
use std::time::Duration;

use time::UtcOffset;

/// Which chat transport the gateway drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// External chat bridge over HTTP
    Bridge,
    /// In-process loopback, for local development
    Loopback,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Operator access
    pub operator_token: String,
    pub operator_secret: String,

    // Chat transport
    pub transport: TransportKind,
    pub bridge_url: String,
    pub bridge_api_key: Option<String>,
    pub bridge_webhook_secret: String,
    pub auto_start_transport: bool,

    // Clinic
    pub clinic_name: String,
    pub clinic_utc_offset_hours: i8,

    // Conversation
    pub restart_keywords: Vec<String>,
    pub skip_tokens: Vec<String>,
    pub conversation_ttl_minutes: u64,

    // Timeouts
    pub watchdog_interval_secs: u64,
    pub liveness_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn list(name: &str, default: &str) -> Vec<String> {
    var_or(name, default)
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn secret(name: &'static str, min_len: usize, weak: &'static str) -> Result<String, ConfigError> {
    let value = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if value.len() < min_len {
        return Err(ConfigError::WeakSecret(weak));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let transport = match var_or("TRANSPORT", "bridge").to_lowercase().as_str() {
            "bridge" => TransportKind::Bridge,
            "loopback" => TransportKind::Loopback,
            _ => return Err(ConfigError::Invalid("TRANSPORT must be 'bridge' or 'loopback'")),
        };

        Ok(Self {
            // Server
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0:3000"),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", "5")
                .parse()
                .unwrap_or(5),

            // Operator access
            operator_token: secret(
                "OPERATOR_TOKEN",
                32,
                "OPERATOR_TOKEN must be at least 32 characters",
            )?,
            operator_secret: {
                let value = env::var("OPERATOR_SECRET")
                    .map_err(|_| ConfigError::Missing("OPERATOR_SECRET"))?;
                if value.is_empty() {
                    return Err(ConfigError::WeakSecret("OPERATOR_SECRET must not be empty"));
                }
                value
            },

            // Chat transport
            transport,
            bridge_url: var_or("BRIDGE_URL", "http://localhost:3100"),
            bridge_api_key: env::var("BRIDGE_API_KEY").ok().filter(|k| !k.is_empty()),
            bridge_webhook_secret: match transport {
                TransportKind::Bridge => secret(
                    "BRIDGE_WEBHOOK_SECRET",
                    32,
                    "BRIDGE_WEBHOOK_SECRET must be at least 32 characters",
                )?,
                TransportKind::Loopback => env::var("BRIDGE_WEBHOOK_SECRET").unwrap_or_default(),
            },
            auto_start_transport: var_or("AUTO_START_TRANSPORT", "true")
                .parse()
                .unwrap_or(true),

            // Clinic
            clinic_name: var_or("CLINIC_NAME", "PUSKESMAS"),
            clinic_utc_offset_hours: {
                let hours: i8 = var_or("CLINIC_UTC_OFFSET_HOURS", "7").parse().unwrap_or(7);
                if !(-12..=14).contains(&hours) {
                    return Err(ConfigError::Invalid(
                        "CLINIC_UTC_OFFSET_HOURS must be between -12 and 14",
                    ));
                }
                hours
            },

            // Conversation
            restart_keywords: list("RESTART_KEYWORDS", "MULAI,DAFTAR"),
            skip_tokens: list("SKIP_TOKENS", "TIDAK"),
            conversation_ttl_minutes: var_or("CONVERSATION_TTL_MINUTES", "30")
                .parse()
                .unwrap_or(30),

            // Timeouts
            watchdog_interval_secs: var_or("WATCHDOG_INTERVAL_SECS", "30")
                .parse()
                .unwrap_or(30),
            liveness_timeout_secs: var_or("LIVENESS_TIMEOUT_SECS", "10")
                .parse()
                .unwrap_or(10),
            store_timeout_secs: var_or("STORE_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            delivery_timeout_secs: var_or("DELIVERY_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
        })
    }

    pub fn clinic_offset(&self) -> UtcOffset {
        // Range checked in from_env
        UtcOffset::from_hms(self.clinic_utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }

    /// `None` disables expiry
    pub fn conversation_ttl(&self) -> Option<Duration> {
        (self.conversation_ttl_minutes > 0)
            .then(|| Duration::from_secs(self.conversation_ttl_minutes * 60))
    }

    /// Keyword quoted to users when they should start over
    pub fn primary_restart_keyword(&self) -> String {
        self.restart_keywords
            .first()
            .cloned()
            .unwrap_or_else(|| "MULAI".to_string())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
