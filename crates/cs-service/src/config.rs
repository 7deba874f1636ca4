//! Call Signaling Service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default heartbeat timeout in seconds. Participants that have not sent
/// a heartbeat within this window are considered zombies.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 90;

/// Default liveness sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 15;

/// Default expected client heartbeat interval in seconds. Advertised to
/// clients in the `room_joined` ack; not enforced directly.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Default window after a session ends during which former participants
/// may still rejoin (reconnect races against session teardown).
pub const DEFAULT_REJOIN_WINDOW_SECONDS: u64 = 300;

/// Default maximum encrypted payload size in bytes for key-exchange messages.
pub const DEFAULT_E2EE_MAX_PAYLOAD_BYTES: usize = 65_536;

/// Default per-sender, per-message-type key-exchange rate limit per minute.
pub const DEFAULT_E2EE_RATE_LIMIT_PER_MINUTE: u32 = 30;

/// Default CS instance ID prefix.
pub const DEFAULT_CS_ID_PREFIX: &str = "cs";

/// Call Signaling Service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Database URL and JWT secret are redacted in Debug output to prevent
/// credential leakage.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Shared secret for HS256 bearer token validation.
    pub jwt_secret: SecretString,

    /// JWT clock skew tolerance in seconds for token validation.
    pub jwt_clock_skew_seconds: i64,

    /// Heartbeat timeout in seconds (default: 90).
    /// Participants silent for longer than this are evicted by the sweeper.
    pub heartbeat_timeout_seconds: u64,

    /// Liveness sweep interval in seconds (default: 15).
    pub sweep_interval_seconds: u64,

    /// Expected client heartbeat interval in seconds (default: 30).
    pub heartbeat_interval_seconds: u64,

    /// Rejoin window after session end, in seconds (default: 300).
    pub rejoin_window_seconds: u64,

    /// Maximum encrypted payload size for key-exchange messages (default: 65536).
    pub e2ee_max_payload_bytes: usize,

    /// Per-sender, per-message-type key-exchange rate limit per minute (default: 30).
    pub e2ee_rate_limit_per_minute: u32,

    /// Unique identifier for this CS instance.
    /// Used in logs and metrics labels.
    pub cs_id: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("heartbeat_timeout_seconds", &self.heartbeat_timeout_seconds)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field(
                "heartbeat_interval_seconds",
                &self.heartbeat_interval_seconds,
            )
            .field("rejoin_window_seconds", &self.rejoin_window_seconds)
            .field("e2ee_max_payload_bytes", &self.e2ee_max_payload_bytes)
            .field(
                "e2ee_rate_limit_per_minute",
                &self.e2ee_rate_limit_per_minute,
            )
            .field("cs_id", &self.cs_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid liveness configuration: {0}")]
    InvalidLiveness(String),

    #[error("Invalid rejoin window configuration: {0}")]
    InvalidRejoinWindow(String),

    #[error("Invalid key-exchange configuration: {0}")]
    InvalidKeyExchange(String),
}

/// Parse an optional positive integer env var, rejecting zero and garbage.
fn parse_positive_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    err: impl Fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        err(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(err(format!("{} must be greater than 0", name)));
    }

    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let jwt_secret = vars
            .get("JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))
            .map(|s| SecretString::from(s.clone()))?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let heartbeat_timeout_seconds = parse_positive_u64(
            vars,
            "HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
            ConfigError::InvalidLiveness,
        )?;

        let sweep_interval_seconds = parse_positive_u64(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
            ConfigError::InvalidLiveness,
        )?;

        let heartbeat_interval_seconds = parse_positive_u64(
            vars,
            "HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            ConfigError::InvalidLiveness,
        )?;

        if heartbeat_timeout_seconds <= heartbeat_interval_seconds {
            return Err(ConfigError::InvalidLiveness(format!(
                "HEARTBEAT_TIMEOUT_SECONDS ({}) must exceed HEARTBEAT_INTERVAL_SECONDS ({})",
                heartbeat_timeout_seconds, heartbeat_interval_seconds
            )));
        }

        // Rejoin window may legitimately be zero (rejoin disabled entirely)
        let rejoin_window_seconds = if let Some(value_str) = vars.get("REJOIN_WINDOW_SECONDS") {
            value_str.parse().map_err(|e| {
                ConfigError::InvalidRejoinWindow(format!(
                    "REJOIN_WINDOW_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?
        } else {
            DEFAULT_REJOIN_WINDOW_SECONDS
        };

        let e2ee_max_payload_bytes = parse_positive_u64(
            vars,
            "E2EE_MAX_PAYLOAD_BYTES",
            DEFAULT_E2EE_MAX_PAYLOAD_BYTES as u64,
            ConfigError::InvalidKeyExchange,
        )? as usize;

        let e2ee_rate_limit_per_minute = u32::try_from(parse_positive_u64(
            vars,
            "E2EE_RATE_LIMIT_PER_MINUTE",
            u64::from(DEFAULT_E2EE_RATE_LIMIT_PER_MINUTE),
            ConfigError::InvalidKeyExchange,
        )?)
        .map_err(|_| {
            ConfigError::InvalidKeyExchange(
                "E2EE_RATE_LIMIT_PER_MINUTE is too large".to_string(),
            )
        })?;

        // Generate CS instance ID
        let cs_id = vars.get("CS_ID").cloned().unwrap_or_else(|| {
            // Generate a unique ID based on hostname and UUID suffix
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            // Use first 8 chars of UUID for uniqueness
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{}-{}-{}", DEFAULT_CS_ID_PREFIX, hostname, short_suffix)
        });

        Ok(Config {
            database_url,
            bind_address,
            jwt_secret,
            jwt_clock_skew_seconds,
            heartbeat_timeout_seconds,
            sweep_interval_seconds,
            heartbeat_interval_seconds,
            rejoin_window_seconds,
            e2ee_max_payload_bytes,
            e2ee_rate_limit_per_minute,
            cs_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://localhost/cs_test".to_string(),
            ),
            ("JWT_SECRET".to_string(), "test-secret-key".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.database_url, "postgresql://localhost/cs_test");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(
            config.jwt_clock_skew_seconds,
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        );
        assert_eq!(
            config.heartbeat_timeout_seconds,
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS
        );
        assert_eq!(config.sweep_interval_seconds, DEFAULT_SWEEP_INTERVAL_SECONDS);
        assert_eq!(
            config.heartbeat_interval_seconds,
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS
        );
        assert_eq!(config.rejoin_window_seconds, DEFAULT_REJOIN_WINDOW_SECONDS);
        assert_eq!(config.e2ee_max_payload_bytes, DEFAULT_E2EE_MAX_PAYLOAD_BYTES);
        assert_eq!(
            config.e2ee_rate_limit_per_minute,
            DEFAULT_E2EE_RATE_LIMIT_PER_MINUTE
        );
        // CS ID should be auto-generated
        assert!(config.cs_id.starts_with("cs-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "120".to_string());
        vars.insert("HEARTBEAT_TIMEOUT_SECONDS".to_string(), "45".to_string());
        vars.insert("SWEEP_INTERVAL_SECONDS".to_string(), "5".to_string());
        vars.insert("HEARTBEAT_INTERVAL_SECONDS".to_string(), "10".to_string());
        vars.insert("REJOIN_WINDOW_SECONDS".to_string(), "60".to_string());
        vars.insert("E2EE_MAX_PAYLOAD_BYTES".to_string(), "32768".to_string());
        vars.insert("E2EE_RATE_LIMIT_PER_MINUTE".to_string(), "10".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.jwt_clock_skew_seconds, 120);
        assert_eq!(config.heartbeat_timeout_seconds, 45);
        assert_eq!(config.sweep_interval_seconds, 5);
        assert_eq!(config.heartbeat_interval_seconds, 10);
        assert_eq!(config.rejoin_window_seconds, 60);
        assert_eq!(config.e2ee_max_payload_bytes, 32_768);
        assert_eq!(config.e2ee_rate_limit_per_minute, 10);
    }

    #[test]
    fn test_cs_id_custom_value() {
        let mut vars = base_vars();
        vars.insert("CS_ID".to_string(), "cs-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.cs_id, "cs-custom-001");
    }

    #[test]
    fn test_from_vars_missing_database_url() {
        let vars = HashMap::from([("JWT_SECRET".to_string(), "secret".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_from_vars_missing_jwt_secret() {
        let vars = HashMap::from([(
            "DATABASE_URL".to_string(),
            "postgresql://localhost/cs_test".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "JWT_SECRET"));
    }

    #[test]
    fn test_jwt_clock_skew_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must be positive"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must not exceed 600"))
        );
    }

    #[test]
    fn test_heartbeat_timeout_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("HEARTBEAT_TIMEOUT_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidLiveness(msg)) if msg.contains("must be greater than 0"))
        );
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let mut vars = base_vars();
        vars.insert("HEARTBEAT_TIMEOUT_SECONDS".to_string(), "30".to_string());
        vars.insert("HEARTBEAT_INTERVAL_SECONDS".to_string(), "30".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidLiveness(msg)) if msg.contains("must exceed"))
        );
    }

    #[test]
    fn test_sweep_interval_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert("SWEEP_INTERVAL_SECONDS".to_string(), "fifteen".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidLiveness(msg)) if msg.contains("must be a valid positive integer"))
        );
    }

    #[test]
    fn test_rejoin_window_accepts_zero() {
        let mut vars = base_vars();
        vars.insert("REJOIN_WINDOW_SECONDS".to_string(), "0".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.rejoin_window_seconds, 0);
    }

    #[test]
    fn test_rejoin_window_rejects_negative() {
        let mut vars = base_vars();
        vars.insert("REJOIN_WINDOW_SECONDS".to_string(), "-5".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidRejoinWindow(_))));
    }

    #[test]
    fn test_e2ee_rate_limit_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("E2EE_RATE_LIMIT_PER_MINUTE".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidKeyExchange(msg)) if msg.contains("must be greater than 0"))
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let vars = base_vars();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("postgresql://"));
        assert!(!debug_output.contains("cs_test"));
        assert!(!debug_output.contains("test-secret-key"));
    }
}
