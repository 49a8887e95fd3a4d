//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Secrets are held in
//! `SecretString` and the database URL is redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default lifetime of media access tokens, in seconds.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 3600;

/// Default time the media server keeps an empty room alive, in seconds.
pub const DEFAULT_EMPTY_TIMEOUT_SECONDS: u32 = 300;

/// Default time the media server waits after the last participant leaves, in seconds.
pub const DEFAULT_DEPARTURE_TIMEOUT_SECONDS: u32 = 20;

/// Default deadline for a single media server call, in seconds.
pub const DEFAULT_MEDIA_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default lead time before a scheduled start during which joins are allowed.
pub const DEFAULT_SCHEDULED_JOIN_LEAD_MINUTES: i64 = 15;

/// Default HTTP request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default directory prefix for auto-recorded room composites.
pub const DEFAULT_RECORDING_FILEPATH_PREFIX: &str = "recordings";

/// Which session store backs the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// Session store backend (default: postgres).
    pub store_backend: StoreBackend,

    /// PostgreSQL connection URL. Required for the postgres backend.
    pub database_url: Option<SecretString>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Base URL of the media server (http(s) for the API, also handed to clients).
    pub livekit_url: String,

    /// Media server API key.
    pub livekit_api_key: String,

    /// Media server API secret, used to sign access tokens and verify webhooks.
    pub livekit_api_secret: SecretString,

    /// HS256 secret used to verify user access tokens.
    pub auth_jwt_secret: SecretString,

    /// Clock skew tolerance for user token `iat` validation, in seconds.
    pub jwt_clock_skew_seconds: u64,

    /// Lifetime of media access tokens handed to participants.
    pub access_token_ttl_seconds: u64,

    /// Seconds the media server keeps a room without participants.
    pub empty_timeout_seconds: u32,

    /// Seconds the media server keeps a room after the last participant left.
    pub departure_timeout_seconds: u32,

    /// Deadline for each media server call.
    pub media_request_timeout_seconds: u64,

    /// Whether rooms that enable recording get a composite egress on creation.
    pub auto_recording_enabled: bool,

    /// Filepath prefix for auto-recorded composites.
    pub recording_filepath_prefix: String,

    /// Minutes before a scheduled start at which invitees may join.
    pub scheduled_join_lead_minutes: i64,

    /// HTTP request timeout.
    pub request_timeout_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_backend", &self.store_backend)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("livekit_url", &self.livekit_url)
            .field("livekit_api_key", &self.livekit_api_key)
            .field("livekit_api_secret", &"[REDACTED]")
            .field("auth_jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("empty_timeout_seconds", &self.empty_timeout_seconds)
            .field("departure_timeout_seconds", &self.departure_timeout_seconds)
            .field(
                "media_request_timeout_seconds",
                &self.media_request_timeout_seconds,
            )
            .field("auto_recording_enabled", &self.auto_recording_enabled)
            .field("recording_filepath_prefix", &self.recording_filepath_prefix)
            .field(
                "scheduled_join_lead_minutes",
                &self.scheduled_join_lead_minutes,
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid store backend: {0}")]
    InvalidStoreBackend(String),

    #[error("Invalid media server URL: {0}")]
    InvalidLivekitUrl(String),

    #[error("Invalid numeric configuration: {0}")]
    InvalidNumber(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let store_backend = match vars.get("STORE_BACKEND").map(|s| s.trim().to_lowercase()) {
            None => StoreBackend::Postgres,
            Some(value) if value == "postgres" => StoreBackend::Postgres,
            Some(value) if value == "memory" => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidStoreBackend(format!(
                    "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let database_url = vars.get("DATABASE_URL").cloned().map(SecretString::from);
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let livekit_url = required(vars, "LIVEKIT_URL")?
            .trim_end_matches('/')
            .to_string();
        if !(livekit_url.starts_with("http://")
            || livekit_url.starts_with("https://")
            || livekit_url.starts_with("ws://")
            || livekit_url.starts_with("wss://"))
        {
            return Err(ConfigError::InvalidLivekitUrl(format!(
                "LIVEKIT_URL must use http(s) or ws(s) scheme, got '{}'",
                livekit_url
            )));
        }

        let livekit_api_key = required(vars, "LIVEKIT_API_KEY")?;
        let livekit_api_secret = SecretString::from(required(vars, "LIVEKIT_API_SECRET")?);
        let auth_jwt_secret = SecretString::from(required(vars, "AUTH_JWT_SECRET")?);

        let jwt_clock_skew_seconds = parse_positive::<u64>(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        if jwt_clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidNumber(format!(
                "JWT_CLOCK_SKEW_SECONDS must be at most {}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let access_token_ttl_seconds = parse_positive::<u64>(
            vars,
            "ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        )?;
        let empty_timeout_seconds =
            parse_positive::<u32>(vars, "EMPTY_TIMEOUT_SECONDS", DEFAULT_EMPTY_TIMEOUT_SECONDS)?;
        let departure_timeout_seconds = parse_positive::<u32>(
            vars,
            "DEPARTURE_TIMEOUT_SECONDS",
            DEFAULT_DEPARTURE_TIMEOUT_SECONDS,
        )?;
        let media_request_timeout_seconds = parse_positive::<u64>(
            vars,
            "MEDIA_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_MEDIA_REQUEST_TIMEOUT_SECONDS,
        )?;
        let scheduled_join_lead_minutes = parse_positive::<i64>(
            vars,
            "SCHEDULED_JOIN_LEAD_MINUTES",
            DEFAULT_SCHEDULED_JOIN_LEAD_MINUTES,
        )?;
        let request_timeout_seconds = parse_positive::<u64>(
            vars,
            "REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        let auto_recording_enabled = match vars.get("AUTO_RECORDING_ENABLED") {
            None => false,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidBool(format!(
                        "AUTO_RECORDING_ENABLED must be true or false, got '{}'",
                        value
                    )))
                }
            },
        };

        let recording_filepath_prefix = vars
            .get("RECORDING_FILEPATH_PREFIX")
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RECORDING_FILEPATH_PREFIX.to_string());

        Ok(Config {
            store_backend,
            database_url,
            bind_address,
            livekit_url,
            livekit_api_key,
            livekit_api_secret,
            auth_jwt_secret,
            jwt_clock_skew_seconds,
            access_token_ttl_seconds,
            empty_timeout_seconds,
            departure_timeout_seconds,
            media_request_timeout_seconds,
            auto_recording_enabled,
            recording_filepath_prefix,
            scheduled_join_lead_minutes,
            request_timeout_seconds,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Parse an optional numeric variable that must be greater than zero.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidNumber(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidNumber(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(value)
}
