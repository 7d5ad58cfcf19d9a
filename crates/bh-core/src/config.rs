use std::path::PathBuf;
use std::time::Duration;

/// Immutable server configuration, resolved from the environment exactly once
/// at startup and passed explicitly to everything that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    /// `sqlite://<path>` URL, a bare filesystem path, or `:memory:`.
    pub database_url: String,
    /// Accepted for deployment parity; the ephemeral store in this build is
    /// in-process, so a set value only produces a startup warning.
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
    pub presence_ttl: Duration,
    pub reservation_ttl: Duration,
    /// Enables signed-proxy auth when set.
    pub internal_auth_secret: Option<String>,
    /// Fallback proxy secret.
    pub session_secret_key: Option<String>,
    /// Directory of policy default assets; `None` uses the embedded bundle.
    pub policy_asset_dir: Option<PathBuf>,
    pub outbox_max_attempts: u32,
    pub outbox_batch_size: u32,
    pub outbox_base_backoff: Duration,
    pub outbox_backoff_cap: Duration,
    pub request_timeout: Duration,
    pub drain_timeout: Duration,
    pub max_body_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    /// Resolve configuration from process environment.
    ///
    /// `DATABASE_URL` is the only required variable; everything else has the
    /// defaults below.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 8710)?,
            log_level: env_or("LOG_LEVEL", "info"),
            log_format: env_or("LOG_FORMAT", "text"),
            presence_ttl: Duration::from_secs(env_parse("PRESENCE_TTL_SECONDS", 1800)?),
            reservation_ttl: Duration::from_secs(env_parse("RESERVATION_TTL_SECONDS", 300)?),
            internal_auth_secret: std::env::var("INTERNAL_AUTH_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            session_secret_key: std::env::var("SESSION_SECRET_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            policy_asset_dir: std::env::var("POLICY_ASSET_DIR").ok().map(PathBuf::from),
            outbox_max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", 5)?,
            outbox_batch_size: env_parse("OUTBOX_BATCH_SIZE", 20)?,
            outbox_base_backoff: Duration::from_secs(env_parse("OUTBOX_BASE_BACKOFF_SECONDS", 2)?),
            outbox_backoff_cap: Duration::from_secs(env_parse("OUTBOX_BACKOFF_CAP_SECONDS", 300)?),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECONDS", 30)?),
            drain_timeout: Duration::from_secs(env_parse("DRAIN_TIMEOUT_SECONDS", 15)?),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 262_144)?,
        })
    }

    /// The secret used to verify signed-proxy headers, when proxy mode is on.
    pub fn proxy_secret(&self) -> Option<&str> {
        self.internal_auth_secret
            .as_deref()
            .or(self.session_secret_key.as_deref())
    }

    /// The SQLite path portion of `database_url`.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url)
    }

    /// A config suitable for tests: in-memory database, short timeouts.
    pub fn for_tests() -> Self {
        Self {
            database_url: ":memory:".into(),
            redis_url: None,
            host: "127.0.0.1".into(),
            port: 0,
            log_level: "debug".into(),
            log_format: "text".into(),
            presence_ttl: Duration::from_secs(1800),
            reservation_ttl: Duration::from_secs(300),
            internal_auth_secret: Some("test-proxy-secret".into()),
            session_secret_key: None,
            policy_asset_dir: None,
            outbox_max_attempts: 3,
            outbox_batch_size: 10,
            outbox_base_backoff: Duration::from_millis(10),
            outbox_backoff_cap: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            max_body_bytes: 262_144,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(default),
    }
}
