use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub mod cors;

pub use cors::create_cors_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/resale";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    /// Minimum gap between two completed refreshes of the same scope.
    pub refresh_cooldown: Duration,
    pub ticket_cache_ttl: Duration,
    pub cache_max_capacity: u64,
    /// Refresh snapshots not read for this long are dropped.
    pub snapshot_idle_ttl: Duration,
    /// How far a session is pushed out each time it is refreshed.
    pub session_ttl: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys take their
    /// defaults; set but unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            bind_addr: parse(&lookup, "BIND_ADDR", default_bind_addr())?,
            refresh_cooldown: Duration::from_secs(parse(&lookup, "REFRESH_COOLDOWN_SECS", 5)?),
            ticket_cache_ttl: Duration::from_secs(parse(&lookup, "TICKET_CACHE_TTL_SECS", 300)?),
            cache_max_capacity: parse(&lookup, "CACHE_MAX_CAPACITY", 10_000)?,
            snapshot_idle_ttl: Duration::from_secs(parse(&lookup, "SNAPSHOT_IDLE_SECS", 1800)?),
            session_ttl: Duration::from_secs(parse(&lookup, "SESSION_TTL_SECS", 3600)?),
            cors_allowed_origins: split_origins(
                &lookup("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string()),
            ),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_max_connections: 5,
            bind_addr: default_bind_addr(),
            refresh_cooldown: Duration::from_secs(5),
            ticket_cache_ttl: Duration::from_secs(300),
            cache_max_capacity: 10_000,
            snapshot_idle_ttl: Duration::from_secs(1800),
            session_ttl: Duration::from_secs(3600),
            cors_allowed_origins: split_origins(DEFAULT_ALLOWED_ORIGINS),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
