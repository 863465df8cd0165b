//! Server configuration read from the environment at startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use pollroom_live::DEFAULT_FEED_CAPACITY;
use pollroom_responses::domain::answers::DEFAULT_MAX_ANSWER_LENGTH;

use crate::error::AppError;

/// Settings the server needs before it can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// PostgreSQL connection string; `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Pool size for the PostgreSQL store.
    pub db_max_connections: u32,
    /// Upper bound on acquiring a connection and on each statement.
    pub store_timeout: Duration,
    /// Longest free-text answer accepted, in characters.
    pub max_answer_length: usize,
    /// Notifications buffered per live session channel.
    pub feed_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            database_url: None,
            db_max_connections: 10,
            store_timeout: Duration::from_millis(2000),
            max_answer_length: DEFAULT_MAX_ANSWER_LENGTH,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let timeout_ms: u64 = parse_or(&lookup, "STORE_TIMEOUT_MS", 2000)?;
        if timeout_ms == 0 {
            return Err(AppError::Config("STORE_TIMEOUT_MS must be positive".into()));
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            store_timeout: Duration::from_millis(timeout_ms),
            max_answer_length: parse_or(&lookup, "MAX_ANSWER_LENGTH", defaults.max_answer_length)?,
            feed_capacity: parse_or(&lookup, "FEED_CAPACITY", defaults.feed_capacity)?,
        })
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host` and `port` do not form an address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} must be a valid number: {e}"))),
    }
}
