use crate::sse::DEFAULT_HEARTBEAT_INTERVAL;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 20;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set. Add it to your .env")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let bind_addr = parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;
        let database_max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", Some(DEFAULT_MAX_CONNECTIONS))?;
        let heartbeat_secs = parse_or(
            &lookup,
            "HEARTBEAT_INTERVAL_SECS",
            Some(DEFAULT_HEARTBEAT_INTERVAL.as_secs()),
        )?;
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HEARTBEAT_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_max_connections,
            bind_addr,
            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: lookup("JWT_ISSUER").filter(|v| !v.trim().is_empty()),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}
