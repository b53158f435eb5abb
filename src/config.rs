use std::{
    env,
    fmt::Display,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use axum::http::HeaderValue;
use chrono::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::AuthSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub frontend_url: String,
    pub host: String,
    pub port: u16,
    pub auth_secret: Option<String>,
    pub session_ttl_secs: i64,
    pub session_cookie_secure: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let session_ttl_secs = try_load(&lookup, "SESSION_TTL_SECS", "604800")?;
        if session_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                message: "must be positive".to_string(),
            });
        }

        Ok(Self {
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite://todo.db")?,
            max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?,
            frontend_url: try_load(&lookup, "FRONTEND_URL", "http://localhost:3000")?,
            host: try_load(&lookup, "HOST", "0.0.0.0")?,
            port: try_load(&lookup, "PORT", "3001")?,
            auth_secret: lookup("AUTH_SECRET").filter(|secret| !secret.is_empty()),
            session_ttl_secs,
            session_cookie_secure: load_flag(&lookup, "SESSION_COOKIE_SECURE", true)?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            key: "HOST",
            message,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid(format!("{} does not resolve", self.host)))
    }

    pub fn allowed_origin(&self) -> Result<HeaderValue, ConfigError> {
        HeaderValue::from_str(&self.frontend_url).map_err(|e| ConfigError::Invalid {
            key: "FRONTEND_URL",
            message: e.to_string(),
        })
    }

    pub fn auth_settings(&self) -> Result<AuthSettings, ConfigError> {
        let ttl =
            Duration::try_seconds(self.session_ttl_secs).ok_or_else(|| ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                message: "out of range".to_string(),
            })?;
        let settings = match &self.auth_secret {
            Some(secret) => AuthSettings::new(secret.as_bytes(), ttl),
            None => {
                warn!("AUTH_SECRET not set, sessions will not survive a restart");
                AuthSettings::with_random_secret(ttl).map_err(|e| ConfigError::Invalid {
                    key: "AUTH_SECRET",
                    message: e.to_string(),
                })?
            }
        };
        Ok(settings.with_secure_cookie(self.session_cookie_secure))
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}

fn load_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default}");
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got {raw:?}"),
        }),
    }
}
