//! Server configuration parsed from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid SYNCROOM_BIND address: {0}")]
    InvalidBind(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Per-connection outbound frame buffer. Frames beyond it are dropped.
    pub outbox_capacity: usize,
    /// Directory served as static files at `/`, if any.
    pub public_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            public_dir: None,
        }
    }
}

impl ServerConfig {
    /// Build typed server config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `SYNCROOM_BIND`: listen address, default `0.0.0.0`
    /// - `SYNCROOM_OUTBOX_CAPACITY`: default 256, minimum 1
    /// - `SYNCROOM_PUBLIC_DIR`: static page directory, unset by default
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` or `SYNCROOM_BIND` is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => defaults.port,
        };
        let bind = match lookup("SYNCROOM_BIND") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidBind(raw))?,
            None => defaults.bind,
        };
        let outbox_capacity = lookup("SYNCROOM_OUTBOX_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.outbox_capacity)
            .max(1);
        let public_dir = lookup("SYNCROOM_PUBLIC_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self { bind, port, outbox_capacity, public_dir })
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
