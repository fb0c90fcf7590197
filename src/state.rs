use std::str::FromStr;
use std::sync::Arc;

use crate::{
    auth::IdentityVerifier,
    error::{AppError, Result},
    message::{MessageService, MessageStore},
    presence::PresenceDirectory,
    relay::RelayEngine,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: RelayEngine,
    pub message_service: MessageService,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MessageStore>,
        presence: Arc<dyn PresenceDirectory>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let relay = RelayEngine::new(presence, store.clone(), verifier.clone())
            .with_presence_refresh(config.presence_refresh_on_send);

        Self {
            config,
            relay,
            message_service: MessageService::new(store),
            verifier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Postgres message store; in-memory when unset.
    pub database_url: Option<String>,
    /// Redis presence directory; in-process when unset.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub presence_ttl_secs: u64,
    pub presence_refresh_on_send: bool,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    pub handshake_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Empty means any origin, without credentials.
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: None,
            redis_url: None,
            jwt_secret: String::new(),
            jwt_issuer: None,
            jwt_audience: None,
            presence_ttl_secs: 1800,
            presence_refresh_on_send: false,
            outbound_buffer: 64,
            handshake_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_or(var("PORT"), "PORT", defaults.port)?,
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            jwt_secret: var("JWT_SECRET")
                .ok_or_else(|| AppError::Config("JWT_SECRET must be set".to_string()))?,
            jwt_issuer: var("JWT_ISSUER"),
            jwt_audience: var("JWT_AUDIENCE"),
            presence_ttl_secs: parse_or(
                var("PRESENCE_TTL_SECS"),
                "PRESENCE_TTL_SECS",
                defaults.presence_ttl_secs,
            )?,
            presence_refresh_on_send: parse_or(
                var("PRESENCE_REFRESH_ON_SEND"),
                "PRESENCE_REFRESH_ON_SEND",
                defaults.presence_refresh_on_send,
            )?,
            outbound_buffer: parse_or(
                var("OUTBOUND_BUFFER"),
                "OUTBOUND_BUFFER",
                defaults.outbound_buffer,
            )?,
            handshake_timeout_secs: parse_or(
                var("HANDSHAKE_TIMEOUT_SECS"),
                "HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout_secs,
            )?,
            heartbeat_interval_secs: parse_or(
                var("HEARTBEAT_INTERVAL_SECS"),
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            cors_origins: var("CORS_ORIGINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {value}"))),
        None => Ok(default),
    }
}
