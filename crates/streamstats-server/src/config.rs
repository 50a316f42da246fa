// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use streamstats::constants::{DEFAULT_PRUNE_INTERVAL, DEFAULT_RECONNECT_DELAY};

const DEFAULT_ADDR: [u8; 4] = [0, 0, 0, 0];
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STREAM_URL: &str = "https://stream.upfluence.co/stream";
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_LEVEL: &str = "info";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not valid: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("stream url must not be empty")]
    EmptyStreamUrl,
    #[error("log level must be one of trace, debug, info, warn, error (got {0})")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub stream_url: String,
    /// how often stale buckets are pruned
    pub prune_interval: Duration,
    /// wait between ingestion reconnect attempts
    pub reconnect_delay: Duration,
    /// grace period for in-flight requests on shutdown
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<ServerConfig, ConfigError> {
        let addr = parse_var("STREAMSTATS_ADDR")?
            .unwrap_or_else(|| SocketAddr::from((DEFAULT_ADDR, DEFAULT_PORT)));

        let stream_url =
            env::var("STREAMSTATS_STREAM_URL").unwrap_or_else(|_| DEFAULT_STREAM_URL.to_string());

        let prune_interval = parse_var("STREAMSTATS_PRUNE_INTERVAL_SECS")?
            .map_or(DEFAULT_PRUNE_INTERVAL, Duration::from_secs);
        let reconnect_delay = parse_var("STREAMSTATS_RECONNECT_DELAY_SECS")?
            .map_or(DEFAULT_RECONNECT_DELAY, Duration::from_secs);
        let shutdown_timeout = parse_var("STREAMSTATS_SHUTDOWN_TIMEOUT_SECS")?
            .map_or(DEFAULT_SHUTDOWN_TIMEOUT, Duration::from_secs);

        let log_level = env::var("STREAMSTATS_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let config = ServerConfig {
            addr,
            stream_url,
            prune_interval,
            reconnect_delay,
            shutdown_timeout,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_url.trim().is_empty() {
            return Err(ConfigError::EmptyStreamUrl);
        }
        if self.prune_interval.is_zero() {
            return Err(ConfigError::Zero("prune interval"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Zero("shutdown timeout"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        Ok(())
    }
}

/// `Ok(None)` when the variable is unset.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}
