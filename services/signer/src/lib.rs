//! Signer Service
//!
//! Runs the module supervisor for the configured cryptographic modules and
//! exposes the resulting token registry over a small REST API.
//!
//! # Architecture
//!
//! - **Supervisor**: one module worker per configured module, restarted on
//!   sustained failure without affecting the others
//! - **Registry**: shared token state written by the workers
//! - **HTTP API**: read-only token views plus PIN activation, routed to the
//!   owning token worker through the supervisor

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod handlers;
pub mod server;

use signer::{RemovalPolicy, SignerError, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODULES_CONFIG: &str = "/etc/signer/modules.json";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Module configuration JSON; a missing file means one software module
    pub modules_config: PathBuf,
    pub update_interval_secs: u64,
    pub max_failures: usize,
    pub failure_window_secs: u64,
    pub restart_backoff_secs: u64,
    /// Keep lost tokens in the registry, flagged unavailable
    pub retain_lost_tokens: bool,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ServiceError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| ServiceError::Config(format!("{} must be valid: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ServiceError> {
        let modules_config = std::env::var("SIGNER_MODULES_CONFIG")
            .unwrap_or_else(|_| DEFAULT_MODULES_CONFIG.to_string());

        let config = Self {
            port: env_or("PORT", 80)?,
            modules_config: PathBuf::from(modules_config),
            update_interval_secs: env_or("SIGNER_UPDATE_INTERVAL_SECS", 5)?,
            max_failures: env_or("SIGNER_MAX_FAILURES", 10)?,
            failure_window_secs: env_or("SIGNER_FAILURE_WINDOW_SECS", 60)?,
            restart_backoff_secs: env_or("SIGNER_RESTART_BACKOFF_SECS", 5)?,
            retain_lost_tokens: env_or("SIGNER_RETAIN_LOST_TOKENS", true)?,
        };

        if config.update_interval_secs == 0 {
            return Err(ServiceError::Config(
                "SIGNER_UPDATE_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            update_interval: Duration::from_secs(self.update_interval_secs),
            max_failures: self.max_failures,
            failure_window: Duration::from_secs(self.failure_window_secs),
            restart_backoff: Duration::from_secs(self.restart_backoff_secs),
            removal_policy: if self.retain_lost_tokens {
                RemovalPolicy::Retain
            } else {
                RemovalPolicy::Purge
            },
            ..Default::default()
        }
    }
}
