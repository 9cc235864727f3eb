//! Process configuration.
//!
//! The cluster target is deliberately compiled in: this operator manages a
//! single fixed deployment and nothing else. Environment variables tune the
//! ambient concerns (bind address, auth secret, log level) but can never
//! widen the mutation surface.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Namespace the managed deployment lives in.
pub const NAMESPACE: &str = "loadlab";

/// Name of the managed deployment. Also the value of the `app` label used
/// to select its pods.
pub const DEPLOYMENT: &str = "loadlab";

/// Replica floor accepted by the scale path.
pub const MIN_REPLICAS: i32 = 1;

/// Replica ceiling accepted by the scale path.
pub const MAX_REPLICAS: i32 = 5;

/// Per-call deadline for Kubernetes API operations.
pub const KUBE_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Number of EXECUTE commands a free-tier user may issue per process
/// lifetime.
pub const FREE_QUOTA_LIMIT: u32 = 3;

/// Worker idle poll interval.
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settle time between a scale mutation and its verification read.
pub const SCALE_VERIFY_GRACE: Duration = Duration::from_secs(1);

/// How long a graceful shutdown waits for the in-flight command.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AUTH_SIGNING_SECRET is not set")]
    MissingAuthSecret,

    #[error("invalid BIND_ADDR '{0}': {1}")]
    InvalidBindAddr(String, std::net::AddrParseError),

    #[error("NAMESPACE_OVERRIDE '{0}' does not match the compiled-in namespace '{NAMESPACE}'")]
    NamespaceMismatch(String),
}

/// Runtime settings derived from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Signing secret shared with the auth provider.
    pub auth_signing_secret: String,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `NAMESPACE_OVERRIDE` is advisory only: it is accepted when it names
    /// the compiled-in namespace and rejected otherwise, so a deployment
    /// manifest can assert the namespace but never widen it.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(ns) = std::env::var("NAMESPACE_OVERRIDE") {
            check_namespace_override(&ns)?;
        }

        let auth_signing_secret =
            std::env::var("AUTH_SIGNING_SECRET").map_err(|_| ConfigError::MissingAuthSecret)?;

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|e| ConfigError::InvalidBindAddr(bind_addr, e))?;

        Ok(Self {
            bind_addr,
            auth_signing_secret,
        })
    }
}

/// Validate an advisory `NAMESPACE_OVERRIDE` value against the compiled-in
/// namespace.
fn check_namespace_override(value: &str) -> Result<(), ConfigError> {
    if value != NAMESPACE {
        return Err(ConfigError::NamespaceMismatch(value.to_string()));
    }
    Ok(())
}
