//! Error types for traefik-register

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Lock Errors ===
    #[error("Timed out after {timeout:?} waiting for the registration lock of {service}")]
    LockTimeout { service: String, timeout: Duration },

    #[error("Failed to release registration lock ({} routing keys already committed): {reason}", .committed.len())]
    LockRelease {
        reason: String,
        committed: Vec<String>,
    },

    // === Slot Errors ===
    #[error("Slot allocation failed: {0}")]
    Allocation(String),

    // === Lease Errors ===
    #[error("No presence record for instance {instance_id} of {service}")]
    LeaseNotFound {
        service: String,
        instance_id: String,
    },

    #[error("Lease lookup failed: {0}")]
    LeaseResolve(String),

    // === Write Errors ===
    #[error("Failed to write routing key {key} ({} already committed): {reason}", .committed.len())]
    Write {
        key: String,
        committed: Vec<String>,
        reason: String,
    },

    #[error("Invalid endpoints: {0}")]
    InvalidEndpoints(String),

    // === Store Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Can the attempt be retried from scratch without manual cleanup?
    ///
    /// A failed write may have committed sibling keys; those must be removed
    /// with `Registrar::deregister` (or left to lease expiry) first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Write { committed, .. } | Error::LockRelease { committed, .. } => {
                committed.is_empty()
            }
            Error::InvalidEndpoints(_) | Error::InvalidConfig(_) | Error::Config(_) => false,
            _ => true,
        }
    }

    /// Keys already committed when the attempt failed
    pub fn committed_keys(&self) -> &[String] {
        match self {
            Error::Write { committed, .. } | Error::LockRelease { committed, .. } => committed,
            _ => &[],
        }
    }

    /// Attach the keys written before a lock release failed
    pub(crate) fn with_committed(self, keys: Vec<String>) -> Self {
        match self {
            Error::LockRelease { reason, .. } => Error::LockRelease {
                reason,
                committed: keys,
            },
            other => other,
        }
    }
}
