//! Coordination store abstraction
//!
//! The registrar only needs a handful of primitives from the store:
//! point and prefix reads that expose each key's lease, lease-bound puts,
//! deletes, and a TTL-backed distributed lock with session renewal. Backends:
//! - [`MemoryStore`]: in-process, leases and locks simulated locally
//! - `EtcdStore`: etcd v3 (feature `etcd`)

pub mod deadline;
pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use deadline::DeadlineStore;
pub use memory::{MemoryStore, MemoryStoreStats};

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store-assigned lease identifier
///
/// Opaque to this crate: it is read from a presence record and copied onto
/// routing keys, never granted or renewed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub i64);

impl LeaseId {
    /// etcd reports lease `0` for keys without a lease
    pub fn from_raw(raw: i64) -> Option<Self> {
        (raw != 0).then_some(LeaseId(raw))
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A key as returned by a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub lease: Option<LeaseId>,
}

/// Proof of lock ownership, handed back to [`CoordinationStore::unlock`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    /// Lock name as requested
    pub name: String,
    /// Ownership key held in the store while the lock is taken
    pub key: String,
    /// Session lease backing the lock
    pub session: LeaseId,
}

/// Primitives the registrar needs from a coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// Read every key starting with `prefix`, sorted by key
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Write a key, optionally attached to an existing lease
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Take the named lock, waiting at most `timeout`
    ///
    /// The lock lives on a session lease of `ttl`, so a holder that dies
    /// without unlocking blocks others for at most `ttl`.
    /// Fails with [`crate::Error::Timeout`] when the wait runs out.
    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard>;

    /// Renew the session lease behind `guard` for another full TTL
    ///
    /// Fails if the session already expired, in which case the lock is lost.
    async fn keep_alive(&self, guard: &LockGuard) -> Result<()>;

    /// Release a lock taken with [`CoordinationStore::lock`]
    async fn unlock(&self, guard: LockGuard) -> Result<()>;
}
