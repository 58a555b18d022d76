//! Per-service registration lock

use crate::common::{join_key, Error, Result};
use crate::store::{CoordinationStore, LockGuard};
use std::time::Duration;

/// Serialises slot allocation among instances of the same service
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    lock_prefix: String,
    ttl: Duration,
    timeout: Duration,
}

impl LockCoordinator {
    pub fn new(lock_prefix: impl Into<String>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            lock_prefix: lock_prefix.into(),
            ttl,
            timeout,
        }
    }

    pub fn lock_name(&self, service: &str) -> String {
        join_key(&self.lock_prefix, service)
    }

    /// Take the lock for `service`, giving up after the configured timeout
    #[tracing::instrument(skip(self, store), fields(ttl = ?self.ttl, timeout = ?self.timeout))]
    pub async fn acquire(&self, store: &dyn CoordinationStore, service: &str) -> Result<LockGuard> {
        match store.lock(&self.lock_name(service), self.ttl, self.timeout).await {
            Ok(guard) => {
                tracing::debug!(key = %guard.key, "registration lock acquired");
                Ok(guard)
            }
            Err(Error::Timeout(_)) => {
                tracing::error!("timed out waiting for the registration lock");
                Err(Error::LockTimeout {
                    service: service.to_string(),
                    timeout: self.timeout,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Release a lock taken by [`LockCoordinator::acquire`]
    ///
    /// Any failure here means exclusivity can no longer be vouched for.
    pub async fn release(&self, store: &dyn CoordinationStore, guard: LockGuard) -> Result<()> {
        let key = guard.key.clone();
        store
            .unlock(guard)
            .await
            .map_err(|e| Error::LockRelease {
                reason: format!("{}: {}", key, e),
                committed: vec![],
            })?;
        tracing::debug!(key = %key, "registration lock released");
        Ok(())
    }

    /// How often a held lock's session is renewed
    pub fn refresh_period(&self) -> Duration {
        self.ttl / 3
    }

    /// Renew the session behind `guard`; an error means the lock is gone
    pub async fn refresh(&self, store: &dyn CoordinationStore, guard: &LockGuard) -> Result<()> {
        store.keep_alive(guard).await?;
        tracing::trace!(key = %guard.key, "registration lock session renewed");
        Ok(())
    }
}
