//! Per-call deadline for store round-trips

use super::{CoordinationStore, KeyValue, LeaseId, LockGuard};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a store so every call except `lock` fails with [`Error::Timeout`]
/// after `timeout`. `lock` already carries its own wait budget.
pub struct DeadlineStore {
    inner: Arc<dyn CoordinationStore>,
    timeout: Duration,
}

impl DeadlineStore {
    pub fn new(inner: Arc<dyn CoordinationStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &str, key: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            Error::Timeout(format!("{} {} exceeded {:?}", op, key, self.timeout))
        })?
    }
}

#[async_trait]
impl CoordinationStore for DeadlineStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.bounded("get_prefix", prefix, self.inner.get_prefix(prefix)).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        self.bounded("put", key, self.inner.put(key, value, lease)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }

    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        self.inner.lock(name, ttl, timeout).await
    }

    async fn keep_alive(&self, guard: &LockGuard) -> Result<()> {
        self.bounded("keep_alive", &guard.key, self.inner.keep_alive(guard)).await
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        let key = guard.key.clone();
        self.bounded("unlock", &key, self.inner.unlock(guard)).await
    }
}
