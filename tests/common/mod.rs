//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use traefik_register::store::{KeyValue, LockGuard, MemoryStore};
use traefik_register::{
    Config, CoordinationStore, Error, LeaseId, Result, ServiceIdentity, SlotStrategy,
    StaticInstance,
};

pub const SERVICE: &str = "user";

/// Publish a presence record the way the framework would
pub async fn presence(store: &MemoryStore, service: &str, id: &str) -> LeaseId {
    let lease = store.grant_lease(Duration::from_secs(30));
    store
        .put(
            &format!("/microservices/{}/{}", service, id),
            r#"{"name":"user","version":"v1"}"#,
            Some(lease),
        )
        .await
        .unwrap();
    lease
}

pub fn instance(id: &str, endpoints: &[&str]) -> StaticInstance {
    StaticInstance::new(
        ServiceIdentity::new(SERVICE, id).unwrap(),
        endpoints.iter().map(|e| e.to_string()).collect(),
    )
}

pub fn config(strategy: SlotStrategy) -> Config {
    Config {
        strategy,
        lock_timeout_secs: 5,
        ..Default::default()
    }
}

/// Memory store whose `fail_on`-th put (1-based) fails
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    puts: AtomicUsize,
    fail_on: usize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, fail_on: usize) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.inner.get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(Error::Store("connection reset by peer".into()));
        }
        self.inner.put(key, value, lease).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        self.inner.lock(name, ttl, timeout).await
    }

    async fn keep_alive(&self, guard: &LockGuard) -> Result<()> {
        self.inner.keep_alive(guard).await
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        self.inner.unlock(guard).await
    }
}

/// Memory store with slow puts and, optionally, an unlock that always fails
pub struct LaggyStore {
    pub inner: Arc<MemoryStore>,
    put_delay: Duration,
    fail_unlock: bool,
}

impl LaggyStore {
    pub fn new(inner: Arc<MemoryStore>, put_delay: Duration, fail_unlock: bool) -> Self {
        Self {
            inner,
            put_delay,
            fail_unlock,
        }
    }
}

#[async_trait]
impl CoordinationStore for LaggyStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.inner.get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        tokio::time::sleep(self.put_delay).await;
        self.inner.put(key, value, lease).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        self.inner.lock(name, ttl, timeout).await
    }

    async fn keep_alive(&self, guard: &LockGuard) -> Result<()> {
        self.inner.keep_alive(guard).await
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        if self.fail_unlock {
            return Err(Error::Store("connection reset by peer".into()));
        }
        self.inner.unlock(guard).await
    }
}
