//! In-process coordination store
//!
//! Mirrors the etcd semantics the registrar relies on: keys may be attached
//! to leases, an expired or revoked lease takes its keys with it, and locks
//! live on a session lease so an abandoned lock is reclaimed after its TTL.
//! Expiry is evaluated lazily on every call.

use super::{CoordinationStore, KeyValue, LeaseId, LockGuard};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Operation counters, mostly useful to assert on in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub puts: u64,
    pub deletes: u64,
    pub locks_granted: u64,
    pub leases_expired: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

#[derive(Debug, Clone)]
struct HeldLock {
    key: String,
    session: LeaseId,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Instant>,
    locks: HashMap<String, HeldLock>,
    next_lease: i64,
    stats: MemoryStoreStats,
}

impl State {
    fn grant(&mut self, now: Instant, ttl: Duration) -> LeaseId {
        self.next_lease += 1;
        let id = LeaseId(self.next_lease);
        self.leases.insert(id, now + ttl);
        id
    }

    fn revoke(&mut self, id: LeaseId) -> bool {
        if self.leases.remove(&id).is_none() {
            return false;
        }
        self.entries.retain(|_, entry| entry.lease != Some(id));
        self.locks.retain(|_, held| held.session != id);
        true
    }

    fn purge(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            tracing::debug!(lease = %id, "lease expired");
            self.revoke(id);
            self.stats.leases_expired += 1;
        }
    }
}

/// In-memory [`CoordinationStore`]
pub struct MemoryStore {
    state: Mutex<State>,
    lock_released: Notify,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lock_released: Notify::new(),
        }
    }

    /// Grant a lease that expires after `ttl` unless revoked first
    pub fn grant_lease(&self, ttl: Duration) -> LeaseId {
        self.state.lock().unwrap().grant(Instant::now(), ttl)
    }

    /// Revoke a lease, deleting every key attached to it. Returns whether it existed.
    pub fn revoke_lease(&self, id: LeaseId) -> bool {
        let (existed, held_lock) = {
            let mut state = self.state.lock().unwrap();
            let held_lock = state.locks.values().any(|held| held.session == id);
            (state.revoke(id), held_lock)
        };
        if held_lock {
            self.lock_released.notify_waiters();
        }
        existed
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.purge(Instant::now());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStoreStats {
        self.state.lock().unwrap().stats
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut state = self.state.lock().unwrap();
        state.purge(Instant::now());
        Ok(state.entries.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            lease: entry.lease,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut state = self.state.lock().unwrap();
        state.purge(Instant::now());
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                lease: entry.lease,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.purge(Instant::now());
        if let Some(id) = lease {
            if !state.leases.contains_key(&id) {
                return Err(Error::Store(format!("requested lease not found: {}", id)));
            }
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        state.stats.puts += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.purge(Instant::now());
        state.stats.deletes += 1;
        Ok(state.entries.remove(key).is_some())
    }

    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before the state check so a release in between is not missed
            let released = self.lock_released.notified();

            let wake_at = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                state.purge(now);

                let holder = state.locks.get(name).map(|held| held.session);
                match holder {
                    None => {
                        let session = state.grant(now, ttl);
                        let key = format!("{}/{}", name, uuid::Uuid::new_v4());
                        state.locks.insert(
                            name.to_string(),
                            HeldLock {
                                key: key.clone(),
                                session,
                                ttl,
                            },
                        );
                        state.stats.locks_granted += 1;
                        return Ok(LockGuard {
                            name: name.to_string(),
                            key,
                            session,
                        });
                    }
                    Some(session) => state
                        .leases
                        .get(&session)
                        .copied()
                        .unwrap_or(now)
                        .min(deadline),
                }
            };

            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!("waiting for lock {}", name)));
            }

            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn keep_alive(&self, guard: &LockGuard) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.purge(now);

        let ttl = match state.locks.get(&guard.name) {
            Some(held) if held.key == guard.key => held.ttl,
            _ => {
                return Err(Error::Store(format!(
                    "lock {} is no longer held by {}",
                    guard.name, guard.key
                )))
            }
        };
        state.leases.insert(guard.session, now + ttl);
        Ok(())
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.purge(Instant::now());

            let owned = matches!(state.locks.get(&guard.name), Some(held) if held.key == guard.key);
            if !owned {
                return Err(Error::Store(format!(
                    "lock {} is no longer held by {}",
                    guard.name, guard.key
                )));
            }
            state.revoke(guard.session);
        }
        self.lock_released.notify_waiters();
        Ok(())
    }
}
