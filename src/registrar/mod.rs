//! Traefik route registration
//!
//! A registration runs once per instance start:
//! - take the service's registration lock (Scan and Counter only)
//! - allocate a slot
//! - resolve the lease of the instance's own presence record
//! - write one routing key per advertised endpoint, bound to that lease
//!
//! Every step hands an immutable value to the next, so one [`Registrar`]
//! can serve any number of concurrent registrations.

pub mod endpoint;
pub mod key;
pub mod lease;
pub mod lock;
pub mod slot;
pub mod writer;

pub use endpoint::{EndpointSet, Protocol};
pub use key::RouteTemplate;
pub use lease::LeaseResolver;
pub use lock::LockCoordinator;
pub use slot::SlotAllocator;
pub use writer::{RegistrationWriter, RoutingEntry};

use crate::common::{validate_segment, Config, Result};
use crate::store::{CoordinationStore, DeadlineStore, LeaseId, LockGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Accessors the service framework exposes on its application object
pub trait ServiceInstance: Send + Sync {
    /// Service name
    fn name(&self) -> &str;
    /// Instance id assigned by the framework
    fn id(&self) -> &str;
    /// Advertised endpoints; with two, grpc first and http second
    fn endpoints(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub service: String,
    pub instance_id: String,
}

impl ServiceIdentity {
    pub fn new(service: impl Into<String>, instance_id: impl Into<String>) -> Result<Self> {
        let identity = Self {
            service: service.into(),
            instance_id: instance_id.into(),
        };
        validate_segment("service name", &identity.service)?;
        validate_segment("instance id", &identity.instance_id)?;
        Ok(identity)
    }
}

/// A [`ServiceInstance`] described by plain values
#[derive(Debug, Clone)]
pub struct StaticInstance {
    identity: ServiceIdentity,
    endpoints: Vec<String>,
}

impl StaticInstance {
    pub fn new(identity: ServiceIdentity, endpoints: Vec<String>) -> Self {
        Self {
            identity,
            endpoints,
        }
    }
}

impl ServiceInstance for StaticInstance {
    fn name(&self) -> &str {
        &self.identity.service
    }

    fn id(&self) -> &str {
        &self.identity.instance_id
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub identity: ServiceIdentity,
    pub slot: u32,
    pub lease: LeaseId,
    pub entries: Vec<RoutingEntry>,
}

pub struct Registrar {
    store: Arc<dyn CoordinationStore>,
    template: RouteTemplate,
    lock: LockCoordinator,
    allocator: SlotAllocator,
    resolver: LeaseResolver,
    writer: RegistrationWriter,
}

impl Registrar {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn CoordinationStore> = match config.store_timeout() {
            Some(timeout) => Arc::new(DeadlineStore::new(store, timeout)),
            None => store,
        };
        let template = RouteTemplate::new(&config.root_key, &config.grpc_suffix);

        Ok(Self {
            store,
            lock: LockCoordinator::new(
                &config.lock_prefix,
                config.lock_ttl(),
                config.lock_timeout(),
            ),
            allocator: SlotAllocator::new(config.strategy, template.clone(), &config.counter_prefix),
            resolver: LeaseResolver::new(&config.presence_prefix),
            writer: RegistrationWriter::new(template.clone()),
            template,
        })
    }

    /// Publish routing keys for `instance`
    ///
    /// Fails without writing anything if the lock cannot be taken in time,
    /// the slot cannot be computed, or the instance has no presence record.
    /// A failure while writing may leave sibling keys behind; see
    /// [`crate::Error::committed_keys`] and [`Registrar::remove_keys`].
    #[tracing::instrument(skip_all, fields(service = %instance.name(), instance = %instance.id()))]
    pub async fn register(&self, instance: &dyn ServiceInstance) -> Result<Registration> {
        let identity = ServiceIdentity::new(instance.name(), instance.id())?;
        let endpoints = EndpointSet::new(instance.endpoints())?;
        let store = self.store.as_ref();
        let service = identity.service.as_str();

        let mut guard = if self.allocator.needs_lock() {
            Some(self.lock.acquire(store, service).await?)
        } else {
            None
        };

        // Scan only learns about a slot once its key exists, so it keeps
        // the lock until the keys are written
        let slot = self.allocator.allocate(store, service).await;
        let slot = match guard.take() {
            Some(held) if !self.allocator.claims_on_write() || slot.is_err() => {
                self.unlock_after(held, slot, |_| vec![]).await?
            }
            held => {
                guard = held;
                slot?
            }
        };

        let (lease, entries) = match guard {
            Some(held) => {
                let published = self.publish_locked(&held, &identity, &endpoints, slot).await;
                self.unlock_after(held, published, |(_, entries): &(LeaseId, Vec<RoutingEntry>)| {
                    entries.iter().map(|entry| entry.key.clone()).collect()
                })
                .await?
            }
            None => self.publish(&identity, &endpoints, slot).await?,
        };

        tracing::info!(slot, lease = %lease, routes = entries.len(), "instance registered");
        Ok(Registration {
            identity,
            slot,
            lease,
            entries,
        })
    }

    /// Delete the routing keys written by `registration`
    ///
    /// Keys now bound to a different lease belong to another instance (the
    /// slot was reassigned) and are left alone. Returns how many were removed.
    pub async fn deregister(&self, registration: &Registration) -> Result<usize> {
        let mut removed = 0;
        for entry in &registration.entries {
            match self.store.get(&entry.key).await? {
                Some(kv) if kv.lease == Some(registration.lease) => {
                    if self.store.delete(&entry.key).await? {
                        removed += 1;
                    }
                }
                Some(kv) => {
                    tracing::warn!(key = %entry.key, lease = ?kv.lease, "routing key now owned by another lease, skipping");
                }
                None => {}
            }
        }
        tracing::info!(service = %registration.identity.service, slot = registration.slot, removed, "instance deregistered");
        Ok(removed)
    }

    /// Delete every routing key of `identity`'s service bound to its presence lease
    ///
    /// For callers that no longer hold the [`Registration`], such as a
    /// separate cleanup process.
    pub async fn deregister_instance(&self, identity: &ServiceIdentity) -> Result<usize> {
        let store = self.store.as_ref();
        let lease = self.resolver.resolve(store, identity).await?;
        let service = identity.service.as_str();

        let kvs = store.get_prefix(&self.template.service_prefix(service)).await?;
        let mut removed = 0;
        for kv in kvs {
            if kv.lease == Some(lease)
                && self.template.parse(&kv.key, service).is_some()
                && store.delete(&kv.key).await?
            {
                removed += 1;
            }
        }
        tracing::info!(service, instance = %identity.instance_id, removed, "instance deregistered");
        Ok(removed)
    }

    /// Delete arbitrary keys, e.g. those left by a half-written registration
    pub async fn remove_keys(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.store.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Routing entries currently published for `service`, grpc first, by slot
    pub async fn routes(&self, service: &str) -> Result<Vec<RoutingEntry>> {
        validate_segment("service name", service)?;

        let kvs = self.store.get_prefix(&self.template.service_prefix(service)).await?;
        let mut entries: Vec<RoutingEntry> = kvs
            .into_iter()
            .filter_map(|kv| {
                let (protocol, slot) = self.template.parse(&kv.key, service)?;
                Some(RoutingEntry {
                    protocol,
                    slot,
                    key: kv.key,
                    value: kv.value,
                })
            })
            .collect();
        entries.sort_by_key(|entry| (entry.protocol, entry.slot));
        Ok(entries)
    }

    async fn publish(
        &self,
        identity: &ServiceIdentity,
        endpoints: &EndpointSet,
        slot: u32,
    ) -> Result<(LeaseId, Vec<RoutingEntry>)> {
        let store = self.store.as_ref();
        let lease = self.resolver.resolve(store, identity).await?;
        let entries = self
            .writer
            .write(store, endpoints, lease, &identity.service, slot)
            .await?;
        Ok((lease, entries))
    }

    /// [`Registrar::publish`] while keeping the lock session of `guard` alive
    ///
    /// Fails before writing if the session is already gone. A renewal that
    /// fails mid-write is only logged; the release afterwards reports it.
    async fn publish_locked(
        &self,
        guard: &LockGuard,
        identity: &ServiceIdentity,
        endpoints: &EndpointSet,
        slot: u32,
    ) -> Result<(LeaseId, Vec<RoutingEntry>)> {
        let store = self.store.as_ref();
        self.lock.refresh(store, guard).await?;

        let period = self.lock.refresh_period().max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let publish = self.publish(identity, endpoints, slot);
        tokio::pin!(publish);

        loop {
            tokio::select! {
                outcome = &mut publish => return outcome,
                _ = renew.tick() => {
                    if let Err(e) = self.lock.refresh(store, guard).await {
                        tracing::warn!(error = %e, "failed to renew registration lock session");
                    }
                }
            }
        }
    }

    /// Release `guard`, then hand back `outcome`
    ///
    /// A release failure replaces a successful outcome and carries the keys
    /// `written` reports for it; after a failed outcome it is only logged.
    async fn unlock_after<T>(
        &self,
        guard: LockGuard,
        outcome: Result<T>,
        written: impl FnOnce(&T) -> Vec<String>,
    ) -> Result<T> {
        let released = self.lock.release(self.store.as_ref(), guard).await;
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(value), Err(e)) => Err(e.with_committed(written(&value))),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => {
                tracing::warn!(error = %release, "failed to release registration lock after error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotStrategy;
    use crate::store::MemoryStore;
    use crate::Error;

    fn config(strategy: SlotStrategy) -> Config {
        Config {
            strategy,
            lock_timeout_secs: 1,
            ..Default::default()
        }
    }

    async fn presence(store: &MemoryStore, service: &str, id: &str) -> LeaseId {
        let lease = store.grant_lease(Duration::from_secs(30));
        store
            .put(&format!("/microservices/{}/{}", service, id), "{}", Some(lease))
            .await
            .unwrap();
        lease
    }

    fn instance(id: &str, endpoints: &[&str]) -> StaticInstance {
        StaticInstance::new(
            ServiceIdentity::new("user", id).unwrap(),
            endpoints.iter().map(|e| e.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_register_two_endpoints() {
        let store = Arc::new(MemoryStore::new());
        let lease = presence(&store, "user", "i-1").await;
        let registrar = Registrar::new(store.clone(), &config(SlotStrategy::Scan)).unwrap();

        let registration = registrar
            .register(&instance("i-1", &["grpc://h:1", "http://h:2"]))
            .await
            .unwrap();

        assert_eq!(registration.slot, 1);
        assert_eq!(registration.lease, lease);
        assert_eq!(registration.entries.len(), 2);
        assert_eq!(registration.entries[0].protocol, Protocol::Grpc);
        assert_eq!(registration.entries[0].value, "h2c://h:1");
        assert_eq!(registration.entries[1].protocol, Protocol::Http);
        assert_eq!(registration.entries[1].value, "http://h:2");

        let routes = registrar.routes("user").await.unwrap();
        assert_eq!(routes, registration.entries);
    }

    #[tokio::test]
    async fn test_scan_allocates_past_existing_routes() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone(), &config(SlotStrategy::Scan)).unwrap();

        for (i, id) in ["i-1", "i-2", "i-3"].into_iter().enumerate() {
            presence(&store, "user", id).await;
            let registration = registrar
                .register(&instance(id, &["http://h:80"]))
                .await
                .unwrap();
            assert_eq!(registration.slot, i as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_missing_presence_writes_nothing_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone(), &config(SlotStrategy::Scan)).unwrap();

        let err = registrar
            .register(&instance("ghost", &["http://h:80"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeaseNotFound { .. }));
        assert_eq!(store.stats().puts, 0);

        // Lock was released, the next attempt is not blocked
        presence(&store, "user", "i-1").await;
        registrar
            .register(&instance("i-1", &["http://h:80"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deregister_leaves_reassigned_keys() {
        let store = Arc::new(MemoryStore::new());
        presence(&store, "user", "i-1").await;
        let registrar = Registrar::new(store.clone(), &config(SlotStrategy::External { slot: 5 }))
            .unwrap();

        let registration = registrar
            .register(&instance("i-1", &["grpc://h:1", "http://h:2"]))
            .await
            .unwrap();

        // Another instance took over the http key
        let other = store.grant_lease(Duration::from_secs(30));
        store
            .put(&registration.entries[1].key, "http://other:2", Some(other))
            .await
            .unwrap();

        assert_eq!(registrar.deregister(&registration).await.unwrap(), 1);
        let routes = registrar.routes("user").await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].value, "http://other:2");
    }

    #[tokio::test]
    async fn test_invalid_endpoints_rejected_before_locking() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone(), &config(SlotStrategy::Scan)).unwrap();

        let err = registrar
            .register(&instance("i-1", &["grpc://a", "http://b", "http://c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoints(_)));
        assert_eq!(store.stats().locks_granted, 0);
    }
}
