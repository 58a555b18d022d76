//! etcd v3 coordination store

use super::{CoordinationStore, KeyValue, LeaseId, LockGuard};
use crate::common::{EtcdConfig, Error, Result};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, LockOptions, PutOptions};
use std::time::Duration;

/// [`CoordinationStore`] backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the cluster described by `config`
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let mut options =
            ConnectOptions::new().with_connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options)).await?;
        tracing::info!(endpoints = ?config.endpoints, "connected to etcd");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn convert(kv: &etcd_client::KeyValue) -> Result<KeyValue> {
        Ok(KeyValue {
            key: kv.key_str()?.to_string(),
            value: kv.value_str()?.to_string(),
            lease: LeaseId::from_raw(kv.lease()),
        })
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        resp.kvs().first().map(Self::convert).transpose()
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs().iter().map(Self::convert).collect()
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut client = self.client.clone();
        let options = lease.map(|id| PutOptions::new().with_lease(id.0));
        client.put(key, value, options).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client.delete(key, None).await?;
        Ok(resp.deleted() > 0)
    }

    async fn lock(&self, name: &str, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        let mut client = self.client.clone();

        // etcd leases have second granularity
        let ttl_secs = ttl.as_secs().max(1) as i64;
        let session = LeaseId(client.lease_grant(ttl_secs, None).await?.id());

        let options = LockOptions::new().with_lease(session.0);
        match tokio::time::timeout(timeout, client.lock(name, Some(options))).await {
            Ok(Ok(resp)) => Ok(LockGuard {
                name: name.to_string(),
                key: String::from_utf8_lossy(resp.key()).into_owned(),
                session,
            }),
            Ok(Err(e)) => {
                revoke_quietly(&mut client, session).await;
                Err(e.into())
            }
            Err(_) => {
                revoke_quietly(&mut client, session).await;
                Err(Error::Timeout(format!("waiting for lock {}", name)))
            }
        }
    }

    async fn keep_alive(&self, guard: &LockGuard) -> Result<()> {
        let mut client = self.client.clone();
        // Opening the stream sends the first renewal
        let (_keeper, mut responses) = client.lease_keep_alive(guard.session.0).await?;
        match responses.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(Error::Store(format!(
                "lock session {} of {} expired",
                guard.session, guard.name
            ))),
        }
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        let mut client = self.client.clone();
        let unlocked = client.unlock(guard.key.as_bytes()).await;
        // Revoking the session frees the lock even if the unlock call failed
        revoke_quietly(&mut client, guard.session).await;
        unlocked?;
        Ok(())
    }
}

async fn revoke_quietly(client: &mut Client, session: LeaseId) {
    if let Err(e) = client.lease_revoke(session.0).await {
        tracing::warn!(lease = %session, error = %e, "failed to revoke lock session");
    }
}
