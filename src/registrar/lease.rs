//! Lease lookup on the framework's presence record

use super::ServiceIdentity;
use crate::common::{join_key, Error, Result};
use crate::store::{CoordinationStore, LeaseId};

/// Finds the lease the framework attached to an instance's presence record
///
/// Records live at `<presence_prefix>/<service>/<instance_id>` (the Kratos
/// etcd registry layout). Routing keys reuse that lease so they vanish with
/// the instance.
#[derive(Debug, Clone)]
pub struct LeaseResolver {
    presence_prefix: String,
}

impl LeaseResolver {
    pub fn new(presence_prefix: impl Into<String>) -> Self {
        Self {
            presence_prefix: presence_prefix.into(),
        }
    }

    pub fn record_key(&self, identity: &ServiceIdentity) -> String {
        join_key(
            &join_key(&self.presence_prefix, &identity.service),
            &identity.instance_id,
        )
    }

    pub async fn resolve(
        &self,
        store: &dyn CoordinationStore,
        identity: &ServiceIdentity,
    ) -> Result<LeaseId> {
        let record = self.record_key(identity);
        let kvs = store
            .get_prefix(&record)
            .await
            .map_err(|e| Error::LeaseResolve(format!("reading {}: {}", record, e)))?;

        // The prefix query also returns ids that merely start with ours
        let nested = format!("{}/", record);
        let lease = kvs
            .iter()
            .filter(|kv| kv.key == record || kv.key.starts_with(&nested))
            .find_map(|kv| kv.lease);

        match lease {
            Some(lease) => {
                tracing::debug!(record = %record, lease = %lease, "presence lease resolved");
                Ok(lease)
            }
            None => Err(Error::LeaseNotFound {
                service: identity.service.clone(),
                instance_id: identity.instance_id.clone(),
            }),
        }
    }
}
