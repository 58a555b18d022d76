//! Routing key writes

use super::endpoint::{EndpointSet, Protocol};
use super::key::RouteTemplate;
use crate::common::{Error, Result};
use crate::store::{CoordinationStore, LeaseId};
use serde::{Deserialize, Serialize};

/// One routing key as written to (or read back from) the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub protocol: Protocol,
    pub slot: u32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct RegistrationWriter {
    template: RouteTemplate,
}

impl RegistrationWriter {
    pub fn new(template: RouteTemplate) -> Self {
        Self { template }
    }

    /// Keys and values that `write` would put, without touching the store
    pub fn plan(&self, endpoints: &EndpointSet, service: &str, slot: u32) -> Vec<RoutingEntry> {
        endpoints
            .routes()
            .into_iter()
            .map(|(protocol, address)| RoutingEntry {
                protocol,
                slot,
                key: self.template.render(protocol, service, slot),
                value: protocol.route_value(address),
            })
            .collect()
    }

    /// Put one routing key per endpoint, each bound to `lease`
    ///
    /// Puts are independent. If one fails after another succeeded the
    /// committed keys are reported in [`Error::Write`] and left in place.
    pub async fn write(
        &self,
        store: &dyn CoordinationStore,
        endpoints: &EndpointSet,
        lease: LeaseId,
        service: &str,
        slot: u32,
    ) -> Result<Vec<RoutingEntry>> {
        let plan = self.plan(endpoints, service, slot);
        if plan.is_empty() {
            tracing::info!(service, "no endpoints advertised, nothing to register");
            return Ok(plan);
        }

        let mut committed: Vec<String> = Vec::with_capacity(plan.len());
        for entry in &plan {
            if let Err(e) = store.put(&entry.key, &entry.value, Some(lease)).await {
                if !committed.is_empty() {
                    tracing::error!(
                        key = %entry.key,
                        committed = ?committed,
                        "routing registration is half-written"
                    );
                }
                return Err(Error::Write {
                    key: entry.key.clone(),
                    committed,
                    reason: e.to_string(),
                });
            }
            tracing::info!(
                protocol = %entry.protocol,
                key = %entry.key,
                value = %entry.value,
                lease = %lease,
                "routing key written"
            );
            committed.push(entry.key.clone());
        }

        Ok(plan)
    }
}
