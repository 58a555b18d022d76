//! Slot allocation strategies
//!
//! A slot is the small integer that distinguishes one instance's routing
//! entry from its siblings. Scan and Counter read shared state and must run
//! under the service's registration lock; External does not touch the store.

use super::key::RouteTemplate;
use crate::common::{join_key, Error, Result, SlotStrategy};
use crate::store::CoordinationStore;

#[derive(Debug, Clone)]
pub enum SlotAllocator {
    /// One past the highest slot among the service's live routing keys
    Scan { template: RouteTemplate },
    /// Shared counter at `<counter_prefix>/<service>`, wrapping to 1 after `max`
    Counter { counter_prefix: String, max: u32 },
    /// Caller-supplied slot
    External { slot: u32 },
}

impl SlotAllocator {
    pub fn new(strategy: SlotStrategy, template: RouteTemplate, counter_prefix: &str) -> Self {
        match strategy {
            SlotStrategy::Scan => SlotAllocator::Scan { template },
            SlotStrategy::Counter { max } => SlotAllocator::Counter {
                counter_prefix: counter_prefix.to_string(),
                max,
            },
            SlotStrategy::External { slot } => SlotAllocator::External { slot },
        }
    }

    pub fn needs_lock(&self) -> bool {
        !matches!(self, SlotAllocator::External { .. })
    }

    /// Does the slot only become visible to other allocators once its
    /// routing key is written?
    pub fn claims_on_write(&self) -> bool {
        matches!(self, SlotAllocator::Scan { .. })
    }

    /// Compute the slot for the next instance of `service`
    ///
    /// Callers must hold the service's registration lock when
    /// [`SlotAllocator::needs_lock`] is true.
    pub async fn allocate(&self, store: &dyn CoordinationStore, service: &str) -> Result<u32> {
        let slot = match self {
            SlotAllocator::Scan { template } => scan(store, template, service).await?,
            SlotAllocator::Counter {
                counter_prefix,
                max,
            } => increment(store, &join_key(counter_prefix, service), *max).await?,
            SlotAllocator::External { slot } => *slot,
        };
        tracing::info!(service, slot, strategy = self.name(), "slot allocated");
        Ok(slot)
    }

    fn name(&self) -> &'static str {
        match self {
            SlotAllocator::Scan { .. } => "scan",
            SlotAllocator::Counter { .. } => "counter",
            SlotAllocator::External { .. } => "external",
        }
    }
}

async fn scan(store: &dyn CoordinationStore, template: &RouteTemplate, service: &str) -> Result<u32> {
    let kvs = store
        .get_prefix(&template.service_prefix(service))
        .await
        .map_err(|e| Error::Allocation(format!("listing routes of {}: {}", service, e)))?;

    let highest = kvs
        .iter()
        .filter_map(|kv| template.parse(&kv.key, service))
        .map(|(_, slot)| slot)
        .max()
        .unwrap_or(0);

    highest
        .checked_add(1)
        .ok_or_else(|| Error::Allocation(format!("slot space of {} exhausted", service)))
}

async fn increment(store: &dyn CoordinationStore, counter_key: &str, max: u32) -> Result<u32> {
    let current = store
        .get(counter_key)
        .await
        .map_err(|e| Error::Allocation(format!("reading counter {}: {}", counter_key, e)))?;

    let next = match current {
        None => 1,
        Some(kv) => {
            let value: u32 = kv.value.trim().parse().map_err(|_| {
                Error::Allocation(format!(
                    "counter {} holds a non-numeric value: {:?}",
                    counter_key, kv.value
                ))
            })?;
            next_counter_value(value, max)
        }
    };

    store
        .put(counter_key, &next.to_string(), None)
        .await
        .map_err(|e| Error::Allocation(format!("writing counter {}: {}", counter_key, e)))?;

    Ok(next)
}

/// Successor of `value`, wrapping to 1 once it would exceed `max`
fn next_counter_value(value: u32, max: u32) -> u32 {
    match value.checked_add(1) {
        Some(next) if next <= max => next,
        _ => {
            tracing::warn!(max, "slot counter wrapped around; slot 1 may still be in use");
            1
        }
    }
}
