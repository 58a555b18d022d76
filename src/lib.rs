//! # traefik-register
//!
//! Publishes a service instance to Traefik's KV provider (etcd) using the
//! lease of the instance's own presence record, so routes disappear exactly
//! when the instance does.
//!
//! ## Layout
//!
//! ```text
//! /microservices/<service>/<instance-id>                      presence record (framework-owned, leased)
//! traefik/http/services/<service>/loadbalancer/servers/<n>/url       http route  ─┐ same lease
//! traefik/http/services/<service>-grpc/loadbalancer/servers/<n>/url  grpc route  ─┘
//! ```
//!
//! `<n>` is a per-service slot allocated under a distributed lock, by one of:
//! - **scan**: highest existing slot + 1
//! - **counter**: shared counter, wrapping to 1 after a bound
//! - **external**: supplied by the caller
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use traefik_register::{Config, Registrar, ServiceIdentity, StaticInstance};
//! use traefik_register::store::MemoryStore;
//!
//! # async fn run() -> traefik_register::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let registrar = Registrar::new(store, &Config::default())?;
//! let instance = StaticInstance::new(
//!     ServiceIdentity::new("user", "5f1c")?,
//!     vec!["grpc://10.0.0.7:9000".into(), "http://10.0.0.7:8000".into()],
//! );
//! let registration = registrar.register(&instance).await?;
//! println!("registered in slot {}", registration.slot);
//! # Ok(())
//! # }
//! ```
//!
//! ### CLI (feature `etcd`)
//! ```bash
//! traefik-register register --service user --id 5f1c \
//!   --endpoint grpc://10.0.0.7:9000 --endpoint http://10.0.0.7:8000
//! traefik-register routes --service user --json
//! ```

pub mod common;
pub mod registrar;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result, SlotStrategy};
pub use registrar::{
    Protocol, Registrar, Registration, RoutingEntry, ServiceIdentity, ServiceInstance,
    StaticInstance,
};
pub use store::{CoordinationStore, LeaseId};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
