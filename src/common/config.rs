//! Configuration for traefik-register

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `TRAEFIK_REGISTER_ROOT_KEY=traefik`
pub const ENV_PREFIX: &str = "TRAEFIK_REGISTER";

/// Global configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Traefik KV provider root key
    pub root_key: String,

    /// Namespace of the framework's presence records (`<prefix>/<service>/<id>`)
    pub presence_prefix: String,

    /// Namespace of the per-service registration locks
    pub lock_prefix: String,

    /// Namespace of the per-service slot counters
    pub counter_prefix: String,

    /// Suffix appended to the service name for the grpc routing entry
    pub grpc_suffix: String,

    /// TTL of the lock session; bounds how long a crashed holder blocks others
    pub lock_ttl_secs: u64,

    /// How long to wait for the registration lock before giving up
    pub lock_timeout_secs: u64,

    /// Deadline for each unguarded store call (none if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout_ms: Option<u64>,

    /// Slot allocation strategy
    pub strategy: SlotStrategy,

    /// etcd connection settings
    pub etcd: EtcdConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_key: default_root_key(),
            presence_prefix: default_presence_prefix(),
            lock_prefix: default_lock_prefix(),
            counter_prefix: default_counter_prefix(),
            grpc_suffix: default_grpc_suffix(),
            lock_ttl_secs: default_lock_ttl(),
            lock_timeout_secs: default_lock_timeout(),
            store_timeout_ms: None,
            strategy: SlotStrategy::default(),
            etcd: EtcdConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_root_key() -> String {
    "traefik".to_string()
}
fn default_presence_prefix() -> String {
    "/microservices".to_string()
}
fn default_lock_prefix() -> String {
    "/traefik-register/locks".to_string()
}
fn default_counter_prefix() -> String {
    "/traefik-register/counters".to_string()
}
fn default_grpc_suffix() -> String {
    "-grpc".to_string()
}
fn default_lock_ttl() -> u64 {
    15
}
fn default_lock_timeout() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_slot() -> u32 {
    1023
}

/// How an instance obtains its slot number. Fixed for the life of a registrar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotStrategy {
    /// Highest slot among existing routing keys, plus one
    #[default]
    Scan,
    /// Shared per-service counter, wrapping to 1 after `max`
    Counter {
        #[serde(default = "default_max_slot")]
        max: u32,
    },
    /// Slot supplied by the caller; uniqueness is the caller's problem
    External { slot: u32 },
}

impl std::fmt::Display for SlotStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStrategy::Scan => write!(f, "scan"),
            SlotStrategy::Counter { max } => write!(f, "counter(max={})", max),
            SlotStrategy::External { slot } => write!(f, "external({})", slot),
        }
    }
}

/// etcd configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Cluster endpoints
    pub endpoints: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            username: None,
            password: None,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load config from an optional TOML file, then `TRAEFIK_REGISTER_*` env vars
    ///
    /// Nested keys use a double underscore, e.g. `TRAEFIK_REGISTER_STRATEGY__KIND=counter`.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("etcd.endpoints"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every registration fail or collide
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("root_key", &self.root_key),
            ("presence_prefix", &self.presence_prefix),
            ("lock_prefix", &self.lock_prefix),
            ("counter_prefix", &self.counter_prefix),
        ] {
            if value.trim_matches('/').is_empty() {
                return Err(crate::Error::InvalidConfig(format!("{} cannot be empty", name)));
            }
        }

        if self.grpc_suffix.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "grpc_suffix cannot be empty: grpc and http routes would share a key".into(),
            ));
        }
        if self.grpc_suffix.contains('/') {
            return Err(crate::Error::InvalidConfig(
                "grpc_suffix cannot contain '/'".into(),
            ));
        }

        if self.lock_ttl_secs == 0 {
            return Err(crate::Error::InvalidConfig("lock_ttl_secs must be > 0".into()));
        }
        if self.lock_timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig("lock_timeout_secs must be > 0".into()));
        }

        match self.strategy {
            SlotStrategy::Counter { max: 0 } => {
                return Err(crate::Error::InvalidConfig("counter max must be > 0".into()))
            }
            SlotStrategy::External { slot: 0 } => {
                return Err(crate::Error::InvalidConfig("external slot must be > 0".into()))
            }
            _ => {}
        }

        if self.etcd.endpoints.is_empty() {
            return Err(crate::Error::InvalidConfig("etcd.endpoints cannot be empty".into()));
        }

        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Override the lock wait, which is kept in whole seconds
    pub fn set_lock_timeout(&mut self, timeout: Duration) -> crate::Result<()> {
        if timeout.is_zero() || timeout.subsec_nanos() != 0 {
            return Err(crate::Error::InvalidConfig(format!(
                "lock timeout must be a positive whole number of seconds, got {:?}",
                timeout
            )));
        }
        self.lock_timeout_secs = timeout.as_secs();
        Ok(())
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }
}
