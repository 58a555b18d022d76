//! Common utilities and types shared across traefik-register

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, EtcdConfig, SlotStrategy, ENV_PREFIX};
pub use error::{Error, Result};
pub use utils::{join_key, parse_duration, validate_segment};
