//! Advertised endpoints and their routing protocol

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Scheme the framework uses for grpc endpoints
pub const GRPC_SCHEME: &str = "grpc://";

/// Scheme Traefik expects for cleartext HTTP/2 backends
pub const H2C_SCHEME: &str = "h2c://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Grpc,
    Http,
}

impl Protocol {
    /// Protocol of a lone endpoint, inferred from its scheme
    pub fn infer(address: &str) -> Self {
        if address.starts_with(GRPC_SCHEME) {
            Protocol::Grpc
        } else {
            Protocol::Http
        }
    }

    /// Value stored under the routing key for `address`
    pub fn route_value(&self, address: &str) -> String {
        match (self, address.strip_prefix(GRPC_SCHEME)) {
            (Protocol::Grpc, Some(rest)) => format!("{}{}", H2C_SCHEME, rest),
            _ => address.to_string(),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Up to two endpoints advertised by an instance
///
/// With two entries the first is always the grpc endpoint and the second the
/// http endpoint. Only the position counts, the schemes are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    endpoints: Vec<String>,
}

impl EndpointSet {
    pub const MAX_ENDPOINTS: usize = 2;

    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.len() > Self::MAX_ENDPOINTS {
            return Err(Error::InvalidEndpoints(format!(
                "expected at most {} endpoints (grpc, http), got {}",
                Self::MAX_ENDPOINTS,
                endpoints.len()
            )));
        }
        if let Some(empty) = endpoints.iter().position(|e| e.trim().is_empty()) {
            return Err(Error::InvalidEndpoints(format!("endpoint #{} is empty", empty)));
        }
        Ok(Self { endpoints })
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Each endpoint paired with the protocol it is registered under, in order
    pub fn routes(&self) -> Vec<(Protocol, &str)> {
        match self.endpoints.as_slice() {
            [] => vec![],
            [only] => vec![(Protocol::infer(only), only.as_str())],
            [grpc, http, ..] => {
                if !grpc.starts_with(GRPC_SCHEME) {
                    tracing::warn!(
                        endpoint = %grpc,
                        "first of two endpoints is registered as grpc but does not use the grpc scheme"
                    );
                }
                vec![(Protocol::Grpc, grpc.as_str()), (Protocol::Http, http.as_str())]
            }
        }
    }
}
