//! Traefik KV routing keys
//!
//! Layout read by Traefik's KV provider:
//! `<root>/http/services/<name>/loadbalancer/servers/<slot>/url`
//! where `<name>` is the bare service name for http routes and the
//! suffixed name for grpc routes.

use super::endpoint::Protocol;

/// Renders and parses routing keys for one root key / grpc suffix pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    root_key: String,
    grpc_suffix: String,
}

impl RouteTemplate {
    pub fn new(root_key: impl Into<String>, grpc_suffix: impl Into<String>) -> Self {
        Self {
            root_key: root_key.into().trim_end_matches('/').to_string(),
            grpc_suffix: grpc_suffix.into(),
        }
    }

    /// Name the proxy sees for `service` under `protocol`
    pub fn route_name(&self, protocol: Protocol, service: &str) -> String {
        match protocol {
            Protocol::Http => service.to_string(),
            Protocol::Grpc => format!("{}{}", service, self.grpc_suffix),
        }
    }

    pub fn render(&self, protocol: Protocol, service: &str, slot: u32) -> String {
        format!(
            "{}/{}/loadbalancer/servers/{}/url",
            self.services_root(),
            self.route_name(protocol, service),
            slot
        )
    }

    /// Prefix covering both the http and grpc names of `service`
    ///
    /// Deliberately unterminated, so it also matches unrelated services that
    /// share the prefix; [`RouteTemplate::parse`] filters those out.
    pub fn service_prefix(&self, service: &str) -> String {
        format!("{}/{}", self.services_root(), service)
    }

    /// Recover (protocol, slot) from a key belonging to `service`
    pub fn parse(&self, key: &str, service: &str) -> Option<(Protocol, u32)> {
        let root = self.services_root();
        let rest = key.strip_prefix(root.as_str())?.strip_prefix('/')?;

        let mut parts = rest.split('/');
        let name = parts.next()?;
        let (lb, servers, raw_slot, url) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || lb != "loadbalancer" || servers != "servers" || url != "url" {
            return None;
        }

        let protocol = if name == service {
            Protocol::Http
        } else if name.strip_prefix(service) == Some(self.grpc_suffix.as_str()) {
            Protocol::Grpc
        } else {
            return None;
        };

        // Reject "+1", "01" and friends: only keys we could have rendered count
        let slot: u32 = raw_slot.parse().ok()?;
        if slot == 0 || slot.to_string() != raw_slot {
            return None;
        }

        Some((protocol, slot))
    }

    fn services_root(&self) -> String {
        format!("{}/http/services", self.root_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> RouteTemplate {
        RouteTemplate::new("traefik", "-grpc")
    }

    #[test]
    fn test_render() {
        let t = template();
        assert_eq!(
            t.render(Protocol::Http, "user", 3),
            "traefik/http/services/user/loadbalancer/servers/3/url"
        );
        assert_eq!(
            t.render(Protocol::Grpc, "user", 3),
            "traefik/http/services/user-grpc/loadbalancer/servers/3/url"
        );
        assert_eq!(t.service_prefix("user"), "traefik/http/services/user");
    }

    #[test]
    fn test_parse() {
        let t = template();
        assert_eq!(
            t.parse("traefik/http/services/user/loadbalancer/servers/12/url", "user"),
            Some((Protocol::Http, 12))
        );
        assert_eq!(
            t.parse("traefik/http/services/user-grpc/loadbalancer/servers/4/url", "user"),
            Some((Protocol::Grpc, 4))
        );
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        let t = template();
        // Another service sharing the prefix
        assert_eq!(t.parse("traefik/http/services/users/loadbalancer/servers/9/url", "user"), None);
        // Not a server url
        assert_eq!(t.parse("traefik/http/services/user/loadbalancer/passhostheader", "user"), None);
        assert_eq!(t.parse("traefik/http/services/user/loadbalancer/servers/9/weight", "user"), None);
        // Malformed slots
        assert_eq!(t.parse("traefik/http/services/user/loadbalancer/servers/x/url", "user"), None);
        assert_eq!(t.parse("traefik/http/services/user/loadbalancer/servers/0/url", "user"), None);
        assert_eq!(t.parse("traefik/http/services/user/loadbalancer/servers/07/url", "user"), None);
        // Other root
        assert_eq!(t.parse("proxy/http/services/user/loadbalancer/servers/1/url", "user"), None);
    }
}
