//! Client-side tunnel configuration
//!
//! The client runs its own link container that dials the gateway-side tunnel
//! process. Which flags it needs depends on the topology the link was
//! activated with.

use crate::messages::LinkUpResult;
use crate::CENTER_PORT;
use serde::Serialize;
use std::collections::BTreeMap;

/// Image the client-side link container runs
pub const CLIENT_LINK_IMAGE: &str = "gatelink/client-link:latest";

/// Configuration for a client-side tunnel process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLinkConfig {
    /// Link fqdn
    pub domain: String,
    /// Exposed target inside the client network (e.g. `app:8080`)
    pub expose: String,
    pub client_private_key: String,
    pub tunnel_public_key: String,
    /// Gateway-side tunnel endpoint (`{fqdn}:{port}`)
    pub endpoint: String,
    /// Terminate TLS inside the client container
    pub tls_internal: bool,
    /// Only forward raw traffic, the gateway does not proxy HTTP
    pub forward_only: bool,
    /// TCP forwarding center port, set when TCP forwarding is enabled
    pub center_port: Option<u16>,
}

impl ClientLinkConfig {
    /// Derive the client configuration for an activated link
    pub fn for_link(
        fqdn: &str,
        expose: &str,
        result: &LinkUpResult,
        tcp_forwarding: bool,
    ) -> Self {
        let local_only = fqdn.contains("localhost");

        Self {
            domain: fqdn.to_string(),
            expose: expose.to_string(),
            client_private_key: result.client_privkey.clone(),
            tunnel_public_key: result.tunnel_pubkey.clone(),
            endpoint: result.tunnel_address.clone(),
            tls_internal: tcp_forwarding || local_only,
            forward_only: tcp_forwarding,
            center_port: tcp_forwarding.then_some(CENTER_PORT),
        }
    }

    /// Environment variables the client link container expects
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("LINK_DOMAIN".to_string(), self.domain.clone());
        env.insert("EXPOSE".to_string(), self.expose.clone());
        env.insert(
            "GATEWAY_CLIENT_WG_PRIVKEY".to_string(),
            self.client_private_key.clone(),
        );
        env.insert(
            "GATEWAY_LINK_WG_PUBKEY".to_string(),
            self.tunnel_public_key.clone(),
        );
        env.insert("GATEWAY_ENDPOINT".to_string(), self.endpoint.clone());

        if self.tls_internal {
            env.insert("TLS_INTERNAL".to_string(), "true".to_string());
        }
        if self.forward_only {
            env.insert("FORWARD_ONLY".to_string(), "true".to_string());
            env.insert("NEW_FORWARDING_BEHAVIOR".to_string(), "true".to_string());
        }
        if let Some(port) = self.center_port {
            env.insert("CENTER_PORT".to_string(), port.to_string());
        }

        env
    }

    /// Render a docker-compose service snippet named `link`
    pub fn to_compose_snippet(&self) -> Result<String, serde_yaml::Error> {
        let service = ComposeService {
            image: CLIENT_LINK_IMAGE,
            environment: self.environment(),
            cap_add: vec!["NET_ADMIN"],
            restart: "unless-stopped",
        };

        let mut services = BTreeMap::new();
        services.insert("link", service);
        serde_yaml::to_string(&services)
    }
}

#[derive(Serialize)]
struct ComposeService {
    image: &'static str,
    environment: BTreeMap<String, String>,
    cap_add: Vec<&'static str>,
    restart: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> LinkUpResult {
        LinkUpResult {
            tunnel_pubkey: "tunnel-pub".to_string(),
            tunnel_address: "api.example.com:40123".to_string(),
            client_privkey: "client-priv".to_string(),
            forward_port: 40123,
            center_port: None,
        }
    }

    #[test]
    fn test_plain_topology_has_no_extra_flags() {
        let config = ClientLinkConfig::for_link("api.example.com", "app:8080", &result(), false);
        let env = config.environment();

        assert_eq!(env["GATEWAY_ENDPOINT"], "api.example.com:40123");
        assert_eq!(env["GATEWAY_CLIENT_WG_PRIVKEY"], "client-priv");
        assert!(!env.contains_key("TLS_INTERNAL"));
        assert!(!env.contains_key("FORWARD_ONLY"));
        assert!(!env.contains_key("CENTER_PORT"));
    }

    #[test]
    fn test_localhost_uses_internal_tls() {
        let config = ClientLinkConfig::for_link("app.localhost", "app:8080", &result(), false);
        assert!(config.tls_internal);
        assert!(!config.forward_only);
    }

    #[test]
    fn test_tcp_forwarding_flags() {
        let config = ClientLinkConfig::for_link("api.example.com", "app:8080", &result(), true);
        let env = config.environment();

        assert_eq!(env["TLS_INTERNAL"], "true");
        assert_eq!(env["FORWARD_ONLY"], "true");
        assert_eq!(env["CENTER_PORT"], "5555");
    }

    #[test]
    fn test_compose_snippet() {
        let config = ClientLinkConfig::for_link("api.example.com", "app:8080", &result(), false);
        let yaml = config.to_compose_snippet().unwrap();

        assert!(yaml.starts_with("link:"));
        assert!(yaml.contains(CLIENT_LINK_IMAGE));
        assert!(yaml.contains("NET_ADMIN"));
        assert!(yaml.contains("LINK_DOMAIN: api.example.com"));
    }
}
