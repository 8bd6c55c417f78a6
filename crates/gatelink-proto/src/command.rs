//! Remote-shell command grammar
//!
//! A device reachable over ssh is asked to activate a link by running
//! `link up <gateway-id> <fqdn> [--tcp-forwarding] [--forward-port <n>] [--center-port <n>]`
//! through the gatelink binary installed on it.

use serde::{Deserialize, Serialize};

/// Where a host accepts remote-shell connections
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAccess {
    pub host: String,
    pub port: u16,
}

impl RemoteAccess {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for RemoteAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A `link up` invocation addressed to a remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkUpCommand {
    /// Gateway the link is activated on
    pub gateway_id: String,
    /// Link fqdn
    pub fqdn: String,
    /// Also expose a raw TCP forwarding listener
    pub tcp_forwarding: bool,
    /// Previously assigned forward port, skips port discovery when set
    pub forward_port: Option<u16>,
    /// Previously assigned TCP forwarding port
    #[serde(default)]
    pub center_port: Option<u16>,
}

impl LinkUpCommand {
    pub fn new(gateway_id: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            fqdn: fqdn.into(),
            tcp_forwarding: false,
            forward_port: None,
            center_port: None,
        }
    }

    pub fn with_tcp_forwarding(mut self, tcp_forwarding: bool) -> Self {
        self.tcp_forwarding = tcp_forwarding;
        self
    }

    pub fn with_forward_port(mut self, forward_port: Option<u16>) -> Self {
        self.forward_port = forward_port;
        self
    }

    pub fn with_center_port(mut self, center_port: Option<u16>) -> Self {
        self.center_port = center_port;
        self
    }

    /// Render the command as an argument vector (without the program name)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "link".to_string(),
            "up".to_string(),
            self.gateway_id.clone(),
            self.fqdn.clone(),
        ];

        if self.tcp_forwarding {
            args.push("--tcp-forwarding".to_string());
        }

        if let Some(port) = self.forward_port {
            args.push("--forward-port".to_string());
            args.push(port.to_string());
        }

        if let Some(port) = self.center_port {
            args.push("--center-port".to_string());
            args.push(port.to_string());
        }

        args
    }
}

impl std::fmt::Display for LinkUpCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}
