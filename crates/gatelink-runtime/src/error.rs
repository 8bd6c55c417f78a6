//! Runtime and launch errors

use regex_lite::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Kind of runtime resource an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Container,
    Network,
    Image,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Image => write!(f, "image"),
        }
    }
}

/// Raw failures reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} already exists: {name}")]
    Conflict { kind: ResourceKind, name: String },

    #[error("Runtime call {operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("Failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl RuntimeError {
    /// Host port named in a bind-conflict error, if this is one
    pub fn conflicting_port(&self) -> Option<u16> {
        match self {
            RuntimeError::Api { message, .. } => port_from_conflict(message),
            _ => None,
        }
    }
}

/// Errors surfaced by gateway and link launches
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Port {0} is already allocated")]
    PortAlreadyAllocated(u16),

    #[error("Gateway container not found: {0}")]
    ContainerNotFound(String),

    #[error("Gateway network not found: {0}")]
    NetworkNotFound(String),

    #[error("Runtime never assigned a host port to {container}")]
    PortsNotAssigned { container: String },

    #[error("Tunnel process {container} did not expose its public key")]
    TunnelKeyUnavailable { container: String },

    #[error("Invalid keypair output: {0}")]
    InvalidKeypair(String),

    #[error(transparent)]
    Runtime(RuntimeError),
}

impl From<RuntimeError> for LaunchError {
    fn from(error: RuntimeError) -> Self {
        if let Some(port) = error.conflicting_port() {
            return LaunchError::PortAlreadyAllocated(port);
        }

        match error {
            RuntimeError::NotFound {
                kind: ResourceKind::Network,
                name,
            } => LaunchError::NetworkNotFound(name),
            RuntimeError::NotFound {
                kind: ResourceKind::Container,
                name,
            } => LaunchError::ContainerNotFound(name),
            other => LaunchError::Runtime(other),
        }
    }
}

fn bind_conflict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:0\.0\.0\.0|\[::\]):(\d+)").expect("bind conflict pattern is valid")
    })
}

/// Extract the offending host port from a runtime bind-conflict message.
///
/// Docker reports conflicts as e.g.
/// `Bind for 0.0.0.0:80 failed: port is already allocated`.
pub fn port_from_conflict(message: &str) -> Option<u16> {
    bind_conflict_pattern()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_docker_conflict() {
        let message = "driver failed programming external connectivity on endpoint gw \
                       (abc): Bind for 0.0.0.0:443 failed: port is already allocated";
        assert_eq!(port_from_conflict(message), Some(443));
    }

    #[test]
    fn test_port_from_ipv6_conflict() {
        let message = "failed to bind host port for [::]:8080: address already in use";
        assert_eq!(port_from_conflict(message), Some(8080));
    }

    #[test]
    fn test_no_port_in_unrelated_error() {
        assert_eq!(port_from_conflict("No such image: gatelink/gateway"), None);
    }

    #[test]
    fn test_conflict_translates_to_port_error() {
        let err = RuntimeError::Api {
            operation: "start_container",
            message: "Bind for 0.0.0.0:80 failed: port is already allocated".to_string(),
        };
        assert!(matches!(
            LaunchError::from(err),
            LaunchError::PortAlreadyAllocated(80)
        ));
    }

    #[test]
    fn test_not_found_translation() {
        let err = RuntimeError::NotFound {
            kind: ResourceKind::Network,
            name: "gatelink-gateway-network".to_string(),
        };
        assert!(matches!(LaunchError::from(err), LaunchError::NetworkNotFound(_)));

        let err = RuntimeError::NotFound {
            kind: ResourceKind::Image,
            name: "alpine".to_string(),
        };
        assert!(matches!(LaunchError::from(err), LaunchError::Runtime(_)));
    }
}
