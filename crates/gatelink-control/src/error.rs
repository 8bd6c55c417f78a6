//! Control-plane error types

use gatelink_proto::{EntityType, ProtoError};
use gatelink_runtime::LaunchError;
use sea_orm::DbErr;
use std::time::Duration;
use thiserror::Error;

/// Why a link activation attempt failed. Every variant is terminal for the
/// attempt; nothing here is retried automatically.
#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("Link not found: {0}")]
    LinkNotFound(String),

    #[error("Gateway not found: {0}")]
    GatewayNotFound(String),

    #[error("No device of gateway {gateway} serves domain {domain}")]
    DomainNotServed { gateway: String, domain: String },

    #[error("Gateway {gateway} has no usable task channel: {reason}")]
    ChannelUnavailable { gateway: String, reason: String },

    #[error("Remote link-up on {target} failed: {output}")]
    RemoteTransport { target: String, output: String },

    #[error("Remote task failed after {execution_time:?}: {message}")]
    RemoteTask {
        message: String,
        execution_time: Duration,
    },

    #[error("Activation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Activation task was interrupted: {0}")]
    Interrupted(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl ActivationError {
    /// Port to report when the failure is a host port conflict
    pub fn conflicting_port(&self) -> Option<u16> {
        match self {
            ActivationError::Launch(LaunchError::PortAlreadyAllocated(port)) => Some(*port),
            _ => None,
        }
    }
}

/// Fixture import/export failures. A failed import leaves the store untouched.
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("{entity_type} {primary_key} references missing {missing}")]
    UnresolvedDependency {
        entity_type: EntityType,
        primary_key: String,
        missing: String,
    },

    #[error("Malformed {entity_type} record {primary_key}: {reason}")]
    Malformed {
        entity_type: EntityType,
        primary_key: String,
        reason: String,
    },

    #[error("Nothing to export: {0}")]
    NotFound(String),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Gateway onboarding failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No device named {0} in the store; register this device first")]
    NoCurrentDevice(String),

    #[error("Gateway {0} already exists")]
    AlreadyExists(String),

    #[error("Gateway not found: {0}")]
    NotFound(String),

    #[error("Invalid gateway domain: {0}")]
    InvalidDomain(#[from] ProtoError),

    #[error("Port {0} is already allocated")]
    PortAlreadyAllocated(u16),

    #[error(transparent)]
    Launch(LaunchError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<LaunchError> for GatewayError {
    fn from(error: LaunchError) -> Self {
        match error {
            LaunchError::PortAlreadyAllocated(port) => GatewayError::PortAlreadyAllocated(port),
            other => GatewayError::Launch(other),
        }
    }
}
