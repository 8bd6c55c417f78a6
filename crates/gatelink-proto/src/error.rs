use thiserror::Error;

/// Errors raised while decoding gatelink wire formats
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Malformed link-up response (expected 4 comma-separated fields): {0:?}")]
    MalformedResponse(String),

    #[error("Invalid forward port {0:?}")]
    InvalidPort(String),

    #[error("Invalid fqdn: {0}")]
    InvalidFqdn(String),
}
