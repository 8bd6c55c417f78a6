//! Tunnel keypair generation in a disposable container

use crate::error::LaunchError;
use crate::runtime::ContainerRuntime;
use crate::settings::ImageSource;
use crate::spec::ContainerSpec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

/// Length of a raw WireGuard key
const KEY_LEN: usize = 32;

/// Private key goes to stderr, public key to stdout; the runtime merges both
/// into one output with the private key first.
const GENERATE_SCRIPT: &str = "wg genkey | tee /dev/stderr | wg pubkey";

/// A freshly generated tunnel keypair, base64 encoded
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl Keypair {
    /// Parse the two-line output of the generator
    pub fn parse(output: &str) -> Result<Self, LaunchError> {
        let mut lines = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());

        let (Some(private_key), Some(public_key), None) = (lines.next(), lines.next(), lines.next())
        else {
            return Err(LaunchError::InvalidKeypair(format!(
                "expected two lines, got {:?}",
                output.trim()
            )));
        };

        for key in [private_key, public_key] {
            validate_key(key)?;
        }

        if private_key == public_key {
            return Err(LaunchError::InvalidKeypair(
                "private and public key are identical".to_string(),
            ));
        }

        Ok(Self {
            private_key: private_key.to_string(),
            public_key: public_key.to_string(),
        })
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), LaunchError> {
    let decoded = STANDARD
        .decode(key)
        .map_err(|e| LaunchError::InvalidKeypair(format!("not base64: {}", e)))?;

    if decoded.len() != KEY_LEN {
        return Err(LaunchError::InvalidKeypair(format!(
            "key decodes to {} bytes, expected {}",
            decoded.len(),
            KEY_LEN
        )));
    }

    Ok(())
}

/// Generates tunnel keypairs. Never stores key material.
pub struct KeyProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    image: ImageSource,
}

impl KeyProvisioner {
    /// `image` must ship the `wg` tool
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: ImageSource) -> Self {
        Self { runtime, image }
    }

    pub async fn generate_keypair(&self) -> Result<Keypair, LaunchError> {
        self.runtime.ensure_image(&self.image).await?;

        let mut spec = ContainerSpec::new(self.image.tag.clone());
        spec.entrypoint = Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            GENERATE_SCRIPT.to_string(),
        ]);

        // run_disposable removes the container on every outcome
        let output = self.runtime.run_disposable(&spec).await?;
        let keypair = Keypair::parse(&output)?;

        debug!(public_key = %keypair.public_key, "Generated tunnel keypair");
        Ok(keypair)
    }
}
