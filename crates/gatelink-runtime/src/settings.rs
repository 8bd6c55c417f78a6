//! Names, images and timing used when talking to the runtime

use std::path::PathBuf;
use std::time::Duration;

/// An image and where it comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub tag: String,
    /// Build context; images without one are pulled from a registry
    pub context_dir: Option<PathBuf>,
}

impl ImageSource {
    pub fn pulled(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            context_dir: None,
        }
    }

    pub fn built(tag: impl Into<String>, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            context_dir: Some(context_dir.into()),
        }
    }
}

/// Bounded polling with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    /// Delay before the given (zero-based) retry
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_attempts: 15,
        }
    }
}

/// Runtime-facing configuration of a gateway host
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Shared network gateway and link containers join
    pub network_name: String,
    /// Public reverse proxy
    pub gateway_image: ImageSource,
    /// Gateway-side tunnel terminator
    pub link_image: ImageSource,
    /// Client-side tunnel process, built so clients on this host can use it
    pub client_link_image: ImageSource,
    /// Throwaway image used to test-bind ports
    pub probe_image: ImageSource,
    /// Wait for the runtime to publish ephemeral host ports
    pub port_poll: PollSettings,
    /// Wait for a freshly started tunnel process to write its key
    pub key_poll: PollSettings,
}

impl RuntimeSettings {
    /// Settings with image build contexts under `resources_dir`
    pub fn with_resources_dir(resources_dir: impl Into<PathBuf>) -> Self {
        let dir = resources_dir.into();
        Self {
            gateway_image: ImageSource::built("gatelink/gateway:latest", dir.join("gateway")),
            link_image: ImageSource::built("gatelink/gateway-link:latest", dir.join("gateway-link")),
            client_link_image: ImageSource::built(
                gatelink_proto::client_config::CLIENT_LINK_IMAGE,
                dir.join("client-link"),
            ),
            ..Self::default()
        }
    }

    /// Images that must exist before any gateway or link launch
    pub fn required_images(&self) -> [&ImageSource; 3] {
        [&self.gateway_image, &self.link_image, &self.client_link_image]
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            network_name: "gatelink-gateway-network".to_string(),
            gateway_image: ImageSource::pulled("gatelink/gateway:latest"),
            link_image: ImageSource::pulled("gatelink/gateway-link:latest"),
            client_link_image: ImageSource::pulled(gatelink_proto::client_config::CLIENT_LINK_IMAGE),
            probe_image: ImageSource::pulled("alpine:latest"),
            port_poll: PollSettings::default(),
            key_poll: PollSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let poll = PollSettings {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 10,
        };

        assert_eq!(poll.delay_for(0), Duration::from_millis(100));
        assert_eq!(poll.delay_for(1), Duration::from_millis(200));
        assert_eq!(poll.delay_for(2), Duration::from_millis(400));
        assert_eq!(poll.delay_for(3), Duration::from_millis(500));
        assert_eq!(poll.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_resources_dir_layout() {
        let settings = RuntimeSettings::with_resources_dir("/opt/gatelink/resources");
        assert_eq!(
            settings.link_image.context_dir,
            Some(PathBuf::from("/opt/gatelink/resources/gateway-link"))
        );
        assert_eq!(settings.probe_image.context_dir, None);
    }
}
