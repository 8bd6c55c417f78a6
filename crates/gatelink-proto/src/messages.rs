//! Link activation result and device task messages

use crate::error::ProtoError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Everything a client needs to connect to an activated link.
///
/// On the wire (remote-shell stdout) this is a single line
/// `pubkey,address,privkey,forward_port`, followed by `,center_port` when
/// the link has a TCP forwarding listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkUpResult {
    /// Public key generated by the tunnel process on the gateway side
    pub tunnel_pubkey: String,
    /// Externally reachable `{fqdn}:{port}`
    pub tunnel_address: String,
    /// Private half of the client keypair
    pub client_privkey: String,
    /// Host port assigned to the link listener
    pub forward_port: u16,
    /// Host port assigned to the TCP forwarding listener, if any
    #[serde(default)]
    pub center_port: Option<u16>,
}

impl LinkUpResult {
    /// Encode as the single-line remote-shell response
    pub fn to_wire(&self) -> String {
        let mut line = format!(
            "{},{},{},{}",
            self.tunnel_pubkey, self.tunnel_address, self.client_privkey, self.forward_port
        );
        if let Some(port) = self.center_port {
            line.push_str(&format!(",{}", port));
        }
        line
    }
}

impl FromStr for LinkUpResult {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Remote shells may print banners before the response; the response is the last line.
        let line = s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .next_back()
            .ok_or_else(|| ProtoError::MalformedResponse(s.to_string()))?;

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let (tunnel_pubkey, tunnel_address, client_privkey, forward_port, center_port) =
            match fields[..] {
                [a, b, c, d] => (a, b, c, d, None),
                [a, b, c, d, e] => (a, b, c, d, Some(e)),
                _ => return Err(ProtoError::MalformedResponse(line.to_string())),
            };

        if tunnel_pubkey.is_empty() || tunnel_address.is_empty() || client_privkey.is_empty() {
            return Err(ProtoError::MalformedResponse(line.to_string()));
        }

        let forward_port = parse_port(forward_port)?;
        let center_port = center_port.map(parse_port).transpose()?;

        Ok(Self {
            tunnel_pubkey: tunnel_pubkey.to_string(),
            tunnel_address: tunnel_address.to_string(),
            client_privkey: client_privkey.to_string(),
            forward_port,
            center_port,
        })
    }
}

fn parse_port(field: &str) -> Result<u16, ProtoError> {
    field
        .parse::<u16>()
        .map_err(|_| ProtoError::InvalidPort(field.to_string()))
}

/// Tasks dispatched to a device queue over a gateway channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum DeviceTask {
    /// Launch (or relaunch) the tunnel process for `fqdn` next to the gateway
    LinkUp {
        fqdn: String,
        tcp_forwarding: bool,
        forward_port: Option<u16>,
        #[serde(default)]
        center_port: Option<u16>,
    },
}

impl DeviceTask {
    /// Task name as registered on the device queue
    pub fn name(&self) -> &'static str {
        match self {
            DeviceTask::LinkUp { .. } => "link_up",
        }
    }
}
