//! Command-line surface of the `gatelink` binary

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Gatelink - front local services through self-hosted gateways
#[derive(Parser, Debug)]
#[command(name = "gatelink")]
#[command(about = "Front local services through self-hosted tunnel gateways", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Store URL (defaults to ~/.gatelink/gatelink.db)
    #[arg(long, global = true, env = "GATELINK_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Name of this device
    #[arg(long, global = true, env = "GATELINK_DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Directory with the gateway, gateway-link and client-link image contexts
    #[arg(long, global = true, env = "GATELINK_RESOURCES_DIR")]
    pub resources_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage devices
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Manage domains served by this device
    Domain {
        #[command(subcommand)]
        command: DomainCommands,
    },
    /// Manage gateways
    Gateway {
        #[command(subcommand)]
        command: GatewayCommands,
    },
    /// Manage and activate links
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },
    /// Export and import entity snapshots between device stores
    Fixture {
        #[command(subcommand)]
        command: FixtureCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommands {
    /// Register a device, optionally reachable over ssh
    Register {
        name: String,
        #[command(flatten)]
        ssh: SshTarget,
        /// Make this the device this machine runs as
        #[arg(long)]
        current: bool,
    },
    /// List known devices
    List,
}

#[derive(Subcommand, Debug)]
pub enum DomainCommands {
    /// Authorize the current device to serve a domain
    Add { uri: String },
    /// List known domains
    List,
}

#[derive(Subcommand, Debug)]
pub enum GatewayCommands {
    /// Create a gateway on this device and start its public process
    Init { name: String, fqdn: String },
    /// Attach a domain to a gateway, creating the gateway if needed
    Register { name: String, fqdn: String },
    /// Restart the public process of an existing gateway
    Launch {
        /// Gateway id or name
        gateway: String,
    },
    /// Record a gateway running on another host
    Add {
        name: String,
        /// Host running the gateway
        #[arg(long)]
        ssh_host: String,
        #[arg(long, default_value = "22")]
        ssh_port: u16,
    },
    /// List known gateways
    List,
}

#[derive(Subcommand, Debug)]
pub enum LinkCommands {
    /// Create a link `<subdomain>.<domain>`
    Create {
        /// Leave empty to put the link on the domain itself
        subdomain: String,
        domain: String,
        /// Service the link exposes (e.g. app:8080)
        #[arg(long)]
        service: Option<String>,
    },
    /// List links
    List,
    /// Bring a link online through a gateway and print the client configuration
    ///
    /// Reaches the gateway locally or over ssh. Task channels are provided by
    /// a process embedding the activator, so gateways reachable only through
    /// a channel cannot be activated from this command.
    Activate {
        fqdn: String,
        /// Gateway id or name
        gateway: String,
        #[command(flatten)]
        options: LinkOptions,
        /// Service the client exposes (defaults to the link's service)
        #[arg(long)]
        expose: Option<String>,
    },
    /// Stop the tunnel process of a link on this host
    Down { fqdn: String },
    /// Launch the tunnel for a link on this host (remote-shell entrypoint)
    Up {
        gateway_id: String,
        fqdn: String,
        #[command(flatten)]
        options: LinkOptions,
    },
}

#[derive(Subcommand, Debug)]
pub enum FixtureCommands {
    /// Export a gateway or device with its dependents
    Export {
        #[command(flatten)]
        root: ExportTarget,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply an exported envelope to this store
    Import {
        /// Envelope file, `-` for stdin
        input: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SshTarget {
    /// Host accepting ssh connections for this device
    #[arg(long)]
    pub ssh_host: Option<String>,
    #[arg(long, requires = "ssh_host")]
    pub ssh_port: Option<u16>,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Also expose a raw TCP forwarding listener
    #[arg(long)]
    pub tcp_forwarding: bool,
    /// Bind this host port instead of discovering one
    #[arg(long)]
    pub forward_port: Option<u16>,
    /// Bind this host port for the TCP forwarding listener
    #[arg(long, requires = "tcp_forwarding")]
    pub center_port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ExportTarget {
    /// Gateway id or name
    #[arg(long)]
    pub gateway: Option<String>,
    /// Device name
    #[arg(long)]
    pub device: Option<String>,
}
