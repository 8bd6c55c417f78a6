//! Library side of the `gatelink` binary: argument definitions and device
//! configuration.

pub mod cli;
pub mod config;

pub use cli::Cli;
pub use config::{ConfigManager, GatelinkConfig, SshConfig};
