//! Remote-shell execution of the gatelink CLI on another host

use async_trait::async_trait;
use gatelink_proto::RemoteAccess;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Failed to start remote shell: {0}")]
    Spawn(String),

    #[error("Remote command exited with {status}: {output}")]
    Failed { status: String, output: String },

    #[error("Remote command timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    /// Diagnostic output to surface to the operator
    pub fn output(&self) -> String {
        match self {
            RemoteError::Failed { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}

/// Runs the gatelink CLI on a remote host and returns its stdout
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &RemoteAccess,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, RemoteError>;
}

/// How to reach other devices over ssh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub binary: String,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Program invoked on the remote side
    pub remote_program: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            user: None,
            identity_file: None,
            remote_program: "gatelink".to_string(),
        }
    }
}

/// [`RemoteExecutor`] backed by the system ssh client
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Arguments passed to the ssh binary
    pub fn command_args(&self, target: &RemoteAccess, args: &[String]) -> Vec<String> {
        let mut command = vec![
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];

        if let Some(identity) = &self.settings.identity_file {
            command.push("-i".to_string());
            command.push(identity.display().to_string());
        }

        command.push(match &self.settings.user {
            Some(user) => format!("{}@{}", user, target.host),
            None => target.host.clone(),
        });
        command.push("--".to_string());
        command.push(self.settings.remote_program.clone());
        command.extend(args.iter().cloned());

        command
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &RemoteAccess,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, RemoteError> {
        let command_args = self.command_args(target, args);
        debug!(target = %target, args = ?args, "Running remote command");

        let child = tokio::process::Command::new(&self.settings.binary)
            .args(&command_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Spawn(e.to_string()))?;

        // Dropping the child on timeout kills the ssh process
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(timeout))?
            .map_err(|e| RemoteError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Err(RemoteError::Failed {
                status: output.status.to_string(),
                output: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
