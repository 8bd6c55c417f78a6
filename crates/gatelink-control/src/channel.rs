//! Remote task dispatch over gateway channels
//!
//! A channel is an opaque transport bound to a gateway that can deliver a
//! [`DeviceTask`] to a named device queue and hand back its result. The
//! replication transport behind it is not this crate's concern; channels
//! are registered by name and matched against the gateway's configured
//! channel rows at activation time.

use crate::tasks::TaskWorker;
use async_trait::async_trait;
use dashmap::DashMap;
use gatelink_proto::{DeviceTask, LinkUpResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("No worker listens on queue {0}")]
    QueueNotFound(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}

/// Result of a task as reported by the executing device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Task result, or the remote error message
    pub result: Result<LinkUpResult, String>,
    pub execution_time: Duration,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    /// Deliver `task` to the device queue `queue` and wait for its outcome.
    ///
    /// Callers bound the wait; dropping the future abandons the task.
    async fn dispatch(&self, task: DeviceTask, queue: &str) -> Result<TaskOutcome, ChannelError>;
}

/// Live channels, keyed by channel name
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<DashMap<String, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, replacing any previous one with the same name
    pub fn register(&self, name: impl Into<String>, channel: Arc<dyn Channel>) {
        let name = name.into();
        if self.channels.insert(name.clone(), channel).is_some() {
            info!(channel = %name, "Replaced task channel");
        } else {
            info!(channel = %name, "Registered task channel");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.channels.remove(name).is_some();
        if !removed {
            warn!(channel = %name, "Attempted to unregister unknown channel");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// In-process channel that runs tasks on this device's [`TaskWorker`]
pub struct LocalTaskChannel {
    queue: String,
    worker: Arc<TaskWorker>,
}

impl LocalTaskChannel {
    /// `queue` is the device name tasks must be addressed to
    pub fn new(queue: impl Into<String>, worker: Arc<TaskWorker>) -> Self {
        Self {
            queue: queue.into(),
            worker,
        }
    }
}

#[async_trait]
impl Channel for LocalTaskChannel {
    async fn dispatch(&self, task: DeviceTask, queue: &str) -> Result<TaskOutcome, ChannelError> {
        if queue != self.queue {
            return Err(ChannelError::QueueNotFound(queue.to_string()));
        }

        let started = Instant::now();
        let worker = self.worker.clone();
        let task_name = task.name();

        // Runs to completion even if the dispatcher stops waiting
        let handle = tokio::spawn(async move { worker.handle(task).await });
        let result = handle
            .await
            .map_err(|e| ChannelError::Closed(e.to_string()))?
            .map_err(|e| e.to_string());

        let execution_time = started.elapsed();
        debug!(task = task_name, queue = %queue, ?execution_time, ok = result.is_ok(), "Task finished");

        Ok(TaskOutcome {
            result,
            execution_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> TaskOutcome {
        TaskOutcome {
            result: Ok(LinkUpResult {
                tunnel_pubkey: "pub".to_string(),
                tunnel_address: "example.com:40000".to_string(),
                client_privkey: "priv".to_string(),
                forward_port: 40000,
                center_port: None,
            }),
            execution_time: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = ChannelRegistry::new();
        assert!(registry.is_empty());

        let mut mock = MockChannel::new();
        mock.expect_dispatch().returning(|_, _| Ok(outcome()));
        registry.register("primary", Arc::new(mock));

        let channel = registry.get("primary").unwrap();
        let task = DeviceTask::LinkUp {
            fqdn: "example.com".to_string(),
            tcp_forwarding: false,
            forward_port: None,
            center_port: None,
        };
        let result = channel.dispatch(task, "laptop").await.unwrap();
        assert_eq!(result, outcome());

        assert!(registry.get("secondary").is_none());
        assert!(registry.unregister("primary"));
        assert!(!registry.unregister("primary"));
        assert_eq!(registry.len(), 0);
    }
}
