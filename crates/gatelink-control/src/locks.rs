//! Per-link activation locks
//!
//! Serializes activations of the same (gateway, link) pair inside one
//! process. Activations started from different processes or hosts are not
//! covered.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Guard held for the duration of one activation
pub type ActivationGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ActivationLocks {
    locks: DashMap<(Uuid, Uuid), Arc<Mutex<()>>>,
}

impl ActivationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other activation of this pair is in flight
    pub async fn acquire(&self, gateway_id: Uuid, link_id: Uuid) -> ActivationGuard {
        // Drop locks nobody holds or waits on
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        let lock = self
            .locks
            .entry((gateway_id, link_id))
            .or_default()
            .clone();

        lock.lock_owned().await
    }

    /// Whether an activation of this pair is currently in flight
    pub fn is_locked(&self, gateway_id: Uuid, link_id: Uuid) -> bool {
        self.locks
            .get(&(gateway_id, link_id))
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
