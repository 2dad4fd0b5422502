//! Reconciler supervision.
//!
//! Tracks the active reconciliation loop per physical resource so attach
//! paths and the recovery sweep can ask "is a loop already running for
//! this id" instead of relying purely on persisted status. A second spawn
//! for a resource with a live loop is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use mdsb_id::ResourceId;
use tokio::task::JoinHandle;
use tracing::debug;

/// Registry of running reconciler tasks, keyed by resource id.
#[derive(Default)]
pub struct ReconcilerSet {
    active: Mutex<HashMap<ResourceId, JoinHandle<()>>>,
}

impl ReconcilerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a reconciler for the resource unless one is already running.
    ///
    /// Returns whether a task was spawned. Entries remove themselves when
    /// the loop finishes.
    pub fn spawn<F>(self: &Arc<Self>, resource_id: ResourceId, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock().unwrap();
        if let Some(handle) = active.get(&resource_id) {
            if !handle.is_finished() {
                debug!(resource_id = %resource_id, "reconciler already active");
                return false;
            }
        }

        let set = Arc::clone(self);
        let handle = tokio::spawn(async move {
            fut.await;
            set.release(resource_id);
        });
        active.insert(resource_id, handle);
        true
    }

    /// Whether a loop is currently running for the resource.
    pub fn is_active(&self, resource_id: ResourceId) -> bool {
        let active = self.active.lock().unwrap();
        active
            .get(&resource_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of currently running loops.
    pub fn active_count(&self) -> usize {
        let active = self.active.lock().unwrap();
        active.values().filter(|h| !h.is_finished()).count()
    }

    fn release(&self, resource_id: ResourceId) {
        let mut active = self.active.lock().unwrap();
        active.remove(&resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicate_spawn_is_suppressed() {
        let set = ReconcilerSet::new();
        let id = ResourceId::new();

        assert!(set.spawn(id, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        assert!(set.is_active(id));
        assert!(!set.spawn(id, async {}));
        assert_eq!(set.active_count(), 1);
    }

    #[tokio::test]
    async fn entries_release_on_completion() {
        let set = ReconcilerSet::new();
        let id = ResourceId::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        assert!(set.spawn(id, async move {
            let _ = rx.await;
        }));
        assert!(set.is_active(id));

        let _ = tx.send(());
        // let the task run to completion
        tokio::task::yield_now().await;
        for _ in 0..100 {
            if !set.is_active(id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!set.is_active(id));
        // a fresh loop may start once the old one is gone
        assert!(set.spawn(id, async {}));
    }

    #[tokio::test]
    async fn independent_resources_run_independently() {
        let set = ReconcilerSet::new();
        let a = ResourceId::new();
        let b = ResourceId::new();

        assert!(set.spawn(a, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        assert!(set.spawn(b, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        assert_eq!(set.active_count(), 2);
    }
}
