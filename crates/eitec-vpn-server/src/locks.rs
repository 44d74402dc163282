//! Per-interface write serialisation.
//!
//! Every mutation of a single interface (rebuild, start, stop, delete, peer
//! changes) holds that interface's mutex for the duration of the operation.
//! The reconciler only try-locks: a pass yields instead of queueing behind a
//! mutation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct InterfaceLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl InterfaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, interface_id: i64) -> Arc<Mutex<()>> {
        self.inner
            .entry(interface_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to the interface.
    pub async fn lock(&self, interface_id: i64) -> OwnedMutexGuard<()> {
        self.entry(interface_id).lock_owned().await
    }

    /// Exclusive access only if nothing else holds it right now.
    pub fn try_lock(&self, interface_id: i64) -> Option<OwnedMutexGuard<()>> {
        self.entry(interface_id).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_lock_yields_while_held() {
        let locks = InterfaceLocks::new();

        let guard = locks.lock(1).await;
        assert!(locks.try_lock(1).is_none(), "held lock must not be re-acquired");
        assert!(locks.try_lock(2).is_some(), "other interfaces are independent");

        drop(guard);
        assert!(locks.try_lock(1).is_some());
    }
}
