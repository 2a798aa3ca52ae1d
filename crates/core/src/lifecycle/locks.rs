//! Per-report async locks.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use bugflow_storage::ReportId;

/// Serializes lifecycle work per report id inside one process. Distinct ids
/// never contend. Entries are dropped once no task holds or waits on them.
///
/// This is an in-process fast path only; the persisted dispatch claim is
/// what keeps the at-most-one-issue guarantee across processes.
#[derive(Default)]
pub(crate) struct ReportLocks {
    locks: Mutex<HashMap<ReportId, Weak<Mutex<()>>>>,
}

impl ReportLocks {
    pub(crate) async fn acquire(&self, id: &ReportId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(id.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|w| w.strong_count() > 0).count()
    }
}
