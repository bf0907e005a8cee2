use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = Arc<StdMutex<HashMap<String, Weak<Mutex<()>>>>>;

/// Per-lease async mutexes serializing provision create/finalize inside one
/// process. An entry lives exactly as long as a guard or a waiter holds its
/// mutex, so a held lock is never replaced. Across processes the partial
/// unique index on active provisions and the status-guarded update apply.
#[derive(Clone, Default)]
pub struct LeaseLocks {
    locks: Registry,
}

/// Held lease lock. Dropping it releases the mutex and forgets the entry
/// once nobody else is waiting on it.
pub struct LeaseLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lease_id: String,
    locks: Registry,
}

impl LeaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, lease_id: &str) -> LeaseLockGuard {
        let lease_id = lease_id.trim().to_string();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            match locks.get(&lease_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(lease_id.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        LeaseLockGuard {
            guard: Some(lock.lock_owned().await),
            lease_id,
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for LeaseLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.lease_id)
            .is_some_and(|lock| lock.strong_count() == 0)
        {
            locks.remove(&self.lease_id);
        }
    }
}
