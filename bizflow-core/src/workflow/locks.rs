//! Per-entity mutual exclusion
//!
//! Workflow operations wait (bounded) for the workflow's lock; automation executions
//! only ever try the lock and skip on contention.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};

/// Keyed async locks; an entry lives only while someone holds or waits for it
#[derive(Default)]
pub struct EntityLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct EntityGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the mutex, so a count of one means the map is the last owner
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, id: Uuid, guard: OwnedMutexGuard<()>) -> EntityGuard {
        EntityGuard {
            id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Wait up to `timeout` for the lock
    pub async fn acquire(
        &self,
        entity: EntityRef,
        id: Uuid,
        timeout: Duration,
    ) -> EngineResult<EntityGuard> {
        let lock = self.lock_for(id);
        let waited = tokio::time::timeout(timeout, lock.clone().lock_owned()).await;
        drop(lock);
        match waited {
            Ok(guard) => Ok(self.guard(id, guard)),
            Err(_) => {
                self.locks
                    .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
                tracing::warn!(entity = %entity, "Lock wait timed out");
                Err(EngineError::LockContention { entity })
            }
        }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, id: Uuid) -> Option<EntityGuard> {
        let guard = self.lock_for(id).try_lock_owned().ok()?;
        Some(self.guard(id, guard))
    }

    pub fn is_locked(&self, id: Uuid) -> bool {
        self.locks
            .get(&id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Entities with a live lock entry
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_skips_when_held() {
        let locks = EntityLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.try_acquire(id).unwrap();
        assert!(locks.try_acquire(id).is_none());
        assert!(locks.is_locked(id));

        drop(guard);
        assert!(locks.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn test_acquire_times_out_with_contention() {
        let locks = EntityLocks::new();
        let id = Uuid::new_v4();
        let _held = locks.try_acquire(id).unwrap();

        let err = locks
            .acquire(EntityRef::Workflow(id), id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_entries_removed_after_release() {
        let locks = EntityLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.try_acquire(id).unwrap();
        assert_eq!(locks.tracked(), 1);
        drop(guard);
        assert_eq!(locks.tracked(), 0);
        assert!(!locks.is_locked(id));

        for _ in 0..10 {
            let _guard = locks
                .acquire(EntityRef::Workflow(Uuid::new_v4()), Uuid::new_v4(), Duration::from_millis(20))
                .await
                .unwrap();
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_a_waiter_remains() {
        let locks = Arc::new(EntityLocks::new());
        let id = Uuid::new_v4();
        let held = locks.try_acquire(id).unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire(EntityRef::Workflow(id), id, Duration::from_secs(1))
                    .await
                    .map(|_guard| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_contend() {
        let locks = EntityLocks::new();
        let _a = locks.try_acquire(Uuid::new_v4()).unwrap();
        assert!(locks.try_acquire(Uuid::new_v4()).is_some());
    }
}
