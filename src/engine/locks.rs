use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// What a single admission step serializes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdmissionKey {
    /// Seats of one area on one date.
    Area(String, NaiveDate),
    /// One user's single booking per date.
    User(String, NaiveDate),
    /// The system-wide visitor ceiling of one date.
    Visits(NaiveDate),
}

type Locks = DashMap<AdmissionKey, Arc<Mutex<()>>>;

/// Async mutexes keyed by [`AdmissionKey`], created on demand and dropped
/// again once nobody holds them.
#[derive(Default)]
pub struct LockTable {
    locks: Arc<Locks>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key. Keys are taken in sorted order to prevent deadlocks.
    /// The guard owns its locks and may outlive the borrow of the table.
    pub async fn acquire(&self, mut keys: Vec<AdmissionKey>) -> AdmissionGuard {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.locks.entry(key.clone()).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }
        AdmissionGuard {
            table: self.locks.clone(),
            keys,
            guards,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct AdmissionGuard {
    table: Arc<Locks>,
    keys: Vec<AdmissionKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            // Only the table's own reference left: nobody holds or waits on it.
            self.table
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn entries_are_released_after_use() {
        let table = LockTable::new();
        {
            let _g = table
                .acquire(vec![AdmissionKey::Area("a1".into(), day(2)), AdmissionKey::User("u1".into(), day(2))])
                .await;
            assert_eq!(table.len(), 2);
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let table = Arc::new(LockTable::new());
        let key = AdmissionKey::Visits(day(3));
        let guard = table.acquire(vec![key.clone()]).await;

        let t2 = table.clone();
        let k2 = key.clone();
        let waiter = tokio::spawn(async move {
            let _g = t2.acquire(vec![k2]).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn opposite_order_requests_do_not_deadlock() {
        let table = Arc::new(LockTable::new());
        let a = AdmissionKey::Area("a1".into(), day(4));
        let u = AdmissionKey::User("u1".into(), day(4));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let t = table.clone();
            let keys = if i % 2 == 0 { vec![a.clone(), u.clone()] } else { vec![u.clone(), a.clone()] };
            tasks.push(tokio::spawn(async move {
                let _g = t.acquire(keys).await;
                tokio::task::yield_now().await;
            }));
        }
        for t in tasks {
            tokio::time::timeout(Duration::from_secs(2), t).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn guard_handed_to_a_task_keeps_the_key() {
        let table = LockTable::new();
        let key = AdmissionKey::Visits(day(5));
        let guard = table.acquire(vec![key.clone()]).await;

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn(async move {
            let _g = guard;
            let _ = released.await;
        });

        let blocked = tokio::time::timeout(Duration::from_millis(20), table.acquire(vec![key.clone()])).await;
        assert!(blocked.is_err());
        release.send(()).unwrap();
        holder.await.unwrap();

        drop(table.acquire(vec![key]).await);
        assert!(table.is_empty());
    }
}
