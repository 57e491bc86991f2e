//! Per-repository mutual exclusion for collect and purge.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by repository id. Entries are dropped once unused.
#[derive(Default)]
pub struct RepositoryLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a repository.
    pub async fn lock(&self, repository_id: i64) -> RepositoryGuard<'_> {
        let mutex = self
            .locks
            .entry(repository_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        RepositoryGuard {
            locks: &self.locks,
            repository_id,
            guard: Some(guard),
        }
    }

    /// Number of repositories with a live lock entry.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Held while a repository is being collected or purged.
pub struct RepositoryGuard<'a> {
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
    repository_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RepositoryGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself still holds the mutex: nobody is waiting.
        self.locks
            .remove_if(&self.repository_id, |_, m| Arc::strong_count(m) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_repository_serializes() {
        let locks = Arc::new(RepositoryLocks::new());
        let guard = locks.lock(7).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(7).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_repositories_independent() {
        let locks = RepositoryLocks::new();
        let _a = locks.lock(1).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(2))
            .await
            .unwrap();
        assert_eq!(locks.active(), 2);
    }
}
