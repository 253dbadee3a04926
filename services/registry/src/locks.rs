//! Per-key async mutual exclusion.

use std::sync::Arc;

use camino::Utf8Path;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of mutexes keyed by storage path.
///
/// Writers to the same key are serialized; readers never take these locks.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// An empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &Utf8Path) -> OwnedMutexGuard<()> {
        // The map shard guard must be released before awaiting.
        let mutex = self
            .inner
            .entry(key.as_str().to_owned())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.inner.len()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyLocks::new();
        let key = Utf8Path::new("myapp/blobs/sha256:1");

        let guard = locks.lock(key).await;
        let contended = tokio::time::timeout(Duration::from_millis(20), locks.lock(key)).await;
        assert!(contended.is_err());

        drop(guard);
        let _again = tokio::time::timeout(Duration::from_millis(200), locks.lock(key))
            .await
            .expect("lock is released");
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.lock(Utf8Path::new("myapp/tags/a")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.lock(Utf8Path::new("myapp/tags/b")),
        )
        .await
        .expect("independent keys");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = KeyLocks::new();
        let held = locks.lock(Utf8Path::new("a")).await;
        drop(locks.lock(Utf8Path::new("b")).await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
