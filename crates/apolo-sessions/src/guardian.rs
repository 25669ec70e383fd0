//! Guardian lock
//!
//! Named-key mutual exclusion with a timeout. Every state-changing operation
//! on a session id runs inside `guard(session_id, ..)`, so operations on the
//! same id are totally ordered while different ids never contend.
//!
//! Per-key locks are created on first use and dropped as soon as nobody holds
//! or waits for them. The guard is not re-entrant: a guarded block must not
//! call `guard` again for the same key.

use apolo_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

struct KeyLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters
    users: usize,
}

#[derive(Default)]
pub struct GuardianLock {
    locks: Mutex<HashMap<String, KeyLock>>,
}

/// Registration of interest in a key, released on drop (even when the
/// waiting future is cancelled)
struct Lease<'a> {
    owner: &'a GuardianLock,
    key: &'a str,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        if let Some(entry) = locks.get_mut(self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(self.key);
            }
        }
    }
}

impl GuardianLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lease<'a>(&'a self, key: &'a str) -> Lease<'a> {
        let mut locks = self.locks.lock();
        let entry = locks.entry(key.to_string()).or_insert_with(|| KeyLock {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            users: 0,
        });
        entry.users += 1;
        Lease {
            owner: self,
            key,
            mutex: Arc::clone(&entry.mutex),
        }
    }

    /// Run `operation` with exclusive ownership of `key`
    ///
    /// Fails with `LockTimeout` when the key cannot be acquired within
    /// `timeout`; `operation` is not invoked in that case.
    pub async fn guard<T, F, Fut>(&self, key: &str, timeout: Duration, operation: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let lease = self.lease(key);
        let _held = match tokio::time::timeout(timeout, lease.mutex.lock()).await {
            Ok(held) => held,
            Err(_) => {
                warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Guardian lock timeout");
                return Err(AppError::LockTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        trace!(key = %key, "Guardian lock acquired");

        operation().await
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let guardian = Arc::new(GuardianLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guardian = Arc::clone(&guardian);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                guardian
                    .guard("call-1", Duration::from_secs(5), move || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(guardian.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_in_parallel() {
        let guardian = Arc::new(GuardianLock::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let run = |key: &'static str| {
            let guardian = Arc::clone(&guardian);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                guardian
                    .guard(key, Duration::from_secs(5), move || async move {
                        // both operations must be inside their guard at once
                        barrier.wait().await;
                        Ok(key)
                    })
                    .await
            })
        };

        let (a, b) = tokio::join!(run("a"), run("b"));
        assert_eq!(a.unwrap().unwrap(), "a");
        assert_eq!(b.unwrap().unwrap(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skips_operation() {
        let guardian = Arc::new(GuardianLock::new());
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let guardian = Arc::clone(&guardian);
            tokio::spawn(async move {
                guardian
                    .guard("call-1", Duration::from_secs(1), move || async move {
                        let _ = entered_tx.send(());
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        entered_rx.await.unwrap();

        let invoked = AtomicUsize::new(0);
        let counter = &invoked;
        let err = guardian
            .guard("call-1", Duration::from_millis(100), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::LockTimeout { .. }));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert!(guardian.is_empty());
    }

    #[tokio::test]
    async fn test_operation_error_is_returned() {
        let guardian = GuardianLock::new();
        let err = guardian
            .guard("k", Duration::from_secs(1), || async {
                Err::<(), _>(AppError::SessionClosed("k".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, AppError::SessionClosed("k".to_string()));
        assert!(guardian.is_empty());
    }
}
