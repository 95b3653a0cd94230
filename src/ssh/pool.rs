//! Per-key connection slots.
//!
//! `KeyedPool` collapses concurrent initializations of the same key into a
//! single call: the map lock is held only to fetch the slot, never across
//! the dial itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::error::Result;

pub struct KeyedPool<T: Clone> {
    slots: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> Default for KeyedPool<T> {
    fn default() -> Self {
        KeyedPool {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> KeyedPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `key`, initializing it with `init` if absent.
    /// Concurrent callers for one key share a single `init` invocation; a
    /// failed initialization leaves the slot empty so a later call can
    /// retry.
    pub async fn get_or_init<F, Fut>(&self, key: &str, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key.to_string()).or_default().clone()
        };
        let value = slot.get_or_try_init(init).await?;
        Ok(value.clone())
    }

    /// Drain every initialized value, leaving the pool empty.
    pub async fn drain(&self) -> Vec<(String, T)> {
        let mut slots = self.slots.lock().await;
        slots
            .drain()
            .filter_map(|(key, cell)| cell.get().cloned().map(|value| (key, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_initializations_collapse_to_one() {
        let pool = Arc::new(KeyedPool::<u64>::new());
        let dials = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let dials = dials.clone();
            tasks.spawn(async move {
                pool.get_or_init("root@10.0.0.1:22", || async {
                    dials.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    Ok(42u64)
                })
                .await
                .unwrap()
            });
        }

        while let Some(res) = tasks.join_next().await {
            assert_eq!(res.unwrap(), 42);
        }
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_dial_independently() {
        let pool = KeyedPool::<u64>::new();
        let dials = AtomicUsize::new(0);

        for key in ["a@h1:22", "b@h1:22", "a@h2:22"] {
            pool.get_or_init(key, || async {
                dials.fetch_add(1, Ordering::SeqCst);
                Ok(1u64)
            })
            .await
            .unwrap();
        }
        assert_eq!(dials.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_init_leaves_slot_retryable() {
        let pool = KeyedPool::<u64>::new();

        let err = pool
            .get_or_init("k", || async {
                Err(crate::error::HadesError::transport("dial refused"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dial refused"));

        let value = pool.get_or_init("k", || async { Ok(7u64) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn drain_returns_initialized_values() {
        let pool = KeyedPool::<u64>::new();
        pool.get_or_init("k", || async { Ok(9u64) }).await.unwrap();
        let drained = pool.drain().await;
        assert_eq!(drained, vec![("k".to_string(), 9u64)]);
        assert!(pool.drain().await.is_empty());
    }
}
