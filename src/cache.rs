use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

/// Lazily built values keyed by `K`, with in-flight de-duplication.
///
/// Two maps are kept: finished values, and constructions still in progress.
/// Callers racing on the same key share one pending construction. The pending
/// entry is dropped once the construction settles, so a failed attempt never
/// blocks a later one.
pub struct InFlightCache<K, V> {
    ready: Mutex<HashMap<K, V>>,
    pending: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for InFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.ready.lock().await.get(key).cloned()
    }

    /// Number of completed entries.
    pub async fn len(&self) -> usize {
        self.ready.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ready.lock().await.is_empty()
    }

    /// Number of constructions currently running.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Return the cached value for `key`, or build it with `init`.
    ///
    /// Concurrent callers for a key wait on the first caller's construction
    /// instead of starting their own. An `init` error is returned unchanged to
    /// the caller whose `init` produced it.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(&key).await {
            return Ok(v);
        }

        let cell = {
            let mut pending = self.pending.lock().await;
            // Re-check under the pending lock: a construction may have
            // finished between the first lookup and here.
            if let Some(v) = self.ready.lock().await.get(&key) {
                return Ok(v.clone());
            }
            pending
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_try_init(init).await.cloned();

        let mut pending = self.pending.lock().await;
        if let Ok(v) = &result {
            self.ready.lock().await.insert(key.clone(), v.clone());
        }
        if pending.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            pending.remove(&key);
        }
        result
    }
}

/// Memoize `f` through `cache`, keying each call with `key_fn`.
pub async fn with_cache<K, V, E, A, KF, F, Fut>(
    cache: &InFlightCache<K, V>,
    key_fn: KF,
    f: F,
    arg: A,
) -> Result<V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    KF: FnOnce(&A) -> K,
    F: FnOnce(A) -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let key = key_fn(&arg);
    cache.get_or_try_init(key, move || f(arg)).await
}
