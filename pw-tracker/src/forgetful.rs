//! A concurrent map whose entries expire.
//!
//! Every entry remembers when it was last stored or touched. A sweep walks
//! the map and removes whatever the forget predicate selects, handing each
//! evicted value to the eviction hook first. [`ForgetfulMap::spawn_sweeper`]
//! runs sweeps on a tokio interval until [`ForgetfulMap::stop`].

use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Decides whether an entry should go. Receives the key, the value and how
/// long the entry has been idle.
pub type ForgetPredicate<K, V> = Arc<dyn Fn(&K, &V, Duration) -> bool + Send + Sync>;

/// Called with every evicted entry before the map lets go of it.
pub type EvictionHook<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_OLD_AFTER: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: V,
    touched: Instant,
}

struct Inner<K, V> {
    entries: DashMap<K, Entry<V>>,
    forget: ForgetPredicate<K, V>,
    on_evict: Option<EvictionHook<K, V>>,
}

pub struct ForgetfulMap<K, V> {
    inner: Arc<Inner<K, V>>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

pub struct ForgetfulMapBuilder<K, V> {
    sweep_interval: Duration,
    old_after: Duration,
    forget: Option<ForgetPredicate<K, V>>,
    on_evict: Option<EvictionHook<K, V>>,
}

impl<K, V> Default for ForgetfulMapBuilder<K, V> {
    fn default() -> Self {
        ForgetfulMapBuilder {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            old_after: DEFAULT_OLD_AFTER,
            forget: None,
            on_evict: None,
        }
    }
}

impl<K, V> ForgetfulMapBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Idle time after which the default predicate forgets an entry.
    /// Ignored when a custom predicate is set.
    pub fn old_after(mut self, age: Duration) -> Self {
        self.old_after = age;
        self
    }

    pub fn forget_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V, Duration) -> bool + Send + Sync + 'static,
    {
        self.forget = Some(Arc::new(f));
        self
    }

    pub fn on_evict<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> ForgetfulMap<K, V> {
        let old_after = self.old_after;
        let forget: ForgetPredicate<K, V> = match self.forget {
            Some(f) => f,
            None => Arc::new(move |_: &K, _: &V, idle: Duration| idle > old_after),
        };
        ForgetfulMap {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                forget,
                on_evict: self.on_evict,
            }),
            sweep_interval: self.sweep_interval,
            sweeper: Mutex::new(None),
        }
    }
}

impl<K, V> ForgetfulMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> ForgetfulMapBuilder<K, V> {
        ForgetfulMapBuilder::default()
    }

    /// Insert or replace, marking the entry fresh.
    pub fn store(&self, key: K, value: V) {
        self.inner.entries.insert(
            key,
            Entry {
                value,
                touched: Instant::now(),
            },
        );
    }

    /// Look up without refreshing the entry.
    pub fn load(&self, key: &K) -> Option<V> {
        self.inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Refresh an entry. Returns false when the key is absent.
    pub fn touch(&self, key: &K) -> bool {
        match self.inner.entries.get_mut(key) {
            Some(mut e) => {
                e.touched = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Fetch and refresh, creating the value when missing. The flag is true
    /// when this call created it.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        let mut created = false;
        let mut entry = self.inner.entries.entry(key).or_insert_with(|| {
            created = true;
            Entry {
                value: make(),
                touched: Instant::now(),
            }
        });
        entry.touched = Instant::now();
        (entry.value.clone(), created)
    }

    /// Remove without running the eviction hook.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.entries.remove(key).map(|(_, e)| e.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Visit a point-in-time copy of the entries. Returning false stops the
    /// walk. The map may be changed freely from inside the callback.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for (k, v) in self.entries() {
            if !f(&k, &v) {
                break;
            }
        }
    }

    /// Copy of every key/value pair.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.entries.iter().map(|e| e.value().value.clone()).collect()
    }

    /// Run one sweep now. Returns how many entries were evicted.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Start the background sweeper. Must be called inside a tokio runtime.
    /// Calling it twice replaces the previous sweeper.
    pub fn spawn_sweeper(&self) {
        let inner = Arc::clone(&self.inner);
        let every = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                inner.sweep();
            }
        });
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Stop the background sweeper, waiting for it to wind down.
    pub async fn stop(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("forgetful map sweeper stopped");
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|e| (self.forget)(e.key(), &e.value().value, now.duration_since(e.value().touched)))
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for key in doomed {
            // the entry may have been touched since the scan
            let removed = self.entries.remove_if(&key, |k, e| {
                (self.forget)(k, &e.value, Instant::now().duration_since(e.touched))
            });
            if let Some((k, e)) = removed {
                if let Some(hook) = &self.on_evict {
                    hook(&k, &e.value);
                }
                evicted += 1;
            }
        }
        trace!(evicted, remaining = self.entries.len(), "sweep done");
        evicted
    }
}

impl<K, V> Drop for ForgetfulMap<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
