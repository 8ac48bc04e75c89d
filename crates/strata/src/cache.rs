//! session scoped concurrent caches
//!
//! Two kinds of caches live here:
//! - [SingleFlight]: lazily computed values (parsed configs, started plugins). The first caller for a
//!   key computes the value, concurrent callers for the same key block until it is published. No
//!   map lock is held while computing.
//! - [ProviderCache]: plain last-write-wins key/value store handed to data providers.
use crate::value::{Map, Value};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;

/// A map of one-shot cells. Each key is computed at most once (successfully).
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash, V> {
    slots: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K: Eq + Hash, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// The value for `key` if it has been published
    pub fn get(&self, key: &K) -> Option<V> {
        self.slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Get the value for `key`, computing it with `init` if no other caller has done so
    ///
    /// Callers racing for the same key wait for the winner. If `init` fails the slot stays empty
    /// and the next caller tries again.
    pub fn get_or_try_init<E>(&self, key: K, init: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            tracing::trace!(?key, "cache hit");
            return Ok(value);
        }

        // the map guard is released at the end of this statement, before `init` runs
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());

        slot.get_or_try_init(|| {
            tracing::debug!(?key, "cache miss, computing");
            init()
        })
        .cloned()
    }

    /// Remove and return all published values
    pub fn drain(&self) -> Vec<V> {
        let keys: Vec<K> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.slots.remove(&key))
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent key/value store data providers use to memoize their work within a session
#[derive(Debug, Default)]
pub struct ProviderCache {
    entries: DashMap<String, Value>,
}

impl ProviderCache {
    /// Store `value` under `key` and return the previous value (`None` when there was none)
    pub fn cache(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Store every entry of `map`
    pub fn cache_all(&self, map: Map) {
        for (key, value) in map {
            self.entries.insert(key, value);
        }
    }

    pub fn cached_value(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Call `consumer` with a snapshot of each entry
    ///
    /// The snapshot is taken first so `consumer` may use the cache itself.
    pub fn cached_entries(&self, mut consumer: impl FnMut(&str, &Value)) {
        let snapshot: Vec<(String, Value)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, value) in &snapshot {
            consumer(key, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn cache_returns_previous_value() {
        let cache = ProviderCache::default();
        assert_eq!(cache.cache("x", Value::from(1)), None);
        assert_eq!(cache.cache("x", Value::from(2)), Some(Value::from(1)));
        assert_eq!(cache.cached_value("x"), Some(Value::from(2)));
        assert!(cache.has_key("x"));
        assert_eq!(cache.cached_value("y"), None);
    }

    #[test]
    fn cached_entries_sees_everything() {
        let cache = ProviderCache::default();
        let mut map = Map::new();
        map.insert("a".into(), Value::from(1));
        map.insert("b".into(), Value::from(2));
        cache.cache_all(map);

        let mut seen = Vec::new();
        cache.cached_entries(|key, value| seen.push((key.to_string(), value.clone())));
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![("a".to_string(), Value::from(1)), ("b".to_string(), Value::from(2))]
        );
    }

    #[test]
    fn single_flight_computes_once_under_contention() {
        const THREADS: usize = 16;
        let flight: Arc<SingleFlight<String, Arc<String>>> = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    flight
                        .get_or_try_init("config".to_string(), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<_, ()>(Arc::new("parsed".to_string()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn failed_init_is_retried() {
        let flight: SingleFlight<u8, u8> = SingleFlight::default();
        assert_eq!(flight.get_or_try_init(1, || Err("boom")), Err("boom"));
        assert_eq!(flight.get_or_try_init(1, || Ok::<_, &str>(7)), Ok(7));
        assert_eq!(flight.get_or_try_init(1, || Ok::<_, &str>(8)), Ok(7));
        assert_eq!(flight.len(), 1);
        assert_eq!(flight.drain(), vec![7]);
        assert!(flight.is_empty());
    }
}
