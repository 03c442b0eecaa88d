//! In-memory [`KeyValueStore`] backed by [`DashMap`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::storage::engine::KeyValueStore;

/// Concurrent in-memory store. Per-key operations lock only the owning shard.
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: DashMap<String, V>,
}

impl<V> MemoryStore<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &str, value: V) -> Option<V> {
        self.entries.insert(key.to_string(), value)
    }

    fn put_if_absent(&self, key: &str, value: V) -> Result<(), V> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(value),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    fn update(&self, key: &str, default: V, f: &mut dyn FnMut(&mut V)) {
        let mut slot = self.entries.entry(key.to_string()).or_insert(default);
        f(slot.value_mut());
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn put_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.put("a", 1), None);
        assert_eq!(store.put("a", 2), Some(1));
        assert_eq!(store.get("a"), Some(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("a"), Some(2));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn put_if_absent_keeps_the_first_value() {
        let store = MemoryStore::new();
        assert_eq!(store.put_if_absent("alice", "first"), Ok(()));
        assert_eq!(store.put_if_absent("alice", "second"), Err("second"));
        assert_eq!(store.get("alice"), Some("first"));
    }

    #[test]
    fn update_appends_atomically() {
        let store: Arc<MemoryStore<Vec<u32>>> = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.update("orders", Vec::new(), &mut |orders| orders.push(i * 100 + j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("orders").unwrap().len(), 400);
    }

    /// Counts how often it is cloned.
    #[derive(Debug)]
    struct Tally {
        items: Vec<u32>,
        clones: Arc<AtomicUsize>,
    }

    impl Clone for Tally {
        fn clone(&self) -> Self {
            self.clones.fetch_add(1, Ordering::SeqCst);
            Self {
                items: self.items.clone(),
                clones: Arc::clone(&self.clones),
            }
        }
    }

    #[test]
    fn update_mutates_in_place() {
        let store = MemoryStore::new();
        let clones = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let default = Tally {
                items: Vec::new(),
                clones: Arc::clone(&clones),
            };
            store.update("alice", default, &mut |tally| tally.items.push(i));
        }
        assert_eq!(clones.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("alice").unwrap().items.len(), 100);
    }

    #[test]
    fn usable_as_trait_object() {
        let store: Arc<dyn KeyValueStore<String>> = Arc::new(MemoryStore::new());
        store.put("k", "v".to_string());
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
