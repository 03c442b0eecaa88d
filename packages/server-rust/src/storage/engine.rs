//! Key/value storage trait used by the business services.
//!
//! Stores are created at startup and injected into each service as
//! `Arc<dyn KeyValueStore<V>>`; nothing is global.

/// Typed, concurrent key/value storage keyed by string id.
///
/// All operations are synchronous and atomic per key.
pub trait KeyValueStore<V>: Send + Sync + 'static
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns a clone of the value stored under `key`.
    fn get(&self, key: &str) -> Option<V>;

    /// Inserts or replaces a value. Returns the previous value if any.
    fn put(&self, key: &str, value: V) -> Option<V>;

    /// Inserts `value` only if `key` is vacant.
    ///
    /// # Errors
    ///
    /// Hands `value` back when the key is already occupied.
    fn put_if_absent(&self, key: &str, value: V) -> Result<(), V>;

    /// Atomic in-place modification. A vacant `key` is first filled with
    /// `default`; `f` then mutates the stored value under the key's lock.
    fn update(&self, key: &str, default: V, f: &mut dyn FnMut(&mut V));

    fn remove(&self, key: &str) -> Option<V>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
