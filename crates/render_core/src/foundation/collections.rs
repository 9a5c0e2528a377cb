//! Specialized collection types

pub use slotmap::{Key, SlotMap};

/// Generation-checked pool of GPU objects keyed by a typed handle.
///
/// Thin wrapper over [`SlotMap`]. A handle whose slot has been reused reports
/// as missing instead of aliasing the new occupant.
pub struct HandlePool<K: Key, T> {
    items: SlotMap<K, T>,
}

impl<K: Key, T> HandlePool<K, T> {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            items: SlotMap::with_key(),
        }
    }

    /// Track a new object and return its handle
    pub fn insert(&mut self, item: T) -> K {
        self.items.insert(item)
    }

    /// Stop tracking an object, returning it if the handle is still live
    pub fn remove(&mut self, handle: K) -> Option<T> {
        self.items.remove(handle)
    }

    /// Get an object by handle
    pub fn get(&self, handle: K) -> Option<&T> {
        self.items.get(handle)
    }

    /// Get a mutable reference to an object by handle
    pub fn get_mut(&mut self, handle: K) -> Option<&mut T> {
        self.items.get_mut(handle)
    }

    /// Whether the handle refers to a live object
    pub fn contains(&self, handle: K) -> bool {
        self.items.contains_key(handle)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every object, yielding them for release
    pub fn drain(&mut self) -> impl Iterator<Item = (K, T)> + '_ {
        self.items.drain()
    }

    /// Iterate over live objects
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.items.iter()
    }
}

impl<K: Key, T> Default for HandlePool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    slotmap::new_key_type! {
        struct TestKey;
    }

    #[test]
    fn stale_handle_is_not_aliased_by_reused_slot() {
        let mut pool: HandlePool<TestKey, &str> = HandlePool::new();
        let first = pool.insert("first");
        assert_eq!(pool.remove(first), Some("first"));

        let second = pool.insert("second");
        assert_ne!(first, second);
        assert!(pool.get(first).is_none());
        assert_eq!(pool.get(second), Some(&"second"));
    }

    #[test]
    fn drain_empties_pool() {
        let mut pool: HandlePool<TestKey, u32> = HandlePool::new();
        pool.insert(1);
        pool.insert(2);
        let drained: Vec<u32> = pool.drain().map(|(_, v)| v).collect();
        assert_eq!(drained.len(), 2);
        assert!(pool.is_empty());
    }
}
