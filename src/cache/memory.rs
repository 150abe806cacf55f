//! Memory Store Module
//!
//! In-process mapping from cache key to computed value. Pure storage: expiry
//! decisions are made by the controller from the entry metadata.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::CacheEntry;

/// Type-erased value held by the memory tier.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

// == Memory Slot ==
/// A value together with the entry describing it.
#[derive(Clone)]
pub struct MemorySlot {
    pub value: SharedValue,
    pub entry: CacheEntry,
}

impl MemorySlot {
    pub fn new<R: Any + Send + Sync>(value: R, entry: CacheEntry) -> Self {
        Self {
            value: Arc::new(value),
            entry,
        }
    }

    /// Returns a clone of the value if it has type `R`.
    pub fn value_as<R: Any + Clone>(&self) -> Option<R> {
        self.value.downcast_ref::<R>().cloned()
    }
}

impl std::fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySlot")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

// == Memory Store ==
/// Process-lifetime key/value storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: HashMap<String, MemorySlot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MemorySlot> {
        self.slots.get(key)
    }

    /// Stores a slot, replacing any previous value for the key.
    pub fn put(&mut self, key: impl Into<String>, slot: MemorySlot) {
        self.slots.insert(key.into(), slot);
    }

    pub fn remove(&mut self, key: &str) -> Option<MemorySlot> {
        self.slots.remove(key)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MemorySlot)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
