//! Cache Module
//!
//! Memoizes operation results in an in-process tier backed by a
//! manifest-indexed file store.

mod controller;
mod entry;
pub mod key;
mod manifest;
mod memoize;
mod memory;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use controller::Cache;
pub use entry::{expiry, CacheEntry, EntryMeta, Format, StorageLocation};
pub use key::{Arguments, CacheKey, Serializer};
pub use manifest::{Manifest, MANIFEST_VERSION};
pub use memoize::{FileName, Memoized};
pub use memory::{MemorySlot, MemoryStore, SharedValue};
pub use stats::CacheStats;
pub use store::{Codec, DumpFn, LoadFn, PersistentStore};

// == Public Constants ==
/// Manifest file name inside the cache directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Subdirectory of the cache directory holding artifact files
pub const DATA_DIR: &str = "data";
