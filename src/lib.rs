//! Memocache - function-result memoization
//!
//! Wraps expensive or side-effecting operations so repeated calls with the
//! same arguments reuse a stored result, kept in memory for the life of the
//! process and persisted to a manifest-backed directory across restarts.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheKey, CacheStats, Codec, EntryMeta, Format, Memoized};
pub use config::Config;
pub use error::{CacheError, Result};
