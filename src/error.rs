//! Error types for the memoization cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed source error carried by cache failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Errors returned by a wrapped operation are never converted into this type;
/// they reach the caller untouched.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The argument serializer for an operation failed
    #[error("failed to serialize arguments for {operation}: {source}")]
    Serialization {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// The manifest file exists but could not be read or parsed
    #[error("manifest {} is corrupt: {source}", .path.display())]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// An artifact or the manifest could not be written
    #[error("failed to write {}: {source}", .path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// An artifact could not be read back
    #[error("failed to read {}: {source}", .path.display())]
    StoreRead {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
}

impl CacheError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        CacheError::StoreWrite {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        CacheError::StoreRead {
            path: path.into(),
            source: source.into(),
        }
    }

    /// True when the failure was caused by a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            CacheError::StoreRead { source, .. } | CacheError::StoreWrite { source, .. } => source,
            _ => return false,
        };
        // Codec hooks may wrap the io::Error in context, so walk the whole chain.
        let root: &(dyn std::error::Error + 'static) = &**source;
        let mut current = Some(root);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                return io_err.kind() == io::ErrorKind::NotFound;
            }
            current = err.source();
        }
        false
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
