//! Cache Entry Module
//!
//! Defines cached entries, their on-disk metadata and expiration rules.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;

// == Format ==
/// Identifies the codec an artifact was written with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Default serde_json encoding
    Json,
    /// Caller-supplied dump/load pair, identified by name
    Custom(String),
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => f.write_str("json"),
            Format::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

// == Storage Location ==
/// Where the value of an entry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Held only by the in-process tier
    Memory,
    /// Persisted as an artifact file
    File(PathBuf),
}

// == Entry Meta ==
/// The persisted subset of an entry, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Artifact path relative to the data directory
    pub path: String,
    /// When the value was computed
    pub created_at: DateTime<Utc>,
    /// When the value stops being served, None = never
    pub expires_at: Option<DateTime<Utc>>,
    /// Codec used for the artifact
    pub format: Format,
}

impl EntryMeta {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// == Cache Entry ==
/// One cached result and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub location: StorageLocation,
    pub format: Format,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an in-memory entry created at `now` with an optional TTL.
    pub fn new(key: CacheKey, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            key,
            created_at: now,
            expires_at: expiry(now, ttl),
            location: StorageLocation::Memory,
            format: Format::Json,
        }
    }

    /// Rebuilds the full entry for a manifest record.
    pub fn from_meta(key: CacheKey, meta: &EntryMeta, artifact: PathBuf) -> Self {
        Self {
            key,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            location: StorageLocation::File(artifact),
            format: meta.format.clone(),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`, so a
    /// TTL of `t` serves hits strictly before `t` has elapsed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, or None if the entry never expires.
    ///
    /// Returns `Some(Duration::ZERO)` once the entry has expired.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

// == Utility Functions ==
/// Expiration timestamp for a value created at `now` with `ttl`.
///
/// A TTL too large to represent is treated as no expiration.
pub fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires) => now >= expires,
        None => false,
    }
}
