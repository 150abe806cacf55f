//! Cache Controller Module
//!
//! Orchestrates the lookup / compute / store protocol over the memory tier,
//! the manifest and the persistent store.

use std::any::Any;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{
    expiry, CacheEntry, CacheKey, CacheStats, Codec, EntryMeta, Manifest, MemorySlot,
    MemoryStore, Memoized, PersistentStore,
};
use crate::config::Config;
use crate::error::Result;

/// What the controller needs to know to store a freshly computed value.
pub(crate) struct StorePlan<'a, R> {
    pub persist: bool,
    pub file_name: Option<String>,
    pub extension: Option<&'a str>,
    pub ttl: Option<Duration>,
    pub codec: &'a Codec<R>,
}

#[derive(Debug)]
struct CacheState {
    memory: MemoryStore,
    manifest: Option<Manifest>,
    stats: CacheStats,
}

#[derive(Debug)]
struct Shared {
    config: Config,
    store: PersistentStore,
    state: Mutex<CacheState>,
}

enum MemoryProbe<R> {
    Hit(R),
    Expired,
    Miss,
}

// == Cache ==
/// A memoization cache scoped to one directory.
///
/// Cloning is cheap and clones share state. Independent caches pointed at
/// different directories share nothing. The internal lock is never held while
/// user code (wrapped operations, serializers, codecs) runs.
#[derive(Debug, Clone)]
pub struct Cache {
    shared: Arc<Shared>,
}

impl Cache {
    // == Constructor ==
    /// Opens a cache, loading the manifest when the file tier is enabled.
    ///
    /// Fails with `ManifestCorrupt` if an existing manifest cannot be parsed.
    pub fn open(config: Config) -> Result<Self> {
        let manifest = if config.enable_file_cache {
            Some(Manifest::load(&config.directory)?)
        } else {
            None
        };
        info!(
            "Cache opened: directory={}, file_cache={}, entries={}",
            config.directory.display(),
            config.enable_file_cache,
            manifest.as_ref().map(Manifest::len).unwrap_or(0)
        );
        Ok(Self::from_parts(config, manifest))
    }

    /// Opens a cache with default settings rooted at `directory`.
    pub fn in_dir(directory: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::in_dir(directory.as_ref()))
    }

    /// A cache without a file tier.
    pub fn memory_only() -> Self {
        Self::from_parts(Config::memory_only(), None)
    }

    fn from_parts(config: Config, manifest: Option<Manifest>) -> Self {
        let store = PersistentStore::new(&config.directory);
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                state: Mutex::new(CacheState {
                    memory: MemoryStore::new(),
                    manifest,
                    stats: CacheStats::new(),
                }),
            }),
        }
    }

    // == Wrap ==
    /// Wraps `operation` so its results are memoized in this cache.
    ///
    /// The operation name defaults to the Rust type name of `operation`, which
    /// is the module-qualified path for function items. Closures should be
    /// given an explicit name with [`Memoized::name`].
    pub fn wrap<A, R, E, F>(&self, operation: F) -> Memoized<A, R, F>
    where
        F: Fn(&A) -> std::result::Result<R, E>,
        R: Serialize + DeserializeOwned + 'static,
    {
        self.wrap_with_codec(operation, Codec::json())
    }

    /// Like [`Cache::wrap`], persisting results with `codec`.
    ///
    /// The result type needs no serde support, only what `codec` itself requires.
    pub fn wrap_with_codec<A, R, E, F>(&self, operation: F, codec: Codec<R>) -> Memoized<A, R, F>
    where
        F: Fn(&A) -> std::result::Result<R, E>,
    {
        Memoized::new(
            self.clone(),
            operation,
            std::any::type_name::<F>().to_string(),
            codec,
        )
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn directory(&self) -> &Path {
        &self.shared.config.directory
    }

    /// Directory holding the artifact files.
    pub fn data_dir(&self) -> &Path {
        self.shared.store.data_dir()
    }

    pub fn file_cache_enabled(&self) -> bool {
        self.shared.config.enable_file_cache
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    /// Manifest entries in key order.
    pub fn entries(&self) -> Vec<(String, EntryMeta)> {
        self.lock()
            .manifest
            .as_ref()
            .map(|manifest| {
                manifest
                    .iter()
                    .map(|(key, meta)| (key.clone(), meta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of values held by the memory tier.
    pub fn memory_len(&self) -> usize {
        self.lock().memory.len()
    }

    /// True if either tier holds an entry for `key`, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.lock();
        state.memory.get(key).is_some()
            || state
                .manifest
                .as_ref()
                .map(|manifest| manifest.lookup(key).is_some())
                .unwrap_or(false)
    }

    // == Maintenance ==
    /// Drops the in-process tier only; persisted entries stay available.
    pub fn clear_memory(&self) {
        self.lock().memory.clear();
        debug!("Memory tier cleared");
    }

    /// Removes every entry from both tiers and deletes all artifacts.
    ///
    /// Returns the number of persisted entries removed.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.lock();
        state.memory.clear();
        let Some(manifest) = state.manifest.as_mut() else {
            return Ok(0);
        };
        let removed = manifest.clear();
        manifest.save()?;
        let swept = self.shared.store.sweep()? + manifest.sweep_staged()?;
        info!(
            "Cache cleared: {} persisted entries removed, {} files deleted",
            removed.len(),
            swept
        );
        Ok(removed.len())
    }

    /// Removes one entry from both tiers, deleting its artifact.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.lock();
        let in_memory = state.memory.remove(key).is_some();
        let persisted = match state.manifest.as_mut() {
            Some(manifest) => match manifest.remove(key) {
                Some(meta) => {
                    manifest.save()?;
                    if !manifest.is_referenced(&meta.path) {
                        self.shared.store.delete(&meta.path)?;
                    }
                    true
                }
                None => false,
            },
            None => false,
        };
        Ok(in_memory || persisted)
    }

    /// Removes every expired entry from both tiers and deletes their artifacts.
    ///
    /// Expiration is otherwise only evaluated lazily at lookup time; this is
    /// an explicit, caller-triggered sweep. Returns the number of keys removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.lock();
        let mut purged = BTreeSet::new();

        let expired_in_memory: Vec<String> = state
            .memory
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired_in_memory {
            state.memory.remove(&key);
            purged.insert(key);
        }

        if let Some(manifest) = state.manifest.as_mut() {
            let expired: Vec<String> = manifest
                .iter()
                .filter(|(_, meta)| meta.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect();
            if !expired.is_empty() {
                let removed: Vec<EntryMeta> = expired
                    .iter()
                    .filter_map(|key| manifest.remove(key))
                    .collect();
                manifest.save()?;
                for meta in removed.iter().filter(|meta| !manifest.is_referenced(&meta.path)) {
                    self.shared.store.delete(&meta.path)?;
                }
                purged.extend(expired);
            }
        }

        if purged.is_empty() {
            debug!("Purge: no expired entries found");
        } else {
            info!("Purge: removed {} expired entries", purged.len());
        }
        Ok(purged.len())
    }

    // == Lookup ==
    /// Serves `key` from memory, then from the manifest and file tier.
    ///
    /// Returns `Ok(None)` on a miss. Expired entries count as misses and are
    /// dropped from memory; their artifacts are cleaned up by the next store.
    pub(crate) fn lookup<R>(
        &self,
        key: &CacheKey,
        persist: bool,
        codec: &Codec<R>,
    ) -> Result<Option<R>>
    where
        R: Any + Clone + Send + Sync,
    {
        let now = Utc::now();
        let meta = {
            let mut state = self.lock();

            let probe = match state.memory.get(key.as_str()) {
                Some(slot) if slot.entry.is_expired_at(now) => MemoryProbe::Expired,
                Some(slot) => match slot.value_as::<R>() {
                    Some(value) => MemoryProbe::Hit(value),
                    None => MemoryProbe::Miss,
                },
                None => MemoryProbe::Miss,
            };
            match probe {
                MemoryProbe::Hit(value) => {
                    debug!("Memory hit for {}", key);
                    state.stats.record_memory_hit();
                    return Ok(Some(value));
                }
                MemoryProbe::Expired => {
                    debug!("Memory entry for {} has expired", key);
                    state.memory.remove(key.as_str());
                    state.stats.record_expiration();
                }
                MemoryProbe::Miss => {}
            }

            let found = if persist {
                state
                    .manifest
                    .as_ref()
                    .and_then(|manifest| manifest.lookup(key.as_str()))
                    .cloned()
            } else {
                None
            };
            match found {
                Some(meta) if meta.is_expired_at(now) => {
                    debug!("Manifest entry for {} has expired", key);
                    state.stats.record_expiration();
                    state.stats.record_miss();
                    return Ok(None);
                }
                Some(meta) if &meta.format != codec.format() => {
                    debug!(
                        "Manifest entry for {} was written as {}, expected {}",
                        key,
                        meta.format,
                        codec.format()
                    );
                    state.stats.record_miss();
                    return Ok(None);
                }
                Some(meta) => meta,
                None => {
                    state.stats.record_miss();
                    return Ok(None);
                }
            }
        };

        // The codec is caller code, so the artifact is loaded without holding the lock.
        match self.shared.store.read(&meta.path, codec) {
            Ok(value) => {
                debug!("Manifest hit for {} ({})", key, meta.path);
                let entry = CacheEntry::from_meta(
                    key.clone(),
                    &meta,
                    self.shared.store.artifact_path(&meta.path),
                );
                let mut state = self.lock();
                state
                    .memory
                    .put(key.as_str(), MemorySlot::new(value.clone(), entry));
                state.stats.record_disk_hit();
                Ok(Some(value))
            }
            Err(err) if self.shared.config.tolerate_missing_artifacts => {
                warn!("Treating unreadable artifact for {} as a miss: {}", key, err);
                let mut state = self.lock();
                state.stats.record_miss();
                if let Some(manifest) = state.manifest.as_mut() {
                    if manifest.lookup(key.as_str()) == Some(&meta) {
                        manifest.remove(key.as_str());
                        manifest.save()?;
                        if !manifest.is_referenced(&meta.path) {
                            self.shared.store.delete(&meta.path)?;
                        }
                    }
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn record_reload(&self) {
        self.lock().stats.record_reload();
    }

    // == Store ==
    /// Stores a freshly computed value in memory and, when persisting, as an artifact.
    ///
    /// A previous artifact for the key is unrecorded and deleted before the new
    /// one is written, so overwritten or expired entries leave no orphans. An
    /// artifact belongs to one key at a time: when a fixed file name is reused,
    /// the last key written keeps it and earlier keys become misses.
    pub(crate) fn store<R>(&self, key: &CacheKey, value: &R, plan: StorePlan<'_, R>) -> Result<()>
    where
        R: Any + Clone + Send + Sync,
    {
        let now = Utc::now();
        let expires_at = expiry(now, plan.ttl);
        let persist = plan.persist && self.file_cache_enabled();

        if !persist {
            let mut entry = CacheEntry::new(key.clone(), now, plan.ttl);
            entry.format = plan.codec.format().clone();
            self.lock()
                .memory
                .put(key.as_str(), MemorySlot::new(value.clone(), entry));
            debug!("Stored {} in memory", key);
            return Ok(());
        }

        let extension = plan
            .extension
            .or(self.shared.config.default_extension.as_deref());
        let fixed_name = plan
            .file_name
            .as_deref()
            .map(|name| PersistentStore::artifact_name(name, extension));

        // Unrecord the key's previous artifact and every other key whose
        // artifact the new write is about to replace.
        let stale = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.memory.remove(key.as_str());
            match state.manifest.as_mut() {
                Some(manifest) => {
                    let previous = manifest.remove(key.as_str());
                    let released = match fixed_name.as_deref() {
                        Some(name) => manifest.release_path(name, key.as_str()),
                        None => Vec::new(),
                    };
                    for other in &released {
                        debug!("Artifact of {} is taken over by {}", other, key);
                        state.memory.remove(other);
                    }
                    if previous.is_some() || !released.is_empty() {
                        manifest.save()?;
                    }
                    previous.filter(|meta| !manifest.is_referenced(&meta.path))
                }
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!("Replacing artifact {} for {}", stale.path, key);
            self.shared.store.delete(&stale.path)?;
        }

        let path = self.shared.store.write(
            key.as_str(),
            value,
            plan.file_name.as_deref(),
            extension,
            plan.codec,
        )?;

        let meta = EntryMeta {
            path,
            created_at: now,
            expires_at,
            format: plan.codec.format().clone(),
        };
        let entry = CacheEntry::from_meta(
            key.clone(),
            &meta,
            self.shared.store.artifact_path(&meta.path),
        );

        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(manifest) = state.manifest.as_mut() {
            // Another writer may have claimed the same artifact in the meantime.
            for other in manifest.release_path(&meta.path, key.as_str()) {
                state.memory.remove(&other);
            }
            manifest.record(key.as_str(), meta);
            manifest.save()?;
        }
        state
            .memory
            .put(key.as_str(), MemorySlot::new(value.clone(), entry));
        state.stats.record_write();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use tempfile::TempDir;

    use crate::cache::MANIFEST_FILE;

    fn codec() -> Codec<String> {
        Codec::json()
    }

    fn plan<'a>(codec: &'a Codec<String>, ttl: Option<Duration>) -> StorePlan<'a, String> {
        StorePlan {
            persist: true,
            file_name: None,
            extension: None,
            ttl,
            codec,
        }
    }

    fn create_test_cache() -> (Cache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = Cache::in_dir(temp_dir.path()).expect("Failed to open cache");
        (cache, temp_dir)
    }

    fn artifact_count(cache: &Cache) -> usize {
        fs::read_dir(cache.data_dir())
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_store_then_lookup_memory_hit() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();
        let found = cache.lookup(&key, true, &codec).unwrap();

        assert_eq!(found.as_deref(), Some("v"));
        assert_eq!(cache.stats().memory_hits, 1);
        assert_eq!(cache.stats().writes, 1);
    }

    #[test]
    fn test_lookup_falls_back_to_manifest() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();
        cache.clear_memory();
        assert_eq!(cache.memory_len(), 0);

        let found = cache.lookup(&key, true, &codec).unwrap();
        assert_eq!(found.as_deref(), Some("v"));
        assert_eq!(cache.stats().disk_hits, 1);
        assert_eq!(cache.memory_len(), 1, "disk hit repopulates memory");
    }

    #[test]
    fn test_lookup_without_persist_ignores_manifest() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();
        cache.clear_memory();

        assert!(cache.lookup(&key, false, &codec).unwrap().is_none());
    }

    #[test]
    fn test_lookup_format_mismatch_is_miss() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let json = codec();
        let text: Codec<String> = Codec::custom(
            "text",
            |value: &String, path: &Path| Ok(fs::write(path, value)?),
            |path: &Path| Ok(fs::read_to_string(path)?),
        );

        cache.store(&key, &"v".to_string(), plan(&json, None)).unwrap();
        cache.clear_memory();

        assert!(cache.lookup(&key, true, &text).unwrap().is_none());
    }

    #[test]
    fn test_expired_lookup_is_miss() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache
            .store(&key, &"v".to_string(), plan(&codec, Some(Duration::from_millis(50))))
            .unwrap();
        sleep(Duration::from_millis(80));

        assert!(cache.lookup(&key, true, &codec).unwrap().is_none());
        assert_eq!(cache.memory_len(), 0, "expired memory entry is discarded");
        assert!(cache.stats().expirations >= 1);
    }

    #[test]
    fn test_overwrite_removes_previous_artifact() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache.store(&key, &"first".to_string(), plan(&codec, None)).unwrap();
        let first_path = cache.entries()[0].1.path.clone();
        cache.store(&key, &"second".to_string(), plan(&codec, None)).unwrap();

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_ne!(entries[0].1.path, first_path);
        assert_eq!(artifact_count(&cache), 1);
    }

    #[test]
    fn test_remove_entry() {
        let (cache, _dir) = create_test_cache();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();
        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();

        assert!(cache.remove(key.as_str()).unwrap());
        assert!(!cache.contains(key.as_str()));
        assert_eq!(artifact_count(&cache), 0);
        assert!(!cache.remove(key.as_str()).unwrap());
    }

    #[test]
    fn test_clear_removes_everything() {
        let (cache, dir) = create_test_cache();
        let codec = codec();
        for i in 0..3 {
            let key = CacheKey::new("m.f", &i.to_string());
            cache.store(&key, &i.to_string(), plan(&codec, None)).unwrap();
        }

        assert_eq!(cache.clear().unwrap(), 3);
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.entries().is_empty());
        assert_eq!(artifact_count(&cache), 0);

        let reopened = Cache::in_dir(dir.path()).unwrap();
        assert!(reopened.entries().is_empty());
    }

    #[test]
    fn test_purge_expired_keeps_live_entries() {
        let (cache, _dir) = create_test_cache();
        let codec = codec();
        let short = CacheKey::new("m.f", "short");
        let long = CacheKey::new("m.f", "long");
        cache
            .store(&short, &"s".to_string(), plan(&codec, Some(Duration::from_millis(30))))
            .unwrap();
        cache
            .store(&long, &"l".to_string(), plan(&codec, Some(Duration::from_secs(3600))))
            .unwrap();
        sleep(Duration::from_millis(60));

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(!cache.contains(short.as_str()));
        assert!(cache.contains(long.as_str()));
        assert_eq!(artifact_count(&cache), 1);
    }

    #[test]
    fn test_memory_only_cache_never_touches_disk() {
        let cache = Cache::memory_only();
        let key = CacheKey::new("m.f", "1");
        let codec = codec();

        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();

        assert!(cache.entries().is_empty());
        assert_eq!(cache.lookup(&key, true, &codec).unwrap().as_deref(), Some("v"));
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn test_fixed_name_belongs_to_last_key() {
        let (cache, _dir) = create_test_cache();
        let codec = codec();
        let first = CacheKey::new("m.f", "1");
        let second = CacheKey::new("m.f", "2");
        fn named(codec: &Codec<String>) -> StorePlan<'_, String> {
            StorePlan {
                file_name: Some("latest".to_string()),
                ..plan(codec, None)
            }
        }

        cache.store(&first, &"one".to_string(), named(&codec)).unwrap();
        cache.store(&second, &"two".to_string(), named(&codec)).unwrap();

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, second.as_str());
        assert_eq!(entries[0].1.path, "latest");
        assert!(cache.lookup(&first, true, &codec).unwrap().is_none());
        assert_eq!(cache.lookup(&second, true, &codec).unwrap().as_deref(), Some("two"));

        // Rewriting the first key takes the file back.
        cache.store(&first, &"one".to_string(), named(&codec)).unwrap();
        cache.clear_memory();
        assert!(cache.lookup(&second, true, &codec).unwrap().is_none());
        assert_eq!(cache.lookup(&first, true, &codec).unwrap().as_deref(), Some("one"));
        assert_eq!(artifact_count(&cache), 1);
    }

    #[test]
    fn test_clear_sweeps_stray_files() {
        let (cache, dir) = create_test_cache();
        let codec = codec();
        let key = CacheKey::new("m.f", "1");
        cache.store(&key, &"v".to_string(), plan(&codec, None)).unwrap();
        fs::write(cache.data_dir().join(".staged-leftover"), b"partial").unwrap();
        fs::write(cache.data_dir().join("unrecorded.json"), b"{}").unwrap();
        fs::write(dir.path().join(".manifest-leftover.tmp"), b"{}").unwrap();

        assert_eq!(cache.clear().unwrap(), 1);

        assert_eq!(artifact_count(&cache), 0);
        assert!(!dir.path().join(".manifest-leftover.tmp").exists());
        assert!(dir.path().join(MANIFEST_FILE).exists());
    }
}
