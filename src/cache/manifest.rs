//! Manifest Module
//!
//! Persisted index mapping cache keys to artifact metadata. The manifest is the
//! single source of truth for what survives a process restart.
//!
//! The file is pretty-printed JSON so it can be inspected by hand:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "module.add(1, 2)": {
//!       "path": "k3J9xQ0aZ1bT.json",
//!       "created_at": "2024-05-01T10:00:00Z",
//!       "expires_at": null,
//!       "format": "json"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cache::{EntryMeta, MANIFEST_FILE};
use crate::error::{CacheError, Result};

/// Current manifest file format version.
pub const MANIFEST_VERSION: u32 = 1;

const STAGE_PREFIX: &str = ".manifest-";
const STAGE_SUFFIX: &str = ".tmp";

#[derive(Deserialize)]
struct ManifestFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, EntryMeta>,
}

#[derive(Serialize)]
struct ManifestFileRef<'a> {
    version: u32,
    entries: &'a BTreeMap<String, EntryMeta>,
}

// == Manifest ==
/// In-memory representation of the manifest file.
///
/// `record` and `remove` only touch memory; call [`Manifest::save`] to persist.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: BTreeMap<String, EntryMeta>,
}

impl Manifest {
    // == Load ==
    /// Loads the manifest stored in `directory`.
    ///
    /// A missing file is the first-run case and yields an empty manifest.
    /// A file that cannot be read or parsed is reported as
    /// [`CacheError::ManifestCorrupt`] rather than discarded.
    pub fn load(directory: &Path) -> Result<Self> {
        let path = directory.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting empty", path.display());
                return Ok(Self {
                    path,
                    entries: BTreeMap::new(),
                });
            }
            Err(err) => {
                return Err(CacheError::ManifestCorrupt {
                    path,
                    source: err.into(),
                })
            }
        };

        let file: ManifestFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(err) => {
                return Err(CacheError::ManifestCorrupt {
                    path,
                    source: err.into(),
                })
            }
        };

        if file.version != MANIFEST_VERSION {
            return Err(CacheError::ManifestCorrupt {
                path,
                source: format!(
                    "unsupported manifest version {} (expected {})",
                    file.version, MANIFEST_VERSION
                )
                .into(),
            });
        }

        debug!(
            "Loaded manifest {} with {} entries",
            path.display(),
            file.entries.len()
        );
        Ok(Self {
            path,
            entries: file.entries,
        })
    }

    /// Path of the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, key: &str) -> Option<&EntryMeta> {
        self.entries.get(key)
    }

    pub fn record(&mut self, key: impl Into<String>, meta: EntryMeta) {
        self.entries.insert(key.into(), meta);
    }

    pub fn remove(&mut self, key: &str) -> Option<EntryMeta> {
        self.entries.remove(key)
    }

    /// Unrecords every entry other than `keep` whose artifact is `path`.
    ///
    /// An artifact file holds one value, so at most one key may point at it.
    /// Returns the keys that were removed.
    pub fn release_path(&mut self, path: &str, keep: &str) -> Vec<String> {
        let sharing: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, meta)| meta.path == path && key.as_str() != keep)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &sharing {
            self.entries.remove(key);
        }
        sharing
    }

    /// True if any entry still points at the artifact `path`.
    pub fn is_referenced(&self, path: &str) -> bool {
        self.entries.values().any(|meta| meta.path == path)
    }

    /// Removes every entry, returning them.
    pub fn clear(&mut self) -> BTreeMap<String, EntryMeta> {
        std::mem::take(&mut self.entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryMeta)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Save ==
    /// Writes the full manifest atomically.
    ///
    /// The new content goes to a temporary file in the same directory, which
    /// then replaces the manifest. Until the replace succeeds the previous
    /// manifest stays intact.
    pub fn save(&self) -> Result<()> {
        self.stage()?.commit()
    }

    /// Writes the new manifest to a temporary file without replacing the current one.
    pub(crate) fn stage(&self) -> Result<StagedManifest> {
        let directory = self.directory();
        if !directory.exists() {
            info!("Creating cache directory {}", directory.display());
        }
        fs::create_dir_all(&directory).map_err(|err| CacheError::write(&directory, err))?;

        let mut temp = tempfile::Builder::new()
            .prefix(STAGE_PREFIX)
            .suffix(STAGE_SUFFIX)
            .tempfile_in(&directory)
            .map_err(|err| CacheError::write(&directory, err))?;

        let staged_path = temp.path().to_path_buf();
        let body = ManifestFileRef {
            version: MANIFEST_VERSION,
            entries: &self.entries,
        };
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &body)
                .map_err(|err| CacheError::write(&staged_path, err))?;
            writer
                .flush()
                .map_err(|err| CacheError::write(&staged_path, err))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|err| CacheError::write(&staged_path, err))?;

        Ok(StagedManifest {
            temp,
            target: self.path.clone(),
        })
    }

    /// Deletes staged manifests left behind by interrupted saves.
    pub(crate) fn sweep_staged(&self) -> Result<usize> {
        let directory = self.directory();
        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::write(&directory, err)),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::write(&directory, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(STAGE_PREFIX) && name.ends_with(STAGE_SUFFIX)) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(CacheError::write(entry.path(), err)),
            }
        }
        Ok(removed)
    }

    fn directory(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

// == Staged Manifest ==
/// A fully written manifest waiting to replace the current one.
///
/// Dropping it without calling [`StagedManifest::commit`] discards the
/// temporary file and leaves the current manifest untouched.
pub(crate) struct StagedManifest {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedManifest {
    pub(crate) fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|err| CacheError::write(&target, err.error))?;
        debug!("Saved manifest {}", target.display());
        Ok(())
    }
}
