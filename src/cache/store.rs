//! Persistent Store Module
//!
//! Manages the artifact files referenced by the manifest and the codecs used
//! to dump and load them.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cache::{Format, DATA_DIR};
use crate::error::{CacheError, Result};

/// Writes a value to the given path.
pub type DumpFn<R> = Arc<dyn Fn(&R, &Path) -> anyhow::Result<()> + Send + Sync>;

/// Reads a value back from the given path.
pub type LoadFn<R> = Arc<dyn Fn(&Path) -> anyhow::Result<R> + Send + Sync>;

// == Codec ==
/// A dump/load pair together with the format identifier recorded in the manifest.
pub struct Codec<R> {
    format: Format,
    dump: DumpFn<R>,
    load: LoadFn<R>,
}

impl<R> Clone for Codec<R> {
    fn clone(&self) -> Self {
        Self {
            format: self.format.clone(),
            dump: Arc::clone(&self.dump),
            load: Arc::clone(&self.load),
        }
    }
}

impl<R> fmt::Debug for Codec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").field("format", &self.format).finish()
    }
}

impl<R: Serialize + DeserializeOwned + 'static> Codec<R> {
    /// Default codec: pretty-printed serde_json.
    pub fn json() -> Self {
        Self {
            format: Format::Json,
            dump: Arc::new(|value: &R, path: &Path| -> anyhow::Result<()> {
                let mut writer = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(&mut writer, value)?;
                writer.flush()?;
                Ok(())
            }),
            load: Arc::new(|path: &Path| -> anyhow::Result<R> {
                let reader = BufReader::new(File::open(path)?);
                Ok(serde_json::from_reader(reader)?)
            }),
        }
    }
}

impl<R> Codec<R> {
    /// Caller-supplied codec identified by `name`.
    ///
    /// `dump` receives the value and the destination path; `load` must read
    /// back whatever `dump` wrote.
    pub fn custom<D, L>(name: impl Into<String>, dump: D, load: L) -> Self
    where
        D: Fn(&R, &Path) -> anyhow::Result<()> + Send + Sync + 'static,
        L: Fn(&Path) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self {
            format: Format::Custom(name.into()),
            dump: Arc::new(dump),
            load: Arc::new(load),
        }
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn dump(&self, value: &R, path: &Path) -> anyhow::Result<()> {
        (self.dump)(value, path)
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<R> {
        (self.load)(path)
    }
}

// == Persistent Store ==
/// Artifact files under `<root>/data`.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    data_dir: PathBuf,
}

impl PersistentStore {
    pub fn new(root: &Path) -> Self {
        Self {
            data_dir: root.join(DATA_DIR),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Absolute location of an artifact recorded under `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Name an artifact gets when the caller fixes it, extension included.
    pub fn artifact_name(name: &str, extension: Option<&str>) -> String {
        format!("{}{}", name, extension.unwrap_or(""))
    }

    // == Write ==
    /// Writes `value` as an artifact and returns its name relative to the data directory.
    ///
    /// `name` is used as given when present, otherwise a random unique name is
    /// generated; `extension` is appended in both cases. The artifact is
    /// staged in a temporary file and moved into place, so a failed dump never
    /// leaves a truncated artifact behind.
    pub fn write<R>(
        &self,
        key: &str,
        value: &R,
        name: Option<&str>,
        extension: Option<&str>,
        codec: &Codec<R>,
    ) -> Result<String> {
        self.ensure_dir()?;

        let staged = tempfile::Builder::new()
            .prefix(".staged-")
            .tempfile_in(&self.data_dir)
            .map_err(|err| CacheError::write(&self.data_dir, err))?;
        codec
            .dump(value, staged.path())
            .map_err(|err| CacheError::write(staged.path(), err))?;

        let (name, reserved) = match name {
            Some(name) => (Self::artifact_name(name, extension), false),
            None => (self.reserve_random_name(extension.unwrap_or(""))?, true),
        };
        let target = self.artifact_path(&name);
        let persisted = match target.parent() {
            Some(parent) => fs::create_dir_all(parent).map_err(|err| CacheError::write(parent, err)),
            None => Ok(()),
        }
        .and_then(|()| {
            staged
                .persist(&target)
                .map(drop)
                .map_err(|err| CacheError::write(&target, err.error))
        });
        if let Err(err) = persisted {
            if reserved {
                self.delete(&name)?;
            }
            return Err(err);
        }

        debug!("Stored {} as {} ({})", key, target.display(), codec.format());
        Ok(name)
    }

    // == Read ==
    /// Loads the artifact recorded under `name`.
    pub fn read<R>(&self, name: &str, codec: &Codec<R>) -> Result<R> {
        let path = self.artifact_path(name);
        codec
            .load(&path)
            .map_err(|err| CacheError::read(&path, err))
    }

    // == Delete ==
    /// Removes the artifact recorded under `name`; a missing file is not an error.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.artifact_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed artifact {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::write(&path, err)),
        }
    }

    // == Sweep ==
    /// Deletes everything under the data directory, recorded or not.
    ///
    /// Picks up staged files and placeholders left behind by interrupted
    /// writes. Returns the number of top-level entries removed.
    pub fn sweep(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::write(&self.data_dir, err)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|err| CacheError::write(&self.data_dir, err))?.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(CacheError::write(&path, err)),
            }
        }
        if removed > 0 {
            debug!("Swept {} files from {}", removed, self.data_dir.display());
        }
        Ok(removed)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            info!("Creating artifact directory {}", self.data_dir.display());
        }
        fs::create_dir_all(&self.data_dir).map_err(|err| CacheError::write(&self.data_dir, err))
    }

    /// Claims a fresh file name in the data directory.
    ///
    /// The placeholder file keeps the name unique until the artifact replaces it.
    fn reserve_random_name(&self, extension: &str) -> Result<String> {
        let placeholder = tempfile::Builder::new()
            .prefix("")
            .suffix(extension)
            .rand_bytes(12)
            .tempfile_in(&self.data_dir)
            .map_err(|err| CacheError::write(&self.data_dir, err))?;
        let (_, path) = placeholder
            .keep()
            .map_err(|err| CacheError::write(&self.data_dir, err.error))?;
        path.file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CacheError::write(
                    &path,
                    io::Error::new(io::ErrorKind::InvalidInput, "non UTF-8 file name"),
                )
            })
    }
}
