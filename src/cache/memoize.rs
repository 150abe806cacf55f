//! Memoized Operation Module
//!
//! Wraps an operation so calls go through the cache: derive the key, serve a
//! hit when one exists, otherwise compute and store.
//!
//! ```no_run
//! use memocache::{Cache, CacheError};
//!
//! fn add(args: &(i64, i64)) -> Result<i64, CacheError> {
//!     Ok(args.0 + args.1)
//! }
//!
//! # fn main() -> Result<(), CacheError> {
//! let cache = Cache::in_dir("cached")?;
//! let add = cache
//!     .wrap(add)
//!     .name("math.add")
//!     .serialize(|(a, b): &(i64, i64)| Ok(format!("{}, {}", a, b)));
//!
//! assert_eq!(add.call((1, 2))?, 3); // computed
//! assert_eq!(add.call((1, 2))?, 3); // served from the cache
//! assert_eq!(add.reload((1, 2))?, 3); // recomputed and overwritten
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::controller::StorePlan;
use crate::cache::{key, Arguments, Cache, CacheKey, Codec, Serializer};
use crate::error::{CacheError, Result};

// == File Name ==
/// How the artifact of a persisted call is named.
pub enum FileName<A> {
    /// The same name for every call
    Static(String),
    /// A name computed from the call's arguments
    Generated(Arc<dyn Fn(&A) -> String + Send + Sync>),
}

impl<A> FileName<A> {
    pub fn resolve(&self, args: &A) -> String {
        match self {
            FileName::Static(name) => name.clone(),
            FileName::Generated(generate) => generate(args),
        }
    }
}

impl<A> Clone for FileName<A> {
    fn clone(&self) -> Self {
        match self {
            FileName::Static(name) => FileName::Static(name.clone()),
            FileName::Generated(generate) => FileName::Generated(Arc::clone(generate)),
        }
    }
}

impl<A> fmt::Debug for FileName<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileName::Static(name) => f.debug_tuple("Static").field(name).finish(),
            FileName::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

// == Memoized ==
/// An operation whose results are memoized in a [`Cache`].
///
/// Built with [`Cache::wrap`] and configured through the builder methods.
/// Calls accept the same arguments as the operation, plus a per-call reload flag.
pub struct Memoized<A, R, F> {
    cache: Cache,
    operation: F,
    name: String,
    serializer: Option<Serializer<A>>,
    file_name: Option<FileName<A>>,
    extension: Option<String>,
    codec: Codec<R>,
    ttl: Option<Duration>,
    persist: bool,
}

impl<A, R, F> Memoized<A, R, F> {
    pub(crate) fn new(cache: Cache, operation: F, name: String, codec: Codec<R>) -> Self {
        Self {
            cache,
            operation,
            name,
            serializer: None,
            file_name: None,
            extension: None,
            codec,
            ttl: None,
            persist: true,
        }
    }

    /// Sets the stable, globally unique operation name used in keys.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the default argument serialization.
    ///
    /// Calls whose serialized arguments are equal share one entry.
    pub fn serialize<S>(mut self, serializer: S) -> Self
    where
        S: Fn(&A) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Names every artifact of this operation `name`.
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(FileName::Static(name.into()));
        self
    }

    /// Names artifacts from the call's arguments.
    pub fn file_name_with<N>(mut self, generate: N) -> Self
    where
        N: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.file_name = Some(FileName::Generated(Arc::new(generate)));
        self
    }

    /// Appended to every artifact name, overriding the cache default.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Uses a custom dump/load pair instead of the default JSON codec.
    pub fn codec(mut self, codec: Codec<R>) -> Self {
        self.codec = codec;
        self
    }

    /// Entries expire `seconds` after they were computed.
    pub fn expire_seconds(self, seconds: u64) -> Self {
        self.expire_after(Duration::from_secs(seconds))
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keeps results in memory only when `false`.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn operation_name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

impl<A, R, F> Memoized<A, R, F>
where
    A: Arguments,
    R: Any + Clone + Send + Sync,
{
    /// Cache key a call with `args` maps to.
    pub fn key(&self, args: &A) -> Result<CacheKey> {
        key::derive(&self.name, args, self.serializer.as_ref())
    }

    /// Calls the operation through the cache.
    pub fn call<E>(&self, args: A) -> std::result::Result<R, E>
    where
        F: Fn(&A) -> std::result::Result<R, E>,
        E: From<CacheError>,
    {
        self.invoke(args, false)
    }

    /// Always runs the operation and overwrites any cached entry.
    pub fn reload<E>(&self, args: A) -> std::result::Result<R, E>
    where
        F: Fn(&A) -> std::result::Result<R, E>,
        E: From<CacheError>,
    {
        self.invoke(args, true)
    }

    // == Invoke ==
    /// Runs the lookup / compute / store protocol for one call.
    ///
    /// Errors returned by the operation are passed through unchanged and leave
    /// no entry behind. Cache failures are converted with `E::from`.
    pub fn invoke<E>(&self, args: A, reload: bool) -> std::result::Result<R, E>
    where
        F: Fn(&A) -> std::result::Result<R, E>,
        E: From<CacheError>,
    {
        let key = self.key(&args)?;
        let persist = self.persist && self.cache.file_cache_enabled();

        if reload {
            debug!("Reload requested for {}", key);
            self.cache.record_reload();
        } else if let Some(value) = self.cache.lookup(&key, persist, &self.codec)? {
            return Ok(value);
        }

        let value = (self.operation)(&args)?;
        debug!("Computed {}", key);

        let file_name = if persist {
            self.file_name.as_ref().map(|name| name.resolve(&args))
        } else {
            None
        };
        self.cache.store(
            &key,
            &value,
            StorePlan {
                persist,
                file_name,
                extension: self.extension.as_deref(),
                ttl: self.ttl,
                codec: &self.codec,
            },
        )?;
        Ok(value)
    }
}

impl<A, R, F> fmt::Debug for Memoized<A, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("extension", &self.extension)
            .field("codec", &self.codec)
            .field("ttl", &self.ttl)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}
