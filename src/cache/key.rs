//! Cache Key Module
//!
//! Derives cache keys of the form `<operation>(<serialized arguments>)`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Caller-supplied argument serializer.
///
/// The returned string is embedded verbatim in the key; no canonicalization is applied.
pub type Serializer<A> = Arc<dyn Fn(&A) -> anyhow::Result<String> + Send + Sync>;

// == Cache Key ==
/// String uniquely identifying one (operation, arguments) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Composes a key from an operation name and already serialized arguments.
    pub fn new(operation: &str, arguments: &str) -> Self {
        Self(format!("{}({})", operation, arguments))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Arguments ==
/// Default argument serialization.
///
/// Implemented for tuples of `Debug` values, rendering each positional
/// argument in call order separated by `", "`. Keyword-style arguments are
/// expressed as a struct whose `Debug` output names its fields.
pub trait Arguments {
    fn repr(&self) -> String;
}

impl Arguments for () {
    fn repr(&self) -> String {
        String::new()
    }
}

macro_rules! impl_arguments {
    ($($name:ident),+) => {
        impl<$($name: fmt::Debug),+> Arguments for ($($name,)+) {
            #[allow(non_snake_case)]
            fn repr(&self) -> String {
                let ($($name,)+) = self;
                [$(format!("{:?}", $name)),+].join(", ")
            }
        }
    };
}

impl_arguments!(A);
impl_arguments!(A, B);
impl_arguments!(A, B, C);
impl_arguments!(A, B, C, D);
impl_arguments!(A, B, C, D, E);
impl_arguments!(A, B, C, D, E, F);
impl_arguments!(A, B, C, D, E, F, G);
impl_arguments!(A, B, C, D, E, F, G, H);

// == Derive ==
/// Derives the cache key for a call.
///
/// Uses `serializer` when supplied, otherwise the default [`Arguments`] rendering.
/// Fails with [`CacheError::Serialization`] when the serializer fails.
pub fn derive<A: Arguments>(
    operation: &str,
    args: &A,
    serializer: Option<&Serializer<A>>,
) -> Result<CacheKey> {
    let arguments = match serializer {
        Some(serialize) => serialize(args).map_err(|err| CacheError::Serialization {
            operation: operation.to_string(),
            source: err.into(),
        })?,
        None => args.repr(),
    };
    Ok(CacheKey::new(operation, &arguments))
}
