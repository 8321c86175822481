use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::RequestInfo;

/// Identifies one entry of the cache.
///
/// Two requests for the same type that report the same datacenter, token and request key map
/// to the same [`CacheKey`]. Equality and hashing only consider the SHA-256 digest of the
/// human-readable metadata.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    type_name: Arc<str>,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name, hex::encode(&self.hash[..8]))
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Creates the [`CacheKey`] for a request of the given cache type.
    pub fn for_request(type_name: &str, info: &RequestInfo) -> Self {
        Self::from_parts(type_name, &info.datacenter, &info.token, &info.key)
    }

    /// Creates a [`CacheKey`] from its individual components.
    ///
    /// This is what [`Cache::prepopulate`](super::Cache::prepopulate) uses, and must agree with
    /// [`CacheKey::for_request`].
    pub fn from_parts(type_name: &str, datacenter: &str, token: &str, key: &str) -> Self {
        let mut builder = CacheKey::builder(type_name);
        builder.write_request(datacenter, token, key).unwrap();
        builder.build()
    }

    /// Create a [`CacheKeyBuilder`] for an entry of the given cache type.
    pub fn builder(type_name: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            type_name: type_name.to_owned(),
            metadata: format!("type: {type_name:?}\n\n"),
        }
    }

    /// The cache type this key belongs to.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
pub struct CacheKeyBuilder {
    type_name: String,
    metadata: String,
}

impl CacheKeyBuilder {
    /// Writes the request-identifying components into the [`CacheKey`].
    ///
    /// Components are written quoted and escaped, so no component can spill into another.
    pub fn write_request(
        &mut self,
        datacenter: &str,
        token: &str,
        key: &str,
    ) -> Result<(), fmt::Error> {
        self.metadata.write_fmt(format_args!(
            "datacenter: {datacenter:?}\ntoken: {token:?}\nkey: {key:?}\n"
        ))
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash: [u8; 32] = Sha256::digest(&self.metadata).into();

        CacheKey {
            type_name: self.type_name.into(),
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
