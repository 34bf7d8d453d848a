//! Purpose: Asset catalog collaborator consulted on cache misses.
//! Exports: `AssetCatalog`, `StaticCatalog`.
//! Role: Immutable name → bytes table populated once at start-up.
//! Invariants: Names are stored normalized (last path segment only).
//! Invariants: A built catalog is never mutated; lookups need no locking.
use std::collections::HashMap;
use std::path::Path;

use crate::api::cache::normalize_name;
use crate::core::error::{Error, ErrorKind};

pub trait AssetCatalog: Send + Sync {
    fn find_asset(&self, name: &str) -> Option<&[u8]>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    assets: HashMap<String, Vec<u8>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.assets
            .insert(normalize_name(name).to_string(), bytes.into());
        self
    }

    pub fn load_file(self, name: &str, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message(format!("failed to read asset file {}", path.display()))
                .with_name(name)
                .with_source(err)
        })?;
        Ok(self.with_asset(name, bytes))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.assets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl AssetCatalog for StaticCatalog {
    fn find_asset(&self, name: &str) -> Option<&[u8]> {
        self.assets.get(normalize_name(name)).map(Vec::as_slice)
    }
}

impl<N, B> FromIterator<(N, B)> for StaticCatalog
where
    N: AsRef<str>,
    B: Into<Vec<u8>>,
{
    fn from_iter<T: IntoIterator<Item = (N, B)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(StaticCatalog::new(), |catalog, (name, bytes)| {
                catalog.with_asset(name.as_ref(), bytes)
            })
    }
}
