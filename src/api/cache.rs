//! Purpose: Concurrency-safe cache of fully resolved resources.
//! Exports: `ResourceCache`, `normalize_name`.
//! Role: Serves cached payloads as fresh, independently positioned views.
//! Invariants: At most one entry per normalized name.
//! Invariants: The stored channel is never handed out; callers only get views.
//! Invariants: Replacement closes the old entry, removes it, and installs the new one
//! in one critical section.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::api::catalog::AssetCatalog;
use crate::config::CacheConfig;
use crate::core::buffered::{BufferedRw, copy_chunked};
use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

#[derive(Debug)]
pub struct ResourceCache {
    entries: Mutex<HashMap<String, BufferedRw>>,
    config: CacheConfig,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: CacheConfig::default(),
        }
    }

    pub fn with_config(config: CacheConfig) -> ApiResult<Self> {
        config.validate()?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fresh view over the cached content for `name`, or `None` on a miss.
    pub fn lookup(&self, name: &str) -> Option<BufferedRw> {
        let key = normalize_name(name);
        let entries = self.lock();
        let stored = entries.get(key)?;
        stored.view(self.config.window).ok()
    }

    /// Drains `reader` completely, then installs it under `name`.
    pub fn insert<R: Read>(&self, name: &str, reader: R) -> ApiResult<()> {
        self.store(name, reader).map(drop)
    }

    /// Removes and closes the entry for `name`; `false` when nothing was cached.
    pub fn evict(&self, name: &str) -> bool {
        let key = normalize_name(name);
        let mut entries = self.lock();
        let Some(stored) = entries.get_mut(key) else {
            return false;
        };
        stored.close();
        entries.remove(key);
        debug!(name = key, "evicted cached resource");
        true
    }

    /// Cache-first lookup falling back to `catalog` on a miss.
    pub fn resolve(&self, name: &str, catalog: &dyn AssetCatalog) -> ApiResult<Option<BufferedRw>> {
        self.resolve_with(name, |key| Ok(catalog.find_asset(key)))
    }

    /// Cache-first lookup; on a miss `producer` is asked for the content,
    /// which is installed before a view of it is returned.
    pub fn resolve_with<F, R>(&self, name: &str, producer: F) -> ApiResult<Option<BufferedRw>>
    where
        F: FnOnce(&str) -> ApiResult<Option<R>>,
        R: Read,
    {
        if let Some(view) = self.lookup(name) {
            return Ok(Some(view));
        }
        let key = normalize_name(name);
        match producer(key)? {
            Some(reader) => self.store(key, reader).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Size in bytes of the cached content for `name`.
    pub fn content_len(&self, name: &str) -> Option<usize> {
        self.lock().get(normalize_name(name)).map(BufferedRw::len)
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        for stored in entries.values_mut() {
            stored.close();
        }
        entries.clear();
    }

    fn store<R: Read>(&self, name: &str, reader: R) -> ApiResult<BufferedRw> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("resource name is empty after normalization")
                .with_name(name));
        }

        let mut content = BufferedRw::with_capacity(self.config.chunk_size);
        let copied = copy_chunked(reader, &mut content, self.config.chunk_size)
            .map_err(|err| err.with_name(key))?;
        content.finish();
        let view = content.view(self.config.window)?;

        let mut entries = self.lock();
        if let Some(previous) = entries.get_mut(key) {
            previous.close();
        }
        let replaced = entries.remove(key).is_some();
        entries.insert(key.to_string(), content);
        drop(entries);

        debug!(name = key, bytes = copied, replaced, "cached resource");
        Ok(view)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BufferedRw>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key for `name`: everything after the last `/` or `\`.
pub fn normalize_name(name: &str) -> &str {
    match name.rfind(['/', '\\']) {
        Some(index) => &name[index + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceCache, normalize_name};
    use crate::api::catalog::StaticCatalog;
    use crate::config::CacheConfig;
    use crate::core::error::{Error, ErrorKind};
    use std::io::{self, Read};

    fn read_all(mut reader: impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        out
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "origin went away"))
        }
    }

    #[test]
    fn normalize_strips_both_separator_styles() {
        assert_eq!(normalize_name("/static/js/app.js"), "app.js");
        assert_eq!(normalize_name("C:\\web\\app.js"), "app.js");
        assert_eq!(normalize_name("mixed/dir\\app.js"), "app.js");
        assert_eq!(normalize_name("app.js"), "app.js");
        assert_eq!(normalize_name("dir/"), "");
    }

    #[test]
    fn lookup_after_insert_yields_content() {
        let cache = ResourceCache::new();
        cache.insert("/js/app.js", &b"console.log(1)"[..]).expect("insert");
        assert!(cache.contains("app.js"));
        let view = cache.lookup("other/dir/app.js").expect("hit");
        assert!(view.is_view());
        assert_eq!(read_all(view), b"console.log(1)");
    }

    #[test]
    fn names_are_case_sensitive() {
        let cache = ResourceCache::new();
        cache.insert("App.js", &b"x"[..]).expect("insert");
        assert!(cache.lookup("app.js").is_none());
    }

    #[test]
    fn closing_a_view_leaves_the_entry_readable() {
        let cache = ResourceCache::new();
        cache.insert("a.txt", &b"abc"[..]).expect("insert");
        let mut first = cache.lookup("a.txt").expect("hit");
        first.close();
        assert_eq!(read_all(cache.lookup("a.txt").expect("hit")), b"abc");
    }

    #[test]
    fn lookup_views_use_configured_window() {
        let cache = ResourceCache::with_config(CacheConfig {
            window: 4,
            chunk_size: 3,
        })
        .expect("config");
        cache.insert("w.bin", &b"0123456789"[..]).expect("insert");
        let mut view = cache.lookup("w.bin").expect("hit");
        let mut buf = [0u8; 64];
        assert_eq!(view.read(&mut buf).expect("read"), 4);
        assert_eq!(read_all(view), b"456789");
    }

    #[test]
    fn evict_reports_presence() {
        let cache = ResourceCache::new();
        assert!(!cache.evict("missing.js"));
        cache.insert("x.js", &b"1"[..]).expect("insert");
        assert!(cache.evict("/deep/x.js"));
        assert!(cache.lookup("x.js").is_none());
        assert!(!cache.evict("x.js"));
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_insert_keeps_previous_entry() {
        let cache = ResourceCache::new();
        cache.insert("keep.js", &b"old"[..]).expect("insert");
        let err = cache.insert("keep.js", FailingReader).expect_err("fail");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.name(), Some("keep.js"));
        assert_eq!(read_all(cache.lookup("keep.js").expect("hit")), b"old");
    }

    #[test]
    fn empty_name_is_rejected() {
        let cache = ResourceCache::new();
        let err = cache.insert("assets/", &b"x"[..]).expect_err("usage");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn resolve_falls_back_to_catalog_once() {
        let catalog = StaticCatalog::new().with_asset("class.js", "var Class;");
        let cache = ResourceCache::new();
        assert!(cache.resolve("nothing.js", &catalog).expect("resolve").is_none());
        assert!(cache.is_empty());

        let view = cache.resolve("/embed/class.js", &catalog).expect("resolve").expect("found");
        assert_eq!(read_all(view), b"var Class;");
        assert_eq!(cache.names(), ["class.js"]);
        assert_eq!(cache.content_len("class.js"), Some(10));
    }

    #[test]
    fn resolve_with_skips_producer_on_hit() {
        let cache = ResourceCache::new();
        cache.insert("hit.js", &b"cached"[..]).expect("insert");
        let view = cache
            .resolve_with::<_, &[u8]>("hit.js", |_| {
                Err(Error::new(ErrorKind::Internal).with_message("producer must not run"))
            })
            .expect("resolve")
            .expect("hit");
        assert_eq!(read_all(view), b"cached");
    }

    #[test]
    fn producer_errors_propagate() {
        let cache = ResourceCache::new();
        let err = cache
            .resolve_with::<_, &[u8]>("down.js", |_| {
                Err(Error::new(ErrorKind::Transport).with_message("origin unreachable"))
            })
            .expect_err("error");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!cache.contains("down.js"));
    }

    #[test]
    fn clear_closes_everything() {
        let cache = ResourceCache::new();
        cache.insert("a", &b"1"[..]).expect("insert");
        cache.insert("b", &b"2"[..]).expect("insert");
        let outstanding = cache.lookup("a").expect("hit");
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(read_all(outstanding), b"1");
    }
}
