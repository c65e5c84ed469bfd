//! On-disk cache of rewritten mods.
//!
//! Rewriting a large mod on every launch is wasted work when neither the mod nor the
//! environment changed. The cache stores each rewrite under a [`CacheKey`] made of the mod's
//! content hash, the rewriter's version, the platform and the machine identity; an entry is
//! reused only if all four match the current attempt.
//!
//! # Layout
//!
//! Each original mod path maps to its own directory, named by the MD5 of the path:
//!
//! ```text
//! {root}/{md5(original path)}/
//!     ExampleMod.dll          rewritten assembly
//!     ExampleMod.pdb          rewritten symbols (optional)
//!     ExampleMod.cache.xml    metadata: key, file names, use-cached flag
//! ```
//!
//! A `use-cached="false"` entry records that rewriting changed nothing, so the original file
//! can be loaded as is.
//!
//! # Concurrency
//!
//! Access to one entry is serialized through a per-entry lock, and every file is written to a
//! temporary name and renamed into place, so a reader never observes a partially written file.
//!
//! # Example
//!
//! ```rust,no_run
//! use modshim::cache::{CacheHit, CacheKey, MachineIdentity, RewriteCache, SemanticVersion};
//! use modshim::Platform;
//! use std::path::Path;
//!
//! let cache = RewriteCache::new("cache");
//! let original = Path::new("Mods/Example/ExampleMod.dll");
//! let bytes = std::fs::read(original)?;
//! let key = CacheKey::compute(
//!     &bytes,
//!     None,
//!     SemanticVersion::current(),
//!     Platform::current()?,
//!     MachineIdentity::current(),
//! );
//!
//! match cache.try_get(original, &key)? {
//!     Some(CacheHit::Rewritten(cached)) => println!("cached: {} bytes", cached.assembly.len()),
//!     Some(CacheHit::Unchanged) => println!("load the original"),
//!     None => println!("rewrite needed"),
//! }
//! # Ok::<(), modshim::Error>(())
//! ```

mod identity;
mod key;
mod metadata;
mod version;

pub use identity::MachineIdentity;
pub use key::{content_hash, CacheKey};
pub use metadata::{CacheMetadata, METADATA_FORMAT};
pub use version::SemanticVersion;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use dashmap::DashMap;
use log::{debug, warn};
use md5::{Digest, Md5};

use crate::{Error, Result};

/// A rewritten module and its symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenAssembly {
    /// Encoded module
    pub assembly: Vec<u8>,
    /// Encoded symbols, if the module has any
    pub symbols: Option<Vec<u8>>,
}

/// A valid cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// The mod was rewritten; load the cached bytes
    Rewritten(RewrittenAssembly),
    /// Rewriting changed nothing; load the original file
    Unchanged,
}

/// Files making up one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    /// Entry directory
    pub directory: PathBuf,
    /// Rewritten assembly
    pub assembly: PathBuf,
    /// Rewritten symbols
    pub symbols: PathBuf,
    /// Metadata file
    pub metadata: PathBuf,
}

fn cache_error(context: &str, path: &Path, error: &io::Error) -> Error {
    Error::Cache(format!("{context} {}: {error}", path.display()))
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary name next to `path`, unique within this process and across processes.
fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()))
}

/// Write `bytes` to a temporary file next to `path`, then rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_path(path);
    fs::write(&temp, bytes).map_err(|e| cache_error("writing", &temp, &e))?;
    if let Err(error) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(cache_error("replacing", path, &error));
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(cache_error("reading", path, &error)),
    }
}

/// Content-addressed store of rewritten mods.
#[derive(Debug)]
pub struct RewriteCache {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl RewriteCache {
    /// Use `root` as the cache directory. Nothing is created until the first store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RewriteCache {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// The cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the entry for `original` lives.
    #[must_use]
    pub fn paths(&self, original: &Path) -> CachePaths {
        let mut hasher = Md5::new();
        hasher.update(original.to_string_lossy().as_bytes());
        let directory = self.root.join(identity::to_hex(&hasher.finalize()));

        let file_name = original
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let stem = original
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());

        CachePaths {
            assembly: directory.join(&file_name),
            symbols: directory.join(format!("{stem}.pdb")),
            metadata: directory.join(format!("{stem}.cache.xml")),
            directory,
        }
    }

    fn entry_lock(&self, directory: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(directory.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock for `directory` once no caller holds it.
    fn release_lock(&self, directory: &Path, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(directory, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of entry locks currently held in memory.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Look up the entry for `original`.
    ///
    /// Returns `None` on a miss. Entries written under a different key, with unreadable
    /// metadata or whose assembly file has disappeared are stale: they are deleted and
    /// reported as a miss.
    ///
    /// # Errors
    /// Returns [`Error::Cache`] if the entry exists but cannot be read.
    pub fn try_get(&self, original: &Path, key: &CacheKey) -> Result<Option<CacheHit>> {
        let paths = self.paths(original);
        let lock = self.entry_lock(&paths.directory);
        let result = {
            let _guard = lock!(lock);
            self.lookup(original, &paths, key)
        };
        self.release_lock(&paths.directory, lock);
        result
    }

    fn lookup(
        &self,
        original: &Path,
        paths: &CachePaths,
        key: &CacheKey,
    ) -> Result<Option<CacheHit>> {
        let Some(metadata) = read_optional(&paths.metadata)? else {
            debug!("Cache miss for {}", original.display());
            return Ok(None);
        };

        let metadata = match std::str::from_utf8(&metadata)
            .map_err(|e| Error::Cache(e.to_string()))
            .and_then(CacheMetadata::from_xml)
        {
            Ok(metadata) => metadata,
            Err(error) => {
                debug!("Stale cache entry for {}: {}", original.display(), error);
                self.discard(paths);
                return Ok(None);
            }
        };

        if let Some(component) = metadata.key.mismatch(key) {
            debug!(
                "Stale cache entry for {}: {} changed",
                original.display(),
                component
            );
            self.discard(paths);
            return Ok(None);
        }

        if !metadata.use_cached {
            debug!("Cache hit for {} (unchanged)", original.display());
            return Ok(Some(CacheHit::Unchanged));
        }

        let Some(assembly) = read_optional(&paths.assembly)? else {
            debug!(
                "Stale cache entry for {}: cached assembly is missing",
                original.display()
            );
            self.discard(paths);
            return Ok(None);
        };
        let symbols = match metadata.symbols {
            Some(_) => read_optional(&paths.symbols)?,
            None => None,
        };

        debug!("Cache hit for {}", original.display());
        Ok(Some(CacheHit::Rewritten(RewrittenAssembly { assembly, symbols })))
    }

    /// Store the outcome of rewriting `original` under `key`. `None` records that rewriting
    /// changed nothing.
    ///
    /// # Errors
    /// Returns [`Error::Cache`] if any file cannot be written. A failed store never affects
    /// the rewrite itself.
    pub fn store(
        &self,
        original: &Path,
        key: &CacheKey,
        rewritten: Option<&RewrittenAssembly>,
    ) -> Result<()> {
        let paths = self.paths(original);
        let lock = self.entry_lock(&paths.directory);
        let result = {
            let _guard = lock!(lock);
            Self::write_entry(original, &paths, key, rewritten)
        };
        self.release_lock(&paths.directory, lock);
        result
    }

    fn write_entry(
        original: &Path,
        paths: &CachePaths,
        key: &CacheKey,
        rewritten: Option<&RewrittenAssembly>,
    ) -> Result<()> {
        fs::create_dir_all(&paths.directory)
            .map_err(|e| cache_error("creating", &paths.directory, &e))?;

        let file_name = |path: &Path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        let mut symbols = None;
        match rewritten {
            Some(rewritten) => {
                write_atomic(&paths.assembly, &rewritten.assembly)?;
                match &rewritten.symbols {
                    Some(bytes) => {
                        write_atomic(&paths.symbols, bytes)?;
                        symbols = Some(file_name(&paths.symbols));
                    }
                    None => {
                        let _ = fs::remove_file(&paths.symbols);
                    }
                }
            }
            None => {
                let _ = fs::remove_file(&paths.assembly);
                let _ = fs::remove_file(&paths.symbols);
            }
        }

        let metadata = CacheMetadata {
            key: key.clone(),
            file_name: file_name(&paths.assembly),
            use_cached: rewritten.is_some(),
            symbols,
        };
        write_atomic(&paths.metadata, metadata.to_xml()?.as_bytes())?;
        debug!("Cached rewrite of {}", original.display());
        Ok(())
    }

    fn discard(&self, paths: &CachePaths) {
        match fs::remove_dir_all(&paths.directory) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                "Failed to discard cache entry {}: {}",
                paths.directory.display(),
                error
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;

    fn key(content: &[u8]) -> CacheKey {
        CacheKey::compute(
            content,
            None,
            SemanticVersion::new(1, 0, 0),
            Platform::Linux,
            MachineIdentity::new("machine"),
        )
    }

    fn rewritten() -> RewrittenAssembly {
        RewrittenAssembly {
            assembly: b"rewritten".to_vec(),
            symbols: Some(b"symbols".to_vec()),
        }
    }

    #[test]
    fn store_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RewriteCache::new(dir.path().join("cache"));
        let original = Path::new("/mods/Example/ExampleMod.dll");

        assert_eq!(cache.try_get(original, &key(b"v1")).unwrap(), None);
        cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap();

        let paths = cache.paths(original);
        assert!(paths.assembly.ends_with("ExampleMod.dll"));
        assert!(paths.metadata.is_file());
        assert!(paths.symbols.is_file());
        assert_eq!(
            cache.try_get(original, &key(b"v1")).unwrap(),
            Some(CacheHit::Rewritten(rewritten()))
        );
    }

    #[test]
    fn unchanged_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RewriteCache::new(dir.path());
        let original = Path::new("/mods/Example/ExampleMod.dll");

        cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap();
        cache.store(original, &key(b"v1"), None).unwrap();
        assert_eq!(
            cache.try_get(original, &key(b"v1")).unwrap(),
            Some(CacheHit::Unchanged)
        );
        assert!(!cache.paths(original).assembly.exists());
    }

    #[test]
    fn stale_entries_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RewriteCache::new(dir.path());
        let original = Path::new("/mods/Example/ExampleMod.dll");

        cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap();
        assert_eq!(cache.try_get(original, &key(b"v2")).unwrap(), None);
        assert!(!cache.paths(original).directory.exists());

        cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap();
        fs::remove_file(cache.paths(original).assembly).unwrap();
        assert_eq!(cache.try_get(original, &key(b"v1")).unwrap(), None);

        cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap();
        fs::write(cache.paths(original).metadata, "garbage").unwrap();
        assert_eq!(cache.try_get(original, &key(b"v1")).unwrap(), None);
    }

    #[test]
    fn paths_are_per_original() {
        let cache = RewriteCache::new("/cache");
        let a = cache.paths(Path::new("/mods/A/Mod.dll"));
        let b = cache.paths(Path::new("/mods/B/Mod.dll"));
        assert_ne!(a.directory, b.directory);
        assert_eq!(a.metadata.file_name().unwrap(), "Mod.cache.xml");
    }

    #[test]
    fn temp_names_are_unique() {
        let target = Path::new("/cache/entry/ExampleMod.dll");
        let first = temp_path(target);
        let second = temp_path(target);
        assert_ne!(first, second);
        assert_eq!(first.parent(), target.parent());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!(".ExampleMod.dll.{}.", std::process::id())));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn concurrent_stores_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RewriteCache::new(dir.path());
        let original = Path::new("/mods/Example/ExampleMod.dll");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| cache.store(original, &key(b"v1"), Some(&rewritten())).unwrap());
            }
        });

        let names: Vec<String> = fs::read_dir(cache.paths(original).directory)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3, "{names:?}");
        assert!(names.iter().all(|name| !name.ends_with(".tmp")));
    }

    #[test]
    fn entry_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RewriteCache::new(dir.path());
        for index in 0..16 {
            let original = PathBuf::from(format!("/mods/Mod{index}/Mod.dll"));
            cache.store(&original, &key(b"v1"), Some(&rewritten())).unwrap();
            assert!(cache.try_get(&original, &key(b"v1")).unwrap().is_some());
        }
        assert_eq!(cache.lock_count(), 0);

        let original = Path::new("/mods/Mod0/Mod.dll");
        let held = cache.entry_lock(&cache.paths(original).directory);
        cache.try_get(original, &key(b"v1")).unwrap();
        assert_eq!(cache.lock_count(), 1);
        drop(held);
        cache.try_get(original, &key(b"v1")).unwrap();
        assert_eq!(cache.lock_count(), 0);
    }

    #[test]
    fn store_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let cache = RewriteCache::new(&blocker);
        assert!(matches!(
            cache.store(Path::new("Mod.dll"), &key(b"v1"), None),
            Err(Error::Cache(_))
        ));
    }
}
