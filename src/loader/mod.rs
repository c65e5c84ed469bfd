//! Loading mods through the rewrite pipeline.
//!
//! [`ModLoader`] is the entry point a host uses. For each mod it:
//!
//! 1. reads the assembly and, if present, its companion `.pdb`;
//! 2. computes the [`CacheKey`] and serves a valid cached rewrite if there is one;
//! 3. otherwise decodes the module, binds its symbols, runs the [`AssemblyRewriter`] and
//!    encodes the result along with rewritten portable symbols;
//! 4. stores the outcome in the cache.
//!
//! Cache and symbol problems are logged and never fail a load; only a malformed module or an
//! incompatible one does. All loader state is either immutable or concurrent, so
//! [`ModLoader::load_all`] rewrites independent mods in parallel on the rayon pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{path::PathBuf, sync::Arc};
//! use modshim::prelude::*;
//!
//! let platform = Platform::current()?;
//! let map = PlatformAssemblyMap::from_game_directory(platform, "/games/Stardew Valley".as_ref())?;
//! let loader = ModLoader::new(
//!     LoaderConfig::default().with_cache_dir(".cache/mods"),
//!     Arc::new(RuleSet::stardew_valley()),
//!     Arc::new(map),
//! );
//!
//! let paths = vec![PathBuf::from("Mods/Example/ExampleMod.dll")];
//! for (path, result) in paths.iter().zip(loader.load_all(&paths)) {
//!     match result {
//!         Ok(loaded) => println!("{}: {:?}", path.display(), loaded.source),
//!         Err(Error::Incompatible(rejection)) => println!("{rejection}"),
//!         Err(error) => println!("{}: {error}", path.display()),
//!     }
//! }
//! # Ok::<(), modshim::Error>(())
//! ```

mod config;
mod stats;

pub use config::LoaderConfig;
pub use stats::LoaderStats;

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashSet;
use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    cache::{CacheHit, CacheKey, RewriteCache, RewrittenAssembly},
    file::File,
    platform::PlatformAssemblyMap,
    rewriter::{AssemblyRewriter, RewriteEvent, RewriteSession},
    rules::{IncompatibleModule, RuleSet},
    symbols::{PortableSymbolWriter, ShimSymbolReader, SymbolTable, SymbolWriter},
    Error, Module, Result,
};

/// Where the bytes of a loaded mod came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// A valid cache entry
    Cache,
    /// Rewritten during this load
    Rewritten,
    /// Decoded, found compatible, and returned as is
    Unchanged,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadSource::Cache => "cache",
            LoadSource::Rewritten => "rewritten",
            LoadSource::Unchanged => "unchanged",
        })
    }
}

/// A mod ready to hand to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedMod {
    /// File name of the mod
    pub name: String,
    /// Module image to load
    pub bytes: Vec<u8>,
    /// Symbols matching `bytes`, if any
    pub symbols: Option<Vec<u8>>,
    /// Where `bytes` came from
    pub source: LoadSource,
    /// `true` if `bytes` differ from the mod on disk
    pub changed: bool,
    /// Whether the mod was built for another platform; `None` for cache hits, which are not
    /// decoded
    pub platform_changed: Option<bool>,
}

/// Something that happened while loading, kept in the loader's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// A mod was loaded
    Loaded {
        /// Mod file name
        module: String,
        /// Where its bytes came from
        source: LoadSource,
    },
    /// The rewriter changed a mod
    Rewrite {
        /// Mod file name
        module: String,
        /// What was changed
        event: RewriteEvent,
    },
    /// A mod was rejected as incompatible
    Rejected(IncompatibleModule),
    /// A non-fatal problem, such as unreadable symbols or a failed cache write
    Warning {
        /// Mod file name
        module: String,
        /// What went wrong
        message: String,
    },
}

/// Loads mods through the cache and the rewriter.
///
/// A loader lives for one game launch. Its event log and the set of warnings already logged
/// grow with every load and are never pruned.
pub struct ModLoader {
    config: LoaderConfig,
    rewriter: AssemblyRewriter,
    cache: Option<RewriteCache>,
    stats: LoaderStats,
    events: boxcar::Vec<LoaderEvent>,
    warned: DashSet<String>,
}

impl ModLoader {
    /// Create a loader.
    #[must_use]
    pub fn new(config: LoaderConfig, rules: Arc<RuleSet>, map: Arc<PlatformAssemblyMap>) -> Self {
        let cache = config.cache_dir.clone().map(RewriteCache::new);
        ModLoader {
            config,
            rewriter: AssemblyRewriter::new(rules, map),
            cache,
            stats: LoaderStats::default(),
            events: boxcar::Vec::new(),
            warned: DashSet::new(),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The rewriter, for its rule set, platform map and scope-pass counter.
    #[must_use]
    pub fn rewriter(&self) -> &AssemblyRewriter {
        &self.rewriter
    }

    /// The cache, if caching is enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&RewriteCache> {
        self.cache.as_ref()
    }

    /// Load counters.
    #[must_use]
    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    /// Everything logged so far, in the order it was recorded.
    #[must_use]
    pub fn events(&self) -> Vec<LoaderEvent> {
        self.events.iter().map(|(_, event)| event.clone()).collect()
    }

    /// Load a mod from disk, picking up `{stem}.pdb` next to it when symbols are enabled.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the mod cannot be read, a decoding error if it is
    /// malformed, and [`Error::Incompatible`] if it cannot be rewritten.
    pub fn load(&self, path: &Path) -> Result<LoadedMod> {
        let file = File::from_file(path)?;
        let symbols = if self.config.read_symbols {
            self.read_companion_symbols(path)
        } else {
            None
        };
        self.load_bytes(path, file.data(), symbols.as_deref())
    }

    /// Load several mods. Results are independent and returned in input order.
    pub fn load_all(&self, paths: &[PathBuf]) -> Vec<Result<LoadedMod>> {
        if self.config.parallel {
            paths.par_iter().map(|path| self.load(path)).collect()
        } else {
            paths.iter().map(|path| self.load(path)).collect()
        }
    }

    /// Load a mod from memory. `origin` is the mod's path, which names its cache entry.
    ///
    /// # Errors
    /// See [`ModLoader::load`].
    pub fn load_bytes(
        &self,
        origin: &Path,
        bytes: &[u8],
        symbols: Option<&[u8]>,
    ) -> Result<LoadedMod> {
        let name = origin
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let symbols = symbols.filter(|_| self.config.read_symbols);

        let key = CacheKey::compute(
            bytes,
            symbols,
            self.config.tool_version.clone(),
            self.rewriter.map().platform(),
            self.config.machine.clone(),
        );

        if let Some(loaded) = self.from_cache(&name, origin, &key, bytes, symbols) {
            return Ok(self.finish(loaded));
        }

        let mut module = Module::from_bytes(bytes)?;
        let platform_changed = self.rewriter.map().is_platform_changed(&module);
        let table = symbols.and_then(|symbols| self.bind_symbols(&name, &module, symbols));

        let mut session = RewriteSession::new(name.clone());
        let changed = match self.rewriter.rewrite(&mut module, &mut session) {
            Ok(changed) => changed,
            Err(Error::Incompatible(rejection)) => {
                self.stats.record_rejected();
                self.events.push(LoaderEvent::Rejected(rejection.clone()));
                return Err(Error::Incompatible(rejection));
            }
            Err(error) => return Err(error),
        };
        for event in session.into_events() {
            self.events.push(LoaderEvent::Rewrite {
                module: name.clone(),
                event,
            });
        }

        let loaded = if changed {
            self.stats.record_rewritten();
            let rewritten = RewrittenAssembly {
                assembly: module.to_bytes()?,
                symbols: table.and_then(|table| self.write_symbols(&name, &module, &table)),
            };
            self.store(&name, origin, &key, Some(&rewritten));
            LoadedMod {
                name,
                bytes: rewritten.assembly,
                symbols: rewritten.symbols,
                source: LoadSource::Rewritten,
                changed: true,
                platform_changed: Some(platform_changed),
            }
        } else {
            self.stats.record_unchanged();
            self.store(&name, origin, &key, None);
            LoadedMod {
                name,
                bytes: bytes.to_vec(),
                symbols: symbols.map(<[u8]>::to_vec),
                source: LoadSource::Unchanged,
                changed: false,
                platform_changed: Some(platform_changed),
            }
        };
        Ok(self.finish(loaded))
    }

    fn finish(&self, loaded: LoadedMod) -> LoadedMod {
        debug!("Loaded {} ({})", loaded.name, loaded.source);
        self.stats.record_loaded();
        self.events.push(LoaderEvent::Loaded {
            module: loaded.name.clone(),
            source: loaded.source,
        });
        loaded
    }

    fn from_cache(
        &self,
        name: &str,
        origin: &Path,
        key: &CacheKey,
        bytes: &[u8],
        symbols: Option<&[u8]>,
    ) -> Option<LoadedMod> {
        let cache = self.cache.as_ref()?;
        let hit = match cache.try_get(origin, key) {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                self.stats.record_cache_miss();
                return None;
            }
            Err(error) => {
                self.warn_once(name, "cache-read", format!("cache lookup failed: {error}"));
                self.stats.record_cache_miss();
                return None;
            }
        };

        self.stats.record_cache_hit();
        Some(match hit {
            CacheHit::Rewritten(rewritten) => LoadedMod {
                name: name.to_string(),
                bytes: rewritten.assembly,
                symbols: rewritten.symbols,
                source: LoadSource::Cache,
                changed: true,
                platform_changed: None,
            },
            CacheHit::Unchanged => LoadedMod {
                name: name.to_string(),
                bytes: bytes.to_vec(),
                symbols: symbols.map(<[u8]>::to_vec),
                source: LoadSource::Cache,
                changed: false,
                platform_changed: None,
            },
        })
    }

    fn store(
        &self,
        name: &str,
        origin: &Path,
        key: &CacheKey,
        rewritten: Option<&RewrittenAssembly>,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(error) = cache.store(origin, key, rewritten) {
            self.warn_once(name, "cache-write", format!("could not cache rewrite: {error}"));
        }
    }

    fn read_companion_symbols(&self, path: &Path) -> Option<Vec<u8>> {
        let symbols_path = path.with_extension("pdb");
        match fs::read(&symbols_path) {
            Ok(bytes) => Some(bytes),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.stats.record_symbol_failure();
                self.warn_once(
                    &name,
                    "symbols-read",
                    format!("could not read {}: {error}", symbols_path.display()),
                );
                None
            }
        }
    }

    fn bind_symbols(&self, name: &str, module: &Module, symbols: &[u8]) -> Option<SymbolTable> {
        let mut reader = ShimSymbolReader::new(symbols.to_vec());
        match SymbolTable::read(module, &mut reader) {
            Ok(table) => Some(table),
            Err(error) => {
                self.stats.record_symbol_failure();
                self.warn_once(name, "symbols-read", format!("ignoring symbols: {error}"));
                None
            }
        }
    }

    fn write_symbols(&self, name: &str, module: &Module, table: &SymbolTable) -> Option<Vec<u8>> {
        match PortableSymbolWriter.write(module, table) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                self.stats.record_symbol_failure();
                self.warn_once(name, "symbols-write", format!("dropping symbols: {error}"));
                None
            }
        }
    }

    fn warn_once(&self, module: &str, kind: &str, message: String) {
        if self.warned.insert(format!("{module}\0{kind}")) {
            warn!("{module}: {message}");
        }
        self.events.push(LoaderEvent::Warning {
            module: module.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{MachineIdentity, SemanticVersion},
        platform::Platform,
        symbols::SymbolReader,
        test::{compatible_mod, incompatible_mod, linux_map, symbols_for, windows_mod},
    };

    fn loader(config: LoaderConfig) -> ModLoader {
        ModLoader::new(
            config
                .with_machine(MachineIdentity::new("test"))
                .with_tool_version(SemanticVersion::new(1, 0, 0)),
            Arc::new(RuleSet::stardew_valley()),
            Arc::new(linux_map()),
        )
    }

    #[test]
    fn legacy_mod_is_rewritten() {
        let loader = loader(LoaderConfig::default());
        let bytes = windows_mod().to_bytes().unwrap();

        let loaded = loader
            .load_bytes(Path::new("Mods/Example/ExampleMod.dll"), &bytes, None)
            .unwrap();
        assert_eq!(loaded.source, LoadSource::Rewritten);
        assert!(loaded.changed);
        assert_eq!(loaded.platform_changed, Some(true));

        let module = Module::from_bytes(&loaded.bytes).unwrap();
        assert!(module.references_assembly("StardewValley"));
        assert!(!module.references_assembly("Stardew Valley"));
        assert_eq!(loader.stats().rewritten(), 1);
        assert_eq!(loader.rewriter().scope_passes(), 1);
        assert!(loader
            .events()
            .iter()
            .any(|event| matches!(event, LoaderEvent::Rewrite { .. })));
    }

    #[test]
    fn compatible_mod_is_returned_as_is() {
        let loader = loader(LoaderConfig::default());
        let bytes = compatible_mod().to_bytes().unwrap();
        let loaded = loader.load_bytes(Path::new("Compatible.dll"), &bytes, None).unwrap();
        assert_eq!(loaded.source, LoadSource::Unchanged);
        assert_eq!(loaded.bytes, bytes);
        assert_eq!(loaded.platform_changed, Some(false));
        assert_eq!(loader.stats().unchanged(), 1);
    }

    #[test]
    fn incompatible_mod_is_rejected() {
        let loader = loader(LoaderConfig::default());
        let bytes = incompatible_mod().to_bytes().unwrap();
        match loader.load_bytes(Path::new("Broken.dll"), &bytes, None) {
            Err(Error::Incompatible(rejection)) => {
                assert!(rejection
                    .to_string()
                    .contains("GameLocation.transferDataFromSavedLocation method"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(loader.stats().rejected(), 1);
        assert_eq!(loader.stats().loaded(), 0);
        assert!(matches!(loader.events().as_slice(), [LoaderEvent::Rejected(_)]));
    }

    #[test]
    fn second_load_comes_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(LoaderConfig::default().with_cache_dir(dir.path()));
        let origin = Path::new("Mods/Example/ExampleMod.dll");
        let bytes = windows_mod().to_bytes().unwrap();

        let first = loader.load_bytes(origin, &bytes, None).unwrap();
        let second = loader.load_bytes(origin, &bytes, None).unwrap();
        assert_eq!(second.source, LoadSource::Cache);
        assert_eq!(second.bytes, first.bytes);
        assert_eq!(second.platform_changed, None);
        assert_eq!(loader.stats().cache_misses(), 1);
        assert_eq!(loader.stats().cache_hits(), 1);
        assert_eq!(loader.rewriter().scope_passes(), 1);

        let compatible = compatible_mod().to_bytes().unwrap();
        loader.load_bytes(Path::new("Compatible.dll"), &compatible, None).unwrap();
        let cached = loader.load_bytes(Path::new("Compatible.dll"), &compatible, None).unwrap();
        assert_eq!(cached.source, LoadSource::Cache);
        assert!(!cached.changed);
        assert_eq!(cached.bytes, compatible);
    }

    #[test]
    fn cache_entries_are_keyed_by_the_map_platform() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(LoaderConfig::default().with_cache_dir(dir.path()));
        let origin = Path::new("Mods/Example/ExampleMod.dll");
        let bytes = windows_mod().to_bytes().unwrap();
        loader.load_bytes(origin, &bytes, None).unwrap();

        let key = |platform| {
            CacheKey::compute(
                &bytes,
                None,
                SemanticVersion::new(1, 0, 0),
                platform,
                MachineIdentity::new("test"),
            )
        };
        let cache = RewriteCache::new(dir.path());
        let map_platform = linux_map().platform();
        assert!(matches!(
            cache.try_get(origin, &key(map_platform)).unwrap(),
            Some(CacheHit::Rewritten(_))
        ));
        assert_ne!(map_platform, Platform::Windows);
        assert!(cache.try_get(origin, &key(Platform::Windows)).unwrap().is_none());
    }

    #[test]
    fn symbols_are_rewritten_with_the_mod() {
        let loader = loader(LoaderConfig::default());
        let module = windows_mod();
        let symbols = symbols_for(&module);
        let bytes = module.to_bytes().unwrap();

        let loaded = loader
            .load_bytes(Path::new("ExampleMod.dll"), &bytes, Some(&symbols))
            .unwrap();
        let rewritten = Module::from_bytes(&loaded.bytes).unwrap();
        let output = loaded.symbols.unwrap();
        assert_eq!(&output[..4], b"BSJB");

        let mut reader = ShimSymbolReader::new(output);
        let table = SymbolTable::read(&rewritten, &mut reader).unwrap();
        assert_eq!(table.len(), 1);
        assert!(reader.documents().iter().any(|document| document == "ModEntry.cs"));
        assert_eq!(loader.stats().symbol_failures(), 0);
    }

    #[test]
    fn broken_symbols_never_block_a_load() {
        let loader = loader(LoaderConfig::default());
        let bytes = windows_mod().to_bytes().unwrap();
        let loaded = loader
            .load_bytes(Path::new("ExampleMod.dll"), &bytes, Some(b"not symbols"))
            .unwrap();
        assert!(loaded.symbols.is_none());
        assert_eq!(loader.stats().symbol_failures(), 1);
        assert!(loader
            .events()
            .iter()
            .any(|event| matches!(event, LoaderEvent::Warning { .. })));
    }

    #[test]
    fn disabled_symbols_are_ignored() {
        let loader = loader(LoaderConfig::default().with_symbols(false));
        let module = windows_mod();
        let symbols = symbols_for(&module);
        let loaded = loader
            .load_bytes(Path::new("ExampleMod.dll"), &module.to_bytes().unwrap(), Some(&symbols))
            .unwrap();
        assert!(loaded.symbols.is_none());
    }

    #[test]
    fn load_all_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (name, module) in [
            ("A.dll", windows_mod()),
            ("B.dll", incompatible_mod()),
            ("C.dll", compatible_mod()),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, module.to_bytes().unwrap()).unwrap();
            paths.push(path);
        }
        paths.push(dir.path().join("Missing.dll"));

        for parallel in [true, false] {
            let loader = loader(LoaderConfig::default().with_parallel(parallel));
            let results = loader.load_all(&paths);
            assert_eq!(results.len(), 4);
            assert_eq!(results[0].as_ref().unwrap().source, LoadSource::Rewritten);
            assert!(matches!(results[1], Err(Error::Incompatible(_))));
            assert_eq!(results[2].as_ref().unwrap().source, LoadSource::Unchanged);
            assert!(matches!(results[3], Err(Error::FileError(_))));
        }
    }
}
