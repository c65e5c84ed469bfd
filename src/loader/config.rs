use std::path::PathBuf;

use crate::cache::{MachineIdentity, SemanticVersion};

/// Settings for a [`crate::ModLoader`].
///
/// The platform stamped into cache keys is always the platform map's own, so a cached rewrite
/// can never be keyed to one platform while targeting another.
///
/// ```rust
/// use modshim::LoaderConfig;
///
/// let config = LoaderConfig::default()
///     .with_cache_dir(".cache/rewritten")
///     .with_parallel(false);
/// assert!(config.cache_dir.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory for cached rewrites; `None` disables caching
    pub cache_dir: Option<PathBuf>,
    /// Version stamped into cache keys
    pub tool_version: SemanticVersion,
    /// Machine stamped into cache keys
    pub machine: MachineIdentity,
    /// Read companion `.pdb` files and carry their sequence points through rewriting
    pub read_symbols: bool,
    /// Load mods on the rayon thread pool in [`crate::ModLoader::load_all`]
    pub parallel: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            cache_dir: None,
            tool_version: SemanticVersion::current(),
            machine: MachineIdentity::current(),
            read_symbols: true,
            parallel: true,
        }
    }
}

impl LoaderConfig {
    /// Cache rewrites under `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Disable caching.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache_dir = None;
        self
    }

    /// Override the tool version.
    #[must_use]
    pub fn with_tool_version(mut self, version: SemanticVersion) -> Self {
        self.tool_version = version;
        self
    }

    /// Override the machine identity.
    #[must_use]
    pub fn with_machine(mut self, machine: MachineIdentity) -> Self {
        self.machine = machine;
        self
    }

    /// Enable or disable symbol handling.
    #[must_use]
    pub fn with_symbols(mut self, enabled: bool) -> Self {
        self.read_symbols = enabled;
        self
    }

    /// Enable or disable parallel loading.
    #[must_use]
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoaderConfig::default();
        assert!(config.cache_dir.is_none());
        assert!(config.read_symbols);
        assert!(config.parallel);
        assert_eq!(config.tool_version, SemanticVersion::current());
        assert_eq!(config.machine, MachineIdentity::current());
    }

    #[test]
    fn builder() {
        let config = LoaderConfig::default()
            .with_cache_dir("/tmp/cache")
            .with_tool_version(SemanticVersion::new(2, 0, 0))
            .with_machine(MachineIdentity::new("m"))
            .with_symbols(false)
            .with_parallel(false);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert!(!config.read_symbols);
        assert!(!config.parallel);
        assert!(config.without_cache().cache_dir.is_none());
    }
}
