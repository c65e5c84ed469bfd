use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};

use log::debug;

use crate::{
    module::references::{AssemblyRef, AssemblyVersion},
    platform::game::game_assembly_names,
    Module, Platform, Result,
};

/// An assembly mods are redirected to, with the public types it provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAssembly {
    /// The reference added to rewritten mods
    pub reference: AssemblyRef,
    /// Full names of the public, non-compiler-generated types the assembly defines
    pub types: BTreeSet<String>,
}

impl TargetAssembly {
    /// A target providing no types; only its reference is added to rewritten mods.
    #[must_use]
    pub fn new(reference: AssemblyRef) -> Self {
        TargetAssembly {
            reference,
            types: BTreeSet::new(),
        }
    }

    /// Add type full names to the target.
    #[must_use]
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Enumerate the exported types of a decoded target assembly.
    #[must_use]
    pub fn from_module(module: &Module) -> Self {
        let reference = match &module.assembly {
            Some(assembly) => AssemblyRef::new(assembly.name.clone(), assembly.version),
            None => AssemblyRef::new(
                module
                    .name
                    .trim_end_matches(".dll")
                    .trim_end_matches(".exe")
                    .to_string(),
                AssemblyVersion::default(),
            ),
        };

        let types = (0..module.type_defs.len())
            .filter(|index| module.is_type_exported(*index))
            .map(|index| module.type_def_full_name(index))
            .collect();

        TargetAssembly { reference, types }
    }

    /// Short name of the assembly.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

/// Immutable mapping from legacy assembly names to the assemblies that replace them on the
/// current platform.
///
/// Built once at startup and shared read-only by every rewrite, including concurrent ones.
#[derive(Debug, Clone)]
pub struct PlatformAssemblyMap {
    platform: Platform,
    remove_names: BTreeSet<String>,
    targets: Vec<TargetAssembly>,
    type_lookup: HashMap<String, usize>,
}

impl PlatformAssemblyMap {
    /// Build a map. The first target is the primary target; types provided by several targets
    /// map to the first one listing them.
    pub fn new<I, S>(platform: Platform, remove_names: I, targets: Vec<TargetAssembly>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut type_lookup = HashMap::new();
        for (index, target) in targets.iter().enumerate() {
            for name in &target.types {
                type_lookup.entry(name.clone()).or_insert(index);
            }
        }

        PlatformAssemblyMap {
            platform,
            remove_names: remove_names.into_iter().map(Into::into).collect(),
            targets,
            type_lookup,
        }
    }

    /// Build the map for the game installed in `game_dir`.
    ///
    /// Target assemblies are read from `{name}.dll` or `{name}.exe`; targets missing from the
    /// directory are still added to rewritten mods but contribute no types to the lookup.
    ///
    /// # Errors
    /// Returns an error if a target assembly exists but cannot be decoded.
    pub fn from_game_directory(platform: Platform, game_dir: &Path) -> Result<Self> {
        let names = game_assembly_names(platform);

        let mut targets = Vec::with_capacity(names.targets.len());
        for name in names.targets {
            let candidates = [
                game_dir.join(format!("{name}.dll")),
                game_dir.join(format!("{name}.exe")),
            ];
            match candidates.iter().find(|path| path.is_file()) {
                Some(path) => {
                    let module = Module::from_file(path)?;
                    let mut target = TargetAssembly::from_module(&module);
                    target.reference.name = (*name).to_string();
                    debug!(
                        "Target assembly {} provides {} types",
                        name,
                        target.types.len()
                    );
                    targets.push(target);
                }
                None => {
                    debug!("Target assembly {} not found in {}", name, game_dir.display());
                    targets.push(TargetAssembly::new(AssemblyRef::new(
                        *name,
                        AssemblyVersion::default(),
                    )));
                }
            }
        }

        Ok(Self::new(platform, names.remove.iter().copied(), targets))
    }

    /// The platform this map was built for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Assembly short names stripped from mods.
    pub fn remove_names(&self) -> impl Iterator<Item = &str> {
        self.remove_names.iter().map(String::as_str)
    }

    /// `true` if references to the named assembly are stripped.
    #[must_use]
    pub fn is_removed(&self, assembly_name: &str) -> bool {
        self.remove_names.contains(assembly_name)
    }

    /// Target assemblies in priority order.
    #[must_use]
    pub fn targets(&self) -> &[TargetAssembly] {
        &self.targets
    }

    /// The first target, which receives types no other target claims.
    #[must_use]
    pub fn primary_target(&self) -> Option<&TargetAssembly> {
        self.targets.first()
    }

    /// Target assembly defining the type with the given full name.
    #[must_use]
    pub fn lookup(&self, full_name: &str) -> Option<&TargetAssembly> {
        self.type_lookup
            .get(full_name)
            .and_then(|index| self.targets.get(*index))
    }

    /// Position in [`PlatformAssemblyMap::targets`] of the target defining the type.
    #[must_use]
    pub fn lookup_index(&self, full_name: &str) -> Option<usize> {
        self.type_lookup.get(full_name).copied()
    }

    /// Target assembly with the given short name.
    #[must_use]
    pub fn target_by_name(&self, name: &str) -> Option<&TargetAssembly> {
        self.targets.iter().find(|target| target.name() == name)
    }

    /// `true` if the module was compiled against another platform's assemblies.
    #[must_use]
    pub fn is_platform_changed(&self, module: &Module) -> bool {
        module
            .assembly_refs
            .iter()
            .any(|reference| self.is_removed(&reference.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{builder::ModuleBuilder, types::TypeAttributes};

    fn linux_map() -> PlatformAssemblyMap {
        PlatformAssemblyMap::new(
            Platform::Linux,
            ["Stardew Valley", "Microsoft.Xna.Framework"],
            vec![
                TargetAssembly::new(AssemblyRef::new(
                    "StardewValley",
                    AssemblyVersion::new(1, 5, 6, 0),
                ))
                .with_types(["StardewValley.Game1", "StardewValley.Farmer"]),
                TargetAssembly::new(AssemblyRef::new(
                    "MonoGame.Framework",
                    AssemblyVersion::new(3, 8, 0, 0),
                ))
                .with_types(["Microsoft.Xna.Framework.Vector2", "StardewValley.Game1"]),
            ],
        )
    }

    #[test]
    fn lookup_prefers_first_target() {
        let map = linux_map();
        assert_eq!(map.lookup("StardewValley.Game1").unwrap().name(), "StardewValley");
        assert_eq!(
            map.lookup("Microsoft.Xna.Framework.Vector2").unwrap().name(),
            "MonoGame.Framework"
        );
        assert!(map.lookup("System.Object").is_none());
        assert_eq!(map.primary_target().unwrap().name(), "StardewValley");
        assert!(map.is_removed("Stardew Valley"));
        assert!(!map.is_removed("StardewValley"));
    }

    #[test]
    fn platform_changed() {
        let map = linux_map();
        let mut builder = ModuleBuilder::new("Mod.dll");
        builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        assert!(!map.is_platform_changed(builder.module()));
        builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
        assert!(map.is_platform_changed(builder.module()));
    }

    #[test]
    fn target_from_module() {
        let mut builder = ModuleBuilder::new("StardewValley.dll");
        builder.assembly("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        let game1 = builder.define_type("StardewValley", "Game1", TypeAttributes::PUBLIC);
        builder.define_nested_type(game1, "<>c", TypeAttributes::NESTED_PRIVATE);
        builder.define_nested_type(game1, "Options", TypeAttributes::NESTED_PUBLIC);
        builder.define_type("StardewValley", "Internal", TypeAttributes::NOT_PUBLIC);

        let target = TargetAssembly::from_module(&builder.build());
        assert_eq!(target.name(), "StardewValley");
        assert_eq!(target.reference.version, AssemblyVersion::new(1, 5, 6, 0));
        let types: Vec<&str> = target.types.iter().map(String::as_str).collect();
        assert_eq!(types, vec!["StardewValley.Game1", "StardewValley.Game1/Options"]);
    }

    #[test]
    fn game_directory_without_assemblies() {
        let dir = tempfile::tempdir().unwrap();
        let map = PlatformAssemblyMap::from_game_directory(Platform::Windows, dir.path()).unwrap();
        assert_eq!(map.targets().len(), 5);
        assert_eq!(map.primary_target().unwrap().name(), "Stardew Valley");
        assert!(map.is_removed("StardewValley"));
        assert!(map.lookup("StardewValley.Game1").is_none());
    }

    #[test]
    fn game_directory_with_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ModuleBuilder::new("StardewValley.dll");
        builder.assembly("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        builder.define_type("StardewValley", "Game1", TypeAttributes::PUBLIC);
        let bytes = builder.build().to_bytes().unwrap();
        std::fs::write(dir.path().join("StardewValley.dll"), bytes).unwrap();

        let map = PlatformAssemblyMap::from_game_directory(Platform::Linux, dir.path()).unwrap();
        assert_eq!(map.lookup("StardewValley.Game1").unwrap().name(), "StardewValley");
    }
}
