//! Re-scoping of type references onto the current platform's assemblies.
//!
//! A mod built on another platform references assemblies that do not exist here (for example
//! `Stardew Valley` instead of `StardewValley`). [`TypeScopeRewriter::rewrite_assembly`] drops
//! those references, adds the platform's target assemblies and points every affected type
//! reference at the target that defines it. Nested references follow their outermost type,
//! and generic arguments are plain type references, so fixing every root reference fixes
//! every signature built from them.

use std::collections::HashSet;

use log::{debug, warn};

use crate::{
    module::{
        references::{AssemblyRef, AssemblyRefId, ResolutionScope, TypeRefId},
        Module,
    },
    platform::PlatformAssemblyMap,
    rewriter::session::{RewriteEvent, RewriteSession},
    Error, Result,
};

/// Rewrites assembly references and type scopes of one module at a time.
pub struct TypeScopeRewriter<'a> {
    map: &'a PlatformAssemblyMap,
}

impl<'a> TypeScopeRewriter<'a> {
    /// Create a rewriter using the given platform map.
    #[must_use]
    pub fn new(map: &'a PlatformAssemblyMap) -> Self {
        TypeScopeRewriter { map }
    }

    /// Fix the module's assembly references and type scopes for the current platform.
    ///
    /// Returns `false` without touching the module if it references none of the assemblies
    /// the map removes.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if type references would be left without a scope, which
    /// happens only when the map has no target assemblies.
    pub fn rewrite_assembly(
        &self,
        module: &mut Module,
        session: &mut RewriteSession,
    ) -> Result<bool> {
        let removed: Vec<bool> = module
            .assembly_refs
            .iter()
            .map(|reference| self.map.is_removed(&reference.name))
            .collect();
        if !removed.contains(&true) {
            return Ok(false);
        }

        let mut refs: Vec<AssemblyRef> = Vec::with_capacity(module.assembly_refs.len());
        let mut mapping = Vec::with_capacity(module.assembly_refs.len());
        for (reference, removed) in module.assembly_refs.iter().zip(&removed) {
            if *removed {
                session.record(RewriteEvent::AssemblyRemoved(reference.name.clone()));
                mapping.push(None);
                continue;
            }
            let index = match refs.iter().position(|kept| kept.name == reference.name) {
                Some(index) => index,
                None => {
                    refs.push(reference.clone());
                    refs.len() - 1
                }
            };
            mapping.push(Some(AssemblyRefId::new(index)));
        }

        let mut targets = Vec::with_capacity(self.map.targets().len());
        for target in self.map.targets() {
            let index = match refs.iter().position(|kept| kept.name == target.name()) {
                Some(index) => index,
                None => {
                    session.record(RewriteEvent::AssemblyAdded(target.name().to_string()));
                    refs.push(target.reference.clone());
                    refs.len() - 1
                }
            };
            targets.push(AssemblyRefId::new(index));
        }

        let orphaned: HashSet<TypeRefId> = module
            .replace_assembly_refs(refs, &mapping)
            .into_iter()
            .collect();
        if !orphaned.is_empty() && targets.is_empty() {
            return Err(Error::Error(format!(
                "{}: {} type references lost their assembly and no target assembly is available",
                module.name,
                orphaned.len()
            )));
        }

        for index in 0..module.type_refs.len() {
            let id = TypeRefId::new(index);
            let type_ref = &module.type_refs[index];
            let ResolutionScope::Assembly(current) = type_ref.scope else {
                continue;
            };
            let is_orphan = orphaned.contains(&id);
            if type_ref.is_system() && !is_orphan {
                continue;
            }

            let full_name = module.type_full_name(id);
            let target = match self.map.lookup_index(&full_name) {
                Some(position) => targets[position],
                None if is_orphan => {
                    warn!(
                        "{}: {} is not provided by any target assembly; assuming {}",
                        module.name,
                        full_name,
                        self.map
                            .primary_target()
                            .map_or("<none>", |primary| primary.name())
                    );
                    targets[0]
                }
                None => continue,
            };
            if !is_orphan && current == target {
                continue;
            }

            module.type_refs[index].scope = ResolutionScope::Assembly(target);
            let assembly = module
                .assembly_ref(target)
                .map(|reference| reference.name.clone())
                .unwrap_or_default();
            session.redirected(&full_name, &assembly);
        }

        debug!(
            "{}: rewrote assembly references ({} now referenced)",
            module.name,
            module.assembly_refs.len()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{builder::ModuleBuilder, references::AssemblyVersion},
        platform::TargetAssembly,
        Platform,
    };

    fn map(targets: Vec<TargetAssembly>) -> PlatformAssemblyMap {
        PlatformAssemblyMap::new(
            Platform::Linux,
            ["Stardew Valley", "Microsoft.Xna.Framework", "Microsoft.Xna.Framework.Graphics"],
            targets,
        )
    }

    fn linux_targets() -> Vec<TargetAssembly> {
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
            .with_types(["Microsoft.Xna.Framework.Vector2"]),
        ]
    }

    #[test]
    fn compatible_module_is_untouched() {
        let mut builder = ModuleBuilder::new("Mod.dll");
        let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        builder.type_ref(game, "StardewValley", "Game1");
        let mut module = builder.build();
        let before = module.clone();

        let map = map(linux_targets());
        let mut session = RewriteSession::new("Mod.dll");
        assert!(!TypeScopeRewriter::new(&map).rewrite_assembly(&mut module, &mut session).unwrap());
        assert_eq!(module, before);
        assert!(session.events().is_empty());
    }

    #[test]
    fn redirects_every_reference() {
        let mut builder = ModuleBuilder::new("Mod.dll");
        let corlib = builder.assembly_ref("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
        let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
        let xna = builder.assembly_ref("Microsoft.Xna.Framework", AssemblyVersion::new(4, 0, 0, 0));
        let object = builder.type_ref(corlib, "System", "Object");
        let game1 = builder.type_ref(game, "StardewValley", "Game1");
        let nested = builder.nested_type_ref(game1, "<>c");
        let vector = builder.type_ref(xna, "Microsoft.Xna.Framework", "Vector2");
        let unknown = builder.type_ref(game, "StardewValley", "Legacy");
        let mut module = builder.build();

        let map = map(linux_targets());
        let mut session = RewriteSession::new("Mod.dll");
        assert!(TypeScopeRewriter::new(&map).rewrite_assembly(&mut module, &mut session).unwrap());

        let names: Vec<&str> = module.assembly_refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["mscorlib", "StardewValley", "MonoGame.Framework"]);

        let scope_name = |id| {
            module
                .type_assembly(id)
                .and_then(|assembly| module.assembly_ref(assembly))
                .map(|reference| reference.name.clone())
        };
        assert_eq!(scope_name(object).as_deref(), Some("mscorlib"));
        assert_eq!(scope_name(game1).as_deref(), Some("StardewValley"));
        assert_eq!(scope_name(nested).as_deref(), Some("StardewValley"));
        assert_eq!(scope_name(vector).as_deref(), Some("MonoGame.Framework"));
        assert_eq!(scope_name(unknown).as_deref(), Some("StardewValley"));
        assert!(module.dangling_scopes().is_empty());

        assert!(session
            .events()
            .contains(&RewriteEvent::AssemblyRemoved("Stardew Valley".to_string())));
    }

    #[test]
    fn missing_targets_is_an_error() {
        let mut builder = ModuleBuilder::new("Mod.dll");
        let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
        builder.type_ref(game, "StardewValley", "Game1");
        let mut module = builder.build();

        let map = map(Vec::new());
        let mut session = RewriteSession::new("Mod.dll");
        assert!(TypeScopeRewriter::new(&map)
            .rewrite_assembly(&mut module, &mut session)
            .is_err());
    }
}
