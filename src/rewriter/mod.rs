//! The rewriting pipeline for one module.
//!
//! [`AssemblyRewriter`] drives the whole pass:
//!
//! 1. **Scan**: every instruction and method definition is matched against the rule set
//!    without modifying anything. If any hard-failure rule matches, the module is rejected
//!    with an [`crate::Error::Incompatible`] listing every incompatible construct, not just
//!    the first one.
//! 2. **Scope**: [`TypeScopeRewriter`] moves references off the assemblies the platform map
//!    removes.
//! 3. **Instructions**: each method containing a match is simplified to macro-free IL,
//!    rewritten rule by rule, and re-optimized.
//!
//! Rewriting is deterministic: the same input, platform map and rule set always produce the
//! same module, and therefore the same encoded bytes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use modshim::prelude::*;
//!
//! let map = Arc::new(PlatformAssemblyMap::new(Platform::Linux, ["Stardew Valley"], vec![
//!     TargetAssembly::new(AssemblyRef::new("StardewValley", AssemblyVersion::new(1, 5, 6, 0))),
//! ]));
//! let rewriter = AssemblyRewriter::new(Arc::new(RuleSet::stardew_valley()), map);
//!
//! let mut builder = ModuleBuilder::new("ExampleMod.dll");
//! let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
//! builder.type_ref(game, "StardewValley", "Game1");
//! let mut module = builder.build();
//!
//! let mut session = RewriteSession::new(module.name.clone());
//! assert!(rewriter.rewrite(&mut module, &mut session)?);
//! assert!(module.references_assembly("StardewValley"));
//! assert!(!module.references_assembly("Stardew Valley"));
//! # Ok::<(), modshim::Error>(())
//! ```

mod il;
mod scope;
mod session;

pub use il::IlProcessor;
pub use scope::TypeScopeRewriter;
pub use session::{RewriteEvent, RewriteSession};

use std::{
    mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::{debug, info};

use crate::{
    module::{
        method::{MethodAttributes, MethodDef},
        signature::{MethodSig, TypeSig},
        Module,
    },
    platform::PlatformAssemblyMap,
    rules::{Incompatibility, IncompatibleModule, RuleSet},
    Error, Result,
};

/// Rewrites modules against a fixed rule set and platform map.
///
/// Holds only shared immutable state plus counters, so one rewriter can serve any number of
/// threads rewriting different modules.
#[derive(Debug)]
pub struct AssemblyRewriter {
    rules: Arc<RuleSet>,
    map: Arc<PlatformAssemblyMap>,
    scope_passes: AtomicUsize,
}

impl AssemblyRewriter {
    /// Create a rewriter.
    #[must_use]
    pub fn new(rules: Arc<RuleSet>, map: Arc<PlatformAssemblyMap>) -> Self {
        AssemblyRewriter {
            rules,
            map,
            scope_passes: AtomicUsize::new(0),
        }
    }

    /// The rule set.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The platform map.
    #[must_use]
    pub fn map(&self) -> &PlatformAssemblyMap {
        &self.map
    }

    /// Number of times the scope rewriter has run.
    #[must_use]
    pub fn scope_passes(&self) -> usize {
        self.scope_passes.load(Ordering::Relaxed)
    }

    /// Report every construct in the module that no rule can rewrite, in declaration order.
    ///
    /// Type definitions are checked before their methods. Does not modify the module.
    #[must_use]
    pub fn scan(&self, module: &Module, platform_changed: bool) -> Vec<Incompatibility> {
        let mut found = Vec::new();
        let hard_failures = || self.rules.iter().filter(|rule| rule.is_hard_failure());
        for (type_index, type_def) in module.type_defs.iter().enumerate() {
            let type_name = module.type_def_full_name(type_index);
            for rule in hard_failures() {
                if rule.is_match_type_definition(module, type_def, platform_changed) {
                    found.push(Incompatibility::new(
                        rule.noun_phrase.clone(),
                        type_name.clone(),
                    ));
                }
            }

            for method in &type_def.methods {
                let location = format!("{type_name}.{}", method.name);
                for rule in hard_failures() {
                    if rule.is_match_definition(module, method, platform_changed) {
                        found.push(Incompatibility::new(
                            rule.noun_phrase.clone(),
                            location.clone(),
                        ));
                    }
                }
                let Some(body) = method.body.as_ref() else {
                    continue;
                };
                for instr in &body.instructions {
                    for rule in &*self.rules {
                        if rule.fails_on(instr.opcode)
                            && rule.is_match(module, instr, platform_changed)
                        {
                            found.push(Incompatibility::new(
                                rule.noun_phrase.clone(),
                                location.clone(),
                            ));
                        }
                    }
                }
            }
        }
        found
    }

    /// Rewrite the module in place. Returns `true` if anything changed.
    ///
    /// # Errors
    /// - [`Error::MultipleModules`] if the assembly declares more than one module
    /// - [`Error::Incompatible`] if any hard-failure rule matches; the module is left untouched
    /// - [`Error::StackMismatch`] if a transform would change a method's stack shape
    /// - [`Error::Malformed`] if the rewritten module would contain dangling scopes
    pub fn rewrite(&self, module: &mut Module, session: &mut RewriteSession) -> Result<bool> {
        if module.module_count > 1 {
            return Err(Error::MultipleModules(module.module_count));
        }

        let platform_changed = self.map.is_platform_changed(module);
        let incompatible = self.scan(module, platform_changed);
        if !incompatible.is_empty() {
            let rejection = IncompatibleModule::new(module.name.clone(), incompatible);
            info!("{rejection}");
            return Err(Error::Incompatible(rejection));
        }

        self.scope_passes.fetch_add(1, Ordering::Relaxed);
        let mut changed = TypeScopeRewriter::new(&self.map).rewrite_assembly(module, session)?;

        for type_index in 0..module.type_defs.len() {
            changed |= self.rewrite_type(module, type_index, platform_changed, session)?;
        }

        let mut bodies_changed = false;
        for type_index in 0..module.type_defs.len() {
            for method_index in 0..module.type_defs[type_index].methods.len() {
                bodies_changed |= self.rewrite_method(
                    module,
                    type_index,
                    method_index,
                    platform_changed,
                    session,
                )?;
            }
        }

        if bodies_changed {
            let dropped = module.remove_unused_member_refs();
            debug!("{}: dropped {} unused member references", module.name, dropped);
            changed = true;
        }

        let dangling = module.dangling_scopes();
        if !dangling.is_empty() {
            return Err(malformed_error!(
                "{}: {} type references have a dangling scope after rewriting",
                module.name,
                dangling.len()
            ));
        }

        Ok(changed)
    }

    fn rewrite_type(
        &self,
        module: &mut Module,
        type_index: usize,
        platform_changed: bool,
        session: &mut RewriteSession,
    ) -> Result<bool> {
        let mut changed = false;
        for rule in &*self.rules {
            if !rule.is_match_type_definition(
                module,
                &module.type_defs[type_index],
                platform_changed,
            ) {
                continue;
            }
            let location = module.type_def_full_name(type_index);
            debug!("{}: {} matched in {}", module.name, rule.noun_phrase, location);
            if rule.rewrite_type_definition(module, type_index, &self.map)? {
                session.record(RewriteEvent::RuleApplied {
                    noun_phrase: rule.noun_phrase.clone(),
                    location,
                });
                changed = true;
            }
        }
        Ok(changed)
    }

    fn method_matches(&self, module: &Module, method: &MethodDef, platform_changed: bool) -> bool {
        self.rules.iter().any(|rule| {
            rule.is_match_definition(module, method, platform_changed)
                || method.body.as_ref().is_some_and(|body| {
                    body.instructions
                        .iter()
                        .any(|instr| rule.is_match(module, instr, platform_changed))
                })
        })
    }

    fn rewrite_method(
        &self,
        module: &mut Module,
        type_index: usize,
        method_index: usize,
        platform_changed: bool,
        session: &mut RewriteSession,
    ) -> Result<bool> {
        let method = &module.type_defs[type_index].methods[method_index];
        if !self.method_matches(module, method, platform_changed) {
            return Ok(false);
        }

        let location = format!("{}.{}", module.type_def_full_name(type_index), method.name);
        let placeholder = MethodDef::new(
            String::new(),
            MethodAttributes::empty(),
            MethodSig::static_method(TypeSig::VOID, Vec::new()),
            None,
        );
        let mut method = mem::replace(
            &mut module.type_defs[type_index].methods[method_index],
            placeholder,
        );

        let result = self.rewrite_body(module, &mut method, location, platform_changed, session);
        module.type_defs[type_index].methods[method_index] = method;
        result
    }

    fn rewrite_body(
        &self,
        module: &mut Module,
        method: &mut MethodDef,
        location: String,
        platform_changed: bool,
        session: &mut RewriteSession,
    ) -> Result<bool> {
        let mut changed = false;
        let mut il = IlProcessor::new(method, location);
        il.simplify_macros();

        let mut index = 0;
        while index < il.len() {
            for rule in &*self.rules {
                let Some(instr) = il.instruction(index) else {
                    break;
                };
                if !rule.is_match(module, instr, platform_changed) {
                    continue;
                }
                debug!(
                    "{}: {} matched in {}",
                    module.name,
                    rule.noun_phrase,
                    il.location()
                );
                if rule.rewrite(module, &mut il, index, &self.map)? {
                    session.record(RewriteEvent::RuleApplied {
                        noun_phrase: rule.noun_phrase.clone(),
                        location: il.location().to_string(),
                    });
                    changed = true;
                }
            }
            index += 1;
        }

        for rule in &*self.rules {
            if rule.is_match_definition(module, il.method(), platform_changed)
                && rule.rewrite_definition(module, &mut il, &self.map)?
            {
                session.record(RewriteEvent::RuleApplied {
                    noun_phrase: rule.noun_phrase.clone(),
                    location: il.location().to_string(),
                });
                changed = true;
            }
        }

        il.optimize_macros();
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{
            builder::ModuleBuilder,
            instruction::Operand,
            method::MethodBody,
            opcodes::OpCode,
            references::{AssemblyRef, AssemblyVersion},
            types::{FieldAttributes, TypeAttributes},
        },
        platform::TargetAssembly,
        rules::{RewriteRule, TypeTarget},
        Platform,
    };

    fn rewriter(rules: RuleSet) -> AssemblyRewriter {
        let stardew = AssemblyRef::new("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        let map = PlatformAssemblyMap::new(
            Platform::Linux,
            ["Stardew Valley"],
            vec![TargetAssembly::new(stardew).with_types([
                "StardewValley.Game1",
                "StardewValley.Farmer",
                "StardewValley.GameLocation",
            ])],
        );
        AssemblyRewriter::new(Arc::new(rules), Arc::new(map))
    }

    fn entry(builder: &mut ModuleBuilder, name: &str, body: MethodBody) {
        let existing = builder
            .module()
            .type_defs
            .iter()
            .position(|t| t.name == "ModEntry");
        let index = match existing {
            Some(index) => index,
            None => builder.define_type("ExampleMod", "ModEntry", TypeAttributes::PUBLIC),
        };
        builder.define_method(
            index,
            MethodDef::new(
                name,
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodSig::static_method(TypeSig::VOID, Vec::new()),
                Some(body),
            ),
        );
    }

    #[test]
    fn collects_every_incompatibility() {
        let mut builder = ModuleBuilder::new("ExampleMod.dll");
        let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        let location = builder.type_ref(game, "StardewValley", "GameLocation");
        let farmer = builder.type_ref(game, "StardewValley", "Farmer");
        let transfer = builder.method_ref(
            TypeSig::Class(location),
            "transferDataFromSavedLocation",
            MethodSig::instance(TypeSig::VOID, vec![TypeSig::Class(location)]),
        );
        let quest = builder.method_ref(
            TypeSig::Class(farmer),
            "addQuest",
            MethodSig::instance(TypeSig::VOID, vec![TypeSig::INT32]),
        );

        for (name, method) in [("Load", transfer), ("Quest", quest)] {
            let mut body = MethodBody::new();
            body.push(OpCode::Ldnull, Operand::None);
            body.push(OpCode::Ldnull, Operand::None);
            body.push(OpCode::Callvirt, Operand::Method(method));
            body.push(OpCode::Ret, Operand::None);
            entry(&mut builder, name, body);
        }
        let mut module = builder.build();
        let before = module.clone();

        let rules = RuleSet::stardew_valley()
            .with(RewriteRule::removed_method("StardewValley.Farmer", "addQuest"));
        let rewriter = rewriter(rules);
        let mut session = RewriteSession::new("ExampleMod.dll");
        match rewriter.rewrite(&mut module, &mut session) {
            Err(Error::Incompatible(rejection)) => {
                assert_eq!(
                    rejection.noun_phrases(),
                    vec![
                        "GameLocation.transferDataFromSavedLocation method",
                        "Farmer.addQuest method"
                    ]
                );
                assert_eq!(rejection.reasons[1].location, "ExampleMod.ModEntry.Quest");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(module, before);
        assert_eq!(rewriter.scope_passes(), 0);
    }

    #[test]
    fn rewrites_only_matching_methods() {
        let mut builder = ModuleBuilder::new("ExampleMod.dll");
        let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
        let game1 = builder.type_ref(game, "StardewValley", "Game1");
        let farmer = builder.type_ref(game, "StardewValley", "Farmer");
        let player =
            builder.field_ref(TypeSig::Class(game1), "player", TypeSig::Class(farmer));

        let mut body = MethodBody::new();
        body.push(OpCode::Ldsfld, Operand::Field(player));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        entry(&mut builder, "Entry", body);

        let mut untouched = MethodBody::new();
        untouched.push(OpCode::LdcI4S, Operand::Int32(12));
        untouched.push(OpCode::Pop, Operand::None);
        untouched.push(OpCode::Ret, Operand::None);
        entry(&mut builder, "Other", untouched.clone());
        let mut module = builder.build();

        let rewriter = rewriter(RuleSet::stardew_valley());
        let mut session = RewriteSession::new("ExampleMod.dll");
        assert!(rewriter.rewrite(&mut module, &mut session).unwrap());
        assert_eq!(rewriter.scope_passes(), 1);
        assert!(module.field_refs.is_empty());

        let methods = &module.type_defs[0].methods;
        assert_eq!(methods[0].name, "Entry");
        let call = &methods[0].body.as_ref().unwrap().instructions[0];
        assert_eq!(call.opcode, OpCode::Call);
        assert_eq!(
            module.method_ref(call.method().unwrap()).unwrap().name,
            "get_player"
        );
        assert_eq!(methods[1].body.as_ref(), Some(&untouched));
        assert!(matches!(
            session.events(),
            [RewriteEvent::RuleApplied { noun_phrase, .. }] if noun_phrase == "Game1.player field"
        ));

        let mut again = RewriteSession::new("ExampleMod.dll");
        assert!(!rewriter.rewrite(&mut module, &mut again).unwrap());
    }

    #[test]
    fn multi_module_assemblies_are_rejected() {
        let mut module = Module::new("Multi.dll");
        module.module_count = 2;
        let rewriter = rewriter(RuleSet::new());
        let mut session = RewriteSession::new("Multi.dll");
        assert!(matches!(
            rewriter.rewrite(&mut module, &mut session),
            Err(Error::MultipleModules(2))
        ));
    }

    #[test]
    fn removed_types_in_type_definitions_are_rejected() {
        let mut builder = ModuleBuilder::new("ExampleMod.dll");
        let smapi = builder.assembly_ref("StardewModdingAPI", AssemblyVersion::new(2, 0, 0, 0));
        let content = builder.type_ref(smapi, "StardewModdingAPI.Events", "ContentEvents");
        let handler = builder.define_type("ExampleMod", "Handler", TypeAttributes::PUBLIC);
        builder.type_def_mut(handler).unwrap().base_type = Some(TypeSig::Class(content));
        builder.define_field(
            handler,
            "events",
            FieldAttributes::PRIVATE,
            TypeSig::Class(content),
        );
        let mut module = builder.build();
        let before = module.clone();

        let removed = RewriteRule::removed_type("StardewModdingAPI.Events.ContentEvents");
        let rules = RuleSet::new().with(removed);
        let rewriter = rewriter(rules);
        let mut session = RewriteSession::new("ExampleMod.dll");
        match rewriter.rewrite(&mut module, &mut session) {
            Err(Error::Incompatible(rejection)) => {
                assert_eq!(
                    rejection.noun_phrases(),
                    vec!["StardewModdingAPI.Events.ContentEvents type"]
                );
                assert_eq!(rejection.reasons[0].location, "ExampleMod.Handler");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(module, before);
    }

    #[test]
    fn replaced_types_are_fixed_in_fields_and_bodies() {
        let mut builder = ModuleBuilder::new("ExampleMod.dll");
        let xna =
            builder.assembly_ref("Microsoft.Xna.Framework", AssemblyVersion::new(4, 0, 0, 0));
        let rectangle = builder.type_ref(xna, "Microsoft.Xna.Framework", "Rectangle");
        let shape = builder.define_type("ExampleMod", "Shape", TypeAttributes::PUBLIC);
        builder.define_field(
            shape,
            "bounds",
            FieldAttributes::PRIVATE,
            TypeSig::ValueType(rectangle),
        );
        let mut body = MethodBody::new();
        body.locals.push(TypeSig::ValueType(rectangle));
        body.push(OpCode::Ret, Operand::None);
        entry(&mut builder, "Entry", body);
        let mut module = builder.build();

        let rules = RuleSet::new().with(RewriteRule::replace_type(
            "Microsoft.Xna.Framework.Rectangle",
            TypeTarget::new("StardewValley", "Rect", "StardewValley"),
        ));
        let rewriter = rewriter(rules);
        let mut session = RewriteSession::new("ExampleMod.dll");
        assert!(rewriter.rewrite(&mut module, &mut session).unwrap());

        let field = &module.type_defs[shape].fields[0];
        assert_eq!(field.field_type.full_name(&module), "StardewValley.Rect");
        let entry = module
            .type_defs
            .iter()
            .find(|type_def| type_def.name == "ModEntry")
            .unwrap();
        let local = &entry.methods[0].body.as_ref().unwrap().locals[0];
        assert_eq!(local.full_name(&module), "StardewValley.Rect");

        let locations: Vec<&str> = session
            .events()
            .iter()
            .filter_map(|event| match event {
                RewriteEvent::RuleApplied { location, .. } => Some(location.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(locations, vec!["ExampleMod.Shape", "ExampleMod.ModEntry.Entry"]);
    }
}
