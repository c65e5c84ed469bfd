//! In-memory model of a decoded mod module.
//!
//! A [`Module`] is the working copy every stage of the pipeline operates on: the scope rewriter
//! edits its assembly and type reference tables, the instruction rewriter edits its method
//! bodies, and the result is encoded back into an image for the cache and the host runtime.
//!
//! References are stored in flat tables and addressed by handle ([`AssemblyRefId`],
//! [`TypeRefId`], [`FieldRefId`], [`MethodRefId`]). Handles stay valid for the lifetime of the
//! module; the only operation that renumbers a table is
//! [`Module::replace_assembly_refs`], which remaps every scope that pointed into it.
//!
//! # Example
//!
//! ```rust
//! use modshim::prelude::*;
//!
//! let mut builder = ModuleBuilder::new("ExampleMod");
//! let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
//! let game1 = builder.type_ref(game, "StardewValley", "Game1");
//! let module = builder.build();
//!
//! assert_eq!(module.type_full_name(game1), "StardewValley.Game1");
//! assert!(module.references_assembly("StardewValley"));
//! ```

pub mod assembly;
pub mod attributes;
pub mod builder;
pub mod instruction;
pub mod method;
pub mod opcodes;
pub mod references;
pub mod signature;
pub mod token;
pub mod types;

pub(crate) mod image;

use std::path::Path;

use uguid::Guid;

pub use assembly::{AssemblyDef, DebugHeader};

use crate::{
    file::File,
    module::{
        assembly::{ExportedType, ImageOptions, Resource, Win32Resources},
        attributes::CustomAttribute,
        instruction::{Instruction, Operand},
        method::MethodDef,
        references::{
            AssemblyRef, AssemblyRefId, FieldRef, FieldRefId, MethodRef, MethodRefId,
            ResolutionScope, TypeRef, TypeRefId,
        },
        token::Token,
        types::TypeDef,
    },
    Result,
};

/// Deepest nesting accepted when decoding signatures and resolving nested type names.
pub const MAX_SIGNATURE_DEPTH: usize = 64;

/// Runtime version string of images targeting the .NET Framework 4 runtime.
pub const RUNTIME_VERSION_V4: &str = "v4.0.30319";

/// A decoded module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Module file name, e.g. `ExampleMod.dll`
    pub name: String,
    /// Module version id
    pub mvid: Guid,
    /// Assembly identity
    pub assembly: Option<AssemblyDef>,
    /// Number of modules declared by the assembly
    pub module_count: u32,
    /// Referenced assemblies
    pub assembly_refs: Vec<AssemblyRef>,
    /// Referenced types
    pub type_refs: Vec<TypeRef>,
    /// Referenced fields
    pub field_refs: Vec<FieldRef>,
    /// Referenced methods
    pub method_refs: Vec<MethodRef>,
    /// Defined types
    pub type_defs: Vec<TypeDef>,
    /// Debug directory entry, if the module was built with symbols
    pub debug: Option<DebugHeader>,
    /// Runtime version string of the metadata root
    pub runtime_version: String,
    /// PE headers
    pub image: ImageOptions,
    /// `MethodDef` token of the entry point of executables
    pub entry_point: Option<Token>,
    /// Names of referenced native modules (P/Invoke targets)
    pub module_refs: Vec<String>,
    /// Module-level attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Embedded managed resources
    pub resources: Vec<Resource>,
    /// Types forwarded to other assemblies
    pub exported_types: Vec<ExportedType>,
    /// Win32 resource section (version info, icons)
    pub win32_resources: Option<Win32Resources>,
}

impl Module {
    /// An empty single-module assembly.
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            mvid: Guid::ZERO,
            assembly: None,
            module_count: 1,
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            field_refs: Vec::new(),
            method_refs: Vec::new(),
            type_defs: Vec::new(),
            debug: None,
            runtime_version: RUNTIME_VERSION_V4.to_string(),
            image: ImageOptions::default(),
            entry_point: None,
            module_refs: Vec::new(),
            custom_attributes: Vec::new(),
            resources: Vec::new(),
            exported_types: Vec::new(),
            win32_resources: None,
        }
    }

    /// Decode a PE/CLI module image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged input,
    /// [`crate::Error::NotSupported`] for constructs this crate does not handle and
    /// [`crate::Error::Empty`] for empty input.
    pub fn from_bytes(data: &[u8]) -> Result<Module> {
        if data.is_empty() {
            return Err(crate::Error::Empty);
        }
        image::reader::read_module(data)
    }

    /// Memory-map and decode a module file.
    ///
    /// # Errors
    /// See [`Module::from_bytes`]; additionally [`crate::Error::FileError`] if the file cannot
    /// be read.
    pub fn from_file(path: &Path) -> Result<Module> {
        let file = File::from_file(path)?;
        Self::from_bytes(file.data())
    }

    /// Encode the module into a PE/CLI image. Encoding is deterministic.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a method body cannot be encoded, e.g. a short
    /// branch whose target is out of range or an operand that does not fit its opcode, and
    /// [`crate::Error::MultipleModules`] for multi-module assemblies.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        image::writer::write_module(self)
    }

    /// Look up an assembly reference.
    #[must_use]
    pub fn assembly_ref(&self, id: AssemblyRefId) -> Option<&AssemblyRef> {
        self.assembly_refs.get(id.index())
    }

    /// Look up a type reference.
    #[must_use]
    pub fn type_ref(&self, id: TypeRefId) -> Option<&TypeRef> {
        self.type_refs.get(id.index())
    }

    /// Look up a field reference.
    #[must_use]
    pub fn field_ref(&self, id: FieldRefId) -> Option<&FieldRef> {
        self.field_refs.get(id.index())
    }

    /// Look up a method reference.
    #[must_use]
    pub fn method_ref(&self, id: MethodRefId) -> Option<&MethodRef> {
        self.method_refs.get(id.index())
    }

    /// Full name of a referenced type: `Namespace.Name`, or `Outer/Inner` for nested types.
    ///
    /// Invalid handles and nesting cycles render as an empty string.
    #[must_use]
    pub fn type_full_name(&self, id: TypeRefId) -> String {
        let mut chain = Vec::new();
        let mut current = id;
        loop {
            let Some(type_ref) = self.type_ref(current) else {
                return String::new();
            };
            chain.push(type_ref);
            match type_ref.scope {
                ResolutionScope::Nested(outer) if chain.len() <= MAX_SIGNATURE_DEPTH => {
                    current = outer;
                }
                ResolutionScope::Nested(_) => return String::new(),
                _ => break,
            }
        }

        let mut name = String::new();
        for (depth, type_ref) in chain.iter().rev().enumerate() {
            if depth == 0 {
                if !type_ref.namespace.is_empty() {
                    name.push_str(&type_ref.namespace);
                    name.push('.');
                }
            } else {
                name.push('/');
            }
            name.push_str(&type_ref.name);
        }
        name
    }

    /// The assembly a type reference ultimately resolves against, following nesting.
    #[must_use]
    pub fn type_assembly(&self, id: TypeRefId) -> Option<AssemblyRefId> {
        let mut current = id;
        for _ in 0..=MAX_SIGNATURE_DEPTH {
            match self.type_ref(current)?.scope {
                ResolutionScope::Assembly(assembly) => return Some(assembly),
                ResolutionScope::Nested(outer) => current = outer,
                ResolutionScope::Module => return None,
            }
        }
        None
    }

    /// Find an assembly reference by short name.
    #[must_use]
    pub fn find_assembly_ref(&self, name: &str) -> Option<AssemblyRefId> {
        self.assembly_refs
            .iter()
            .position(|reference| reference.name == name)
            .map(AssemblyRefId::new)
    }

    /// `true` if the module references an assembly with the given short name.
    #[must_use]
    pub fn references_assembly(&self, name: &str) -> bool {
        self.find_assembly_ref(name).is_some()
    }

    /// Add an assembly reference, reusing an existing reference with the same short name.
    pub fn add_assembly_ref(&mut self, reference: AssemblyRef) -> AssemblyRefId {
        if let Some(existing) = self.find_assembly_ref(&reference.name) {
            return existing;
        }
        self.assembly_refs.push(reference);
        AssemblyRefId::new(self.assembly_refs.len() - 1)
    }

    /// Replace the assembly reference table.
    ///
    /// `mapping[old]` gives the new id of every old row, or `None` for rows that were dropped.
    /// Scopes pointing at dropped rows are left untouched and must be reassigned by the caller;
    /// [`Module::dangling_scopes`] reports any that remain.
    pub fn replace_assembly_refs(
        &mut self,
        refs: Vec<AssemblyRef>,
        mapping: &[Option<AssemblyRefId>],
    ) -> Vec<TypeRefId> {
        let mut orphaned = Vec::new();
        for (index, type_ref) in self.type_refs.iter_mut().enumerate() {
            if let ResolutionScope::Assembly(old) = type_ref.scope {
                match mapping.get(old.index()).copied().flatten() {
                    Some(new) => type_ref.scope = ResolutionScope::Assembly(new),
                    None => orphaned.push(TypeRefId::new(index)),
                }
            }
        }
        self.assembly_refs = refs;
        orphaned
    }

    /// Import a type reference, reusing an identical existing row.
    pub fn import_type(&mut self, type_ref: TypeRef) -> TypeRefId {
        if let Some(index) = self.type_refs.iter().position(|existing| *existing == type_ref) {
            return TypeRefId::new(index);
        }
        self.type_refs.push(type_ref);
        TypeRefId::new(self.type_refs.len() - 1)
    }

    /// Import a field reference, reusing an identical existing row.
    pub fn import_field_ref(&mut self, field: FieldRef) -> FieldRefId {
        if let Some(index) = self.field_refs.iter().position(|existing| *existing == field) {
            return FieldRefId::new(index);
        }
        self.field_refs.push(field);
        FieldRefId::new(self.field_refs.len() - 1)
    }

    /// Import a method reference, reusing an identical existing row.
    pub fn import_method_ref(&mut self, method: MethodRef) -> MethodRefId {
        if let Some(index) = self
            .method_refs
            .iter()
            .position(|existing| *existing == method)
        {
            return MethodRefId::new(index);
        }
        self.method_refs.push(method);
        MethodRefId::new(self.method_refs.len() - 1)
    }

    /// Drop field and method references no instruction uses any more, renumbering the rest.
    ///
    /// Returns the number of rows removed.
    pub fn remove_unused_member_refs(&mut self) -> usize {
        let mut fields_used = vec![false; self.field_refs.len()];
        let mut methods_used = vec![false; self.method_refs.len()];
        for instr in self.instructions() {
            match instr.operand {
                Operand::Field(id) => {
                    if let Some(used) = fields_used.get_mut(id.index()) {
                        *used = true;
                    }
                }
                Operand::Method(id) => {
                    if let Some(used) = methods_used.get_mut(id.index()) {
                        *used = true;
                    }
                }
                _ => {}
            }
        }
        self.for_each_metadata_method_mut(&mut |id| {
            if let Some(used) = methods_used.get_mut(id.index()) {
                *used = true;
            }
        });

        let field_map = compact(&mut self.field_refs, &fields_used);
        let method_map = compact(&mut self.method_refs, &methods_used);
        let removed = fields_used.iter().chain(&methods_used).filter(|used| !**used).count();
        if removed == 0 {
            return 0;
        }

        for type_def in &mut self.type_defs {
            for method in &mut type_def.methods {
                let Some(body) = method.body.as_mut() else {
                    continue;
                };
                for instr in &mut body.instructions {
                    match &mut instr.operand {
                        Operand::Field(id) => {
                            if let Some(Some(new)) = field_map.get(id.index()) {
                                *id = FieldRefId::new(*new);
                            }
                        }
                        Operand::Method(id) => {
                            if let Some(Some(new)) = method_map.get(id.index()) {
                                *id = MethodRefId::new(*new);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        self.for_each_metadata_method_mut(&mut |id| {
            if let Some(Some(new)) = method_map.get(id.index()) {
                *id = MethodRefId::new(*new);
            }
        });
        removed
    }

    /// Visit every method handle held by metadata rather than by instructions: attribute
    /// constructors and explicit interface implementations.
    fn for_each_metadata_method_mut(&mut self, f: &mut dyn FnMut(&mut MethodRefId)) {
        constructors(&mut self.custom_attributes, f);
        if let Some(assembly) = self.assembly.as_mut() {
            constructors(&mut assembly.custom_attributes, f);
        }
        for type_def in &mut self.type_defs {
            constructors(&mut type_def.custom_attributes, f);
            for param in &mut type_def.generic_params {
                constructors(&mut param.custom_attributes, f);
            }
            for interface in &mut type_def.interfaces {
                constructors(&mut interface.custom_attributes, f);
            }
            for field in &mut type_def.fields {
                constructors(&mut field.custom_attributes, f);
            }
            for property in &mut type_def.properties {
                constructors(&mut property.custom_attributes, f);
            }
            for event in &mut type_def.events {
                constructors(&mut event.custom_attributes, f);
            }
            for method in &mut type_def.methods {
                constructors(&mut method.custom_attributes, f);
                for param in &mut method.generic_params {
                    constructors(&mut param.custom_attributes, f);
                }
                for param in &mut method.params {
                    constructors(&mut param.custom_attributes, f);
                }
            }
            for method_impl in &mut type_def.method_impls {
                f(&mut method_impl.body);
                f(&mut method_impl.declaration);
            }
        }
    }

    /// Every instruction of every method body.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.type_defs
            .iter()
            .flat_map(|type_def| type_def.methods.iter())
            .filter_map(|method| method.body.as_ref())
            .flat_map(|body| body.instructions.iter())
    }

    /// Every type reference whose scope points outside its table.
    ///
    /// Always empty for a correctly rewritten module.
    #[must_use]
    pub fn dangling_scopes(&self) -> Vec<TypeRefId> {
        self.type_refs
            .iter()
            .enumerate()
            .filter(|(_, type_ref)| match type_ref.scope {
                ResolutionScope::Module => false,
                ResolutionScope::Assembly(id) => id.index() >= self.assembly_refs.len(),
                ResolutionScope::Nested(id) => id.index() >= self.type_refs.len(),
            })
            .map(|(index, _)| TypeRefId::new(index))
            .collect()
    }

    /// Full name of a defined type, `Namespace.Name` or `Outer/Inner`.
    #[must_use]
    pub fn type_def_full_name(&self, index: usize) -> String {
        let mut chain = Vec::new();
        let mut current = Some(index);
        while let Some(index) = current {
            let Some(type_def) = self.type_defs.get(index) else {
                break;
            };
            if chain.len() > MAX_SIGNATURE_DEPTH {
                return String::new();
            }
            chain.push(type_def);
            current = type_def.enclosing;
        }

        let mut name = String::new();
        for (depth, type_def) in chain.iter().rev().enumerate() {
            if depth == 0 {
                if !type_def.namespace.is_empty() {
                    name.push_str(&type_def.namespace);
                    name.push('.');
                }
            } else {
                name.push('/');
            }
            name.push_str(&type_def.name);
        }
        name
    }

    /// `true` if a defined type is visible to other assemblies: it and all enclosing types are
    /// public and none of them is compiler generated.
    #[must_use]
    pub fn is_type_exported(&self, index: usize) -> bool {
        let mut current = Some(index);
        let mut depth = 0;
        while let Some(index) = current {
            let Some(type_def) = self.type_defs.get(index) else {
                return false;
            };
            if !type_def.is_public()
                || type_def.is_compiler_generated(self)
                || depth > MAX_SIGNATURE_DEPTH
            {
                return false;
            }
            depth += 1;
            current = type_def.enclosing;
        }
        true
    }

    /// All method definitions with their `MethodDef` tokens, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = (Token, &TypeDef, &MethodDef)> {
        self.type_defs
            .iter()
            .flat_map(|type_def| type_def.methods.iter().map(move |method| (type_def, method)))
            .enumerate()
            .map(|(index, (type_def, method))| {
                (
                    Token::from_parts(Token::METHOD_DEF, index as u32 + 1),
                    type_def,
                    method,
                )
            })
    }

    /// Token of the method at `(type index, method index)`.
    #[must_use]
    pub fn method_token(&self, type_index: usize, method_index: usize) -> Token {
        let before: usize = self
            .type_defs
            .iter()
            .take(type_index)
            .map(|type_def| type_def.methods.len())
            .sum();
        Token::from_parts(Token::METHOD_DEF, (before + method_index + 1) as u32)
    }
}

fn constructors(attributes: &mut [CustomAttribute], f: &mut dyn FnMut(&mut MethodRefId)) {
    for attribute in attributes {
        f(&mut attribute.constructor);
    }
}

/// Keep the rows flagged in `used`, returning each old row's new position.
fn compact<T>(rows: &mut Vec<T>, used: &[bool]) -> Vec<Option<usize>> {
    let mut mapping = Vec::with_capacity(rows.len());
    let mut next = 0;
    for keep in used {
        if *keep {
            mapping.push(Some(next));
            next += 1;
        } else {
            mapping.push(None);
        }
    }

    let mut index = 0;
    rows.retain(|_| {
        let keep = used.get(index).copied().unwrap_or(false);
        index += 1;
        keep
    });
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{
        method::MethodBody, opcodes::OpCode, references::AssemblyVersion, signature::TypeSig,
        types::TypeAttributes,
    };

    fn game_ref() -> AssemblyRef {
        AssemblyRef::new("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0))
    }

    #[test]
    fn nested_full_name() {
        let mut module = Module::new("Test.dll");
        let game = module.add_assembly_ref(game_ref());
        let outer = module.import_type(TypeRef::new(
            "StardewValley",
            "Farmer",
            ResolutionScope::Assembly(game),
        ));
        let inner = module.import_type(TypeRef::new("", "Skills", ResolutionScope::Nested(outer)));

        assert_eq!(module.type_full_name(inner), "StardewValley.Farmer/Skills");
        assert_eq!(module.type_assembly(inner), Some(game));
        assert_eq!(module.type_full_name(TypeRefId::new(42)), "");
    }

    #[test]
    fn imports_deduplicate() {
        let mut module = Module::new("Test.dll");
        let first = module.add_assembly_ref(game_ref());
        let second = module.add_assembly_ref(game_ref());
        assert_eq!(first, second);

        let type_ref = TypeRef::new("StardewValley", "Game1", ResolutionScope::Assembly(first));
        let a = module.import_type(type_ref.clone());
        let b = module.import_type(type_ref);
        assert_eq!(a, b);
        assert_eq!(module.type_refs.len(), 1);

        let field = FieldRef::new(TypeSig::Class(a), "player", TypeSig::OBJECT);
        assert_eq!(
            module.import_field_ref(field.clone()),
            module.import_field_ref(field)
        );
    }

    #[test]
    fn replace_assembly_refs_reports_orphans() {
        let mut module = Module::new("Test.dll");
        let corlib = module.add_assembly_ref(AssemblyRef::new(
            "mscorlib",
            AssemblyVersion::new(4, 0, 0, 0),
        ));
        let game = module.add_assembly_ref(game_ref());
        let object = module.import_type(TypeRef::new(
            "System",
            "Object",
            ResolutionScope::Assembly(corlib),
        ));
        let game1 = module.import_type(TypeRef::new(
            "StardewValley",
            "Game1",
            ResolutionScope::Assembly(game),
        ));

        let refs = vec![module.assembly_refs[corlib.index()].clone()];
        let orphaned = module.replace_assembly_refs(refs, &[Some(AssemblyRefId::new(0)), None]);
        assert_eq!(orphaned, vec![game1]);
        assert_eq!(module.dangling_scopes(), vec![game1]);
        assert_eq!(module.type_assembly(object), Some(AssemblyRefId::new(0)));
    }

    #[test]
    fn method_tokens_are_sequential() {
        let mut module = Module::new("Test.dll");
        for name in ["A", "B"] {
            let mut type_def = TypeDef::new("Mod", name, TypeAttributes::PUBLIC);
            for method in ["First", "Second"] {
                type_def.methods.push(MethodDef::new(
                    method,
                    method::MethodAttributes::PUBLIC | method::MethodAttributes::STATIC,
                    signature::MethodSig::static_method(TypeSig::VOID, Vec::new()),
                    None,
                ));
            }
            module.type_defs.push(type_def);
        }

        let tokens: Vec<u32> = module.methods().map(|(token, _, _)| token.value()).collect();
        assert_eq!(tokens, vec![0x0600_0001, 0x0600_0002, 0x0600_0003, 0x0600_0004]);
        assert_eq!(module.method_token(1, 1).value(), 0x0600_0004);
    }

    #[test]
    fn unused_member_refs_are_dropped() {
        let mut module = Module::new("Test.dll");
        let game = module.add_assembly_ref(game_ref());
        let game1 = module.import_type(TypeRef::new(
            "StardewValley",
            "Game1",
            ResolutionScope::Assembly(game),
        ));
        let stale = module.import_field_ref(FieldRef::new(
            TypeSig::Class(game1),
            "player",
            TypeSig::OBJECT,
        ));
        let live = module.import_field_ref(FieldRef::new(
            TypeSig::Class(game1),
            "ticks",
            TypeSig::INT32,
        ));
        assert_eq!(stale.index(), 0);

        let mut body = MethodBody::new();
        body.push(OpCode::Ldsfld, Operand::Field(live));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        let mut type_def = TypeDef::new("Mod", "Entry", TypeAttributes::PUBLIC);
        type_def.methods.push(MethodDef::new(
            "Run",
            method::MethodAttributes::STATIC,
            signature::MethodSig::static_method(TypeSig::VOID, Vec::new()),
            Some(body),
        ));
        module.type_defs.push(type_def);

        assert_eq!(module.remove_unused_member_refs(), 1);
        assert_eq!(module.field_refs.len(), 1);
        assert_eq!(module.field_refs[0].name, "ticks");
        assert_eq!(
            module.instructions().next().unwrap().field(),
            Some(FieldRefId::new(0))
        );
        assert_eq!(module.remove_unused_member_refs(), 0);
    }

    #[test]
    fn attribute_and_override_refs_survive_cleanup() {
        let mut module = Module::new("Test.dll");
        let corlib = module.add_assembly_ref(AssemblyRef::new(
            "mscorlib",
            AssemblyVersion::new(4, 0, 0, 0),
        ));
        let object = module.import_type(TypeRef::new(
            "System",
            "Object",
            ResolutionScope::Assembly(corlib),
        ));
        let unused = module.import_method_ref(MethodRef::new(
            TypeSig::Class(object),
            "GetHashCode",
            signature::MethodSig::instance(TypeSig::INT32, Vec::new()),
        ));
        let attribute = module.import_type(TypeRef::new(
            "System",
            "SerializableAttribute",
            ResolutionScope::Assembly(corlib),
        ));
        let ctor = module.import_method_ref(MethodRef::new(
            TypeSig::Class(attribute),
            ".ctor",
            signature::MethodSig::instance(TypeSig::VOID, Vec::new()),
        ));
        let to_string = module.import_method_ref(MethodRef::new(
            TypeSig::Class(object),
            "ToString",
            signature::MethodSig::instance(TypeSig::STRING, Vec::new()),
        ));
        let local = module.import_type(TypeRef::new("Mod", "Entry", ResolutionScope::Module));
        let own = module.import_method_ref(MethodRef::new(
            TypeSig::Class(local),
            "ToString",
            signature::MethodSig::instance(TypeSig::STRING, Vec::new()),
        ));
        assert_eq!(unused.index(), 0);

        let mut type_def = TypeDef::new("Mod", "Entry", TypeAttributes::PUBLIC);
        type_def
            .custom_attributes
            .push(CustomAttribute::without_arguments(ctor));
        type_def.method_impls.push(types::MethodImpl {
            body: own,
            declaration: to_string,
        });
        module.assembly = Some(AssemblyDef::new("Test", AssemblyVersion::new(1, 0, 0, 0)));
        module.type_defs.push(type_def);

        assert_eq!(module.remove_unused_member_refs(), 1);
        assert_eq!(module.method_refs.len(), 3);
        let type_def = &module.type_defs[0];
        assert_eq!(type_def.custom_attributes[0].constructor, MethodRefId::new(0));
        assert_eq!(type_def.method_impls[0].declaration, MethodRefId::new(1));
        assert_eq!(type_def.method_impls[0].body, MethodRefId::new(2));
        assert_eq!(
            module.method_refs[0].name,
            ".ctor",
            "attribute constructors are kept"
        );
    }

    #[test]
    fn exported_types() {
        let mut module = Module::new("Game.dll");
        module.type_defs.push(TypeDef::new("StardewValley", "Game1", TypeAttributes::PUBLIC));
        let mut nested = TypeDef::new("", "<>c", TypeAttributes::NESTED_PRIVATE);
        nested.enclosing = Some(0);
        module.type_defs.push(nested);
        let mut inner = TypeDef::new("", "Options", TypeAttributes::NESTED_PUBLIC);
        inner.enclosing = Some(0);
        module.type_defs.push(inner);

        assert!(module.is_type_exported(0));
        assert!(!module.is_type_exported(1));
        assert!(module.is_type_exported(2));
        assert_eq!(module.type_def_full_name(2), "StardewValley.Game1/Options");
    }
}
