//! Fluent construction of [`Module`]s.
//!
//! Hosts use the builder to generate facade assemblies and target-assembly stubs; the test
//! suite uses it to build mods exercising each rewrite rule.
//!
//! # Example
//!
//! ```rust
//! use modshim::prelude::*;
//!
//! let mut builder = ModuleBuilder::new("ExampleMod.dll");
//! let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
//! let game1 = builder.type_ref(game, "StardewValley", "Game1");
//! let farmer = builder.type_ref(game, "StardewValley", "Farmer");
//! let player = builder.field_ref(TypeSig::Class(game1), "player", TypeSig::Class(farmer));
//!
//! let mut body = MethodBody::new();
//! body.push(OpCode::Ldsfld, Operand::Field(player));
//! body.push(OpCode::Pop, Operand::None);
//! body.push(OpCode::Ret, Operand::None);
//!
//! let entry = builder.define_type("ExampleMod", "ModEntry", TypeAttributes::PUBLIC);
//! builder.define_method(
//!     entry,
//!     MethodDef::new(
//!         "Entry",
//!         MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!         MethodSig::static_method(TypeSig::VOID, Vec::new()),
//!         Some(body),
//!     ),
//! );
//!
//! let bytes = builder.build().to_bytes()?;
//! assert_eq!(Module::from_bytes(&bytes)?.to_bytes()?, bytes);
//! # Ok::<(), modshim::Error>(())
//! ```

use uguid::Guid;

use crate::module::{
    method::MethodDef,
    references::{
        AssemblyRef, AssemblyRefId, AssemblyVersion, FieldRef, FieldRefId, MethodRef,
        MethodRefId, ResolutionScope, TypeRef, TypeRefId,
    },
    signature::{MethodSig, TypeSig},
    token::Token,
    types::{FieldAttributes, FieldDef, TypeAttributes, TypeDef},
    AssemblyDef, DebugHeader, Module,
};

/// Builder for [`Module`].
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Start an empty single-module assembly with the given module file name.
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            module: Module::new(name),
        }
    }

    /// Set the assembly identity.
    pub fn assembly(&mut self, name: impl Into<String>, version: AssemblyVersion) -> &mut Self {
        self.module.assembly = Some(AssemblyDef::new(name, version));
        self
    }

    /// Set the module version id.
    pub fn mvid(&mut self, mvid: Guid) -> &mut Self {
        self.module.mvid = mvid;
        self
    }

    /// Attach a debug header linking the module to its symbols.
    pub fn debug(&mut self, guid: Guid, age: u32) -> &mut Self {
        self.module.debug = Some(DebugHeader::new(guid, age));
        self
    }

    /// Reference an assembly.
    pub fn assembly_ref(
        &mut self,
        name: impl Into<String>,
        version: AssemblyVersion,
    ) -> AssemblyRefId {
        self.module.add_assembly_ref(AssemblyRef::new(name, version))
    }

    /// Reference a top-level type in an assembly.
    pub fn type_ref(
        &mut self,
        assembly: AssemblyRefId,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> TypeRefId {
        self.module.import_type(TypeRef::new(
            namespace,
            name,
            ResolutionScope::Assembly(assembly),
        ))
    }

    /// Reference a type nested in another referenced type.
    pub fn nested_type_ref(&mut self, outer: TypeRefId, name: impl Into<String>) -> TypeRefId {
        self.module
            .import_type(TypeRef::new("", name, ResolutionScope::Nested(outer)))
    }

    /// Reference a field.
    pub fn field_ref(
        &mut self,
        declaring: TypeSig,
        name: impl Into<String>,
        field_type: TypeSig,
    ) -> FieldRefId {
        self.module
            .import_field_ref(FieldRef::new(declaring, name, field_type))
    }

    /// Reference a method.
    pub fn method_ref(
        &mut self,
        declaring: TypeSig,
        name: impl Into<String>,
        sig: MethodSig,
    ) -> MethodRefId {
        self.module
            .import_method_ref(MethodRef::new(declaring, name, sig))
    }

    /// Define a top-level type, returning its index.
    pub fn define_type(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        flags: TypeAttributes,
    ) -> usize {
        self.module
            .type_defs
            .push(TypeDef::new(namespace, name, flags));
        self.module.type_defs.len() - 1
    }

    /// Define a type nested inside `enclosing`, returning its index.
    pub fn define_nested_type(
        &mut self,
        enclosing: usize,
        name: impl Into<String>,
        flags: TypeAttributes,
    ) -> usize {
        let mut type_def = TypeDef::new("", name, flags);
        type_def.enclosing = Some(enclosing);
        self.module.type_defs.push(type_def);
        self.module.type_defs.len() - 1
    }

    /// Mutable access to a defined type, for base types, attributes and generic parameters.
    pub fn type_def_mut(&mut self, index: usize) -> Option<&mut TypeDef> {
        self.module.type_defs.get_mut(index)
    }

    /// Add a field to a defined type. Unknown type indices are ignored.
    pub fn define_field(
        &mut self,
        type_index: usize,
        name: impl Into<String>,
        flags: FieldAttributes,
        field_type: TypeSig,
    ) -> &mut Self {
        if let Some(type_def) = self.module.type_defs.get_mut(type_index) {
            type_def.fields.push(FieldDef::new(name, flags, field_type));
        }
        self
    }

    /// Add a method to a defined type and return its `MethodDef` token.
    ///
    /// Tokens are assigned in declaration order across all types, so adding methods to an
    /// earlier type renumbers the methods of later types.
    pub fn define_method(&mut self, type_index: usize, method: MethodDef) -> Option<Token> {
        let type_def = self.module.type_defs.get_mut(type_index)?;
        type_def.methods.push(method);
        let method_index = type_def.methods.len() - 1;
        Some(self.module.method_token(type_index, method_index))
    }

    /// The module built so far.
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{
            instruction::{Instruction, Operand},
            method::{ExceptionHandler, ExceptionHandlerFlags, MethodAttributes, MethodBody},
            opcodes::OpCode,
        },
        Error,
    };

    fn sample() -> Module {
        let mut builder = ModuleBuilder::new("Sample.dll");
        builder
            .assembly("Sample", AssemblyVersion::new(1, 0, 0, 0))
            .mvid(Guid::from_bytes([7; 16]))
            .debug(Guid::from_bytes([9; 16]), 3);
        let corlib = builder.assembly_ref("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
        let exception = builder.type_ref(corlib, "System", "Exception");
        let console = builder.type_ref(corlib, "System", "Console");
        let write_line = builder.method_ref(
            TypeSig::Class(console),
            "WriteLine",
            MethodSig::static_method(TypeSig::VOID, vec![TypeSig::STRING]),
        );

        let mut body = MethodBody::new();
        let after = body.alloc_id();
        let catch = body.alloc_id();
        let try_start = body.push(OpCode::Ldstr, Operand::String("try".into()));
        body.push(OpCode::Call, Operand::Method(write_line));
        body.push(OpCode::LeaveS, Operand::Target(after));
        body.instructions
            .push(Instruction::new(catch, OpCode::Pop, Operand::None));
        body.push(OpCode::LeaveS, Operand::Target(after));
        body.instructions
            .push(Instruction::new(after, OpCode::Ret, Operand::None));
        body.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end: Some(catch),
            handler_start: catch,
            handler_end: Some(after),
            catch_type: Some(TypeSig::Class(exception)),
            filter_start: None,
        });

        let entry = builder.define_type("Sample", "Entry", TypeAttributes::PUBLIC);
        builder.define_field(entry, "count", FieldAttributes::STATIC, TypeSig::INT32);
        builder.define_method(
            entry,
            MethodDef::new(
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodSig::static_method(TypeSig::VOID, Vec::new()),
                Some(body),
            ),
        );
        builder.build()
    }

    #[test]
    fn image_is_deterministic() {
        let module = sample();
        let bytes = module.to_bytes().unwrap();
        assert_eq!(&bytes[..2], b"MZ");

        let decoded = Module::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
        assert_eq!(decoded.debug, module.debug);
        assert_eq!(decoded.assembly_refs, module.assembly_refs);

        let (_, _, method) = decoded.methods().next().unwrap();
        let body = method.body.as_ref().unwrap();
        assert_eq!(body.instructions.len(), 6);
        assert_eq!(body.handlers.len(), 1);
        assert_eq!(
            body.handlers[0].catch_type,
            Some(TypeSig::Class(TypeRefId::new(0)))
        );
        assert_eq!(body.handlers[0].handler_end, Some(body.instructions[5].id));
    }

    #[test]
    fn truncated_and_trailing_input() {
        let bytes = sample().to_bytes().unwrap();
        assert!(Module::from_bytes(&bytes[..bytes.len() / 2]).is_err());

        // overlay data after the last section is ignored
        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&[0; 16]);
        assert_eq!(
            Module::from_bytes(&trailing).unwrap(),
            Module::from_bytes(&bytes).unwrap()
        );

        assert!(matches!(Module::from_bytes(&[]), Err(Error::Empty)));
        assert!(Module::from_bytes(b"MZ\x90\x00").is_err());
    }

    #[test]
    fn tokens_follow_declaration_order() {
        let mut builder = ModuleBuilder::new("Tokens.dll");
        let first = builder.define_type("A", "First", TypeAttributes::PUBLIC);
        let sig = MethodSig::static_method(TypeSig::VOID, Vec::new());
        let token = builder
            .define_method(first, MethodDef::new("M", MethodAttributes::STATIC, sig, None))
            .unwrap();
        assert_eq!(token.value(), 0x0600_0001);
        let sig = MethodSig::static_method(TypeSig::VOID, Vec::new());
        assert!(builder
            .define_method(9, MethodDef::new("X", MethodAttributes::STATIC, sig, None))
            .is_none());
    }
}
