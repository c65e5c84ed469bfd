//! Method definitions and their bodies.

use bitflags::bitflags;

use crate::module::{
    attributes::{Constant, CustomAttribute, SecurityDecl},
    instruction::{InstrId, Instruction, Operand},
    opcodes::OpCode,
    signature::{MethodSig, TypeSig},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method definition flags (ECMA-335 II.23.1.10)
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Cannot be overridden
        const FINAL = 0x0020;
        /// Virtual method
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Abstract method, no body
        const ABSTRACT = 0x0400;
        /// Name carries special meaning (property accessors, event adders)
        const SPECIAL_NAME = 0x0800;
        /// Name carries special meaning to the runtime (constructors)
        const RT_SPECIAL_NAME = 0x1000;
        /// Requires a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// Declarative security is attached
        const HAS_SECURITY = 0x4000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method implementation flags (ECMA-335 II.23.1.11)
    pub struct MethodImplAttributes: u16 {
        /// Implemented in CIL
        const IL = 0x0000;
        /// Implemented in native code
        const NATIVE = 0x0001;
        /// Implemented by the runtime
        const RUNTIME = 0x0003;
        /// Implemented in unmanaged code
        const UNMANAGED = 0x0004;
        /// Must not be inlined
        const NO_INLINING = 0x0008;
        /// Signature is exported exactly as declared
        const PRESERVE_SIG = 0x0080;
        /// Implemented inside the runtime
        const INTERNAL_CALL = 0x1000;
        /// Single-threaded through the body
        const SYNCHRONIZED = 0x0020;
        /// Inline aggressively
        const AGGRESSIVE_INLINING = 0x0100;
    }
}

impl MethodImplAttributes {
    /// Mask selecting the code type bits.
    pub const CODE_TYPE_MASK: u16 = 0x0003;

    /// `true` if the method body, if any, is CIL.
    #[must_use]
    pub fn is_il(self) -> bool {
        self.bits() & Self::CODE_TYPE_MASK == 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Kind of an exception handling clause
    pub struct ExceptionHandlerFlags: u16 {
        /// Typed catch clause
        const EXCEPTION = 0x0000;
        /// Filter plus handler
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause
        const FAULT = 0x0004;
    }
}

/// A generic parameter of a type or method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericParam {
    /// Parameter name, e.g. `T`
    pub name: String,
    /// Variance and special constraint flags (`class`, `struct`, `new()`)
    pub flags: u16,
    /// Type constraints
    pub constraints: Vec<TypeSig>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl GenericParam {
    /// An unconstrained generic parameter.
    pub fn new(name: impl Into<String>) -> Self {
        GenericParam {
            name: name.into(),
            flags: 0,
            constraints: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }
}

/// A named parameter or return value of a [`MethodDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    /// 1-based parameter position, 0 for the return value
    pub sequence: u16,
    /// Parameter name
    pub name: String,
    /// `in`, `out`, optional and default flags
    pub flags: u16,
    /// Default value of optional parameters
    pub constant: Option<Constant>,
    /// Encoded native marshalling descriptor
    pub marshal: Option<Vec<u8>>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl ParamDef {
    /// A plain named parameter.
    pub fn new(sequence: u16, name: impl Into<String>) -> Self {
        ParamDef {
            sequence,
            name: name.into(),
            flags: 0,
            constant: None,
            marshal: None,
            custom_attributes: Vec::new(),
        }
    }
}

/// Target of a P/Invoke method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PInvoke {
    /// Calling convention and character set flags
    pub flags: u16,
    /// Entry point name
    pub name: String,
    /// Index into [`crate::Module::module_refs`]
    pub module: usize,
}

/// An exception handling clause. Bounds are instruction ids; `None` end bounds mean "end of
/// the body".
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: InstrId,
    /// First instruction after the protected region
    pub try_end: Option<InstrId>,
    /// First handler instruction
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: Option<InstrId>,
    /// Caught exception type for typed clauses
    pub catch_type: Option<TypeSig>,
    /// First filter instruction for filter clauses
    pub filter_start: Option<InstrId>,
}

/// A method body: locals, instructions and exception handling clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Instructions in execution layout order
    pub instructions: Vec<Instruction>,
    /// Exception handling clauses
    pub handlers: Vec<ExceptionHandler>,
    next_id: u32,
}

impl Default for MethodBody {
    fn default() -> Self {
        MethodBody::new()
    }
}

impl MethodBody {
    /// An empty body with the default stack size of 8.
    #[must_use]
    pub fn new() -> Self {
        MethodBody {
            max_stack: 8,
            init_locals: true,
            locals: Vec::new(),
            instructions: Vec::new(),
            handlers: Vec::new(),
            next_id: 0,
        }
    }

    /// Append an instruction and return its id.
    pub fn push(&mut self, opcode: OpCode, operand: Operand) -> InstrId {
        let id = self.alloc_id();
        self.instructions.push(Instruction::new(id, opcode, operand));
        id
    }

    /// Reserve a fresh instruction id.
    pub fn alloc_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// The id the next allocated instruction will receive.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Position of the instruction with the given id.
    #[must_use]
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|instr| instr.id == id)
    }

    /// Byte offset of every instruction, followed by the total code size.
    #[must_use]
    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0_u32;
        for instr in &self.instructions {
            offsets.push(offset);
            offset += instr.size() as u32;
        }
        offsets.push(offset);
        offsets
    }

    /// Total size of the encoded instructions.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.instructions.iter().map(Instruction::size).sum()
    }

    /// Every type referenced by the body's locals, handlers and type operands.
    pub fn type_sigs_mut(&mut self) -> impl Iterator<Item = &mut TypeSig> {
        let locals = self.locals.iter_mut();
        let handlers = self
            .handlers
            .iter_mut()
            .filter_map(|handler| handler.catch_type.as_mut());
        let operands = self.instructions.iter_mut().filter_map(|instr| match &mut instr.operand {
            Operand::Type(sig) => Some(sig),
            _ => None,
        });
        locals.chain(handlers).chain(operands)
    }

    /// Every type referenced by the body's locals, handlers and type operands.
    pub fn type_sigs(&self) -> impl Iterator<Item = &TypeSig> {
        let locals = self.locals.iter();
        let handlers = self
            .handlers
            .iter()
            .filter_map(|handler| handler.catch_type.as_ref());
        let operands = self
            .instructions
            .iter()
            .filter_map(Instruction::type_operand);
        locals.chain(handlers).chain(operands)
    }

    pub(crate) fn set_next_id(&mut self, next_id: u32) {
        self.next_id = next_id;
    }
}

/// A method defined by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Flags
    pub flags: MethodAttributes,
    /// Implementation flags
    pub impl_flags: MethodImplAttributes,
    /// Signature
    pub sig: MethodSig,
    /// Generic method parameters
    pub generic_params: Vec<GenericParam>,
    /// Named parameters, ordered by sequence
    pub params: Vec<ParamDef>,
    /// Unmanaged target of P/Invoke methods
    pub pinvoke: Option<PInvoke>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
    /// Body, `None` for abstract and extern methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Create a method; the signature's `has_this` must agree with [`MethodAttributes::STATIC`].
    pub fn new(
        name: impl Into<String>,
        flags: MethodAttributes,
        sig: MethodSig,
        body: Option<MethodBody>,
    ) -> Self {
        MethodDef {
            name: name.into(),
            flags,
            impl_flags: MethodImplAttributes::IL,
            sig,
            generic_params: Vec::new(),
            params: Vec::new(),
            pinvoke: None,
            custom_attributes: Vec::new(),
            security: Vec::new(),
            body,
        }
    }

    /// `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    /// `true` if `ret` pops a value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        !self.sig.return_type.is_void()
    }

    /// Every type the signature and the generic constraints mention.
    pub fn signature_types(&self) -> impl Iterator<Item = &TypeSig> {
        std::iter::once(&self.sig.return_type)
            .chain(self.sig.params.iter())
            .chain(
                self.generic_params
                    .iter()
                    .flat_map(|param| param.constraints.iter()),
            )
    }

    /// Mutable counterpart of [`MethodDef::signature_types`].
    pub fn signature_types_mut(&mut self) -> impl Iterator<Item = &mut TypeSig> {
        let MethodDef {
            sig,
            generic_params,
            ..
        } = self;
        std::iter::once(&mut sig.return_type)
            .chain(sig.params.iter_mut())
            .chain(
                generic_params
                    .iter_mut()
                    .flat_map(|param| param.constraints.iter_mut()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_and_offsets() {
        let mut body = MethodBody::new();
        let first = body.push(OpCode::LdcI4S, Operand::Int32(10));
        let second = body.push(OpCode::Pop, Operand::None);
        let third = body.push(OpCode::Ret, Operand::None);

        assert_eq!(body.index_of(second), Some(1));
        assert_eq!(body.offsets(), vec![0, 2, 3, 4]);
        assert_eq!(body.code_size(), 4);
        assert_ne!(first, third);
        assert_eq!(body.next_id(), 3);

        body.instructions.remove(1);
        assert_eq!(body.index_of(second), None);
        assert_eq!(body.alloc_id(), InstrId::new(3));
    }

    #[test]
    fn type_sig_walk() {
        let mut body = MethodBody::new();
        body.locals.push(TypeSig::STRING);
        body.push(OpCode::Box, Operand::Type(TypeSig::INT32));
        body.push(OpCode::Ret, Operand::None);

        assert_eq!(body.type_sigs().count(), 2);
        for sig in body.type_sigs_mut() {
            *sig = TypeSig::OBJECT;
        }
        assert!(body.type_sigs().all(|sig| *sig == TypeSig::OBJECT));
    }
}
