//! Decoded CIL instructions.

use std::fmt;

use crate::module::{
    opcodes::{OpCode, OperandKind, StackCount},
    references::{FieldRefId, MethodRefId},
    signature::TypeSig,
    Module,
};

define_id!(
    /// Stable identity of an instruction within its method body.
    ///
    /// Branch targets, exception handler bounds and sequence points refer to instructions by
    /// id, so they stay attached to the right instruction while the body is edited.
    InstrId
);

/// The operand of an instruction, resolved against the module's tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 8 or 32-bit integer immediate
    Int32(i32),
    /// 64-bit integer immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// User string literal (`ldstr`)
    String(String),
    /// Argument index
    Arg(u16),
    /// Local variable index
    Local(u16),
    /// Branch target
    Target(InstrId),
    /// Jump table
    Switch(Vec<InstrId>),
    /// Field reference
    Field(FieldRefId),
    /// Method reference
    Method(MethodRefId),
    /// Type operand
    Type(TypeSig),
}

/// One instruction in a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Identity within the containing body
    pub id: InstrId,
    /// The opcode
    pub opcode: OpCode,
    /// The operand, shaped according to [`OpCode::operand_kind`]
    pub operand: Operand,
}

impl Instruction {
    /// Create a new instruction.
    #[must_use]
    pub fn new(id: InstrId, opcode: OpCode, operand: Operand) -> Self {
        Instruction { id, opcode, operand }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match (self.opcode.operand_kind(), &self.operand) {
            (OperandKind::InlineSwitch, Operand::Switch(targets)) => 4 + 4 * targets.len(),
            (kind, _) => kind.size().unwrap_or(4),
        };
        self.opcode.size() + operand
    }

    /// The referenced field, if the operand is one.
    #[must_use]
    pub fn field(&self) -> Option<FieldRefId> {
        match self.operand {
            Operand::Field(id) => Some(id),
            _ => None,
        }
    }

    /// The referenced method, if the operand is one.
    #[must_use]
    pub fn method(&self) -> Option<MethodRefId> {
        match self.operand {
            Operand::Method(id) => Some(id),
            _ => None,
        }
    }

    /// The type operand, if any.
    #[must_use]
    pub fn type_operand(&self) -> Option<&TypeSig> {
        match &self.operand {
            Operand::Type(sig) => Some(sig),
            _ => None,
        }
    }

    /// Number of values popped and pushed by this instruction.
    ///
    /// Variable stack behaviour of calls and `newobj` is resolved from the referenced method's
    /// signature; `ret` pops one value when the containing method returns a value. Returns
    /// `None` when the effect cannot be determined (`calli`, or a call without a method
    /// operand).
    #[must_use]
    pub fn stack_effect(&self, module: &Module, returns_value: bool) -> Option<(usize, usize)> {
        let pops = match self.opcode.pops() {
            StackCount::Fixed(count) => usize::from(count),
            StackCount::Variable => match self.opcode {
                OpCode::Ret => usize::from(returns_value),
                OpCode::Newobj => module.method_ref(self.method()?)?.sig.params.len(),
                OpCode::Call | OpCode::Callvirt => {
                    module.method_ref(self.method()?)?.sig.arg_count()
                }
                _ => return None,
            },
        };
        let pushes = match self.opcode.pushes() {
            StackCount::Fixed(count) => usize::from(count),
            StackCount::Variable => {
                let method = module.method_ref(self.method()?)?;
                usize::from(!method.sig.return_type.is_void())
            }
        };

        Some((pops, pushes))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04}: {}", self.id.0, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(value) => write!(f, " {value}"),
            Operand::Int64(value) => write!(f, " {value}"),
            Operand::Float32(value) => write!(f, " {value}"),
            Operand::Float64(value) => write!(f, " {value}"),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Arg(index) => write!(f, " arg{index}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Target(target) => write!(f, " IL_{:04}", target.0),
            Operand::Switch(targets) => {
                f.write_str(" (")?;
                for (index, target) in targets.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{:04}", target.0)?;
                }
                f.write_str(")")
            }
            Operand::Field(id) => write!(f, " field{id}"),
            Operand::Method(id) => write!(f, " method{id}"),
            Operand::Type(_) => f.write_str(" <type>"),
        }
    }
}
