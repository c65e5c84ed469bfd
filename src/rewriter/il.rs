//! In-place editing of a single method body.
//!
//! [`IlProcessor`] is the only way rules touch instructions. It keeps instruction identity
//! stable across edits: a replaced instruction's id moves to the first instruction of its
//! replacement, so branch targets, exception handler bounds and sequence points that referred
//! to the original keep pointing at the same logical position.
//!
//! Rewriting happens on macro-free IL. [`IlProcessor::simplify_macros`] expands every short
//! form (`ldarg.0`, `ldc.i4.s`, `br.s`, ...) to its general form so replacements never have to
//! care about operand ranges, and [`IlProcessor::optimize_macros`] folds the body back to its
//! most compact encoding afterwards.

use crate::{
    module::{
        instruction::{Instruction, Operand},
        method::{MethodBody, MethodDef},
        opcodes::OpCode,
        Module,
    },
    Error, Result,
};

/// Net `(pops, pushes)` of an instruction sequence executed in order.
///
/// A sequence that pops two values and pushes one behaves, seen from the surrounding code,
/// exactly like a single instruction with the same counts. `None` if the effect of any
/// instruction cannot be determined.
pub(crate) fn sequence_effect<'i>(
    module: &Module,
    instructions: impl IntoIterator<Item = &'i Instruction>,
    returns_value: bool,
) -> Option<(usize, usize)> {
    let mut depth: isize = 0;
    let mut lowest: isize = 0;
    for instr in instructions {
        let (pops, pushes) = instr.stack_effect(module, returns_value)?;
        depth -= pops as isize;
        lowest = lowest.min(depth);
        depth += pushes as isize;
    }
    Some(((-lowest) as usize, (depth - lowest) as usize))
}

/// Editing cursor over one method.
pub struct IlProcessor<'a> {
    method: &'a mut MethodDef,
    location: String,
}

impl<'a> IlProcessor<'a> {
    /// Open a method for editing. `location` names the method in diagnostics,
    /// e.g. `ExampleMod.ModEntry.Entry`.
    pub fn new(method: &'a mut MethodDef, location: impl Into<String>) -> Self {
        IlProcessor {
            method,
            location: location.into(),
        }
    }

    /// Diagnostic name of the method being edited.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The method being edited.
    #[must_use]
    pub fn method(&self) -> &MethodDef {
        self.method
    }

    /// The method being edited, for rewrites that touch its signature or generic parameters.
    pub fn method_mut(&mut self) -> &mut MethodDef {
        self.method
    }

    /// Instructions of the body; empty for methods without one.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        self.method
            .body
            .as_ref()
            .map_or(&[], |body| body.instructions.as_slice())
    }

    /// The instruction at `index`.
    #[must_use]
    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions().get(index)
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions().len()
    }

    /// `true` if the method has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions().is_empty()
    }

    fn body_mut(&mut self) -> Result<&mut MethodBody> {
        let location = &self.location;
        self.method
            .body
            .as_mut()
            .ok_or_else(|| Error::Error(format!("{location} has no method body")))
    }

    /// Replace the operand of the instruction at `index`, keeping its opcode and id.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `index` is past the end of the body.
    pub fn set_operand(&mut self, index: usize, operand: Operand) -> Result<()> {
        let instr = self
            .body_mut()?
            .instructions
            .get_mut(index)
            .ok_or(out_of_bounds_error!())?;
        instr.operand = operand;
        Ok(())
    }

    /// Replace the instruction at `index` with `replacement`.
    ///
    /// The first replacement instruction inherits the original id; the rest get fresh ids.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for a bad index and [`Error::Error`] for an empty
    /// replacement.
    pub fn replace(&mut self, index: usize, replacement: Vec<(OpCode, Operand)>) -> Result<()> {
        if replacement.is_empty() {
            return Err(Error::Error(format!(
                "Empty replacement for instruction {index} in {}",
                self.location
            )));
        }

        let body = self.body_mut()?;
        let original = body
            .instructions
            .get(index)
            .map(|instr| instr.id)
            .ok_or(out_of_bounds_error!())?;

        let mut sequence = Vec::with_capacity(replacement.len());
        for (position, (opcode, operand)) in replacement.into_iter().enumerate() {
            let id = if position == 0 {
                original
            } else {
                body.alloc_id()
            };
            sequence.push(Instruction::new(id, opcode, operand));
        }

        body.instructions.splice(index..=index, sequence);
        Ok(())
    }

    /// Like [`IlProcessor::replace`], but first checks that the replacement pops and pushes
    /// exactly as many values as the original instruction.
    ///
    /// # Errors
    /// Returns [`Error::StackMismatch`] if the stack shape would change, and the errors of
    /// [`IlProcessor::replace`].
    pub fn replace_checked(
        &mut self,
        module: &Module,
        index: usize,
        replacement: Vec<(OpCode, Operand)>,
    ) -> Result<()> {
        let returns_value = self.method.returns_value();
        let original = self.instruction(index).ok_or(out_of_bounds_error!())?;

        let expected = original.stack_effect(module, returns_value);
        let candidate: Vec<Instruction> = replacement
            .iter()
            .map(|(opcode, operand)| Instruction::new(original.id, *opcode, operand.clone()))
            .collect();
        let actual = sequence_effect(module, &candidate, returns_value);

        match (expected, actual) {
            (Some(expected), Some(actual)) if expected == actual => {}
            (expected, actual) => {
                return Err(Error::StackMismatch {
                    method: self.location.clone(),
                    instruction: original.opcode.name().to_string(),
                    expected: expected.unwrap_or_default(),
                    actual: actual.unwrap_or_default(),
                })
            }
        }

        self.replace(index, replacement)
    }

    /// Expand every macro instruction to its general form.
    pub fn simplify_macros(&mut self) {
        let Some(body) = self.method.body.as_mut() else {
            return;
        };

        for instr in &mut body.instructions {
            let (opcode, operand) = match (instr.opcode, &instr.operand) {
                (OpCode::Ldarg0, _) => (OpCode::Ldarg, Operand::Arg(0)),
                (OpCode::Ldarg1, _) => (OpCode::Ldarg, Operand::Arg(1)),
                (OpCode::Ldarg2, _) => (OpCode::Ldarg, Operand::Arg(2)),
                (OpCode::Ldarg3, _) => (OpCode::Ldarg, Operand::Arg(3)),
                (OpCode::Ldloc0, _) => (OpCode::Ldloc, Operand::Local(0)),
                (OpCode::Ldloc1, _) => (OpCode::Ldloc, Operand::Local(1)),
                (OpCode::Ldloc2, _) => (OpCode::Ldloc, Operand::Local(2)),
                (OpCode::Ldloc3, _) => (OpCode::Ldloc, Operand::Local(3)),
                (OpCode::Stloc0, _) => (OpCode::Stloc, Operand::Local(0)),
                (OpCode::Stloc1, _) => (OpCode::Stloc, Operand::Local(1)),
                (OpCode::Stloc2, _) => (OpCode::Stloc, Operand::Local(2)),
                (OpCode::Stloc3, _) => (OpCode::Stloc, Operand::Local(3)),
                (OpCode::LdargS, operand) => (OpCode::Ldarg, operand.clone()),
                (OpCode::LdargaS, operand) => (OpCode::Ldarga, operand.clone()),
                (OpCode::StargS, operand) => (OpCode::Starg, operand.clone()),
                (OpCode::LdlocS, operand) => (OpCode::Ldloc, operand.clone()),
                (OpCode::LdlocaS, operand) => (OpCode::Ldloca, operand.clone()),
                (OpCode::StlocS, operand) => (OpCode::Stloc, operand.clone()),
                (OpCode::LdcI4M1, _) => (OpCode::LdcI4, Operand::Int32(-1)),
                (OpCode::LdcI40, _) => (OpCode::LdcI4, Operand::Int32(0)),
                (OpCode::LdcI41, _) => (OpCode::LdcI4, Operand::Int32(1)),
                (OpCode::LdcI42, _) => (OpCode::LdcI4, Operand::Int32(2)),
                (OpCode::LdcI43, _) => (OpCode::LdcI4, Operand::Int32(3)),
                (OpCode::LdcI44, _) => (OpCode::LdcI4, Operand::Int32(4)),
                (OpCode::LdcI45, _) => (OpCode::LdcI4, Operand::Int32(5)),
                (OpCode::LdcI46, _) => (OpCode::LdcI4, Operand::Int32(6)),
                (OpCode::LdcI47, _) => (OpCode::LdcI4, Operand::Int32(7)),
                (OpCode::LdcI48, _) => (OpCode::LdcI4, Operand::Int32(8)),
                (OpCode::LdcI4S, operand) => (OpCode::LdcI4, operand.clone()),
                (opcode, _) => match opcode.long_branch() {
                    Some(long) => (long, instr.operand.clone()),
                    None => continue,
                },
            };
            instr.opcode = opcode;
            instr.operand = operand;
        }
    }

    /// Fold the body back to its most compact encoding: short argument, local and constant
    /// forms first, then short branches wherever the target is in range.
    pub fn optimize_macros(&mut self) {
        let Some(body) = self.method.body.as_mut() else {
            return;
        };

        for instr in &mut body.instructions {
            let folded = match (instr.opcode, &instr.operand) {
                (OpCode::Ldarg, Operand::Arg(index)) => fold_index(
                    *index,
                    [OpCode::Ldarg0, OpCode::Ldarg1, OpCode::Ldarg2, OpCode::Ldarg3],
                    OpCode::LdargS,
                    Operand::Arg,
                ),
                (OpCode::Ldloc, Operand::Local(index)) => fold_index(
                    *index,
                    [OpCode::Ldloc0, OpCode::Ldloc1, OpCode::Ldloc2, OpCode::Ldloc3],
                    OpCode::LdlocS,
                    Operand::Local,
                ),
                (OpCode::Stloc, Operand::Local(index)) => fold_index(
                    *index,
                    [OpCode::Stloc0, OpCode::Stloc1, OpCode::Stloc2, OpCode::Stloc3],
                    OpCode::StlocS,
                    Operand::Local,
                ),
                (OpCode::Ldarga, Operand::Arg(index)) if *index < 256 => {
                    Some((OpCode::LdargaS, Operand::Arg(*index)))
                }
                (OpCode::Starg, Operand::Arg(index)) if *index < 256 => {
                    Some((OpCode::StargS, Operand::Arg(*index)))
                }
                (OpCode::Ldloca, Operand::Local(index)) if *index < 256 => {
                    Some((OpCode::LdlocaS, Operand::Local(*index)))
                }
                (OpCode::LdcI4, Operand::Int32(value)) => Some(fold_constant(*value)),
                _ => None,
            };
            if let Some((opcode, operand)) = folded {
                instr.opcode = opcode;
                instr.operand = operand;
            }
        }

        optimize_branches(body);
    }
}

fn fold_index(
    index: u16,
    fixed: [OpCode; 4],
    short: OpCode,
    operand: impl Fn(u16) -> Operand,
) -> Option<(OpCode, Operand)> {
    match index {
        0..=3 => Some((fixed[usize::from(index)], Operand::None)),
        4..=255 => Some((short, operand(index))),
        _ => None,
    }
}

fn fold_constant(value: i32) -> (OpCode, Operand) {
    match value {
        -1 => (OpCode::LdcI4M1, Operand::None),
        0 => (OpCode::LdcI40, Operand::None),
        1 => (OpCode::LdcI41, Operand::None),
        2 => (OpCode::LdcI42, Operand::None),
        3 => (OpCode::LdcI43, Operand::None),
        4 => (OpCode::LdcI44, Operand::None),
        5 => (OpCode::LdcI45, Operand::None),
        6 => (OpCode::LdcI46, Operand::None),
        7 => (OpCode::LdcI47, Operand::None),
        8 => (OpCode::LdcI48, Operand::None),
        -128..=127 => (OpCode::LdcI4S, Operand::Int32(value)),
        _ => (OpCode::LdcI4, Operand::Int32(value)),
    }
}

/// Shrink long branches whose target fits a one-byte displacement.
///
/// The displacement is measured with the long encoding in place. Shrinking a branch only
/// moves other instructions closer together, so a branch that fits keeps fitting.
fn optimize_branches(body: &mut MethodBody) {
    let mut offsets = body.offsets();
    for index in 0..body.instructions.len() {
        let instr = &body.instructions[index];
        let (Some(short), Operand::Target(target)) = (instr.opcode.short_branch(), &instr.operand)
        else {
            continue;
        };
        let Some(target_index) = body.index_of(*target) else {
            continue;
        };

        let next = i64::from(offsets[index]) + instr.size() as i64;
        let displacement = i64::from(offsets[target_index]) - next;
        if (-128..=127).contains(&displacement) {
            body.instructions[index].opcode = short;
            offsets = body.offsets();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{
        instruction::InstrId,
        method::MethodAttributes,
        references::{AssemblyRef, AssemblyVersion, FieldRef, MethodRef, ResolutionScope, TypeRef},
        signature::{MethodSig, TypeSig},
    };

    fn method(body: MethodBody) -> MethodDef {
        MethodDef::new(
            "Entry",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSig::static_method(TypeSig::VOID, Vec::new()),
            Some(body),
        )
    }

    #[test]
    fn simplify_then_optimize_is_stable() {
        let mut body = MethodBody::new();
        body.push(OpCode::Ldarg0, Operand::None);
        body.push(OpCode::LdcI4S, Operand::Int32(42));
        body.push(OpCode::LdcI4, Operand::Int32(1000));
        body.push(OpCode::StlocS, Operand::Local(7));
        body.push(OpCode::LdcI4M1, Operand::None);
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        let original = body.clone();

        let mut def = method(body);
        let mut il = IlProcessor::new(&mut def, "Mod.Entry");
        il.simplify_macros();
        let opcodes: Vec<OpCode> = il.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                OpCode::Ldarg,
                OpCode::LdcI4,
                OpCode::LdcI4,
                OpCode::Stloc,
                OpCode::LdcI4,
                OpCode::Pop,
                OpCode::Ret
            ]
        );
        assert_eq!(il.instruction(0).unwrap().operand, Operand::Arg(0));

        il.optimize_macros();
        assert_eq!(def.body.as_ref().unwrap(), &original);
    }

    #[test]
    fn branches_shrink_only_in_range() {
        let mut body = MethodBody::new();
        let near_branch = body.alloc_id();
        let near = body.alloc_id();
        let far_branch = body.alloc_id();
        let far = body.alloc_id();
        body.instructions
            .push(Instruction::new(near_branch, OpCode::BrS, Operand::Target(near)));
        body.instructions.push(Instruction::new(near, OpCode::Nop, Operand::None));
        body.instructions
            .push(Instruction::new(far_branch, OpCode::Br, Operand::Target(far)));
        for _ in 0..200 {
            body.push(OpCode::Nop, Operand::None);
        }
        body.instructions.push(Instruction::new(far, OpCode::Ret, Operand::None));

        let mut def = method(body);
        let mut il = IlProcessor::new(&mut def, "Mod.Entry");
        il.simplify_macros();
        assert_eq!(il.instruction(0).unwrap().opcode, OpCode::Br);

        il.optimize_macros();
        assert_eq!(il.instruction(0).unwrap().opcode, OpCode::BrS);
        assert_eq!(il.instruction(2).unwrap().opcode, OpCode::Br);
    }

    #[test]
    fn replace_keeps_identity() {
        let mut body = MethodBody::new();
        let first = body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        let mut def = method(body);
        let mut il = IlProcessor::new(&mut def, "Mod.Entry");
        il.replace(
            0,
            vec![(OpCode::LdcI4, Operand::Int32(1)), (OpCode::Pop, Operand::None)],
        )
        .unwrap();

        assert_eq!(il.len(), 3);
        assert_eq!(il.instruction(0).unwrap().id, first);
        assert_ne!(il.instruction(1).unwrap().id, first);
        assert!(il.replace(0, Vec::new()).is_err());
        assert!(matches!(
            il.replace(9, vec![(OpCode::Nop, Operand::None)]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn checked_replace_rejects_shape_changes() {
        let mut module = Module::new("Mod.dll");
        let game = module.add_assembly_ref(AssemblyRef::new(
            "StardewValley",
            AssemblyVersion::new(1, 5, 0, 0),
        ));
        let game1 = module.import_type(TypeRef::new(
            "StardewValley",
            "Game1",
            ResolutionScope::Assembly(game),
        ));
        let field = module.import_field_ref(FieldRef::new(
            TypeSig::Class(game1),
            "player",
            TypeSig::OBJECT,
        ));
        let getter = module.import_method_ref(MethodRef::new(
            TypeSig::Class(game1),
            "get_player",
            MethodSig::static_method(TypeSig::OBJECT, Vec::new()),
        ));
        let setter = module.import_method_ref(MethodRef::new(
            TypeSig::Class(game1),
            "set_player",
            MethodSig::static_method(TypeSig::VOID, vec![TypeSig::OBJECT]),
        ));

        let mut body = MethodBody::new();
        body.push(OpCode::Ldsfld, Operand::Field(field));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        let mut def = method(body);
        let mut il = IlProcessor::new(&mut def, "Mod.Entry");
        let err = il
            .replace_checked(&module, 0, vec![(OpCode::Call, Operand::Method(setter))])
            .unwrap_err();
        assert!(matches!(err, Error::StackMismatch { expected: (0, 1), actual: (1, 0), .. }));

        il.replace_checked(&module, 0, vec![(OpCode::Call, Operand::Method(getter))])
            .unwrap();
        assert_eq!(il.instruction(0).unwrap().method(), Some(getter));
    }

    #[test]
    fn sequence_effects() {
        let module = Module::new("Mod.dll");
        let id = InstrId::new(0);
        let seq = [
            Instruction::new(id, OpCode::Pop, Operand::None),
            Instruction::new(id, OpCode::LdcI4, Operand::Int32(1)),
            Instruction::new(id, OpCode::Add, Operand::None),
        ];
        assert_eq!(sequence_effect(&module, &seq, false), Some((2, 1)));
        assert_eq!(
            sequence_effect(&module, std::iter::empty::<&Instruction>(), false),
            Some((0, 0))
        );
    }
}
