//! Rule actions. Hard-failure rules turn a match into an [`IncompatibleModule`]; transform
//! rules edit the matched instruction through the [`IlProcessor`].

use crate::{
    module::{
        instruction::Operand,
        opcodes::OpCode,
        references::{
            AssemblyRef, AssemblyVersion, FieldRef, MethodRef, ResolutionScope, TypeRef,
            TypeRefId,
        },
        signature::{MethodSig, TypeSig},
        Module,
    },
    platform::PlatformAssemblyMap,
    rewriter::IlProcessor,
    rules::{Incompatibility, IncompatibleModule, RewriteRule, RuleKind, TypeTarget},
    Error, Result,
};

/// Import `target` into the module, adding a reference to its assembly if needed.
fn import_target(
    module: &mut Module,
    target: &TypeTarget,
    map: &PlatformAssemblyMap,
) -> TypeRefId {
    let reference = map
        .target_by_name(&target.assembly)
        .map(|known| known.reference.clone())
        .unwrap_or_else(|| {
            AssemblyRef::new(target.assembly.clone(), AssemblyVersion::default())
        });
    let assembly = module.add_assembly_ref(reference);
    module.import_type(TypeRef::new(
        target.namespace.clone(),
        target.name.clone(),
        ResolutionScope::Assembly(assembly),
    ))
}

fn field_replacing(field: &FieldRef, from: TypeRefId, to: TypeRefId) -> Option<FieldRef> {
    let mut field = field.clone();
    let count = field.declaring.replace_type_ref(from, to)
        + field.field_type.replace_type_ref(from, to);
    (count > 0).then_some(field)
}

fn method_replacing(method: &MethodRef, from: TypeRefId, to: TypeRefId) -> Option<MethodRef> {
    let mut method = method.clone();
    let mut count =
        method.declaring.replace_type_ref(from, to) + method.sig.replace_type_ref(from, to);
    for arg in &mut method.generic_args {
        count += arg.replace_type_ref(from, to);
    }
    (count > 0).then_some(method)
}

/// Replace every occurrence of `from` in the method being edited: signature, generic
/// constraints, locals, handler types, type operands and the signatures of referenced members.
fn replace_type_everywhere(
    module: &mut Module,
    il: &mut IlProcessor<'_>,
    from: TypeRefId,
    to: TypeRefId,
) -> Result<usize> {
    let mut count = 0;

    let method = il.method_mut();
    for sig in method.signature_types_mut() {
        count += sig.replace_type_ref(from, to);
    }
    if let Some(body) = method.body.as_mut() {
        for sig in body.type_sigs_mut() {
            count += sig.replace_type_ref(from, to);
        }
    }

    for index in 0..il.len() {
        let replaced = match il.instruction(index).map(|instr| &instr.operand) {
            Some(Operand::Field(id)) => module
                .field_ref(*id)
                .and_then(|field| field_replacing(field, from, to))
                .map(|field| Operand::Field(module.import_field_ref(field))),
            Some(Operand::Method(id)) => module
                .method_ref(*id)
                .and_then(|method| method_replacing(method, from, to))
                .map(|method| Operand::Method(module.import_method_ref(method))),
            _ => None,
        };
        if let Some(operand) = replaced {
            il.set_operand(index, operand)?;
            count += 1;
        }
    }

    Ok(count)
}

impl RewriteRule {
    fn incompatible(&self, module: &Module, il: &IlProcessor<'_>) -> Error {
        self.incompatible_at(module, il.location())
    }

    fn incompatible_at(&self, module: &Module, location: impl Into<String>) -> Error {
        Error::Incompatible(IncompatibleModule::new(
            module.name.clone(),
            vec![Incompatibility::new(self.noun_phrase.clone(), location)],
        ))
    }

    /// `true` if a match on this instruction can only be reported, never rewritten.
    ///
    /// Besides the hard-failure rules this covers field-to-property rules on address-taking
    /// opcodes: a property has no address.
    #[must_use]
    pub fn fails_on(&self, opcode: OpCode) -> bool {
        self.is_hard_failure()
            || (matches!(self.kind, RuleKind::FieldToProperty { .. }) && opcode.is_field_address())
    }

    /// Apply the rule to the matched instruction at `index`.
    ///
    /// Returns `true` if the module changed.
    ///
    /// # Errors
    /// Returns [`Error::Incompatible`] for hard-failure rules, [`Error::StackMismatch`] if a
    /// replacement would change the stack shape and [`Error::Malformed`] if the instruction
    /// does not carry the operand the rule expects.
    pub fn rewrite(
        &self,
        module: &mut Module,
        il: &mut IlProcessor<'_>,
        index: usize,
        map: &PlatformAssemblyMap,
    ) -> Result<bool> {
        let instr = il.instruction(index).cloned().ok_or(out_of_bounds_error!())?;
        if self.fails_on(instr.opcode) {
            return Err(self.incompatible(module, il));
        }

        match &self.kind {
            RuleKind::FieldToProperty { property_name, .. } => {
                let field = instr
                    .field()
                    .and_then(|id| module.field_ref(id))
                    .cloned()
                    .ok_or_else(|| malformed_error!("{} has no field operand", instr))?;

                let is_static = instr.opcode.is_static_field_access();
                let (name, return_type, params) = if instr.opcode.is_field_store() {
                    (format!("set_{property_name}"), TypeSig::VOID, vec![field.field_type])
                } else {
                    (format!("get_{property_name}"), field.field_type, Vec::new())
                };
                let sig = if is_static {
                    MethodSig::static_method(return_type, params)
                } else {
                    MethodSig::instance(return_type, params)
                };
                let accessor =
                    module.import_method_ref(MethodRef::new(field.declaring, name, sig));
                let opcode = if is_static { OpCode::Call } else { OpCode::Callvirt };

                il.replace_checked(module, index, vec![(opcode, Operand::Method(accessor))])?;
                Ok(true)
            }
            RuleKind::ReplaceType { from, to } => {
                let replacement = import_target(module, to, map);
                let mut count = 0;
                for id in type_refs_named(module, from) {
                    if id != replacement {
                        count += replace_type_everywhere(module, il, id, replacement)?;
                    }
                }
                Ok(count > 0)
            }
            RuleKind::RedirectMethodParent { to, .. } => {
                let mut method = instr
                    .method()
                    .and_then(|id| module.method_ref(id))
                    .cloned()
                    .ok_or_else(|| malformed_error!("{} has no method operand", instr))?;
                let Some(original) = method.declaring.definition() else {
                    return Ok(false);
                };

                let facade = import_target(module, to, map);
                if facade == original {
                    return Ok(false);
                }
                method.declaring.replace_type_ref(original, facade);
                let redirected = module.import_method_ref(method);
                il.set_operand(index, Operand::Method(redirected))?;
                Ok(true)
            }
            RuleKind::RemovedField { .. }
            | RuleKind::RemovedMethod { .. }
            | RuleKind::RemovedEvent { .. }
            | RuleKind::RemovedType { .. } => Err(self.incompatible(module, il)),
        }
    }

    /// Apply a type rule to the definition of the method being edited.
    ///
    /// Returns `true` if the module changed; always `false` for member rules.
    ///
    /// # Errors
    /// Returns [`Error::Incompatible`] for [`RuleKind::RemovedType`].
    pub fn rewrite_definition(
        &self,
        module: &mut Module,
        il: &mut IlProcessor<'_>,
        map: &PlatformAssemblyMap,
    ) -> Result<bool> {
        match &self.kind {
            RuleKind::RemovedType { .. } => Err(self.incompatible(module, il)),
            RuleKind::ReplaceType { from, to } => {
                let replacement = import_target(module, to, map);
                let mut count = 0;
                for id in type_refs_named(module, from) {
                    if id != replacement {
                        count += replace_type_everywhere(module, il, id, replacement)?;
                    }
                }
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }

    /// Apply a type rule to the definition of `module.type_defs[type_index]`: its base type,
    /// interfaces, generic constraints, fields, properties and events.
    ///
    /// Returns `true` if the module changed; always `false` for member rules.
    ///
    /// # Errors
    /// Returns [`Error::Incompatible`] for [`RuleKind::RemovedType`] and
    /// [`Error::OutOfBounds`] for an unknown type index.
    pub fn rewrite_type_definition(
        &self,
        module: &mut Module,
        type_index: usize,
        map: &PlatformAssemblyMap,
    ) -> Result<bool> {
        if type_index >= module.type_defs.len() {
            return Err(out_of_bounds_error!());
        }

        match &self.kind {
            RuleKind::RemovedType { .. } => {
                Err(self.incompatible_at(module, module.type_def_full_name(type_index)))
            }
            RuleKind::ReplaceType { from, to } => {
                let replacement = import_target(module, to, map);
                let mut count = 0;
                for id in type_refs_named(module, from) {
                    if id == replacement {
                        continue;
                    }
                    for sig in module.type_defs[type_index].type_sigs_mut() {
                        count += sig.replace_type_ref(id, replacement);
                    }
                }
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }
}

fn type_refs_named(module: &Module, full_name: &str) -> Vec<TypeRefId> {
    (0..module.type_refs.len())
        .map(TypeRefId::new)
        .filter(|id| module.type_full_name(*id) == full_name)
        .collect()
}
