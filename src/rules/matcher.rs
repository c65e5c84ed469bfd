//! Instruction matching. Every function here is pure: matching runs as a dry-run scan before
//! any rewriting begins.

use crate::{
    module::{
        instruction::{Instruction, Operand},
        method::MethodDef,
        references::{FieldRef, MethodRef},
        signature::TypeSig,
        types::TypeDef,
        Module,
    },
    rules::{RewriteRule, RuleKind},
};

/// Full name of the named type a signature is built on, ignoring generic arguments.
pub(crate) fn definition_name(module: &Module, sig: &TypeSig) -> Option<String> {
    sig.definition().map(|id| module.type_full_name(id))
}

fn declared_by(module: &Module, declaring: &TypeSig, type_name: &str) -> bool {
    definition_name(module, declaring).as_deref() == Some(type_name)
}

fn field_exposes(module: &Module, field: &FieldRef, type_name: &str, widen: bool) -> bool {
    field.declaring.references_type(module, type_name)
        || (widen && field.field_type.references_type(module, type_name))
}

fn method_exposes(module: &Module, method: &MethodRef, type_name: &str, widen: bool) -> bool {
    method.declaring.references_type(module, type_name)
        || method
            .generic_args
            .iter()
            .any(|arg| arg.references_type(module, type_name))
        || (widen && method.sig.references_type(module, type_name))
}

impl RewriteRule {
    /// Returns `true` if the instruction references the field, method, event or type this rule
    /// targets.
    ///
    /// `platform_changed` tells whether the mod was compiled against another platform's
    /// assemblies; rules flagged [`RewriteRule::only_if_platform_changed`] never match
    /// otherwise.
    #[must_use]
    pub fn is_match(&self, module: &Module, instr: &Instruction, platform_changed: bool) -> bool {
        if self.only_if_platform_changed && !platform_changed {
            return false;
        }

        match &self.kind {
            RuleKind::FieldToProperty {
                type_name,
                field_name,
                ..
            }
            | RuleKind::RemovedField {
                type_name,
                field_name,
            } => {
                if !instr.opcode.is_field_access() {
                    return false;
                }
                instr
                    .field()
                    .and_then(|id| module.field_ref(id))
                    .is_some_and(|field| {
                        field.name == *field_name
                            && declared_by(module, &field.declaring, type_name)
                    })
            }
            RuleKind::RemovedMethod {
                type_name,
                method_name,
            } => self.method_operand(module, instr).is_some_and(|method| {
                method.name == *method_name && declared_by(module, &method.declaring, type_name)
            }),
            RuleKind::RemovedEvent {
                type_name,
                event_name,
            } => self.method_operand(module, instr).is_some_and(|method| {
                let accessor = method
                    .name
                    .strip_prefix("add_")
                    .or_else(|| method.name.strip_prefix("remove_"));
                accessor == Some(event_name.as_str())
                    && declared_by(module, &method.declaring, type_name)
            }),
            RuleKind::RedirectMethodParent {
                from_type,
                method_name,
                ..
            } => {
                if !instr.opcode.is_method_reference() {
                    return false;
                }
                self.method_operand(module, instr).is_some_and(|method| {
                    method_name
                        .as_ref()
                        .is_none_or(|name| *name == method.name)
                        && declared_by(module, &method.declaring, from_type)
                })
            }
            RuleKind::ReplaceType {
                from: type_name, ..
            }
            | RuleKind::RemovedType { type_name } => {
                self.references_type(module, instr, type_name)
            }
        }
    }

    /// Full name of the type targeted by a type rule, `None` for member rules.
    fn target_type_name(&self) -> Option<&str> {
        match &self.kind {
            RuleKind::ReplaceType { from, .. } => Some(from),
            RuleKind::RemovedType { type_name } => Some(type_name),
            _ => None,
        }
    }

    /// Returns `true` if the method's own definition (return type, parameters, generic
    /// constraints, locals) references the type targeted by a type rule.
    ///
    /// Always `false` for member rules.
    #[must_use]
    pub fn is_match_definition(
        &self,
        module: &Module,
        method: &MethodDef,
        platform_changed: bool,
    ) -> bool {
        if self.only_if_platform_changed && !platform_changed {
            return false;
        }
        let Some(type_name) = self.target_type_name() else {
            return false;
        };

        method
            .signature_types()
            .any(|sig| sig.references_type(module, type_name))
            || method.body.as_ref().is_some_and(|body| {
                body.locals
                    .iter()
                    .chain(body.handlers.iter().filter_map(|h| h.catch_type.as_ref()))
                    .any(|sig| sig.references_type(module, type_name))
            })
    }

    /// Returns `true` if a type definition (base type, interfaces, generic constraints, field
    /// types, property and event types) references the type targeted by a type rule.
    ///
    /// Always `false` for member rules.
    #[must_use]
    pub fn is_match_type_definition(
        &self,
        module: &Module,
        type_def: &TypeDef,
        platform_changed: bool,
    ) -> bool {
        if self.only_if_platform_changed && !platform_changed {
            return false;
        }
        let Some(type_name) = self.target_type_name() else {
            return false;
        };
        type_def
            .type_sigs()
            .any(|sig| sig.references_type(module, type_name))
    }

    fn method_operand<'m>(
        &self,
        module: &'m Module,
        instr: &Instruction,
    ) -> Option<&'m MethodRef> {
        instr.method().and_then(|id| module.method_ref(id))
    }

    fn references_type(&self, module: &Module, instr: &Instruction, type_name: &str) -> bool {
        match &instr.operand {
            Operand::Type(sig) => sig.references_type(module, type_name),
            Operand::Field(id) => module.field_ref(*id).is_some_and(|field| {
                field_exposes(module, field, type_name, self.widen_to_signature)
            }),
            Operand::Method(id) => module.method_ref(*id).is_some_and(|method| {
                method_exposes(module, method, type_name, self.widen_to_signature)
            }),
            _ => false,
        }
    }
}
