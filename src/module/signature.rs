//! Type and method signatures.
//!
//! [`TypeSig`] is a tree: constructed types (arrays, pointers, generic instantiations) own their
//! element and argument signatures, while named types point into the module's type reference
//! table. Every operation that needs a name therefore takes the owning [`Module`].

use std::fmt::Write;

use crate::module::{references::TypeRefId, Module};

/// Built-in types with a dedicated ECMA-335 element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.TypedReference`
    TypedByRef,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// `System.Object`
    Object,
}

impl PrimitiveType {
    /// The element type byte used in encoded signatures.
    #[must_use]
    pub const fn element_type(self) -> u8 {
        match self {
            PrimitiveType::Void => 0x01,
            PrimitiveType::Boolean => 0x02,
            PrimitiveType::Char => 0x03,
            PrimitiveType::I1 => 0x04,
            PrimitiveType::U1 => 0x05,
            PrimitiveType::I2 => 0x06,
            PrimitiveType::U2 => 0x07,
            PrimitiveType::I4 => 0x08,
            PrimitiveType::U4 => 0x09,
            PrimitiveType::I8 => 0x0A,
            PrimitiveType::U8 => 0x0B,
            PrimitiveType::R4 => 0x0C,
            PrimitiveType::R8 => 0x0D,
            PrimitiveType::String => 0x0E,
            PrimitiveType::TypedByRef => 0x16,
            PrimitiveType::I => 0x18,
            PrimitiveType::U => 0x19,
            PrimitiveType::Object => 0x1C,
        }
    }

    /// Inverse of [`PrimitiveType::element_type`].
    #[must_use]
    pub const fn from_element_type(value: u8) -> Option<PrimitiveType> {
        Some(match value {
            0x01 => PrimitiveType::Void,
            0x02 => PrimitiveType::Boolean,
            0x03 => PrimitiveType::Char,
            0x04 => PrimitiveType::I1,
            0x05 => PrimitiveType::U1,
            0x06 => PrimitiveType::I2,
            0x07 => PrimitiveType::U2,
            0x08 => PrimitiveType::I4,
            0x09 => PrimitiveType::U4,
            0x0A => PrimitiveType::I8,
            0x0B => PrimitiveType::U8,
            0x0C => PrimitiveType::R4,
            0x0D => PrimitiveType::R8,
            0x0E => PrimitiveType::String,
            0x16 => PrimitiveType::TypedByRef,
            0x18 => PrimitiveType::I,
            0x19 => PrimitiveType::U,
            0x1C => PrimitiveType::Object,
            _ => return None,
        })
    }

    /// Full name of the corresponding `System` type.
    #[must_use]
    pub const fn full_name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "System.Void",
            PrimitiveType::Boolean => "System.Boolean",
            PrimitiveType::Char => "System.Char",
            PrimitiveType::I1 => "System.SByte",
            PrimitiveType::U1 => "System.Byte",
            PrimitiveType::I2 => "System.Int16",
            PrimitiveType::U2 => "System.UInt16",
            PrimitiveType::I4 => "System.Int32",
            PrimitiveType::U4 => "System.UInt32",
            PrimitiveType::I8 => "System.Int64",
            PrimitiveType::U8 => "System.UInt64",
            PrimitiveType::R4 => "System.Single",
            PrimitiveType::R8 => "System.Double",
            PrimitiveType::String => "System.String",
            PrimitiveType::TypedByRef => "System.TypedReference",
            PrimitiveType::I => "System.IntPtr",
            PrimitiveType::U => "System.UIntPtr",
            PrimitiveType::Object => "System.Object",
        }
    }
}

/// A type as it appears in a signature or as an instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// A built-in type
    Primitive(PrimitiveType),
    /// A reference type
    Class(TypeRefId),
    /// A value type
    ValueType(TypeRefId),
    /// A generic type instantiated with concrete arguments
    GenericInst {
        /// Whether the generic definition is a value type
        value_type: bool,
        /// The generic type definition
        base: TypeRefId,
        /// Generic arguments, in declaration order
        args: Vec<TypeSig>,
    },
    /// Single-dimension, zero-based array
    SzArray(Box<TypeSig>),
    /// Multi-dimensional array
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Number of dimensions
        rank: u32,
        /// Declared sizes of the leading dimensions
        sizes: Vec<u32>,
        /// Declared lower bounds of the leading dimensions
        lower_bounds: Vec<i32>,
    },
    /// Managed pointer (`ref T`)
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Generic parameter of the enclosing type
    Var(u32),
    /// Generic parameter of the enclosing method
    MVar(u32),
    /// A type carrying a custom modifier (`modreq` or `modopt`)
    Modified {
        /// `modreq` rather than `modopt`
        required: bool,
        /// The modifier type, e.g. `System.Runtime.CompilerServices.IsVolatile`
        modifier: TypeRefId,
        /// The modified type
        inner: Box<TypeSig>,
    },
    /// A pinned local variable
    Pinned(Box<TypeSig>),
}

impl TypeSig {
    /// `System.Void`
    pub const VOID: TypeSig = TypeSig::Primitive(PrimitiveType::Void);
    /// `System.Object`
    pub const OBJECT: TypeSig = TypeSig::Primitive(PrimitiveType::Object);
    /// `System.String`
    pub const STRING: TypeSig = TypeSig::Primitive(PrimitiveType::String);
    /// `System.Int32`
    pub const INT32: TypeSig = TypeSig::Primitive(PrimitiveType::I4);
    /// `System.Boolean`
    pub const BOOLEAN: TypeSig = TypeSig::Primitive(PrimitiveType::Boolean);

    /// A multi-dimensional array without declared sizes or bounds.
    #[must_use]
    pub fn array(element: TypeSig, rank: u32) -> Self {
        TypeSig::Array {
            element: Box::new(element),
            rank,
            sizes: Vec::new(),
            lower_bounds: Vec::new(),
        }
    }

    /// `true` for `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Primitive(PrimitiveType::Void))
    }

    /// The named type this signature is built on, if any.
    ///
    /// Arrays, pointers and by-refs are looked through; generic instantiations yield their
    /// generic definition.
    #[must_use]
    pub fn definition(&self) -> Option<TypeRefId> {
        match self {
            TypeSig::Class(id) | TypeSig::ValueType(id) => Some(*id),
            TypeSig::GenericInst { base, .. } => Some(*base),
            TypeSig::SzArray(inner)
            | TypeSig::Array { element: inner, .. }
            | TypeSig::ByRef(inner)
            | TypeSig::Ptr(inner)
            | TypeSig::Modified { inner, .. }
            | TypeSig::Pinned(inner) => inner.definition(),
            TypeSig::Primitive(_) | TypeSig::Var(_) | TypeSig::MVar(_) => None,
        }
    }

    /// Full name of the type, e.g. ``System.Collections.Generic.List`1<StardewValley.Object>``.
    #[must_use]
    pub fn full_name(&self, module: &Module) -> String {
        let mut name = String::new();
        self.write_name(module, &mut name);
        name
    }

    fn write_name(&self, module: &Module, out: &mut String) {
        match self {
            TypeSig::Primitive(primitive) => out.push_str(primitive.full_name()),
            TypeSig::Class(id) | TypeSig::ValueType(id) => {
                out.push_str(&module.type_full_name(*id));
            }
            TypeSig::GenericInst { base, args, .. } => {
                out.push_str(&module.type_full_name(*base));
                out.push('<');
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    arg.write_name(module, out);
                }
                out.push('>');
            }
            TypeSig::SzArray(element) => {
                element.write_name(module, out);
                out.push_str("[]");
            }
            TypeSig::Array { element, rank, .. } => {
                element.write_name(module, out);
                out.push('[');
                for _ in 1..*rank {
                    out.push(',');
                }
                out.push(']');
            }
            TypeSig::ByRef(inner) => {
                inner.write_name(module, out);
                out.push('&');
            }
            TypeSig::Ptr(inner) => {
                inner.write_name(module, out);
                out.push('*');
            }
            TypeSig::Var(index) => {
                let _ = write!(out, "!{index}");
            }
            TypeSig::Modified {
                required,
                modifier,
                inner,
            } => {
                inner.write_name(module, out);
                out.push_str(if *required { " modreq(" } else { " modopt(" });
                out.push_str(&module.type_full_name(*modifier));
                out.push(')');
            }
            TypeSig::Pinned(inner) => {
                inner.write_name(module, out);
                out.push_str(" pinned");
            }
            TypeSig::MVar(index) => {
                let _ = write!(out, "!!{index}");
            }
        }
    }

    /// `true` if a named type with the given full name appears anywhere in this signature,
    /// including inside generic arguments and element types.
    #[must_use]
    pub fn references_type(&self, module: &Module, full_name: &str) -> bool {
        let mut found = false;
        self.for_each_type_ref(&mut |id| {
            if !found && module.type_full_name(id) == full_name {
                found = true;
            }
        });
        found
    }

    /// Visit every type reference in the signature, outermost first.
    pub fn for_each_type_ref(&self, f: &mut dyn FnMut(TypeRefId)) {
        match self {
            TypeSig::Class(id) | TypeSig::ValueType(id) => f(*id),
            TypeSig::GenericInst { base, args, .. } => {
                f(*base);
                for arg in args {
                    arg.for_each_type_ref(f);
                }
            }
            TypeSig::SzArray(inner)
            | TypeSig::Array { element: inner, .. }
            | TypeSig::ByRef(inner)
            | TypeSig::Ptr(inner)
            | TypeSig::Pinned(inner) => inner.for_each_type_ref(f),
            TypeSig::Modified {
                modifier, inner, ..
            } => {
                f(*modifier);
                inner.for_each_type_ref(f);
            }
            TypeSig::Primitive(_) | TypeSig::Var(_) | TypeSig::MVar(_) => {}
        }
    }

    /// Replace every occurrence of `from` with `to`, returning the number of replacements.
    pub fn replace_type_ref(&mut self, from: TypeRefId, to: TypeRefId) -> usize {
        match self {
            TypeSig::Class(id) | TypeSig::ValueType(id) => {
                if *id == from {
                    *id = to;
                    1
                } else {
                    0
                }
            }
            TypeSig::GenericInst { base, args, .. } => {
                let mut count = 0;
                if *base == from {
                    *base = to;
                    count += 1;
                }
                for arg in args {
                    count += arg.replace_type_ref(from, to);
                }
                count
            }
            TypeSig::SzArray(inner)
            | TypeSig::Array { element: inner, .. }
            | TypeSig::ByRef(inner)
            | TypeSig::Ptr(inner)
            | TypeSig::Pinned(inner) => inner.replace_type_ref(from, to),
            TypeSig::Modified {
                modifier, inner, ..
            } => {
                let mut count = 0;
                if *modifier == from {
                    *modifier = to;
                    count += 1;
                }
                count + inner.replace_type_ref(from, to)
            }
            TypeSig::Primitive(_) | TypeSig::Var(_) | TypeSig::MVar(_) => 0,
        }
    }
}

/// Signature of a method: calling convention, return type and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method (implicit `this` argument)
    pub has_this: bool,
    /// Number of generic method parameters
    pub generic_param_count: u32,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types, excluding `this`
    pub params: Vec<TypeSig>,
}

impl MethodSig {
    /// An instance method signature.
    #[must_use]
    pub fn instance(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            generic_param_count: 0,
            return_type,
            params,
        }
    }

    /// A static method signature.
    #[must_use]
    pub fn static_method(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: false,
            generic_param_count: 0,
            return_type,
            params,
        }
    }

    /// Number of stack values consumed by a call, including `this`.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// `true` if the return type or any parameter type references the named type.
    #[must_use]
    pub fn references_type(&self, module: &Module, full_name: &str) -> bool {
        self.return_type.references_type(module, full_name)
            || self
                .params
                .iter()
                .any(|param| param.references_type(module, full_name))
    }

    /// Visit every type reference in the return type and parameters.
    pub fn for_each_type_ref(&self, f: &mut dyn FnMut(TypeRefId)) {
        self.return_type.for_each_type_ref(f);
        for param in &self.params {
            param.for_each_type_ref(f);
        }
    }

    /// Replace every occurrence of `from` with `to` in the return type and all parameters.
    pub fn replace_type_ref(&mut self, from: TypeRefId, to: TypeRefId) -> usize {
        let mut count = self.return_type.replace_type_ref(from, to);
        for param in &mut self.params {
            count += param.replace_type_ref(from, to);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::references::{AssemblyRef, AssemblyVersion, ResolutionScope, TypeRef};

    fn module() -> (Module, TypeRefId, TypeRefId) {
        let mut module = Module::new("Test");
        let corlib = module.add_assembly_ref(AssemblyRef::new(
            "mscorlib",
            AssemblyVersion::new(4, 0, 0, 0),
        ));
        let game = module.add_assembly_ref(AssemblyRef::new(
            "StardewValley",
            AssemblyVersion::new(1, 5, 0, 0),
        ));
        let list = module.import_type(TypeRef::new(
            "System.Collections.Generic",
            "List`1",
            ResolutionScope::Assembly(corlib),
        ));
        let item = module.import_type(TypeRef::new(
            "StardewValley",
            "Item",
            ResolutionScope::Assembly(game),
        ));
        (module, list, item)
    }

    #[test]
    fn generic_full_name() {
        let (module, list, item) = module();
        let sig = TypeSig::GenericInst {
            value_type: false,
            base: list,
            args: vec![TypeSig::Class(item)],
        };
        assert_eq!(
            sig.full_name(&module),
            "System.Collections.Generic.List`1<StardewValley.Item>"
        );
        assert_eq!(sig.definition(), Some(list));

        let array = TypeSig::array(TypeSig::INT32, 2);
        assert_eq!(array.full_name(&module), "System.Int32[,]");
        assert_eq!(
            TypeSig::ByRef(Box::new(TypeSig::SzArray(Box::new(TypeSig::Class(item)))))
                .full_name(&module),
            "StardewValley.Item[]&"
        );
    }

    #[test]
    fn references_through_generics() {
        let (module, list, item) = module();
        let sig = TypeSig::SzArray(Box::new(TypeSig::GenericInst {
            value_type: false,
            base: list,
            args: vec![TypeSig::Class(item)],
        }));
        assert!(sig.references_type(&module, "StardewValley.Item"));
        assert!(!sig.references_type(&module, "StardewValley.Farmer"));

        let method = MethodSig::static_method(TypeSig::VOID, vec![sig]);
        assert!(method.references_type(&module, "StardewValley.Item"));
        assert_eq!(method.arg_count(), 1);
    }

    #[test]
    fn replace_all_occurrences() {
        let (_, list, item) = module();
        let other = TypeRefId::new(7);
        let mut sig = MethodSig::instance(
            TypeSig::Class(item),
            vec![TypeSig::GenericInst {
                value_type: false,
                base: list,
                args: vec![TypeSig::Class(item), TypeSig::Class(item)],
            }],
        );
        assert_eq!(sig.replace_type_ref(item, other), 3);
        assert_eq!(sig.return_type, TypeSig::Class(other));
        assert_eq!(sig.replace_type_ref(item, other), 0);
    }

    #[test]
    fn modifiers_are_walked() {
        let (module, list, item) = module();
        let mut sig = TypeSig::Pinned(Box::new(TypeSig::Modified {
            required: true,
            modifier: list,
            inner: Box::new(TypeSig::Class(item)),
        }));
        assert_eq!(sig.definition(), Some(item));
        assert_eq!(
            sig.full_name(&module),
            "StardewValley.Item modreq(System.Collections.Generic.List`1) pinned"
        );

        let mut seen = Vec::new();
        sig.for_each_type_ref(&mut |id| seen.push(id));
        assert_eq!(seen, vec![list, item]);
        assert_eq!(sig.replace_type_ref(list, item), 1);
    }

    #[test]
    fn primitive_codes() {
        for code in 0..=0x20 {
            if let Some(primitive) = PrimitiveType::from_element_type(code) {
                assert_eq!(primitive.element_type(), code);
            }
        }
        assert_eq!(PrimitiveType::from_element_type(0x12), None);
    }
}
