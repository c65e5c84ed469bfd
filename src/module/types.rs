//! Types defined by a module.

use bitflags::bitflags;

use crate::module::{
    attributes::{Constant, CustomAttribute, SecurityDecl},
    method::{GenericParam, MethodDef},
    references::MethodRefId,
    signature::{MethodSig, TypeSig},
    Module,
};

/// Full name of the attribute compilers attach to synthesized types and members.
pub const COMPILER_GENERATED_ATTRIBUTE: &str =
    "System.Runtime.CompilerServices.CompilerGeneratedAttribute";

/// Mask selecting the visibility bits of [`TypeAttributes`].
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Type definition flags (ECMA-335 II.23.1.15)
    pub struct TypeAttributes: u32 {
        /// Not visible outside the assembly
        const NOT_PUBLIC = 0x0000_0000;
        /// Visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested, public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested, private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested, family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested, assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested, family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Nested, family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Field offsets are given explicitly
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name carries special meaning
        const SPECIAL_NAME = 0x0000_0400;
        /// Name carries special meaning to the runtime
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// Imported from a type library
        const IMPORT = 0x0000_1000;
        /// Type is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Strings marshal as UTF-16
        const UNICODE_CLASS = 0x0001_0000;
        /// Strings marshal by platform
        const AUTO_CLASS = 0x0002_0000;
        /// Declarative security is attached
        const HAS_SECURITY = 0x0004_0000;
        /// Initialize the type before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field definition flags (ECMA-335 II.23.1.5)
    pub struct FieldAttributes: u16 {
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
        /// Only initialized in constructors
        const INIT_ONLY = 0x0020;
        /// Compile-time constant
        const LITERAL = 0x0040;
        /// Not serialized when the type is remoted
        const NOT_SERIALIZED = 0x0080;
        /// Name carries special meaning
        const SPECIAL_NAME = 0x0200;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// Name carries special meaning to the runtime
        const RT_SPECIAL_NAME = 0x0400;
        /// Field has marshalling information
        const HAS_FIELD_MARSHAL = 0x1000;
        /// Field has a default value
        const HAS_DEFAULT = 0x8000;
        /// Field has an initial value stored in the image
        const HAS_FIELD_RVA = 0x0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Role of a method attached to a property or event (ECMA-335 II.23.1.12)
    pub struct MethodSemanticsAttributes: u16 {
        /// Property setter
        const SETTER = 0x0001;
        /// Property getter
        const GETTER = 0x0002;
        /// Other accessor
        const OTHER = 0x0004;
        /// Event `add` accessor
        const ADD_ON = 0x0008;
        /// Event `remove` accessor
        const REMOVE_ON = 0x0010;
        /// Event `raise` accessor
        const FIRE = 0x0020;
    }
}

/// A field defined by a [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Flags
    pub flags: FieldAttributes,
    /// Declared type
    pub field_type: TypeSig,
    /// Default value of literal fields
    pub constant: Option<Constant>,
    /// Initial data mapped from the image (`static readonly` array initializers)
    pub initial_value: Option<Vec<u8>>,
    /// Offset within an explicitly laid out type
    pub offset: Option<u32>,
    /// Encoded native marshalling descriptor
    pub marshal: Option<Vec<u8>>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl FieldDef {
    /// A field without default value, layout or attributes.
    pub fn new(name: impl Into<String>, flags: FieldAttributes, field_type: TypeSig) -> Self {
        FieldDef {
            name: name.into(),
            flags,
            field_type,
            constant: None,
            initial_value: None,
            offset: None,
            marshal: None,
            custom_attributes: Vec::new(),
        }
    }
}

/// An interface implemented by a [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceImpl {
    /// The implemented interface
    pub interface: TypeSig,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Explicit packing and size of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    /// Field alignment, 0 for the default
    pub packing_size: u16,
    /// Total instance size, 0 for the computed size
    pub class_size: u32,
}

/// A method of the declaring type attached to a property or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticMethod {
    /// Role of the method
    pub semantics: MethodSemanticsAttributes,
    /// Index into the declaring type's [`TypeDef::methods`]
    pub method: usize,
}

/// A property defined by a [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Flags
    pub flags: u16,
    /// Property type as return type, indexer parameters as parameters
    pub sig: MethodSig,
    /// Default value
    pub constant: Option<Constant>,
    /// Accessors
    pub methods: Vec<SemanticMethod>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// An event defined by a [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDef {
    /// Event name
    pub name: String,
    /// Flags
    pub flags: u16,
    /// Delegate type
    pub event_type: TypeSig,
    /// Accessors
    pub methods: Vec<SemanticMethod>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// An explicit interface method implementation (`void IDisposable.Dispose()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodImpl {
    /// The implementing method
    pub body: MethodRefId,
    /// The implemented declaration
    pub declaration: MethodRefId,
}

/// A type defined by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Flags
    pub flags: TypeAttributes,
    /// Index of the enclosing type in [`crate::Module::type_defs`], for nested types
    pub enclosing: Option<usize>,
    /// Base type, `None` for interfaces and `System.Object`
    pub base_type: Option<TypeSig>,
    /// Implemented interfaces
    pub interfaces: Vec<InterfaceImpl>,
    /// Generic parameters and their constraints
    pub generic_params: Vec<GenericParam>,
    /// Explicit layout
    pub layout: Option<ClassLayout>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Methods
    pub methods: Vec<MethodDef>,
    /// Properties
    pub properties: Vec<PropertyDef>,
    /// Events
    pub events: Vec<EventDef>,
    /// Explicit interface implementations
    pub method_impls: Vec<MethodImpl>,
}

impl TypeDef {
    /// An empty class deriving from nothing.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        flags: TypeAttributes,
    ) -> Self {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            flags,
            enclosing: None,
            base_type: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            layout: None,
            custom_attributes: Vec::new(),
            security: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            method_impls: Vec::new(),
        }
    }

    /// Visibility part of the flags.
    #[must_use]
    pub fn visibility(&self) -> u32 {
        self.flags.bits() & TYPE_VISIBILITY_MASK
    }

    /// `true` for public top-level types and public nested types.
    ///
    /// Whether the enclosing chain is public as well is checked by
    /// [`crate::Module::is_type_exported`].
    #[must_use]
    pub fn is_public(&self) -> bool {
        match self.enclosing {
            None => self.visibility() == TypeAttributes::PUBLIC.bits(),
            Some(_) => self.visibility() == TypeAttributes::NESTED_PUBLIC.bits(),
        }
    }

    /// Types synthesized by a compiler: closures, iterators, anonymous types.
    #[must_use]
    pub fn is_compiler_generated(&self, module: &Module) -> bool {
        self.name.starts_with('<')
            || self.custom_attributes.iter().any(|attribute| {
                attribute.type_name(module).as_deref() == Some(COMPILER_GENERATED_ATTRIBUTE)
            })
    }

    /// Every type the definition itself mentions: base type, interfaces, generic constraints,
    /// field types, property signatures and event types.
    ///
    /// Method signatures and bodies are not included.
    pub fn type_sigs(&self) -> impl Iterator<Item = &TypeSig> {
        let properties = self.properties.iter().flat_map(|property| {
            std::iter::once(&property.sig.return_type).chain(property.sig.params.iter())
        });
        self.base_type
            .iter()
            .chain(self.interfaces.iter().map(|interface| &interface.interface))
            .chain(
                self.generic_params
                    .iter()
                    .flat_map(|param| param.constraints.iter()),
            )
            .chain(self.fields.iter().map(|field| &field.field_type))
            .chain(properties)
            .chain(self.events.iter().map(|event| &event.event_type))
    }

    /// Mutable counterpart of [`TypeDef::type_sigs`].
    pub fn type_sigs_mut(&mut self) -> impl Iterator<Item = &mut TypeSig> {
        let TypeDef {
            base_type,
            interfaces,
            generic_params,
            fields,
            properties,
            events,
            ..
        } = self;
        let properties = properties.iter_mut().flat_map(|property| {
            let sig = &mut property.sig;
            std::iter::once(&mut sig.return_type).chain(sig.params.iter_mut())
        });
        base_type
            .iter_mut()
            .chain(interfaces.iter_mut().map(|interface| &mut interface.interface))
            .chain(
                generic_params
                    .iter_mut()
                    .flat_map(|param| param.constraints.iter_mut()),
            )
            .chain(fields.iter_mut().map(|field| &mut field.field_type))
            .chain(properties)
            .chain(events.iter_mut().map(|event| &mut event.event_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::references::{
        AssemblyRef, AssemblyVersion, MethodRef, ResolutionScope, TypeRef,
    };

    #[test]
    fn visibility() {
        let public = TypeDef::new("StardewValley", "Game1", TypeAttributes::PUBLIC);
        assert!(public.is_public());

        let internal = TypeDef::new("StardewValley", "Helper", TypeAttributes::NOT_PUBLIC);
        assert!(!internal.is_public());

        let mut nested = TypeDef::new("", "Inner", TypeAttributes::NESTED_PUBLIC);
        assert!(!nested.is_public());
        nested.enclosing = Some(0);
        assert!(nested.is_public());
    }

    #[test]
    fn compiler_generated() {
        let mut module = Module::new("Test.dll");
        let corlib = module.add_assembly_ref(AssemblyRef::new(
            "mscorlib",
            AssemblyVersion::new(4, 0, 0, 0),
        ));
        let attribute = module.import_type(TypeRef::new(
            "System.Runtime.CompilerServices",
            "CompilerGeneratedAttribute",
            ResolutionScope::Assembly(corlib),
        ));
        let ctor = module.import_method_ref(MethodRef::new(
            TypeSig::Class(attribute),
            ".ctor",
            MethodSig::instance(TypeSig::VOID, Vec::new()),
        ));

        let closure = TypeDef::new("", "<>c__DisplayClass4_0", TypeAttributes::NESTED_PRIVATE);
        assert!(closure.is_compiler_generated(&module));

        let mut marked = TypeDef::new("StardewValley", "Cache", TypeAttributes::PUBLIC);
        assert!(!marked.is_compiler_generated(&module));
        marked
            .custom_attributes
            .push(CustomAttribute::without_arguments(ctor));
        assert!(marked.is_compiler_generated(&module));
    }

    #[test]
    fn definition_type_walk() {
        let mut type_def = TypeDef::new("Mod", "Handler", TypeAttributes::PUBLIC);
        type_def.base_type = Some(TypeSig::OBJECT);
        let mut param = GenericParam::new("T");
        param.constraints.push(TypeSig::STRING);
        type_def.generic_params.push(param);
        type_def
            .fields
            .push(FieldDef::new("count", FieldAttributes::PRIVATE, TypeSig::INT32));
        type_def.properties.push(PropertyDef {
            name: "Item".to_string(),
            flags: 0,
            sig: MethodSig::instance(TypeSig::BOOLEAN, vec![TypeSig::INT32]),
            constant: None,
            methods: Vec::new(),
            custom_attributes: Vec::new(),
        });

        assert_eq!(type_def.type_sigs().count(), 5);
        for sig in type_def.type_sigs_mut() {
            *sig = TypeSig::OBJECT;
        }
        assert_eq!(type_def.fields[0].field_type, TypeSig::OBJECT);
        assert_eq!(type_def.generic_params[0].constraints[0], TypeSig::OBJECT);
        assert_eq!(type_def.properties[0].sig.params[0], TypeSig::OBJECT);
    }
}
