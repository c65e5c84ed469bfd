//! Custom attributes, security declarations and constant values attached to definitions.
//!
//! Attribute arguments, permission sets and constants are kept as their encoded blobs; only
//! the attribute constructor is resolved against the module's tables.

use crate::module::{references::MethodRefId, Module};

/// Prolog of every encoded custom attribute value (ECMA-335 II.23.3).
pub const CUSTOM_ATTRIBUTE_PROLOG: [u8; 2] = [0x01, 0x00];

/// A custom attribute applied to a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomAttribute {
    /// The attribute constructor
    pub constructor: MethodRefId,
    /// Encoded fixed and named arguments, starting with [`CUSTOM_ATTRIBUTE_PROLOG`]
    pub value: Vec<u8>,
}

impl CustomAttribute {
    /// An attribute with explicit encoded arguments.
    #[must_use]
    pub fn new(constructor: MethodRefId, value: Vec<u8>) -> Self {
        CustomAttribute { constructor, value }
    }

    /// An attribute applied through a parameterless constructor.
    #[must_use]
    pub fn without_arguments(constructor: MethodRefId) -> Self {
        let mut value = CUSTOM_ATTRIBUTE_PROLOG.to_vec();
        value.extend_from_slice(&[0, 0]);
        CustomAttribute { constructor, value }
    }

    /// Full name of the attribute type, or `None` if the constructor cannot be resolved.
    #[must_use]
    pub fn type_name(&self, module: &Module) -> Option<String> {
        let constructor = module.method_ref(self.constructor)?;
        let declaring = constructor.declaring.definition()?;
        Some(module.type_full_name(declaring))
    }
}

/// A declarative security attribute set (ECMA-335 II.22.11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDecl {
    /// Security action, e.g. `RequestMinimum`
    pub action: u16,
    /// Encoded permission set
    pub permission_set: Vec<u8>,
}

/// Compile-time constant of a field, parameter or property (ECMA-335 II.22.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    /// Element type of the value
    pub element_type: u8,
    /// Little-endian encoded value; UTF-16 for strings
    pub value: Vec<u8>,
}
