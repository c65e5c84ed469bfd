//! Assembly, type and member references.
//!
//! References name an entity living in some assembly (its *scope*). Modules keep them in flat
//! tables and address them through copyable handles ([`AssemblyRefId`], [`TypeRefId`],
//! [`FieldRefId`], [`MethodRefId`]) so that rewriting a scope is a single table update rather
//! than a walk over an object graph.

use std::{fmt, str::FromStr};

use crate::{
    module::signature::{MethodSig, TypeSig},
    Error, Result,
};

define_id!(
    /// Handle to a row of [`crate::Module::assembly_refs`]
    AssemblyRefId
);
define_id!(
    /// Handle to a row of [`crate::Module::type_refs`]
    TypeRefId
);
define_id!(
    /// Handle to a row of [`crate::Module::field_refs`]
    FieldRefId
);
define_id!(
    /// Handle to a row of [`crate::Module::method_refs`]
    MethodRefId
);

/// Four part assembly version (`major.minor.build.revision`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    /// Parses `1`, `1.2`, `1.2.3` or `1.2.3.4`; missing parts default to zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0_u16; 4];
        let mut count = 0;
        for part in s.trim().split('.') {
            if count == 4 {
                return Err(malformed_error!("Too many version parts in '{}'", s));
            }
            parts[count] = part
                .parse()
                .map_err(|_| malformed_error!("Invalid version part '{}' in '{}'", part, s))?;
            count += 1;
        }

        Ok(AssemblyVersion::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// A reference to another assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyRef {
    /// Short name, e.g. `StardewValley`
    pub name: String,
    /// Referenced version
    pub version: AssemblyVersion,
    /// Culture, `None` for neutral assemblies
    pub culture: Option<String>,
    /// Public key token of strong-named assemblies
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyRef {
    /// A culture-neutral, unsigned reference.
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        AssemblyRef {
            name: name.into(),
            version,
            culture: None,
            public_key_token: None,
        }
    }

    /// Attach a public key token.
    #[must_use]
    pub fn with_public_key_token(mut self, token: [u8; 8]) -> Self {
        self.public_key_token = Some(token);
        self
    }
}

impl fmt::Display for AssemblyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral")
        )?;
        match self.public_key_token {
            Some(token) => {
                f.write_str(", PublicKeyToken=")?;
                for byte in token {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            None => f.write_str(", PublicKeyToken=null"),
        }
    }
}

/// Where a [`TypeRef`] resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionScope {
    /// Defined in the referencing module itself
    Module,
    /// Defined in a referenced assembly
    Assembly(AssemblyRefId),
    /// Nested inside another referenced type
    Nested(TypeRefId),
}

/// A named reference to a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Namespace, empty for nested types and the global namespace
    pub namespace: String,
    /// Simple name including any generic arity suffix (``List`1``)
    pub name: String,
    /// Resolution scope
    pub scope: ResolutionScope,
}

impl TypeRef {
    /// Create a new type reference.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        scope: ResolutionScope,
    ) -> Self {
        TypeRef {
            namespace: namespace.into(),
            name: name.into(),
            scope,
        }
    }

    /// `true` for types in the `System` namespace or any namespace below it.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.namespace == "System" || self.namespace.starts_with("System.")
    }
}

/// A reference to a field of some type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// The type declaring the field
    pub declaring: TypeSig,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: TypeSig,
}

impl FieldRef {
    /// Create a new field reference.
    pub fn new(declaring: TypeSig, name: impl Into<String>, field_type: TypeSig) -> Self {
        FieldRef {
            declaring,
            name: name.into(),
            field_type,
        }
    }
}

/// A reference to a method, optionally instantiated with generic method arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// The type declaring the method
    pub declaring: TypeSig,
    /// Method name
    pub name: String,
    /// Calling signature
    pub sig: MethodSig,
    /// Generic method arguments, empty unless this is a generic instantiation
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Create a new, non-generic method reference.
    pub fn new(declaring: TypeSig, name: impl Into<String>, sig: MethodSig) -> Self {
        MethodRef {
            declaring,
            name: name.into(),
            sig,
            generic_args: Vec::new(),
        }
    }
}
