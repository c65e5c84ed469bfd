//! Assembly identity and the image-level data that travels with a module.

use sha1::{Digest, Sha1};
use uguid::Guid;

use crate::module::{
    attributes::{CustomAttribute, SecurityDecl},
    references::{AssemblyRefId, AssemblyVersion},
};

/// `SHA1` identifier of the assembly hash algorithm.
pub const HASH_ALGORITHM_SHA1: u32 = 0x8004;

/// Identity of the assembly the module belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDef {
    /// Short name
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`, e.g. `PublicKey` (0x1) or `Retargetable` (0x100)
    pub flags: u32,
    /// Hash algorithm used for the files of the assembly
    pub hash_algorithm: u32,
    /// Full public key of strong-named assemblies
    pub public_key: Vec<u8>,
    /// Culture, `None` for neutral assemblies
    pub culture: Option<String>,
    /// Assembly-level attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Assembly-level declarative security
    pub security: Vec<SecurityDecl>,
}

impl AssemblyDef {
    /// A neutral, unsigned assembly.
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        AssemblyDef {
            name: name.into(),
            version,
            flags: 0,
            hash_algorithm: HASH_ALGORITHM_SHA1,
            public_key: Vec::new(),
            culture: None,
            custom_attributes: Vec::new(),
            security: Vec::new(),
        }
    }
}

/// Public key token of a full public key: the last eight bytes of its SHA-1 hash, reversed.
#[must_use]
pub fn public_key_token(public_key: &[u8]) -> [u8; 8] {
    let hash = Sha1::digest(public_key);
    let mut token = [0_u8; 8];
    for (slot, byte) in token.iter_mut().zip(hash.iter().rev()) {
        *slot = *byte;
    }
    token
}

/// Link between a module and its debug symbols, taken from the CodeView debug directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugHeader {
    /// Symbol file signature; must match the signature stored in the symbol file
    pub guid: Guid,
    /// Incremented on every incremental link; checked by the native symbol format
    pub age: u32,
    /// Time stamp of the debug directory entry
    pub stamp: u32,
    /// The entry announces portable symbols
    pub portable: bool,
}

impl DebugHeader {
    /// A header for native symbols with a zero stamp.
    #[must_use]
    pub fn new(guid: Guid, age: u32) -> Self {
        DebugHeader {
            guid,
            age,
            stamp: 0,
            portable: false,
        }
    }

    /// The same link, announcing portable symbols.
    #[must_use]
    pub fn into_portable(self) -> Self {
        DebugHeader {
            portable: true,
            ..self
        }
    }
}

/// PE headers written around the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// `PE32+` instead of `PE32`
    pub pe32_plus: bool,
    /// COFF machine type
    pub machine: u16,
    /// COFF characteristics
    pub characteristics: u16,
    /// Windows subsystem
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: u16,
    /// CLI header flags, e.g. `ILOnly` (0x1) or `32BitRequired` (0x2)
    pub cli_flags: u32,
}

impl ImageOptions {
    /// COFF `IMAGE_FILE_DLL` characteristic.
    pub const DLL: u16 = 0x2000;

    /// `true` for libraries.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.characteristics & Self::DLL != 0
    }
}

impl Default for ImageOptions {
    /// An `AnyCPU` IL-only library, as produced by the C# compiler.
    fn default() -> Self {
        ImageOptions {
            pe32_plus: false,
            machine: 0x014C,
            characteristics: 0x2102,
            subsystem: 3,
            dll_characteristics: 0x8540,
            cli_flags: 1,
        }
    }
}

/// A managed resource embedded in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Resource name
    pub name: String,
    /// Visibility flags, `Public` (0x1) or `Private` (0x2)
    pub flags: u32,
    /// Resource contents
    pub data: Vec<u8>,
}

/// Where an [`ExportedType`] is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportedTypeScope {
    /// Forwarded to another assembly
    Assembly(AssemblyRefId),
    /// Nested in another exported type, by index into [`crate::Module::exported_types`]
    Nested(usize),
}

/// A type forwarded to another assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    /// Type flags
    pub flags: u32,
    /// `TypeDef` hint in the defining module, usually 0
    pub type_def_id: u32,
    /// Namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Defining scope
    pub scope: ExportedTypeScope,
}

/// The raw Win32 resource section.
///
/// Data entries inside the directory tree hold RVAs; they are relocated when the section moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Win32Resources {
    /// RVA the data entries currently point relative to
    pub rva: u32,
    /// Section contents
    pub data: Vec<u8>,
}
