//! # modshim Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the modshim library. Import this module to get quick access to the essential
//! types for loading and rewriting mods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all modshim operations
pub use crate::Error;

/// The result type used throughout modshim
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Loading mods through the cache and the rewriter
pub use crate::loader::{LoadSource, LoadedMod, LoaderConfig, LoaderEvent, LoaderStats, ModLoader};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Module Model
// ================================================================================================

/// Decoded modules and their construction
pub use crate::module::{builder::ModuleBuilder, DebugHeader, Module};

/// Reference tables and their handles
pub use crate::module::references::{
    AssemblyRef, AssemblyRefId, AssemblyVersion, FieldRef, FieldRefId, MethodRef, MethodRefId,
    ResolutionScope, TypeRef, TypeRefId,
};

/// Signatures
pub use crate::module::signature::{MethodSig, PrimitiveType, TypeSig};

/// Definitions and method bodies
pub use crate::module::{
    method::{ExceptionHandler, ExceptionHandlerFlags, MethodAttributes, MethodBody, MethodDef},
    types::{FieldAttributes, FieldDef, TypeAttributes, TypeDef},
};

/// CIL instructions
pub use crate::module::{
    instruction::{InstrId, Instruction, Operand},
    opcodes::OpCode,
    token::Token,
};

// ================================================================================================
// Platform and Rules
// ================================================================================================

/// Platform detection and assembly substitution
pub use crate::platform::{Platform, PlatformAssemblyMap, TargetAssembly};

/// Rewrite rules and rejection reasons
pub use crate::rules::{
    Incompatibility, IncompatibleModule, RewriteRule, RuleKind, RuleSet, TypeTarget,
};

// ================================================================================================
// Rewriting
// ================================================================================================

/// The rewrite pass and its building blocks
pub use crate::rewriter::{
    AssemblyRewriter, IlProcessor, RewriteEvent, RewriteSession, TypeScopeRewriter,
};

// ================================================================================================
// Cache and Symbols
// ================================================================================================

/// The rewrite cache
pub use crate::cache::{
    CacheHit, CacheKey, MachineIdentity, RewriteCache, RewrittenAssembly, SemanticVersion,
};

/// Debug symbols
pub use crate::symbols::{
    PortableSymbolWriter, ShimSymbolReader, SymbolReader, SymbolTable, SymbolWriter,
};
