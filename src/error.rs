use thiserror::Error;

use crate::rules::IncompatibleModule;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Module Image Errors
/// - [`Error::Malformed`] - Corrupted or invalid module image
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::NotSupported`] - Valid input that uses a construct this crate does not handle
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewriting Errors
/// - [`Error::Incompatible`] - The mod uses constructs that no longer exist; the mod is rejected
/// - [`Error::StackMismatch`] - A replacement would have changed the evaluation stack shape
/// - [`Error::MultipleModules`] - The assembly declares more than one module
/// - [`Error::UnknownPlatform`] - The host platform could not be mapped to a [`crate::Platform`]
///
/// ## Recoverable Errors
/// - [`Error::Cache`] - Reading or writing the rewrite cache failed
/// - [`Error::Symbols`] - No symbol reader could process the debug symbols
///
/// # Examples
///
/// ```rust,no_run
/// use modshim::prelude::*;
/// use std::{path::Path, sync::Arc};
///
/// let game = Path::new("/games/Stardew Valley");
/// let map = PlatformAssemblyMap::from_game_directory(Platform::current()?, game)?;
/// let loader = ModLoader::new(
///     LoaderConfig::default(),
///     Arc::new(RuleSet::stardew_valley()),
///     Arc::new(map),
/// );
/// match loader.load(Path::new("Mods/Example/Example.dll")) {
///     Ok(loaded) => println!("loaded {} bytes", loaded.bytes.len()),
///     Err(Error::Incompatible(reason)) => eprintln!("{reason}"),
///     Err(e) => eprintln!("failed: {e}"),
/// }
/// # Ok::<(), modshim::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The module image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This input uses a construct that is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate while parsing the PE container.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// The mod references members or types which have no safe rewrite.
    ///
    /// This is fatal for the module: the whole mod is rejected. The payload carries every
    /// incompatible construct found in the module, each with its human-readable noun phrase.
    #[error("{0}")]
    Incompatible(IncompatibleModule),

    /// A rewrite would have changed the number of values pushed or popped.
    #[error(
        "Rewriting {instruction} in {method} would change the stack shape \
         ({expected:?} -> {actual:?})"
    )]
    StackMismatch {
        /// The method containing the instruction
        method: String,
        /// Mnemonic of the rewritten instruction
        instruction: String,
        /// `(pops, pushes)` of the original instruction
        expected: (usize, usize),
        /// `(pops, pushes)` of the replacement sequence
        actual: (usize, usize),
    },

    /// The assembly declares more than one module.
    ///
    /// Standard build tooling always produces single-module assemblies; anything else is
    /// rejected rather than partially rewritten.
    #[error("Assemblies with {0} modules are not supported")]
    MultipleModules(u32),

    /// The detected platform has no assembly map.
    #[error("Unknown platform '{0}'")]
    UnknownPlatform(String),

    /// I/O failure touching the rewrite cache.
    ///
    /// Always recovered by the loader, which falls back to rewriting.
    #[error("Rewrite cache - {0}")]
    Cache(String),

    /// Neither the native nor the portable symbol reader could process the symbols.
    ///
    /// Never blocks loading; the module loads without line information.
    #[error("Debug symbols - {0}")]
    Symbols(String),

    /// Recursion limit reached while walking a signature.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),
}
