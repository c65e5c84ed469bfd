// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # modshim
//!
//! A compatibility shim that rewrites third-party game mod assemblies so they load against the
//! current game version and platform.
//!
//! Mods are compiled against whatever build of the game their author had: a Windows build
//! linking the XNA framework, or a Linux/macOS build linking MonoGame, and an API surface that
//! may since have changed. `modshim` decodes each mod, redirects its assembly references to
//! the assemblies that exist on this platform, rewrites uses of changed APIs in place, and
//! rejects mods that use APIs with no safe replacement, listing every offending construct.
//!
//! ## Features
//!
//! - **Scope rewriting** - type references are moved off assemblies that do not exist on the
//!   current platform, including references nested in generic arguments and signatures
//! - **Instruction rewriting** - field reads become property getter calls, removed types are
//!   replaced, calls are redirected to facade types, all with a checked stack shape
//! - **Typed rejection** - incompatible mods fail with one error naming every problem
//! - **Rewrite cache** - rewritten mods are cached per content hash, tool version, platform
//!   and machine, and reused across launches
//! - **Debug symbols** - native and portable symbol files are read, carried through
//!   rewriting, and written back out in the portable format
//! - **Parallel loading** - independent mods are rewritten concurrently
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{path::Path, sync::Arc};
//! use modshim::prelude::*;
//!
//! let platform = Platform::current()?;
//! let game = Path::new("/games/Stardew Valley");
//! let map = PlatformAssemblyMap::from_game_directory(platform, game)?;
//! let loader = ModLoader::new(
//!     LoaderConfig::default().with_cache_dir(".cache/mods"),
//!     Arc::new(RuleSet::stardew_valley()),
//!     Arc::new(map),
//! );
//!
//! match loader.load(Path::new("Mods/Example/ExampleMod.dll")) {
//!     Ok(loaded) => println!("{} ready ({})", loaded.name, loaded.source),
//!     Err(Error::Incompatible(rejection)) => eprintln!("{rejection}"),
//!     Err(e) => eprintln!("failed: {e}"),
//! }
//! # Ok::<(), modshim::Error>(())
//! ```
//!
//! ## Rewriting a Module Directly
//!
//! ```rust
//! use std::sync::Arc;
//! use modshim::prelude::*;
//!
//! let map = PlatformAssemblyMap::new(Platform::Linux, ["Stardew Valley"], vec![
//!     TargetAssembly::new(AssemblyRef::new("StardewValley", AssemblyVersion::new(1, 5, 6, 0))),
//! ]);
//! let rewriter = AssemblyRewriter::new(Arc::new(RuleSet::stardew_valley()), Arc::new(map));
//!
//! let mut builder = ModuleBuilder::new("ExampleMod.dll");
//! let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
//! builder.type_ref(game, "StardewValley", "Game1");
//! let mut module = builder.build();
//!
//! let mut session = RewriteSession::new(module.name.clone());
//! assert!(rewriter.rewrite(&mut module, &mut session)?);
//! assert!(module.references_assembly("StardewValley"));
//! # Ok::<(), modshim::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`module`] - decoded module model, CIL instructions and the module image codec
//! - [`platform`] - platform detection and the [`PlatformAssemblyMap`]
//! - [`rules`] - the rewrite rule table, the instruction matcher and the instruction rewriter
//! - [`rewriter`] - [`rewriter::IlProcessor`], the scope rewriter and [`AssemblyRewriter`]
//! - [`cache`] - the on-disk [`cache::RewriteCache`] and its key
//! - [`symbols`] - symbol readers, the fallback shim and the portable writer
//! - [`loader`] - [`ModLoader`], tying everything together
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger. Rejected mods are
//! logged at `info`, recoverable cache and symbol problems at `warn`, rule matches and cache
//! decisions at `debug`, and individual scope redirects at `trace`.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use modshim::{Error, Module};
//!
//! match Module::from_file(std::path::Path::new("Mods/Example/ExampleMod.dll")) {
//!     Ok(module) => {
//!         println!("{} references {} assemblies", module.name, module.assembly_refs.len())
//!     }
//!     Err(Error::Malformed { message, .. }) => println!("Malformed file: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use modshim::prelude::*;
///
/// let rules = RuleSet::stardew_valley();
/// assert!(!rules.is_empty());
/// ```
pub mod prelude;

/// The decoded module model.
///
/// A [`Module`] holds the reference tables (assemblies, types, fields, methods) and the type
/// definitions of one mod, with method bodies decoded into [`module::instruction::Instruction`]
/// lists whose branch targets are instruction ids rather than offsets.
pub mod module;

/// Platform detection and the assembly substitution map.
pub mod platform;

/// Rewrite rules, the instruction matcher and the instruction rewriter.
pub mod rules;

/// The per-module rewrite pass.
pub mod rewriter;

/// The on-disk cache of rewritten mods.
pub mod cache;

/// Debug symbol readers and writers.
pub mod symbols;

/// The mod loading driver.
pub mod loader;

/// `modshim` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `modshim` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Entry point for loading mods. See [`loader::ModLoader`].
pub use loader::{LoadSource, LoadedMod, LoaderConfig, ModLoader};

/// A decoded mod module. See [`module::Module`].
pub use module::Module;

/// Host platform. See [`platform::Platform`].
pub use platform::{Platform, PlatformAssemblyMap};

/// The rewrite pass. See [`rewriter::AssemblyRewriter`].
pub use rewriter::AssemblyRewriter;

/// Rule tables. See [`rules::RuleSet`].
pub use rules::{RewriteRule, RuleSet};

/// Low-level file access and byte parsing.
pub use file::{parser::Parser, writer::Writer, File};
