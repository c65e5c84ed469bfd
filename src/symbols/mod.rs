//! Debug symbol reading and writing.
//!
//! Mods ship their symbols in one of two formats: the legacy native format (an MSF container)
//! or the portable format (a `BSJB` metadata blob). The file extension is the same for both,
//! so [`ShimSymbolReader`] tries the native reader first and falls back to the portable reader
//! over the same bytes.
//!
//! Sequence points read from either format are offset based. Rewriting changes instruction
//! sizes, so [`SymbolTable`] binds every point to the [`InstrId`] at its offset; after
//! rewriting, the points are resolved against the new layout and written back out, normally
//! with [`PortableSymbolWriter`].
//!
//! # Example
//!
//! ```rust,no_run
//! use modshim::prelude::*;
//!
//! let module = Module::from_file("ExampleMod.dll".as_ref())?;
//! let bytes = std::fs::read("ExampleMod.pdb")?;
//!
//! let mut reader = ShimSymbolReader::new(bytes);
//! let table = SymbolTable::read(&module, &mut reader)?;
//! println!("{} methods with sequence points", table.len());
//!
//! let rewritten = PortableSymbolWriter.write(&module, &table)?;
//! # Ok::<(), modshim::Error>(())
//! ```

pub(crate) mod native;
pub(crate) mod portable;

pub use native::{NativeSymbolReader, NativeSymbolWriter};
pub use portable::{PortableSymbolReader, PortableSymbolWriter};

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use uguid::Guid;

use crate::{
    module::{instruction::InstrId, token::Token, DebugHeader, Module},
    Error, Result,
};

/// Line number marking a sequence point the debugger should step over.
pub const HIDDEN_LINE: u32 = 0x00FE_EFEE;

/// Source range covered by a sequence point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    /// Index into the symbol file's document list
    pub document: u32,
    /// First line, 1-based
    pub start_line: u32,
    /// First column, 1-based
    pub start_column: u16,
    /// Last line
    pub end_line: u32,
    /// Column after the last character
    pub end_column: u16,
}

impl SourceSpan {
    /// `true` for points the debugger should step over.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_LINE
    }
}

/// A sequence point addressed by IL offset, as stored in a symbol file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Offset of the first instruction of the statement
    pub offset: u32,
    /// Source range
    pub span: SourceSpan,
}

/// A sequence point addressed by instruction, independent of the body layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundSequencePoint {
    /// First instruction of the statement
    pub instruction: InstrId,
    /// Source range
    pub span: SourceSpan,
}

/// Offset-based debug information of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSymbols {
    /// `MethodDef` token
    pub token: Token,
    /// Sequence points ordered by offset
    pub points: Vec<SequencePoint>,
}

/// Contents of a symbol file, shared by both formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SymbolData {
    pub(crate) documents: Vec<String>,
    pub(crate) methods: HashMap<Token, Vec<SequencePoint>>,
}

impl SymbolData {
    /// The points of `table` at their offsets in the module's current layout.
    fn resolve(module: &Module, table: &SymbolTable) -> Self {
        SymbolData {
            documents: table.documents().to_vec(),
            methods: table
                .resolve(module)
                .into_iter()
                .map(|method| (method.token, method.points))
                .collect(),
        }
    }

    fn read_method(&self, token: Token) -> Option<MethodSymbols> {
        self.methods.get(&token).map(|points| MethodSymbols {
            token,
            points: points.clone(),
        })
    }
}

/// Reader for one symbol file format.
pub trait SymbolReader: Send {
    /// Check that the symbols belong to the module described by `header` and load them.
    ///
    /// # Errors
    /// Returns [`Error::Symbols`] if the data is not in this reader's format or belongs to a
    /// different build of the module.
    fn process_debug_header(&mut self, header: &DebugHeader) -> Result<()>;

    /// Debug information of one method; `None` if it has none or the header was not processed.
    fn read_method(&self, token: Token) -> Option<MethodSymbols>;

    /// Source documents referenced by the sequence points.
    fn documents(&self) -> &[String];
}

/// Symbol reader that accepts either format.
///
/// The native reader is tried first; if it rejects the data, it is discarded and the portable
/// reader is tried over the same bytes.
pub struct ShimSymbolReader {
    bytes: Arc<[u8]>,
    inner: Option<Box<dyn SymbolReader>>,
}

impl ShimSymbolReader {
    /// Reader over the bytes of a symbol file.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        ShimSymbolReader {
            bytes: bytes.into(),
            inner: None,
        }
    }

    /// `true` once a format accepted the data.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.is_some()
    }
}

impl SymbolReader for ShimSymbolReader {
    fn process_debug_header(&mut self, header: &DebugHeader) -> Result<()> {
        self.inner = None;

        let mut native = NativeSymbolReader::new(self.bytes.clone());
        let native_error = match native.process_debug_header(header) {
            Ok(()) => {
                self.inner = Some(Box::new(native));
                return Ok(());
            }
            Err(error) => error,
        };
        debug!("Native symbol reader failed ({native_error}), trying portable format");

        let mut portable = PortableSymbolReader::new(self.bytes.clone());
        match portable.process_debug_header(header) {
            Ok(()) => {
                self.inner = Some(Box::new(portable));
                Ok(())
            }
            Err(portable_error) => Err(Error::Symbols(format!(
                "no symbol format accepted the data - native: {native_error}; \
                 portable: {portable_error}"
            ))),
        }
    }

    fn read_method(&self, token: Token) -> Option<MethodSymbols> {
        self.inner.as_ref()?.read_method(token)
    }

    fn documents(&self) -> &[String] {
        match &self.inner {
            Some(inner) => inner.documents(),
            None => &[],
        }
    }
}

/// Writer for one symbol file format.
pub trait SymbolWriter {
    /// Encode the sequence points of `table` against the current layout of `module`.
    ///
    /// # Errors
    /// Returns [`Error::Symbols`] if the module has no debug header, or an encoding error if
    /// a value does not fit the format.
    fn write(&self, module: &Module, table: &SymbolTable) -> Result<Vec<u8>>;
}

/// Sequence points of a module, bound to instructions so they survive rewriting.
///
/// The table is keyed by `MethodDef` token. Rewriting never adds or removes methods, so tokens
/// stay stable; points whose instruction was removed are dropped when resolving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    documents: Vec<String>,
    methods: HashMap<Token, Vec<BoundSequencePoint>>,
}

impl SymbolTable {
    /// Validate `reader` against the module's debug header and bind its sequence points.
    ///
    /// # Errors
    /// Returns [`Error::Symbols`] if the module has no debug header or the reader rejects it.
    pub fn read(module: &Module, reader: &mut dyn SymbolReader) -> Result<Self> {
        let Some(header) = module.debug else {
            return Err(Error::Symbols(format!(
                "{} has no debug header",
                module.name
            )));
        };
        reader.process_debug_header(&header)?;
        Ok(Self::bind(module, &*reader))
    }

    /// Bind the sequence points of an already validated reader to the module's instructions.
    #[must_use]
    pub fn bind(module: &Module, reader: &dyn SymbolReader) -> Self {
        let mut methods = HashMap::new();
        for (token, _, method) in module.methods() {
            let (Some(body), Some(symbols)) = (method.body.as_ref(), reader.read_method(token))
            else {
                continue;
            };

            let offsets = body.offsets();
            let starts = &offsets[..body.instructions.len()];
            let mut bound = Vec::with_capacity(symbols.points.len());
            for point in symbols.points {
                let index = starts.partition_point(|start| *start <= point.offset);
                if index == 0 || point.offset >= offsets[body.instructions.len()] {
                    trace!(
                        "Dropping sequence point at IL_{:04x} outside {}",
                        point.offset,
                        method.name
                    );
                    continue;
                }
                bound.push(BoundSequencePoint {
                    instruction: body.instructions[index - 1].id,
                    span: point.span,
                });
            }
            if !bound.is_empty() {
                methods.insert(token, bound);
            }
        }

        SymbolTable {
            documents: reader.documents().to_vec(),
            methods,
        }
    }

    /// Source documents.
    #[must_use]
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    /// Bound sequence points of one method.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&[BoundSequencePoint]> {
        self.methods.get(&token).map(Vec::as_slice)
    }

    /// Number of methods with sequence points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// `true` if no method has sequence points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Resolve every bound point against the module's current layout, in token order.
    #[must_use]
    pub fn resolve(&self, module: &Module) -> Vec<MethodSymbols> {
        let mut resolved = Vec::new();
        for (token, _, method) in module.methods() {
            let (Some(body), Some(bound)) = (method.body.as_ref(), self.methods.get(&token))
            else {
                continue;
            };

            let offsets = body.offsets();
            let mut points: Vec<SequencePoint> = bound
                .iter()
                .filter_map(|point| {
                    let index = body.index_of(point.instruction)?;
                    Some(SequencePoint {
                        offset: offsets[index],
                        span: point.span,
                    })
                })
                .collect();
            points.sort_by_key(|point| point.offset);
            points.dedup_by_key(|point| point.offset);
            if !points.is_empty() {
                resolved.push(MethodSymbols { token, points });
            }
        }
        resolved
    }
}

/// Guid and age a writer stamps into its output.
pub(crate) fn debug_header(module: &Module) -> Result<DebugHeader> {
    module
        .debug
        .ok_or_else(|| Error::Symbols(format!("{} has no debug header", module.name)))
}

/// Reject symbols built for a different module.
pub(crate) fn check_guid(format: &str, expected: Guid, actual: Guid) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Symbols(format!(
            "{format} symbols belong to {actual}, module expects {expected}"
        )))
    }
}
