//! Portable PDB symbols.
//!
//! A portable PDB is an ECMA-335 metadata root with the version string `PDB v1.0` and a
//! `#Pdb` stream next to the usual `#~`, `#Strings`, `#US`, `#GUID` and `#Blob` streams:
//!
//! ```text
//! #Pdb   pdb id (guid, u32 stamp) | u32 entry point token
//!        u64 referenced type system tables | u32 row count per referenced table
//! #~     Document                 name blob, hash algorithm guid, hash blob, language guid
//!        MethodDebugInformation   one row per MethodDef row: document, sequence points blob
//! ```
//!
//! Only the guid of the pdb id is checked against the module; the format carries no age.
//!
//! # Sequence points blob
//!
//! ```text
//! header   compressed local signature row, compressed initial document (only if the
//!          row's document column is 0)
//! records  δIL offset; 0 after the first record starts a document record followed by a
//!          compressed document row
//!          δlines (unsigned), δcolumns (unsigned if δlines is 0, signed otherwise)
//!          δlines = δcolumns = 0 marks a hidden point, nothing follows
//!          start line and column: unsigned for the first visible point, signed deltas
//!          from the previous visible point afterwards
//! ```

use std::{collections::HashMap, sync::Arc};

use log::trace;
use strum::IntoEnumIterator;
use uguid::{guid, Guid};

use crate::{
    file::{parser::Parser, writer::Writer},
    module::{
        image::{
            heaps::{BlobBuilder, Blobs, GuidBuilder, Guids, StringsBuilder, UserStringBuilder},
            metadata::{write_root, write_tables, MetadataRoot, TablesStream},
            tables::{
                RawTable, TableId, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS,
                MAX_TABLES, SORTED_TABLES,
            },
            MODULE_TYPE,
        },
        token::Token,
        DebugHeader, Module,
    },
    symbols::{
        check_guid, debug_header, MethodSymbols, SequencePoint, SourceSpan, SymbolData,
        SymbolReader, SymbolTable, SymbolWriter, HIDDEN_LINE,
    },
    Error, Result,
};

/// Metadata version string of a portable PDB.
pub const PORTABLE_VERSION: &str = "PDB v1.0";

/// Language guid of C# documents.
const LANGUAGE_CSHARP: Guid = guid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");

/// Tables of the type system image, the only ones the `#Pdb` row counts may name.
const TYPE_SYSTEM_TABLES: u64 = (1 << TableId::Document as u64) - 1;

fn symbols_error(error: Error) -> Error {
    match error {
        Error::Symbols(_) => error,
        other => Error::Symbols(format!("portable - {other}")),
    }
}

/// Contents of the `#Pdb` stream.
struct PdbStream {
    guid: Guid,
    stamp: u32,
    entry_point: u32,
    type_system_rows: [u32; MAX_TABLES],
}

impl PdbStream {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        let guid = parser.read_guid()?;
        let stamp = parser.read_le::<u32>()?;
        let entry_point = parser.read_le::<u32>()?;
        let referenced = parser.read_le::<u64>()?;
        if referenced & !TYPE_SYSTEM_TABLES != 0 {
            return Err(malformed_error!(
                "#Pdb stream references debug tables 0x{:016x}",
                referenced
            ));
        }

        let mut type_system_rows = [0; MAX_TABLES];
        for (number, rows) in type_system_rows.iter_mut().enumerate() {
            if referenced & (1 << number) != 0 {
                *rows = parser.read_le::<u32>()?;
            }
        }
        Ok(PdbStream {
            guid,
            stamp,
            entry_point,
            type_system_rows,
        })
    }

    fn write(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_guid(self.guid);
        writer.write_le::<u32>(self.stamp);
        writer.write_le::<u32>(self.entry_point);

        let referenced = self
            .type_system_rows
            .iter()
            .enumerate()
            .filter(|(_, rows)| **rows > 0)
            .fold(0_u64, |mask, (number, _)| mask | 1 << number);
        writer.write_le::<u64>(referenced);
        for rows in self.type_system_rows.iter().filter(|rows| **rows > 0) {
            writer.write_le::<u32>(*rows);
        }
        writer.into_inner()
    }
}

/// Join the parts of a document name blob.
fn document_name(blob: &[u8], blobs: &Blobs) -> Result<String> {
    let mut parser = Parser::new(blob);
    let separator = match parser.read_le::<u8>()? {
        0 => String::new(),
        byte if byte.is_ascii() => char::from(byte).to_string(),
        byte => {
            return Err(malformed_error!(
                "Document name separator 0x{:02x} is not ASCII",
                byte
            ))
        }
    };

    let mut parts = Vec::new();
    while parser.has_more_data() {
        let part = blobs.get(parser.read_compressed_uint()?)?;
        parts.push(
            std::str::from_utf8(part)
                .map_err(|_| malformed_error!("Document name part is not UTF-8"))?,
        );
    }
    Ok(parts.join(&separator))
}

fn encode_document_name(name: &str, blobs: &mut BlobBuilder) -> Result<Vec<u8>> {
    let separator = ['/', '\\'].into_iter().find(|candidate| name.contains(*candidate));

    let mut writer = Writer::new();
    match separator {
        Some(separator) => {
            writer.write_le::<u8>(separator as u8);
            for part in name.split(separator) {
                writer.write_compressed_uint(blobs.add(part.as_bytes())?)?;
            }
        }
        None => {
            writer.write_le::<u8>(0);
            writer.write_compressed_uint(blobs.add(name.as_bytes())?)?;
        }
    }
    Ok(writer.into_inner())
}

fn read_column(parser: &mut Parser, base: Option<u16>) -> Result<u16> {
    let value = match base {
        None => i64::from(parser.read_compressed_uint()?),
        Some(base) => i64::from(base) + i64::from(parser.read_compressed_int()?),
    };
    u16::try_from(value).map_err(|_| malformed_error!("Column {} out of range", value))
}

/// Decode a sequence points blob. `document` is the row's document column and
/// `documents` the number of Document rows.
fn parse_sequence_points(
    blob: &[u8],
    mut document: u32,
    documents: u32,
) -> Result<Vec<SequencePoint>> {
    let mut parser = Parser::new(blob);
    let _local_signature = parser.read_compressed_uint()?;
    if document == 0 {
        document = parser.read_compressed_uint()?;
    }

    let mut points = Vec::new();
    let mut offset = 0_u32;
    let mut previous: Option<(u32, u16)> = None;
    while parser.has_more_data() {
        let offset_delta = parser.read_compressed_uint()?;
        if !points.is_empty() && offset_delta == 0 {
            document = parser.read_compressed_uint()?;
            continue;
        }
        offset = offset
            .checked_add(offset_delta)
            .ok_or_else(|| malformed_error!("Sequence point offset overflows"))?;
        if document == 0 || document > documents {
            return Err(malformed_error!(
                "Sequence point references document {} of {}",
                document,
                documents
            ));
        }

        let line_delta = parser.read_compressed_uint()?;
        let column_delta = if line_delta == 0 {
            i64::from(parser.read_compressed_uint()?)
        } else {
            i64::from(parser.read_compressed_int()?)
        };

        if line_delta == 0 && column_delta == 0 {
            points.push(SequencePoint {
                offset,
                span: SourceSpan {
                    document: document - 1,
                    start_line: HIDDEN_LINE,
                    start_column: 0,
                    end_line: HIDDEN_LINE,
                    end_column: 0,
                },
            });
            continue;
        }

        let (start_line, start_column) = match previous {
            None => (
                parser.read_compressed_uint()?,
                read_column(&mut parser, None)?,
            ),
            Some((line, column)) => {
                let line = i64::from(line) + i64::from(parser.read_compressed_int()?);
                let line = u32::try_from(line)
                    .map_err(|_| malformed_error!("Start line {} out of range", line))?;
                (line, read_column(&mut parser, Some(column))?)
            }
        };
        let end_line = start_line
            .checked_add(line_delta)
            .ok_or_else(|| malformed_error!("Sequence point line overflows"))?;
        let end_column = i64::from(start_column) + column_delta;
        let end_column = u16::try_from(end_column)
            .map_err(|_| malformed_error!("Column {} out of range", end_column))?;

        previous = Some((start_line, start_column));
        points.push(SequencePoint {
            offset,
            span: SourceSpan {
                document: document - 1,
                start_line,
                start_column,
                end_line,
                end_column,
            },
        });
    }
    Ok(points)
}

/// Encode the points of one method. Returns the document column and the blob.
fn encode_sequence_points(token: Token, points: &[SequencePoint]) -> Result<(u32, Vec<u8>)> {
    let first_document = points.first().map_or(0, |point| point.span.document + 1);
    let single_document = points
        .iter()
        .all(|point| point.span.document + 1 == first_document);

    let mut writer = Writer::new();
    writer.write_compressed_uint(0)?;
    if !single_document {
        writer.write_compressed_uint(first_document)?;
    }

    let mut document = first_document;
    let mut previous: Option<(u32, u16)> = None;
    for (index, point) in points.iter().enumerate() {
        let span = &point.span;
        if span.document + 1 != document {
            document = span.document + 1;
            writer.write_compressed_uint(0)?;
            writer.write_compressed_uint(document)?;
        }

        if index == 0 {
            writer.write_compressed_uint(point.offset)?;
        } else {
            let delta = point.offset.saturating_sub(points[index - 1].offset);
            if delta == 0 {
                return Err(Error::Symbols(format!(
                    "{token:?} has two sequence points at IL_{:04x}",
                    point.offset
                )));
            }
            writer.write_compressed_uint(delta)?;
        }

        if span.is_hidden() {
            writer.write_compressed_uint(0)?;
            writer.write_compressed_uint(0)?;
            continue;
        }

        let Some(line_delta) = span.end_line.checked_sub(span.start_line) else {
            return Err(Error::Symbols(format!(
                "sequence point in {token:?} ends on line {} before it starts on line {}",
                span.end_line, span.start_line
            )));
        };
        let column_delta = i32::from(span.end_column) - i32::from(span.start_column);
        writer.write_compressed_uint(line_delta)?;
        if line_delta == 0 {
            let Ok(column_delta) = u32::try_from(column_delta) else {
                return Err(Error::Symbols(format!(
                    "sequence point in {token:?} ends on column {} before column {}",
                    span.end_column, span.start_column
                )));
            };
            // a zero width span would read back as hidden
            writer.write_compressed_uint(column_delta.max(1))?;
        } else {
            writer.write_compressed_int(column_delta)?;
        }

        match previous {
            None => {
                writer.write_compressed_uint(span.start_line)?;
                writer.write_compressed_uint(u32::from(span.start_column))?;
            }
            Some((line, column)) => {
                let line_delta = i64::from(span.start_line) - i64::from(line);
                let line_delta = i32::try_from(line_delta).map_err(|_| {
                    Error::Symbols(format!("line delta {line_delta} in {token:?} out of range"))
                })?;
                writer.write_compressed_int(line_delta)?;
                writer.write_compressed_int(i32::from(span.start_column) - i32::from(column))?;
            }
        }
        previous = Some((span.start_line, span.start_column));
    }

    let document_column = if single_document { first_document } else { 0 };
    Ok((document_column, writer.into_inner()))
}

fn decode(bytes: &[u8], header: &DebugHeader) -> Result<SymbolData> {
    let root = MetadataRoot::parse(bytes)?;
    let Some(pdb) = root.stream("#Pdb") else {
        return Err(Error::Symbols(format!(
            "metadata version {} has no #Pdb stream",
            root.version
        )));
    };
    let pdb = PdbStream::parse(pdb)?;
    check_guid("portable", header.guid, pdb.guid)?;
    trace!(
        "Portable symbols {} stamp 0x{:08x}, entry point 0x{:08x}",
        pdb.guid,
        pdb.stamp,
        pdb.entry_point
    );

    let tables_data = root
        .stream("#~")
        .ok_or_else(|| malformed_error!("Portable symbols have no #~ stream"))?;
    let tables = TablesStream::parse(tables_data, Some(&pdb.type_system_rows))?;
    let blobs = Blobs::new(root.stream("#Blob").unwrap_or_default());
    let guids = Guids::new(root.stream("#GUID").unwrap_or_default());

    let document_rows = tables.len(TableId::Document);
    let mut documents = Vec::with_capacity(document_rows as usize);
    for row in 1..=document_rows {
        let columns = tables.row(TableId::Document, row)?;
        documents.push(document_name(blobs.get(columns[0])?, &blobs)?);
        let language = guids.get(columns[3])?;
        if language != LANGUAGE_CSHARP {
            trace!("Document {} has language {}", documents[documents.len() - 1], language);
        }
    }

    let mut methods = HashMap::new();
    for row in 1..=tables.len(TableId::MethodDebugInformation) {
        let columns = tables.row(TableId::MethodDebugInformation, row)?;
        if columns[1] == 0 {
            continue;
        }
        let points = parse_sequence_points(blobs.get(columns[1])?, columns[0], document_rows)?;
        if !points.is_empty() {
            methods.insert(Token::from_parts(Token::METHOD_DEF, row), points);
        }
    }

    Ok(SymbolData { documents, methods })
}

/// Row counts of the module's definition tables, as the writer will lay them out.
fn type_system_rows(module: &Module) -> [u32; MAX_TABLES] {
    let has_module_type = module
        .type_defs
        .first()
        .is_some_and(|type_def| type_def.name == MODULE_TYPE && type_def.namespace.is_empty());

    let mut rows = [0; MAX_TABLES];
    rows[TableId::Module as usize] = 1;
    rows[TableId::TypeDef as usize] =
        (module.type_defs.len() + usize::from(!has_module_type)) as u32;
    rows[TableId::Field as usize] =
        module.type_defs.iter().map(|type_def| type_def.fields.len()).sum::<usize>() as u32;
    rows[TableId::MethodDef as usize] = module.methods().count() as u32;
    rows
}

/// Encode `data` as the portable PDB of `module`, identified by `guid` and `stamp`.
pub(crate) fn encode(
    guid: Guid,
    stamp: u32,
    data: &SymbolData,
    module: &Module,
) -> Result<Vec<u8>> {
    let mut type_system_rows = type_system_rows(module);
    let method_rows = data
        .methods
        .keys()
        .map(Token::row)
        .max()
        .unwrap_or(0)
        .max(type_system_rows[TableId::MethodDef as usize]);
    type_system_rows[TableId::MethodDef as usize] = method_rows;

    let strings = StringsBuilder::new();
    let mut blobs = BlobBuilder::new();
    let mut guids = GuidBuilder::new();
    let user_strings = UserStringBuilder::new();
    let mut tables: Vec<RawTable> = TableId::iter().map(RawTable::new).collect();

    let language = guids.add(LANGUAGE_CSHARP);
    for name in &data.documents {
        let name = encode_document_name(name, &mut blobs)?;
        let name = blobs.add(&name)?;
        tables[TableId::Document.position()].push(&[name, 0, 0, language]);
    }

    for row in 1..=method_rows {
        let token = Token::from_parts(Token::METHOD_DEF, row);
        let columns = match data.methods.get(&token) {
            Some(points) if !points.is_empty() => {
                let mut points = points.clone();
                points.sort_by_key(|point| point.offset);
                if let Some(point) = points
                    .iter()
                    .find(|point| point.span.document as usize >= data.documents.len())
                {
                    return Err(Error::Symbols(format!(
                        "{token:?} references document {} of {}",
                        point.span.document,
                        data.documents.len()
                    )));
                }
                let (document, blob) = encode_sequence_points(token, &points)?;
                [document, blobs.add(&blob)?]
            }
            _ => [0, 0],
        };
        tables[TableId::MethodDebugInformation.position()].push(&columns);
    }

    let mut heap_sizes = 0;
    if strings.is_large() {
        heap_sizes |= HEAP_LARGE_STRINGS;
    }
    if guids.is_large() {
        heap_sizes |= HEAP_LARGE_GUID;
    }
    if blobs.is_large() {
        heap_sizes |= HEAP_LARGE_BLOB;
    }

    let pdb = PdbStream {
        guid,
        stamp,
        entry_point: module.entry_point.map_or(0, |token| token.value()),
        type_system_rows,
    }
    .write();
    let tables = write_tables(&tables, heap_sizes, Some(&type_system_rows), SORTED_TABLES)?;
    let strings = strings.finish();
    let user_strings = user_strings.finish();
    let guids = guids.finish();
    let blobs = blobs.finish();

    write_root(
        PORTABLE_VERSION,
        &[
            ("#Pdb", &pdb),
            ("#~", &tables),
            ("#Strings", &strings),
            ("#US", &user_strings),
            ("#GUID", &guids),
            ("#Blob", &blobs),
        ],
    )
}

/// Reader for portable PDBs. Checks the guid only.
pub struct PortableSymbolReader {
    bytes: Arc<[u8]>,
    data: Option<SymbolData>,
}

impl PortableSymbolReader {
    /// Reader over the bytes of a symbol file.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        PortableSymbolReader {
            bytes: bytes.into(),
            data: None,
        }
    }
}

impl SymbolReader for PortableSymbolReader {
    fn process_debug_header(&mut self, header: &DebugHeader) -> Result<()> {
        self.data = None;
        self.data = Some(decode(&self.bytes, header).map_err(symbols_error)?);
        Ok(())
    }

    fn read_method(&self, token: Token) -> Option<MethodSymbols> {
        self.data.as_ref()?.read_method(token)
    }

    fn documents(&self) -> &[String] {
        self.data.as_ref().map_or(&[], |data| data.documents.as_slice())
    }
}

/// Writer for portable PDBs, used for every rewritten mod.
///
/// The pdb id is the module's debug guid and stamp, matching its debug directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableSymbolWriter;

impl SymbolWriter for PortableSymbolWriter {
    fn write(&self, module: &Module, table: &SymbolTable) -> Result<Vec<u8>> {
        let header = debug_header(module)?;
        let data = SymbolData::resolve(module, table);
        encode(header.guid, header.stamp, &data, module)
    }
}
