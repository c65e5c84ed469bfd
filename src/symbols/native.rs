//! Native (Windows) PDB symbols.
//!
//! A native PDB is a multi-stream file (MSF 7.00): a superblock, free block maps, and a
//! stream directory listing the blocks of every stream. The streams read and written here:
//!
//! | Stream | Contents                                                               |
//! |--------|------------------------------------------------------------------------|
//! | 1      | PDB info: version, signature, age, guid, named stream map (`/names`)   |
//! | 2, 4   | TPI and IPI headers; managed symbols carry no CodeView types           |
//! | 3      | DBI: header, module info records, source file info                     |
//! | module | `S_GMANPROC` records (method token and address) and C13 line subsections |
//! | names  | `/names` string table holding the source file paths                    |
//!
//! Lines of a method are found through the address of its `S_GMANPROC` record: the line
//! subsection with the same segment and offset belongs to the method with that token.

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use uguid::Guid;

use crate::{
    file::{parser::Parser, writer::Writer},
    module::{token::Token, DebugHeader, Module},
    symbols::{
        check_guid, debug_header, MethodSymbols, SequencePoint, SourceSpan, SymbolData,
        SymbolReader, SymbolTable, SymbolWriter,
    },
    Error, Result,
};

/// Leading magic of an MSF 7.00 container.
pub const MSF_SIGNATURE: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";

/// Leading magic of the older MSF 2.00 container, which is not supported.
const MSF_SIGNATURE_V2: &[u8] = b"Microsoft C/C++ program database 2.00\r\n\x1aJG\0\0";

const BLOCK_SIZE: usize = 4096;
const NIL_STREAM: u32 = 0xFFFF_FFFF;

const INFO_STREAM: usize = 1;
const TPI_STREAM: usize = 2;
const DBI_STREAM: usize = 3;
const IPI_STREAM: usize = 4;
const NAMES_STREAM_NAME: &str = "/names";

const PDB_VERSION_VC70: u32 = 20_000_404;
const PDB_FEATURE_VC140: u32 = 20_140_508;
const TPI_VERSION_V80: u32 = 20_040_203;
const TPI_HEADER_SIZE: u32 = 56;
const TYPE_INDEX_BEGIN: u32 = 0x1000;
const DBI_VERSION_V70: u32 = 19_990_903;
const DBI_HEADER_SIZE: usize = 64;
const MODULE_INFO_SIZE: usize = 64;
const NIL_MODULE_STREAM: u16 = 0xFFFF;
const DBI_BUILD_14_0: u16 = 0x8E00;
const SECTION_CONTRIBUTIONS_V60: u32 = 0xF12E_BA2D;
const NAMES_SIGNATURE: u32 = 0xEFFE_EFFE;
const NAMES_VERSION: u32 = 1;

const CV_SIGNATURE_C13: u32 = 4;
const S_END: u16 = 0x0006;
const S_GMANPROC: u16 = 0x112A;
const S_LMANPROC: u16 = 0x112B;
const DEBUG_S_IGNORE: u32 = 0x8000_0000;
const DEBUG_S_LINES: u32 = 0xF2;
const DEBUG_S_FILECHKSMS: u32 = 0xF4;
const CV_LINES_HAVE_COLUMNS: u16 = 0x0001;
const CV_LINE_STATEMENT: u32 = 0x8000_0000;
const CV_LINE_MAX: u32 = 0x00FF_FFFF;
const CV_LINE_DELTA_MAX: u32 = 0x7F;
const CODE_SEGMENT: u16 = 1;

fn symbols_error(error: Error) -> Error {
    match error {
        Error::Symbols(_) => error,
        other => Error::Symbols(format!("native - {other}")),
    }
}

/// Streams of an MSF container.
struct Msf<'a> {
    data: &'a [u8],
    block_size: usize,
    block_count: usize,
    streams: Vec<(u32, Vec<u32>)>,
}

impl<'a> Msf<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        if data.starts_with(MSF_SIGNATURE_V2) {
            return Err(Error::Symbols(
                "MSF 2.00 program databases are not supported".to_string(),
            ));
        }
        if !data.starts_with(MSF_SIGNATURE) {
            return Err(Error::Symbols("missing MSF 7.00 signature".to_string()));
        }

        let mut parser = Parser::new(data);
        parser.seek(MSF_SIGNATURE.len())?;
        let block_size = parser.read_le::<u32>()? as usize;
        if !matches!(block_size, 512 | 1024 | 2048 | 4096) {
            return Err(malformed_error!("Invalid MSF block size {}", block_size));
        }
        let free_block_map = parser.read_le::<u32>()?;
        if !matches!(free_block_map, 1 | 2) {
            return Err(malformed_error!("Invalid free block map {}", free_block_map));
        }
        let block_count = parser.read_le::<u32>()? as usize;
        if block_count.saturating_mul(block_size) > data.len() {
            return Err(malformed_error!(
                "MSF announces {} blocks of {} bytes, file has {}",
                block_count,
                block_size,
                data.len()
            ));
        }
        let directory_size = parser.read_le::<u32>()? as usize;
        let _unknown = parser.read_le::<u32>()?;
        let block_map = parser.read_le::<u32>()?;

        let mut msf = Msf {
            data,
            block_size,
            block_count,
            streams: Vec::new(),
        };

        let directory_blocks = directory_size.div_ceil(block_size);
        if directory_blocks * 4 > block_size {
            return Err(malformed_error!(
                "MSF directory of {} bytes does not fit one block map",
                directory_size
            ));
        }
        let mut map = Parser::new(msf.block(block_map)?);
        let mut blocks = Vec::with_capacity(directory_blocks);
        for _ in 0..directory_blocks {
            blocks.push(map.read_le::<u32>()?);
        }
        let directory = msf.read(directory_size as u32, &blocks)?;

        let mut parser = Parser::new(&directory);
        let stream_count = parser.read_le::<u32>()? as usize;
        let mut sizes = Vec::with_capacity(stream_count.min(parser.remaining() / 4));
        for _ in 0..stream_count {
            sizes.push(parser.read_le::<u32>()?);
        }
        for size in sizes {
            let count = match size {
                NIL_STREAM => 0,
                size => (size as usize).div_ceil(block_size),
            };
            let mut blocks = Vec::with_capacity(count.min(parser.remaining() / 4));
            for _ in 0..count {
                blocks.push(parser.read_le::<u32>()?);
            }
            msf.streams.push((size, blocks));
        }
        Ok(msf)
    }

    fn block(&self, index: u32) -> Result<&'a [u8]> {
        let index = index as usize;
        if index >= self.block_count {
            return Err(malformed_error!(
                "MSF block {} of {}",
                index,
                self.block_count
            ));
        }
        let start = index * self.block_size;
        self.data
            .get(start..start + self.block_size)
            .ok_or_else(|| out_of_bounds_error!())
    }

    fn read(&self, size: u32, blocks: &[u32]) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(blocks.len() * self.block_size);
        for block in blocks {
            bytes.extend_from_slice(self.block(*block)?);
        }
        bytes.truncate(size as usize);
        Ok(bytes)
    }

    /// Contents of a stream; `None` for a missing or nil stream.
    fn stream(&self, index: usize) -> Result<Option<Vec<u8>>> {
        match self.streams.get(index) {
            Some((size, blocks)) if *size != NIL_STREAM => Ok(Some(self.read(*size, blocks)?)),
            _ => Ok(None),
        }
    }

    fn required_stream(&self, index: usize, name: &str) -> Result<Vec<u8>> {
        self.stream(index)?
            .ok_or_else(|| malformed_error!("Program database has no {} stream", name))
    }
}

/// Lay out streams in an MSF container. Stream 0, the old directory, is written empty.
fn write_msf(streams: &[Vec<u8>]) -> Result<Vec<u8>> {
    // superblock and both free block maps
    let mut next = 3_u32;
    let mut directory = Writer::new();
    directory.write_le::<u32>(streams.len() as u32 + 1);
    directory.write_le::<u32>(0);
    for stream in streams {
        let size = u32::try_from(stream.len())
            .map_err(|_| Error::Symbols("program database stream is too large".to_string()))?;
        directory.write_le::<u32>(size);
    }
    for stream in streams {
        for _ in 0..stream.len().div_ceil(BLOCK_SIZE) {
            directory.write_le::<u32>(next);
            next += 1;
        }
    }
    let directory = directory.into_inner();

    let directory_start = next;
    let directory_blocks = directory.len().div_ceil(BLOCK_SIZE) as u32;
    let block_map = directory_start + directory_blocks;
    let block_count = block_map + 1;
    if directory_blocks as usize * 4 > BLOCK_SIZE || block_count as usize > BLOCK_SIZE * 8 {
        return Err(Error::Symbols(format!(
            "program database of {block_count} blocks is too large"
        )));
    }

    let mut writer = Writer::new();
    writer.write_bytes(MSF_SIGNATURE);
    writer.write_le::<u32>(BLOCK_SIZE as u32);
    writer.write_le::<u32>(1);
    writer.write_le::<u32>(block_count);
    writer.write_le::<u32>(directory.len() as u32);
    writer.write_le::<u32>(0);
    writer.write_le::<u32>(block_map);
    writer.align(BLOCK_SIZE);

    // set bits mark free blocks
    let mut free_map = vec![0xFF_u8; BLOCK_SIZE];
    for block in 0..block_count as usize {
        free_map[block / 8] &= !(1 << (block % 8));
    }
    writer.write_bytes(&free_map);
    writer.write_bytes(&free_map);

    for stream in streams {
        writer.write_bytes(stream);
        writer.align(BLOCK_SIZE);
    }
    writer.write_bytes(&directory);
    writer.align(BLOCK_SIZE);
    for block in directory_start..block_map {
        writer.write_le::<u32>(block);
    }
    writer.align(BLOCK_SIZE);
    Ok(writer.into_inner())
}

/// The PDB info stream.
struct PdbInfo {
    signature: u32,
    age: u32,
    guid: Guid,
    named_streams: HashMap<String, u32>,
}

impl PdbInfo {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        let version = parser.read_le::<u32>()?;
        if version < PDB_VERSION_VC70 {
            return Err(Error::Symbols(format!(
                "program database version {version} is not supported"
            )));
        }
        let signature = parser.read_le::<u32>()?;
        let age = parser.read_le::<u32>()?;
        let guid = parser.read_guid()?;

        let names_size = parser.read_le::<u32>()? as usize;
        let names = parser.read_bytes(names_size)?;
        let size = parser.read_le::<u32>()?;
        let _capacity = parser.read_le::<u32>()?;
        let present = parser.read_le::<u32>()? as usize;
        parser.read_bytes(present.saturating_mul(4))?;
        let deleted = parser.read_le::<u32>()? as usize;
        parser.read_bytes(deleted.saturating_mul(4))?;

        let mut named_streams = HashMap::new();
        for _ in 0..size {
            let key = parser.read_le::<u32>()? as usize;
            let stream = parser.read_le::<u32>()?;
            let mut name = Parser::new(names);
            name.seek(key)?;
            named_streams.insert(name.read_string_utf8()?, stream);
        }

        Ok(PdbInfo {
            signature,
            age,
            guid,
            named_streams,
        })
    }

    fn write(&self) -> Vec<u8> {
        let mut entries: Vec<(&String, &u32)> = self.named_streams.iter().collect();
        entries.sort();

        let mut names = Writer::new();
        let mut keys = Vec::with_capacity(entries.len());
        for (name, stream) in &entries {
            keys.push((names.pos() as u32, **stream));
            names.write_string_utf8(name);
        }
        let names = names.into_inner();

        let mut writer = Writer::new();
        writer.write_le::<u32>(PDB_VERSION_VC70);
        writer.write_le::<u32>(self.signature);
        writer.write_le::<u32>(self.age);
        writer.write_guid(self.guid);
        writer.write_le::<u32>(names.len() as u32);
        writer.write_bytes(&names);

        // capacity equals size, so a lone entry lands in bucket 0
        let capacity = keys.len() as u32;
        writer.write_le::<u32>(capacity);
        writer.write_le::<u32>(capacity);
        let words = keys.len().div_ceil(32);
        writer.write_le::<u32>(words as u32);
        for word in 0..words {
            let bits = (keys.len() - word * 32).min(32);
            writer.write_le::<u32>(if bits == 32 { u32::MAX } else { (1 << bits) - 1 });
        }
        writer.write_le::<u32>(0);
        for (key, stream) in keys {
            writer.write_le::<u32>(key);
            writer.write_le::<u32>(stream);
        }
        writer.write_le::<u32>(PDB_FEATURE_VC140);
        writer.into_inner()
    }
}

/// A module info record of the DBI stream.
struct ModuleInfo {
    name: String,
    stream: u16,
    symbols_size: u32,
    c11_size: u32,
    c13_size: u32,
}

/// Module records of the DBI stream, checking its age.
fn parse_dbi(data: &[u8]) -> Result<(u32, Vec<ModuleInfo>)> {
    let mut parser = Parser::new(data);
    if parser.read_le::<i32>()? != -1 {
        return Err(malformed_error!("DBI stream has an old header"));
    }
    let _version = parser.read_le::<u32>()?;
    let age = parser.read_le::<u32>()?;
    parser.seek(24)?;
    let module_info_size = parser.read_le::<i32>()?;
    let module_info_size = usize::try_from(module_info_size)
        .map_err(|_| malformed_error!("Negative DBI module info size"))?;
    parser.seek(DBI_HEADER_SIZE)?;

    let mut records = Parser::new(parser.read_bytes(module_info_size)?);
    let mut modules = Vec::new();
    while records.remaining() >= MODULE_INFO_SIZE {
        // unused, section contribution, flags
        records.read_bytes(4 + 28 + 2)?;
        let stream = records.read_le::<u16>()?;
        let symbols_size = records.read_le::<u32>()?;
        let c11_size = records.read_le::<u32>()?;
        let c13_size = records.read_le::<u32>()?;
        // source file count, padding, unused, source and pdb path name indexes
        records.read_bytes(2 + 2 + 4 + 4 + 4)?;
        let name = records.read_string_utf8()?;
        let _object = records.read_string_utf8()?;
        records.align(4)?;
        modules.push(ModuleInfo {
            name,
            stream,
            symbols_size,
            c11_size,
            c13_size,
        });
    }
    Ok((age, modules))
}

/// The `/names` string table.
struct NameTable<'a> {
    buffer: &'a [u8],
}

impl<'a> NameTable<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        if parser.read_le::<u32>()? != NAMES_SIGNATURE {
            return Err(malformed_error!("Invalid /names signature"));
        }
        let _version = parser.read_le::<u32>()?;
        let size = parser.read_le::<u32>()? as usize;
        Ok(NameTable {
            buffer: parser.read_bytes(size)?,
        })
    }

    fn get(&self, offset: u32) -> Result<String> {
        let mut parser = Parser::new(self.buffer);
        parser.seek(offset as usize)?;
        parser.read_string_utf8()
    }
}

/// Hash of the `/names` buckets.
fn hash_name(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut chunks = bytes.chunks_exact(4);
    let mut hash = 0_u32;
    for chunk in chunks.by_ref() {
        hash ^= u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let mut rest = chunks.remainder();
    if rest.len() >= 2 {
        hash ^= u32::from(u16::from_le_bytes([rest[0], rest[1]]));
        rest = &rest[2..];
    }
    if let Some(byte) = rest.first() {
        hash ^= u32::from(*byte);
    }
    hash |= 0x2020_2020;
    hash ^= hash >> 11;
    hash ^ (hash >> 16)
}

/// Encode a `/names` table; returns it with the offset of each name.
fn write_names(names: &[String]) -> (Vec<u8>, Vec<u32>) {
    let mut buffer = Writer::new();
    buffer.write_le::<u8>(0);
    let mut offsets = Vec::with_capacity(names.len());
    for name in names {
        offsets.push(buffer.pos() as u32);
        buffer.write_string_utf8(name);
    }
    let buffer = buffer.into_inner();

    let mut buckets = vec![0_u32; (names.len() * 2).max(1)];
    for (name, offset) in names.iter().zip(&offsets) {
        let mut bucket = hash_name(name) as usize % buckets.len();
        while buckets[bucket] != 0 {
            bucket = (bucket + 1) % buckets.len();
        }
        buckets[bucket] = *offset;
    }

    let mut writer = Writer::new();
    writer.write_le::<u32>(NAMES_SIGNATURE);
    writer.write_le::<u32>(NAMES_VERSION);
    writer.write_le::<u32>(buffer.len() as u32);
    writer.write_bytes(&buffer);
    writer.write_le::<u32>(buckets.len() as u32);
    for bucket in buckets {
        writer.write_le::<u32>(bucket);
    }
    writer.write_le::<u32>(names.len() as u32);
    (writer.into_inner(), offsets)
}

/// A `DEBUG_S_LINES` subsection before its file ids are resolved.
struct LineSection {
    segment: u16,
    offset: u32,
    blocks: Vec<(u32, Vec<SequencePoint>)>,
}

fn parse_lines(data: &[u8]) -> Result<LineSection> {
    let mut parser = Parser::new(data);
    let offset = parser.read_le::<u32>()?;
    let segment = parser.read_le::<u16>()?;
    let flags = parser.read_le::<u16>()?;
    let _code_size = parser.read_le::<u32>()?;

    let mut blocks = Vec::new();
    while parser.has_more_data() {
        let start = parser.pos();
        let file = parser.read_le::<u32>()?;
        let count = parser.read_le::<u32>()? as usize;
        let block_size = parser.read_le::<u32>()? as usize;

        let mut lines = Vec::with_capacity(count.min(parser.remaining() / 8));
        for _ in 0..count {
            lines.push((parser.read_le::<u32>()?, parser.read_le::<u32>()?));
        }
        let mut points = Vec::with_capacity(lines.len());
        for (offset, line) in lines {
            let (start_column, end_column) = if flags & CV_LINES_HAVE_COLUMNS != 0 {
                (parser.read_le::<u16>()?, parser.read_le::<u16>()?)
            } else {
                (0, 0)
            };
            let start_line = line & CV_LINE_MAX;
            points.push(SequencePoint {
                offset,
                span: SourceSpan {
                    document: 0,
                    start_line,
                    start_column,
                    end_line: start_line + ((line >> 24) & CV_LINE_DELTA_MAX),
                    end_column,
                },
            });
        }
        let end = start
            .checked_add(block_size)
            .filter(|end| *end >= parser.pos())
            .ok_or_else(|| malformed_error!("Line block of {} bytes is too short", block_size))?;
        parser.seek(end)?;
        blocks.push((file, points));
    }
    Ok(LineSection {
        segment,
        offset,
        blocks,
    })
}

/// Procedures and line subsections of one module stream.
struct ModuleSymbols {
    procedures: HashMap<(u16, u32), Token>,
    checksums: Vec<(u32, u32)>,
    lines: Vec<LineSection>,
}

fn parse_module(data: &[u8], info: &ModuleInfo) -> Result<ModuleSymbols> {
    let mut parser = Parser::new(data);
    let signature = parser.read_le::<u32>()?;
    if signature != CV_SIGNATURE_C13 {
        return Err(malformed_error!(
            "Module {} has symbol signature {}",
            info.name,
            signature
        ));
    }

    let symbols_end = info.symbols_size as usize;
    let mut procedures = HashMap::new();
    while parser.pos() < symbols_end {
        let start = parser.pos();
        let length = usize::from(parser.read_le::<u16>()?);
        let kind = parser.read_le::<u16>()?;
        if matches!(kind, S_GMANPROC | S_LMANPROC) {
            // parent, end, next, length, debug start, debug end
            parser.read_bytes(24)?;
            let token = Token::new(parser.read_le::<u32>()?);
            let offset = parser.read_le::<u32>()?;
            let segment = parser.read_le::<u16>()?;
            procedures.insert((segment, offset), token);
        }
        parser.seek(start + 2 + length)?;
    }

    let c13_start = symbols_end + info.c11_size as usize;
    parser.seek(c13_start)?;
    let mut subsections = Parser::new(parser.read_bytes(info.c13_size as usize)?);
    let mut checksums = Vec::new();
    let mut lines = Vec::new();
    while subsections.has_more_data() {
        let kind = subsections.read_le::<u32>()?;
        let length = subsections.read_le::<u32>()? as usize;
        let data = subsections.read_bytes(length)?;
        subsections.align(4)?;
        if kind & DEBUG_S_IGNORE != 0 {
            continue;
        }
        match kind {
            DEBUG_S_FILECHKSMS => {
                let mut entries = Parser::new(data);
                while entries.has_more_data() {
                    let file = entries.pos() as u32;
                    let name = entries.read_le::<u32>()?;
                    let checksum_size = usize::from(entries.read_le::<u8>()?);
                    let _kind = entries.read_le::<u8>()?;
                    entries.read_bytes(checksum_size)?;
                    entries.align(4)?;
                    checksums.push((file, name));
                }
            }
            DEBUG_S_LINES => lines.push(parse_lines(data)?),
            _ => {}
        }
    }

    Ok(ModuleSymbols {
        procedures,
        checksums,
        lines,
    })
}

fn decode(bytes: &[u8], header: &DebugHeader) -> Result<SymbolData> {
    let msf = Msf::parse(bytes)?;

    let info = PdbInfo::parse(&msf.required_stream(INFO_STREAM, "info")?)?;
    check_guid("native", header.guid, info.guid)?;
    if info.age != header.age {
        return Err(Error::Symbols(format!(
            "native symbols have age {}, module expects {}",
            info.age, header.age
        )));
    }
    trace!("Native symbols {} signature 0x{:08x}", info.guid, info.signature);

    let (dbi_age, modules) = parse_dbi(&msf.required_stream(DBI_STREAM, "DBI")?)?;
    if dbi_age != info.age {
        debug!("DBI age {} differs from info age {}", dbi_age, info.age);
    }
    let names = match info.named_streams.get(NAMES_STREAM_NAME) {
        Some(stream) => msf.stream(*stream as usize)?,
        None => None,
    };
    let names = names.as_deref().map(NameTable::parse).transpose()?;

    let mut documents: Vec<String> = Vec::new();
    let mut methods: HashMap<Token, Vec<SequencePoint>> = HashMap::new();
    for module in &modules {
        if module.stream == NIL_MODULE_STREAM {
            continue;
        }
        let Some(stream) = msf.stream(usize::from(module.stream))? else {
            continue;
        };
        let symbols = parse_module(&stream, module)?;

        let mut files = HashMap::new();
        for (file, name) in &symbols.checksums {
            let Some(names) = &names else {
                return Err(malformed_error!("Source files without a /names stream"));
            };
            let name = names.get(*name)?;
            let document = match documents.iter().position(|known| *known == name) {
                Some(index) => index,
                None => {
                    documents.push(name);
                    documents.len() - 1
                }
            };
            files.insert(*file, document as u32);
        }

        for section in symbols.lines {
            let Some(token) = symbols.procedures.get(&(section.segment, section.offset)) else {
                trace!(
                    "Lines at {:04x}:{:08x} in {} have no procedure",
                    section.segment,
                    section.offset,
                    module.name
                );
                continue;
            };
            let points = methods.entry(*token).or_default();
            for (file, mut block) in section.blocks {
                let document = *files
                    .get(&file)
                    .ok_or_else(|| malformed_error!("Line block references file {}", file))?;
                for point in &mut block {
                    point.span.document = document;
                }
                points.extend(block);
            }
        }
    }
    for points in methods.values_mut() {
        points.sort_by_key(|point| point.offset);
    }
    methods.retain(|_, points| !points.is_empty());

    Ok(SymbolData { documents, methods })
}

fn tpi_header() -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_le::<u32>(TPI_VERSION_V80);
    writer.write_le::<u32>(TPI_HEADER_SIZE);
    writer.write_le::<u32>(TYPE_INDEX_BEGIN);
    writer.write_le::<u32>(TYPE_INDEX_BEGIN);
    writer.write_le::<u32>(0);
    // hash stream, hash auxiliary stream
    writer.write_le::<u16>(0xFFFF);
    writer.write_le::<u16>(0xFFFF);
    writer.write_le::<u32>(4);
    writer.write_le::<u32>(0x3_FFFF);
    for _ in 0..6 {
        writer.write_le::<u32>(0);
    }
    writer.into_inner()
}

fn write_symbol(writer: &mut Writer, kind: u16, body: &[u8]) {
    let length = (2 + body.len() + 2).next_multiple_of(4) - 2;
    writer.write_le::<u16>(length as u16);
    writer.write_le::<u16>(kind);
    writer.write_bytes(body);
    for _ in 0..length - 2 - body.len() {
        writer.write_le::<u8>(0);
    }
}

/// Line subsection of one method, one block per run of points in the same document.
fn write_lines(
    token: Token,
    address: u32,
    code_size: u32,
    points: &[SequencePoint],
) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.write_le::<u32>(address);
    writer.write_le::<u16>(CODE_SEGMENT);
    writer.write_le::<u16>(CV_LINES_HAVE_COLUMNS);
    writer.write_le::<u32>(code_size);

    for run in points.chunk_by(|a, b| a.span.document == b.span.document) {
        writer.write_le::<u32>(run[0].span.document * 8);
        writer.write_le::<u32>(run.len() as u32);
        writer.write_le::<u32>(12 + 12 * run.len() as u32);
        for point in run {
            let span = &point.span;
            if span.start_line > CV_LINE_MAX {
                return Err(Error::Symbols(format!(
                    "line {} in {token:?} does not fit a native line record",
                    span.start_line
                )));
            }
            let Some(mut delta) = span.end_line.checked_sub(span.start_line) else {
                return Err(Error::Symbols(format!(
                    "sequence point in {token:?} ends on line {} before it starts on line {}",
                    span.end_line, span.start_line
                )));
            };
            if delta > CV_LINE_DELTA_MAX {
                trace!("Clamping {delta} line span in {token:?}");
                delta = CV_LINE_DELTA_MAX;
            }
            writer.write_le::<u32>(point.offset);
            writer.write_le::<u32>(span.start_line | delta << 24 | CV_LINE_STATEMENT);
        }
        for point in run {
            writer.write_le::<u16>(point.span.start_column);
            writer.write_le::<u16>(point.span.end_column);
        }
    }
    Ok(writer.into_inner())
}

fn write_subsection(writer: &mut Writer, kind: u32, data: &[u8]) {
    writer.write_le::<u32>(kind);
    writer.write_le::<u32>(data.len() as u32);
    writer.write_bytes(data);
    writer.align(4);
}

/// Symbols and line subsections of the single module; returns the stream and the size of
/// its symbol part.
fn write_module(data: &SymbolData, module: &Module, offsets: &[u32]) -> Result<(Vec<u8>, u32)> {
    let methods: HashMap<Token, (&str, u32)> = module
        .methods()
        .map(|(token, _, method)| {
            let size = method
                .body
                .as_ref()
                .and_then(|body| body.offsets().last().copied())
                .unwrap_or(0);
            (token, (method.name.as_str(), size))
        })
        .collect();

    let mut tokens: Vec<&Token> = data.methods.keys().collect();
    tokens.sort();

    let mut symbols = Writer::new();
    symbols.write_le::<u32>(CV_SIGNATURE_C13);
    let mut lines = Writer::new();
    let mut address = 0_u32;
    for token in tokens {
        let mut points = data.methods[token].clone();
        if points.is_empty() {
            continue;
        }
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

        let last = points.last().map_or(0, |point| point.offset + 1);
        let (name, size) = match methods.get(token) {
            Some((name, size)) => ((*name).to_string(), (*size).max(last)),
            None => (format!("{token:?}"), last),
        };

        let mut body = Writer::new();
        let end = symbols.pos() as u32 + ((4 + 37 + name.len() + 1) as u32).next_multiple_of(4);
        body.write_le::<u32>(0);
        body.write_le::<u32>(end);
        body.write_le::<u32>(0);
        body.write_le::<u32>(size);
        body.write_le::<u32>(0);
        body.write_le::<u32>(size.saturating_sub(1));
        body.write_le::<u32>(token.value());
        body.write_le::<u32>(address);
        body.write_le::<u16>(CODE_SEGMENT);
        body.write_le::<u8>(0);
        body.write_le::<u16>(0);
        body.write_string_utf8(&name);
        write_symbol(&mut symbols, S_GMANPROC, &body.into_inner());
        write_symbol(&mut symbols, S_END, &[]);

        let section = write_lines(*token, address, size, &points)?;
        write_subsection(&mut lines, DEBUG_S_LINES, &section);
        address = address.checked_add(size.next_multiple_of(4)).ok_or_else(|| {
            Error::Symbols("methods do not fit a native address space".to_string())
        })?;
    }

    let mut checksums = Writer::new();
    for offset in offsets {
        checksums.write_le::<u32>(*offset);
        // no checksum, padding
        checksums.write_le::<u8>(0);
        checksums.write_le::<u8>(0);
        checksums.write_le::<u16>(0);
    }

    let symbols_size = symbols.pos() as u32;
    let mut stream = symbols;
    write_subsection(&mut stream, DEBUG_S_FILECHKSMS, &checksums.into_inner());
    stream.write_bytes(&lines.into_inner());
    Ok((stream.into_inner(), symbols_size))
}

fn write_dbi(
    age: u32,
    name: &str,
    module_stream: u16,
    module_stream_size: usize,
    symbols_size: u32,
    documents: &[String],
) -> Vec<u8> {
    let c13_size = module_stream_size as u32 - symbols_size;

    let mut modules = Writer::new();
    modules.write_le::<u32>(0);
    // section contribution: section, padding, offset, size, characteristics, module,
    // padding, data and relocation crcs
    modules.write_le::<u16>(0);
    modules.write_le::<u16>(0);
    modules.write_le::<i32>(0);
    modules.write_le::<i32>(0);
    modules.write_le::<u32>(0);
    modules.write_le::<u16>(0);
    modules.write_le::<u16>(0);
    modules.write_le::<u32>(0);
    modules.write_le::<u32>(0);
    modules.write_le::<u16>(0);
    modules.write_le::<u16>(module_stream);
    modules.write_le::<u32>(symbols_size);
    modules.write_le::<u32>(0);
    modules.write_le::<u32>(c13_size);
    modules.write_le::<u16>(documents.len() as u16);
    modules.write_le::<u16>(0);
    modules.write_le::<u32>(0);
    modules.write_le::<u32>(0);
    modules.write_le::<u32>(0);
    modules.write_string_utf8(name);
    modules.write_string_utf8(name);
    modules.align(4);
    let modules = modules.into_inner();

    let mut sources = Writer::new();
    sources.write_le::<u16>(1);
    sources.write_le::<u16>(documents.len() as u16);
    sources.write_le::<u16>(0);
    sources.write_le::<u16>(documents.len() as u16);
    let mut names = Writer::new();
    for document in documents {
        sources.write_le::<u32>(names.pos() as u32);
        names.write_string_utf8(document);
    }
    sources.write_bytes(&names.into_inner());
    sources.align(4);
    let sources = sources.into_inner();

    let mut writer = Writer::new();
    writer.write_le::<i32>(-1);
    writer.write_le::<u32>(DBI_VERSION_V70);
    writer.write_le::<u32>(age);
    // global, build, public, dll version, symbol records, rebuild
    writer.write_le::<u16>(0xFFFF);
    writer.write_le::<u16>(DBI_BUILD_14_0);
    writer.write_le::<u16>(0xFFFF);
    writer.write_le::<u16>(0);
    writer.write_le::<u16>(0xFFFF);
    writer.write_le::<u16>(0);
    writer.write_le::<i32>(modules.len() as i32);
    writer.write_le::<i32>(4);
    writer.write_le::<i32>(4);
    writer.write_le::<i32>(sources.len() as i32);
    // type server map, MFC type server, optional debug header, EC substream
    writer.write_le::<i32>(0);
    writer.write_le::<u32>(0);
    writer.write_le::<i32>(0);
    writer.write_le::<i32>(0);
    // flags, machine, padding
    writer.write_le::<u16>(0);
    writer.write_le::<u16>(0);
    writer.write_le::<u32>(0);

    writer.write_bytes(&modules);
    writer.write_le::<u32>(SECTION_CONTRIBUTIONS_V60);
    // empty section map
    writer.write_le::<u16>(0);
    writer.write_le::<u16>(0);
    writer.write_bytes(&sources);
    writer.into_inner()
}

/// Encode `data` as the program database of `module`, identified by `guid` and `age`.
pub(crate) fn encode(guid: Guid, age: u32, data: &SymbolData, module: &Module) -> Result<Vec<u8>> {
    const NAMES_STREAM: usize = 5;
    const MODULE_STREAM: usize = 6;

    let (names, offsets) = write_names(&data.documents);
    let (module_stream, symbols_size) = write_module(data, module, &offsets)?;

    let info = PdbInfo {
        signature: module.debug.map_or(0, |header| header.stamp),
        age,
        guid,
        named_streams: HashMap::from([(NAMES_STREAM_NAME.to_string(), NAMES_STREAM as u32)]),
    };
    let dbi = write_dbi(
        age,
        &module.name,
        MODULE_STREAM as u16,
        module_stream.len(),
        symbols_size,
        &data.documents,
    );

    let mut streams = vec![Vec::new(); MODULE_STREAM];
    streams[INFO_STREAM - 1] = info.write();
    streams[TPI_STREAM - 1] = tpi_header();
    streams[DBI_STREAM - 1] = dbi;
    streams[IPI_STREAM - 1] = tpi_header();
    streams[NAMES_STREAM - 1] = names;
    streams[MODULE_STREAM - 1] = module_stream;
    write_msf(&streams)
}

/// Reader for native program databases. Checks both guid and age.
pub struct NativeSymbolReader {
    bytes: Arc<[u8]>,
    data: Option<SymbolData>,
}

impl NativeSymbolReader {
    /// Reader over the bytes of a symbol file.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        NativeSymbolReader {
            bytes: bytes.into(),
            data: None,
        }
    }
}

impl SymbolReader for NativeSymbolReader {
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

/// Writer for native program databases.
///
/// Rewritten mods get portable symbols; this writer exists for tools that still expect the
/// native layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSymbolWriter;

impl SymbolWriter for NativeSymbolWriter {
    fn write(&self, module: &Module, table: &SymbolTable) -> Result<Vec<u8>> {
        let header = debug_header(module)?;
        let data = SymbolData::resolve(module, table);
        encode(header.guid, header.age, &data, module)
    }
}
