//! The PE container around the CLI metadata (ECMA-335 II.25).
//!
//! Reading goes through goblin for the COFF, optional and section headers; the CLI header,
//! the CodeView debug entry and the Win32 resource tree are decoded here.
//!
//! Writing produces the layout the C# compiler uses for IL-only images:
//!
//! ```text
//! headers   DOS stub, PE signature, COFF and optional header, section table
//! .text     IAT | CLI header | method bodies | field data | resources | metadata
//!           | debug directory | import table and entry stub
//! .rsrc     Win32 resources, if any
//! .reloc    a single fixup for the entry stub
//! ```
//!
//! The IAT, import table, entry stub and `.reloc` section only exist in `PE32` images.

use std::collections::HashSet;

use goblin::pe::{data_directories::DataDirectoryType, section_table::SectionTable, PE};

use crate::{
    file::{parser::Parser, writer::Writer},
    module::assembly::{DebugHeader, ImageOptions, Win32Resources},
    Error, Result,
};

const DOS_STUB: [u8; 64] = [
    0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21, 0x54,
    0x68, 0x69, 0x73, 0x20, 0x70, 0x72, 0x6F, 0x67, 0x72, 0x61, 0x6D, 0x20, 0x63, 0x61, 0x6E,
    0x6E, 0x6F, 0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6E, 0x20, 0x69, 0x6E, 0x20, 0x44,
    0x4F, 0x53, 0x20, 0x6D, 0x6F, 0x64, 0x65, 0x2E, 0x0D, 0x0D, 0x0A, 0x24, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const PE_OFFSET: usize = 0x80;
const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const TEXT_RVA: u32 = 0x2000;
const HEADERS_SIZE: u32 = 0x200;

const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const PE32_IMAGE_BASE: u64 = 0x0040_0000;
const PE32_PLUS_IMAGE_BASE: u64 = 0x0001_8000_0000;

const SCN_CODE: u32 = 0x6000_0020;
const SCN_RESOURCES: u32 = 0x4000_0040;
const SCN_RELOC: u32 = 0x4200_0040;

/// Size of the CLI header (ECMA-335 II.25.3.3).
pub(crate) const CLI_HEADER_SIZE: u32 = 72;
const IAT_SIZE: u32 = 8;
const CLI_FLAG_STRONG_NAME_SIGNED: u32 = 0x0000_0008;

const DEBUG_DIRECTORY_SIZE: u32 = 28;
const DEBUG_TYPE_CODEVIEW: u32 = 2;
const CODEVIEW_SIGNATURE: &[u8; 4] = b"RSDS";
const PORTABLE_DEBUG_MAJOR: u16 = 0x0100;
const PORTABLE_DEBUG_MINOR: u16 = 0x504D;

const RESOURCE_SUBDIRECTORY: u32 = 0x8000_0000;
const MAX_RESOURCE_DEPTH: usize = 8;

#[derive(Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    pointer_to_raw_data: u32,
    size_of_raw_data: u32,
}

impl From<&SectionTable> for Section {
    fn from(section: &SectionTable) -> Self {
        Section {
            virtual_address: section.virtual_address,
            virtual_size: section.virtual_size,
            pointer_to_raw_data: section.pointer_to_raw_data,
            size_of_raw_data: section.size_of_raw_data,
        }
    }
}

/// Location and flags from the CLI header.
pub(crate) struct CliHeader {
    pub metadata_rva: u32,
    pub metadata_size: u32,
    pub flags: u32,
    pub entry_point: u32,
    pub resources_rva: u32,
    pub resources_size: u32,
}

/// A parsed managed PE image.
pub(crate) struct PeImage<'a> {
    data: &'a [u8],
    sections: Vec<Section>,
    pub options: ImageOptions,
    pub cli: CliHeader,
    pub debug: Option<DebugHeader>,
    pub win32_resources: Option<Win32Resources>,
}

impl<'a> PeImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let pe = PE::parse(data)?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };
        let directory = |wanted: DataDirectoryType| {
            optional_header
                .data_directories
                .dirs()
                .find(|(kind, entry)| {
                    *kind == wanted && entry.virtual_address != 0 && entry.size != 0
                })
                .map(|(_, entry)| (entry.virtual_address, entry.size))
        };
        let Some((clr_rva, _)) = directory(DataDirectoryType::ClrRuntimeHeader) else {
            return Err(malformed_error!(
                "File does not have a CLR runtime header directory"
            ));
        };
        let debug_directory = directory(DataDirectoryType::DebugTable);
        let resource_directory = directory(DataDirectoryType::ResourceTable);

        let mut image = PeImage {
            data,
            sections: pe.sections.iter().map(Section::from).collect(),
            options: ImageOptions {
                pe32_plus: optional_header.standard_fields.magic == PE32_PLUS_MAGIC,
                machine: pe.header.coff_header.machine,
                characteristics: pe.header.coff_header.characteristics,
                subsystem: optional_header.windows_fields.subsystem,
                dll_characteristics: optional_header.windows_fields.dll_characteristics,
                cli_flags: 0,
            },
            cli: CliHeader {
                metadata_rva: 0,
                metadata_size: 0,
                flags: 0,
                entry_point: 0,
                resources_rva: 0,
                resources_size: 0,
            },
            debug: None,
            win32_resources: None,
        };

        image.cli = image.read_cli_header(clr_rva)?;
        image.options.cli_flags = image.cli.flags;
        if let Some((rva, size)) = debug_directory {
            image.debug = image.read_debug_directory(rva, size)?;
        }
        if let Some((rva, size)) = resource_directory {
            image.win32_resources = Some(Win32Resources {
                rva,
                data: image.slice(rva, size as usize)?.to_vec(),
            });
        }
        Ok(image)
    }

    fn read_cli_header(&self, rva: u32) -> Result<CliHeader> {
        let mut parser = Parser::new(self.slice(rva, CLI_HEADER_SIZE as usize)?);
        let size = parser.read_le::<u32>()?;
        if size < CLI_HEADER_SIZE {
            return Err(malformed_error!("Invalid CLI header size {}", size));
        }
        // runtime version
        parser.read_le::<u16>()?;
        parser.read_le::<u16>()?;
        let metadata_rva = parser.read_le::<u32>()?;
        let metadata_size = parser.read_le::<u32>()?;
        let flags = parser.read_le::<u32>()?;
        let entry_point = parser.read_le::<u32>()?;
        let resources_rva = parser.read_le::<u32>()?;
        let resources_size = parser.read_le::<u32>()?;
        // strong name signature, code manager table
        parser.read_bytes(16)?;
        let vtable_fixups = parser.read_le::<u64>()?;
        if vtable_fixups != 0 {
            // mixed-mode image
            return Err(Error::NotSupported);
        }

        Ok(CliHeader {
            metadata_rva,
            metadata_size,
            flags,
            entry_point,
            resources_rva,
            resources_size,
        })
    }

    /// The first CodeView entry of the debug directory.
    fn read_debug_directory(&self, rva: u32, size: u32) -> Result<Option<DebugHeader>> {
        let mut parser = Parser::new(self.slice(rva, size as usize)?);
        for _ in 0..size / DEBUG_DIRECTORY_SIZE {
            // characteristics
            parser.read_le::<u32>()?;
            let stamp = parser.read_le::<u32>()?;
            let major = parser.read_le::<u16>()?;
            let minor = parser.read_le::<u16>()?;
            let kind = parser.read_le::<u32>()?;
            let data_size = parser.read_le::<u32>()? as usize;
            let data_rva = parser.read_le::<u32>()?;
            let data_pointer = parser.read_le::<u32>()? as usize;
            if kind != DEBUG_TYPE_CODEVIEW {
                continue;
            }

            let data = if data_rva != 0 {
                self.slice(data_rva, data_size)?
            } else {
                data_pointer
                    .checked_add(data_size)
                    .and_then(|end| self.data.get(data_pointer..end))
                    .ok_or(Error::OutOfBounds)?
            };
            let mut codeview = Parser::new(data);
            if codeview.read_bytes(4)? != CODEVIEW_SIGNATURE {
                log::debug!("Ignoring CodeView entry without RSDS signature");
                continue;
            }
            let guid = codeview.read_guid()?;
            let age = codeview.read_le::<u32>()?;
            return Ok(Some(DebugHeader {
                guid,
                age,
                stamp,
                portable: major == PORTABLE_DEBUG_MAJOR && minor == PORTABLE_DEBUG_MINOR,
            }));
        }
        Ok(None)
    }

    /// Translate an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let extent = section.virtual_size.max(section.size_of_raw_data);
            let Some(end) = section.virtual_address.checked_add(extent) else {
                return Err(malformed_error!(
                    "Section at 0x{:x} overflows",
                    section.virtual_address
                ));
            };
            if section.virtual_address <= rva && rva < end {
                let delta = rva - section.virtual_address;
                if delta >= section.size_of_raw_data {
                    return Err(out_of_bounds_error!());
                }
                return Ok(section.pointer_to_raw_data as usize + delta as usize);
            }
        }
        Err(malformed_error!("RVA 0x{:x} is not inside any section", rva))
    }

    /// `len` bytes at an RVA.
    pub fn slice(&self, rva: u32, len: usize) -> Result<&'a [u8]> {
        let offset = self.rva_to_offset(rva)?;
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(Error::OutOfBounds)
    }

    /// Everything from an RVA to the end of the raw data of its section.
    pub fn slice_from(&self, rva: u32) -> Result<&'a [u8]> {
        let offset = self.rva_to_offset(rva)?;
        let end = self
            .sections
            .iter()
            .find(|section| {
                let start = section.pointer_to_raw_data as usize;
                start <= offset && offset < start + section.size_of_raw_data as usize
            })
            .map(|section| section.pointer_to_raw_data as usize + section.size_of_raw_data as usize)
            .ok_or(Error::OutOfBounds)?;
        self.data.get(offset..end.min(self.data.len())).ok_or(Error::OutOfBounds)
    }

    pub fn metadata(&self) -> Result<&'a [u8]> {
        self.slice(self.cli.metadata_rva, self.cli.metadata_size as usize)
    }
}

/// RVAs of the method bodies and the field data of an image being written; both only
/// depend on what precedes them in `.text`.
pub(crate) fn text_layout(pe32_plus: bool, bodies_len: usize) -> (u32, u32) {
    let iat = if pe32_plus { 0 } else { IAT_SIZE };
    let bodies = TEXT_RVA + iat + CLI_HEADER_SIZE;
    let field_data = (bodies as usize + bodies_len).next_multiple_of(8) as u32;
    (bodies, field_data)
}

/// Everything placed into an image being written.
pub(crate) struct ImageParts<'a> {
    pub options: ImageOptions,
    pub entry_point: u32,
    pub bodies: &'a [u8],
    pub field_data: &'a [u8],
    pub resources: &'a [u8],
    pub metadata: &'a [u8],
    pub debug: Option<(DebugHeader, String)>,
    pub win32_resources: Option<&'a Win32Resources>,
}

struct SectionHeader {
    name: &'static [u8],
    rva: u32,
    data: Vec<u8>,
    characteristics: u32,
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4 GiB"))
}

/// Assemble a complete PE image.
pub(crate) fn write_image(parts: &ImageParts) -> Result<Vec<u8>> {
    let options = parts.options;
    let pe32_plus = options.pe32_plus;
    let image_base = if pe32_plus {
        PE32_PLUS_IMAGE_BASE
    } else {
        PE32_IMAGE_BASE
    };
    let (bodies_rva, field_rva) = text_layout(pe32_plus, parts.bodies.len());
    let rva_of = |text: &Writer| -> Result<u32> { Ok(TEXT_RVA + to_u32(text.pos())?) };

    // .text
    let mut text = Writer::new();
    let iat_rva = TEXT_RVA;
    if !pe32_plus {
        // patched once the hint/name entry is placed
        text.write_le::<u64>(0);
    }
    let cli_offset = text.pos();
    text.write_bytes(&[0; CLI_HEADER_SIZE as usize]);
    debug_assert_eq!(rva_of(&text)?, bodies_rva);
    text.write_bytes(parts.bodies);

    text.align(8);
    debug_assert!(parts.field_data.is_empty() || rva_of(&text)? == field_rva);
    text.write_bytes(parts.field_data);

    text.align(8);
    let resources_rva = rva_of(&text)?;
    text.write_bytes(parts.resources);

    text.align(4);
    let metadata_rva = rva_of(&text)?;
    text.write_bytes(parts.metadata);

    let mut debug_directory = None;
    if let Some((debug, path)) = &parts.debug {
        text.align(4);
        let directory_rva = rva_of(&text)?;
        let data_rva = directory_rva + DEBUG_DIRECTORY_SIZE;
        let data_size = to_u32(24 + path.len() + 1)?;
        let (major, minor) = if debug.portable {
            (PORTABLE_DEBUG_MAJOR, PORTABLE_DEBUG_MINOR)
        } else {
            (0, 0)
        };
        text.write_le::<u32>(0);
        text.write_le::<u32>(debug.stamp);
        text.write_le::<u16>(major);
        text.write_le::<u16>(minor);
        text.write_le::<u32>(DEBUG_TYPE_CODEVIEW);
        text.write_le::<u32>(data_size);
        text.write_le::<u32>(data_rva);
        // file offset, .text starts right after the headers
        text.write_le::<u32>(data_rva - TEXT_RVA + HEADERS_SIZE);
        text.write_bytes(CODEVIEW_SIGNATURE);
        text.write_guid(debug.guid);
        text.write_le::<u32>(debug.age);
        text.write_string_utf8(path);
        debug_directory = Some((directory_rva, DEBUG_DIRECTORY_SIZE));
    }

    let mut import_directory = None;
    let mut entry_stub = None;
    if !pe32_plus {
        text.align(4);
        let descriptor_rva = rva_of(&text)?;
        let lookup_rva = descriptor_rva + 40;
        let hint_name_rva = lookup_rva + 8;
        let entry_name: &str = if options.is_dll() {
            "_CorDllMain"
        } else {
            "_CorExeMain"
        };
        let dll_name_rva = hint_name_rva + 2 + (entry_name.len() as u32 + 1).next_multiple_of(2);

        text.write_le::<u32>(lookup_rva);
        text.write_le::<u32>(0);
        text.write_le::<u32>(0);
        text.write_le::<u32>(dll_name_rva);
        text.write_le::<u32>(iat_rva);
        text.write_bytes(&[0; 20]);
        text.write_le::<u32>(hint_name_rva);
        text.write_le::<u32>(0);
        text.write_le::<u16>(0);
        text.write_string_utf8(entry_name);
        text.align(2);
        text.write_string_utf8("mscoree.dll");

        text.align(4);
        text.write_le::<u16>(0);
        let stub_rva = rva_of(&text)?;
        text.write_bytes(&[0xFF, 0x25]);
        let iat_va = u32::try_from(image_base + u64::from(iat_rva))
            .map_err(|_| malformed_error!("Image base out of range"))?;
        text.write_le::<u32>(iat_va);

        text.patch_le::<u32>(0, hint_name_rva)?;
        import_directory = Some((descriptor_rva, 40));
        entry_stub = Some(stub_rva);
    }

    let metadata_size = to_u32(parts.metadata.len())?;
    let resources_size = to_u32(parts.resources.len())?;
    let mut cli = Writer::new();
    cli.write_le::<u32>(CLI_HEADER_SIZE);
    cli.write_le::<u16>(2);
    cli.write_le::<u16>(5);
    cli.write_le::<u32>(metadata_rva);
    cli.write_le::<u32>(metadata_size);
    cli.write_le::<u32>(options.cli_flags & !CLI_FLAG_STRONG_NAME_SIGNED);
    cli.write_le::<u32>(parts.entry_point);
    if resources_size > 0 {
        cli.write_le::<u32>(resources_rva);
        cli.write_le::<u32>(resources_size);
    } else {
        cli.write_le::<u64>(0);
    }
    let mut text = text.into_inner();
    let cli = cli.into_inner();
    text[cli_offset..cli_offset + cli.len()].copy_from_slice(&cli);

    let text_size = to_u32(text.len())?;
    let mut sections = vec![SectionHeader {
        name: b".text",
        rva: TEXT_RVA,
        data: text,
        characteristics: SCN_CODE,
    }];
    let mut next_rva = (TEXT_RVA + text_size).next_multiple_of(SECTION_ALIGNMENT);

    let mut resource_directory = None;
    if let Some(resources) = parts.win32_resources {
        let data = relocate_resources(&resources.data, resources.rva, next_rva)?;
        resource_directory = Some((next_rva, to_u32(data.len())?));
        let size = to_u32(data.len())?;
        sections.push(SectionHeader {
            name: b".rsrc",
            rva: next_rva,
            data,
            characteristics: SCN_RESOURCES,
        });
        next_rva = (next_rva + size).next_multiple_of(SECTION_ALIGNMENT);
    }

    let mut reloc_directory = None;
    if let Some(stub_rva) = entry_stub {
        let fixup = stub_rva + 2;
        let page = fixup & !0xFFF;
        let mut reloc = Writer::new();
        reloc.write_le::<u32>(page);
        reloc.write_le::<u32>(12);
        reloc.write_le::<u16>((3 << 12) | (fixup - page) as u16);
        reloc.write_le::<u16>(0);
        reloc_directory = Some((next_rva, 12));
        sections.push(SectionHeader {
            name: b".reloc",
            rva: next_rva,
            data: reloc.into_inner(),
            characteristics: SCN_RELOC,
        });
        next_rva = (next_rva + 12).next_multiple_of(SECTION_ALIGNMENT);
    }
    let size_of_image = next_rva;

    let raw_size = |section: &SectionHeader| -> Result<u32> {
        Ok(to_u32(section.data.len())?.next_multiple_of(FILE_ALIGNMENT))
    };
    let size_of_code = raw_size(&sections[0])?;
    let mut size_of_data = 0;
    for section in &sections[1..] {
        size_of_data += raw_size(section)?;
    }

    let mut out = Writer::new();
    // DOS header
    out.write_bytes(b"MZ");
    for value in [0x90_u16, 3, 0, 4, 0, 0xFFFF, 0, 0xB8, 0, 0, 0, 0x40, 0] {
        out.write_le::<u16>(value);
    }
    out.write_bytes(&[0; 32]);
    out.write_le::<u32>(PE_OFFSET as u32);
    out.write_bytes(&DOS_STUB);

    out.write_bytes(b"PE\0\0");
    out.write_le::<u16>(options.machine);
    out.write_le::<u16>(sections.len() as u16);
    out.write_le::<u32>(parts.debug.as_ref().map_or(0, |(debug, _)| debug.stamp));
    out.write_le::<u32>(0);
    out.write_le::<u32>(0);
    out.write_le::<u16>(if pe32_plus { 0xF0 } else { 0xE0 });
    out.write_le::<u16>(options.characteristics);

    // optional header, standard fields
    out.write_le::<u16>(if pe32_plus { PE32_PLUS_MAGIC } else { PE32_MAGIC });
    out.write_le::<u8>(48);
    out.write_le::<u8>(0);
    out.write_le::<u32>(size_of_code);
    out.write_le::<u32>(size_of_data);
    out.write_le::<u32>(0);
    out.write_le::<u32>(entry_stub.unwrap_or(0));
    out.write_le::<u32>(TEXT_RVA);
    if !pe32_plus {
        out.write_le::<u32>(sections.get(1).map_or(0, |section| section.rva));
        out.write_le::<u32>(image_base as u32);
    } else {
        out.write_le::<u64>(image_base);
    }

    // windows fields
    out.write_le::<u32>(SECTION_ALIGNMENT);
    out.write_le::<u32>(FILE_ALIGNMENT);
    for value in [4_u16, 0, 0, 0, 4, 0] {
        out.write_le::<u16>(value);
    }
    out.write_le::<u32>(0);
    out.write_le::<u32>(size_of_image);
    out.write_le::<u32>(HEADERS_SIZE);
    out.write_le::<u32>(0);
    out.write_le::<u16>(options.subsystem);
    out.write_le::<u16>(options.dll_characteristics);
    if pe32_plus {
        for value in [0x0040_0000_u64, 0x4000, 0x0010_0000, 0x2000] {
            out.write_le::<u64>(value);
        }
    } else {
        for value in [0x0010_0000_u32, 0x1000, 0x0010_0000, 0x1000] {
            out.write_le::<u32>(value);
        }
    }
    out.write_le::<u32>(0);
    out.write_le::<u32>(16);

    let mut directories = [(0_u32, 0_u32); 16];
    let mut set = |index: usize, entry: Option<(u32, u32)>| {
        if let Some(entry) = entry {
            directories[index] = entry;
        }
    };
    set(1, import_directory);
    set(2, resource_directory);
    set(5, reloc_directory);
    set(6, debug_directory);
    set(12, entry_stub.map(|_| (iat_rva, IAT_SIZE)));
    set(14, Some((TEXT_RVA + if pe32_plus { 0 } else { IAT_SIZE }, CLI_HEADER_SIZE)));
    for (rva, size) in directories {
        out.write_le::<u32>(rva);
        out.write_le::<u32>(size);
    }

    let mut pointer = HEADERS_SIZE;
    for section in &sections {
        let mut name = [0_u8; 8];
        name[..section.name.len()].copy_from_slice(section.name);
        out.write_bytes(&name);
        out.write_le::<u32>(to_u32(section.data.len())?);
        out.write_le::<u32>(section.rva);
        out.write_le::<u32>(raw_size(section)?);
        out.write_le::<u32>(pointer);
        out.write_bytes(&[0; 12]);
        out.write_le::<u32>(section.characteristics);
        pointer += raw_size(section)?;
    }
    if out.pos() > HEADERS_SIZE as usize {
        return Err(malformed_error!("PE headers exceed {} bytes", HEADERS_SIZE));
    }

    let mut out = out.into_inner();
    out.resize(HEADERS_SIZE as usize, 0);
    for section in &sections {
        out.extend_from_slice(&section.data);
        out.resize(out.len().next_multiple_of(FILE_ALIGNMENT as usize), 0);
    }
    Ok(out)
}

/// Move a Win32 resource tree to a new RVA, adjusting the RVA of every data entry.
pub(crate) fn relocate_resources(data: &[u8], old_rva: u32, new_rva: u32) -> Result<Vec<u8>> {
    let mut out = data.to_vec();
    let mut visited = HashSet::new();
    let mut pending = vec![(0_usize, 0_usize)];

    while let Some((offset, depth)) = pending.pop() {
        if depth > MAX_RESOURCE_DEPTH {
            return Err(malformed_error!("Resource directory nests too deeply"));
        }
        if !visited.insert(offset) {
            continue;
        }
        let mut parser = Parser::new(data);
        parser.seek(offset + 12)?;
        let count = usize::from(parser.read_le::<u16>()?) + usize::from(parser.read_le::<u16>()?);
        for _ in 0..count {
            // name or id
            parser.read_le::<u32>()?;
            let target = parser.read_le::<u32>()?;
            if target & RESOURCE_SUBDIRECTORY != 0 {
                pending.push(((target & !RESOURCE_SUBDIRECTORY) as usize, depth + 1));
                continue;
            }

            let entry = target as usize;
            if !visited.insert(entry) {
                continue;
            }
            let mut entry_parser = Parser::new(data);
            entry_parser.seek(entry)?;
            let rva = entry_parser.read_le::<u32>()?;
            let moved = rva
                .checked_sub(old_rva)
                .and_then(|delta| delta.checked_add(new_rva))
                .ok_or_else(|| {
                    malformed_error!("Resource data at 0x{:x} precedes its section", rva)
                })?;
            out.get_mut(entry..entry + 4)
                .ok_or(Error::OutOfBounds)?
                .copy_from_slice(&moved.to_le_bytes());
        }
    }
    Ok(out)
}

/// Path recorded in the CodeView entry of a module.
pub(crate) fn symbol_path(module_name: &str) -> String {
    let stem = module_name
        .rsplit_once('.')
        .map_or(module_name, |(stem, _)| stem);
    format!("{stem}.pdb")
}
