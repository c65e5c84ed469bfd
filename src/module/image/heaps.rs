//! Metadata heaps: `#Strings`, `#Blob`, `#GUID` and `#US` (ECMA-335 II.24.2.3 - II.24.2.5).
//!
//! Readers borrow the heap bytes; builders intern values and hand out the heap offsets used
//! by table rows and `ldstr` tokens.

use std::collections::HashMap;

use uguid::Guid;
use widestring::U16Str;

use crate::{
    file::{parser::Parser, writer::Writer},
    Result,
};

/// `#Strings`: NUL-terminated UTF-8.
#[derive(Clone, Copy)]
pub(crate) struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Strings { data }
    }

    pub fn get(&self, index: u32) -> Result<&'a str> {
        let start = index as usize;
        if start >= self.data.len() {
            if start == 0 {
                return Ok("");
            }
            return Err(out_of_bounds_error!());
        }
        let rest = &self.data[start..];
        let end = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end])
            .map_err(|error| malformed_error!("Invalid #Strings entry at {} - {}", index, error))
    }
}

/// `#Blob`: byte arrays prefixed with their compressed length.
#[derive(Clone, Copy)]
pub(crate) struct Blobs<'a> {
    data: &'a [u8],
}

impl<'a> Blobs<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Blobs { data }
    }

    pub fn get(&self, index: u32) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        let mut parser = Parser::new(self.data);
        parser.seek(index as usize)?;
        let length = parser.read_compressed_usize()?;
        parser.read_bytes(length)
    }
}

/// `#GUID`: 16 byte entries addressed by 1-based index.
#[derive(Clone, Copy)]
pub(crate) struct Guids<'a> {
    data: &'a [u8],
}

impl<'a> Guids<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Guids { data }
    }

    pub fn get(&self, index: u32) -> Result<Guid> {
        if index == 0 {
            return Ok(Guid::ZERO);
        }
        let mut parser = Parser::new(self.data);
        parser.seek((index as usize - 1) * 16)?;
        parser.read_guid()
    }
}

/// `#US`: UTF-16 literals followed by a terminal flag byte.
#[derive(Clone, Copy)]
pub(crate) struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        UserStrings { data }
    }

    pub fn get(&self, index: u32) -> Result<String> {
        let mut parser = Parser::new(self.data);
        parser.seek(index as usize)?;
        let length = parser.read_compressed_usize()?;
        let bytes = parser.read_bytes(length)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        U16Str::from_slice(&units)
            .to_string()
            .map_err(|error| malformed_error!("Invalid #US entry at {} - {}", index, error))
    }
}

/// Interns `#Strings` entries.
pub(crate) struct StringsBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringsBuilder {
    pub fn new() -> Self {
        StringsBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.index.get(value) {
            return *offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.index.insert(value.to_string(), offset);
        offset
    }

    pub fn is_large(&self) -> bool {
        self.data.len() > 0xFFFF
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.data.resize(self.data.len().next_multiple_of(4), 0);
        self.data
    }
}

/// Interns `#Blob` entries.
pub(crate) struct BlobBuilder {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, u32>,
}

impl BlobBuilder {
    pub fn new() -> Self {
        BlobBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }
        let offset = self.data.len() as u32;
        let mut writer = Writer::new();
        writer.write_compressed_usize(value.len())?;
        self.data.extend_from_slice(&writer.into_inner());
        self.data.extend_from_slice(value);
        self.index.insert(value.to_vec(), offset);
        Ok(offset)
    }

    pub fn is_large(&self) -> bool {
        self.data.len() > 0xFFFF
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.data.resize(self.data.len().next_multiple_of(4), 0);
        self.data
    }
}

/// Interns `#GUID` entries.
pub(crate) struct GuidBuilder {
    data: Vec<u8>,
    index: HashMap<Guid, u32>,
}

impl GuidBuilder {
    pub fn new() -> Self {
        GuidBuilder {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, value: Guid) -> u32 {
        if value == Guid::ZERO {
            return 0;
        }
        if let Some(index) = self.index.get(&value) {
            return *index;
        }
        self.data.extend_from_slice(&value.to_bytes());
        let index = (self.data.len() / 16) as u32;
        self.index.insert(value, index);
        index
    }

    pub fn is_large(&self) -> bool {
        self.data.len() / 16 > 0xFFFF
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Interns `#US` entries.
pub(crate) struct UserStringBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl UserStringBuilder {
    pub fn new() -> Self {
        UserStringBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Heap offset of the literal; the empty string gets a real entry, offset 0 is reserved.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }
        let offset = self.data.len() as u32;
        if offset > 0x00FF_FFFF {
            return Err(malformed_error!("#US heap exceeds the token range"));
        }

        let units: Vec<u16> = value.encode_utf16().collect();
        let mut writer = Writer::new();
        writer.write_compressed_usize(units.len() * 2 + 1)?;
        for unit in &units {
            writer.write_le::<u16>(*unit);
        }
        writer.write_le::<u8>(u8::from(units.iter().any(|unit| needs_special_handling(*unit))));

        self.data.extend_from_slice(&writer.into_inner());
        self.index.insert(value.to_string(), offset);
        Ok(offset)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.data.resize(self.data.len().next_multiple_of(4), 0);
        self.data
    }
}

/// Terminal byte rule of ECMA-335 II.24.2.4.
fn needs_special_handling(unit: u16) -> bool {
    if unit > 0xFF {
        return true;
    }
    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_interned() {
        let mut builder = StringsBuilder::new();
        assert_eq!(builder.add(""), 0);
        let game = builder.add("Game1");
        assert_eq!(game, 1);
        assert_eq!(builder.add("Farmer"), 7);
        assert_eq!(builder.add("Game1"), game);
        let data = builder.finish();
        assert_eq!(data.len() % 4, 0);

        let heap = Strings::new(&data);
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(7).unwrap(), "Farmer");
        assert_eq!(heap.get(9).unwrap(), "rmer");
        assert!(heap.get(100).is_err());
    }

    #[test]
    fn user_string_terminal_byte() {
        let mut builder = UserStringBuilder::new();
        let plain = builder.add("ab").unwrap();
        let quoted = builder.add("it's").unwrap();
        let empty = builder.add("").unwrap();
        let data = builder.finish();

        assert_eq!(&data[1..7], &[5, b'a', 0, b'b', 0, 0]);
        assert_eq!(data[quoted as usize + 9], 1);
        assert_eq!(&data[empty as usize..empty as usize + 2], &[1, 0]);

        let heap = UserStrings::new(&data);
        assert_eq!(heap.get(plain).unwrap(), "ab");
        assert_eq!(heap.get(quoted).unwrap(), "it's");
        assert_eq!(heap.get(empty).unwrap(), "");
    }

    #[test]
    fn blobs_and_guids() {
        let mut blobs = BlobBuilder::new();
        assert_eq!(blobs.add(&[]).unwrap(), 0);
        let sig = blobs.add(&[0x06, 0x08]).unwrap();
        assert_eq!(blobs.add(&[0x06, 0x08]).unwrap(), sig);
        let data = blobs.finish();
        assert_eq!(Blobs::new(&data).get(sig).unwrap(), &[0x06, 0x08]);
        assert!(Blobs::new(&data).get(40).is_err());

        let mut guids = GuidBuilder::new();
        let mvid = uguid::guid!("01234567-89ab-cdef-0123-456789abcdef");
        assert_eq!(guids.add(Guid::ZERO), 0);
        assert_eq!(guids.add(mvid), 1);
        assert_eq!(guids.add(mvid), 1);
        let data = guids.finish();
        assert_eq!(Guids::new(&data).get(1).unwrap(), mvid);
        assert_eq!(Guids::new(&data).get(0).unwrap(), Guid::ZERO);
        assert!(Guids::new(&data).get(2).is_err());
    }
}
