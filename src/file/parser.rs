//! Low-level byte stream parser for module images and symbol files.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser with bounds-checked access, ECMA-335 compressed integer decoding and length-prefixed
//! strings.
//!
//! # Usage Examples
//!
//! ```rust
//! use modshim::Parser;
//!
//! let data = [0x01, 0x02, 0x80, 0x80];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u16>()?, 0x0201);
//! assert_eq!(parser.read_compressed_uint()?, 0x80);
//! # Ok::<(), modshim::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A generic binary data parser for reading module images.
///
/// `Parser` provides a cursor-based interface for reading little-endian binary data. The
/// parser maintains an internal position cursor and provides bounds checking to prevent
/// buffer overruns when reading malformed or truncated data.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of bytes left after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Get the current position of the cursor.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Read a value of type `T` in little-endian byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there are not enough bytes left.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `length` raw bytes, borrowing them from the underlying buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there are not enough bytes left.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let Some(end) = self.position.checked_add(length) else {
            return Err(out_of_bounds_error!());
        };
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length or
    /// [`crate::Error::Malformed`] for an invalid leading byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed unsigned integer and convert it to a collection length or index.
    ///
    /// # Errors
    /// Same as [`Parser::read_compressed_uint`].
    pub fn read_compressed_usize(&mut self) -> Result<usize> {
        Ok(self.read_compressed_uint()? as usize)
    }

    /// Read a compressed signed integer as defined in ECMA-335 II.23.2.
    ///
    /// The sign bit is rotated into the lowest bit; the value width depends on the encoded
    /// length (6, 13 or 28 bits).
    ///
    /// # Errors
    /// Same as [`Parser::read_compressed_uint`].
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let start = self.position;
        let unsigned = self.read_compressed_uint()?;
        let width = match self.position - start {
            1 => 6,
            2 => 13,
            _ => 28,
        };

        let magnitude = (unsigned >> 1) as i32;
        if unsigned & 1 == 0 {
            Ok(magnitude)
        } else {
            Ok(magnitude - (1 << width))
        }
    }

    /// Read a null-terminated UTF-8 string. A missing terminator ends the string at the end
    /// of the data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let end = self.data[start..]
            .iter()
            .position(|byte| *byte == 0)
            .map_or(self.data.len(), |length| start + length);

        self.position = (end + 1).min(self.data.len());
        String::from_utf8(self.data[start..end].to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                end,
                e.utf8_error()
            )
        })
    }

    /// Advance the cursor to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the aligned position lies past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let aligned = self.position.next_multiple_of(alignment);
        self.seek(aligned)
    }

    /// Read a UTF-8 string prefixed with its compressed byte length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated input or
    /// [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_compressed_usize()?;
        let start = self.position;
        let bytes = self.read_bytes(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }

    /// Read a 16 byte GUID in its mixed-endian on-disk layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 16 bytes are left.
    pub fn read_guid(&mut self) -> Result<uguid::Guid> {
        let bytes = self.read_bytes(16)?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(bytes);
        Ok(uguid::Guid::from_bytes(guid))
    }

    /// Read a boolean stored as a single byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any value other than 0 or 1.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_le::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed_error!("Invalid boolean byte - {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x00, 0x00], 0x00),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
        }

        let mut parser = Parser::new(&[]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds)
        ));

        let mut parser = Parser::new(&[0xE0]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_compressed_int() {
        let test_cases = vec![
            (vec![0x06], 3),
            (vec![0x7B], -3),
            (vec![0x80, 0x80], 64),
            (vec![0x01], -64),
            (vec![0xC0, 0x00, 0x40, 0x00], 8192),
            (vec![0x80, 0x01], -8192),
            (vec![0xDF, 0xFF, 0xFF, 0xFE], 268_435_455),
            (vec![0xC0, 0x00, 0x00, 0x01], -268_435_456),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_int().unwrap(), expected, "{input:x?}");
        }
    }

    #[test]
    fn test_read_string_and_align() {
        let mut parser = Parser::new(b"abc\0de\0\0xyz");
        assert_eq!(parser.read_string_utf8().unwrap(), "abc");
        assert_eq!(parser.read_string_utf8().unwrap(), "de");
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);
        assert_eq!(parser.read_string_utf8().unwrap(), "xyz");
        assert!(!parser.has_more_data());
        assert!(parser.align(16).is_err());
    }

    #[test]
    fn test_read_prefixed_string() {
        let mut parser = Parser::new(&[0x03, b'a', b'b', b'c', 0x02, b'x']);
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "abc");
        assert!(parser.read_prefixed_string_utf8().is_err());
    }

    #[test]
    fn test_seek_and_bytes() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);
        parser.seek(2).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[3, 4]);
        assert!(!parser.has_more_data());
        assert!(parser.seek(5).is_err());
    }

    #[test]
    fn test_read_bool() {
        let mut parser = Parser::new(&[0, 1, 2]);
        assert!(!parser.read_bool().unwrap());
        assert!(parser.read_bool().unwrap());
        assert!(parser.read_bool().is_err());
    }
}
