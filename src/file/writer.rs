//! Growable little-endian writer, the encoding counterpart of [`crate::file::parser::Parser`].

use crate::{
    file::io::{write_le_at, CilIO},
    Result,
};

/// Largest value representable by the ECMA-335 compressed unsigned integer encoding.
pub const MAX_COMPRESSED_UINT: u32 = 0x1FFF_FFFF;

/// Append-only binary writer producing the formats read by [`crate::Parser`].
#[derive(Debug, Default)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Writer { data: Vec::new() }
    }

    /// Current length of the written data, which is also the offset of the next write.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Append a value in little-endian byte order.
    pub fn write_le<T: CilIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Overwrite a previously written value at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
    pub fn patch_le<T: CilIO>(&mut self, offset: usize, value: T) -> Result<()> {
        let mut offset = offset;
        write_le_at(&mut self.data, &mut offset, value)
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `value` exceeds [`MAX_COMPRESSED_UINT`].
    pub fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        if value < 0x80 {
            self.data.push(value as u8);
        } else if value < 0x4000 {
            self.data.push(0x80 | (value >> 8) as u8);
            self.data.push(value as u8);
        } else if value <= MAX_COMPRESSED_UINT {
            self.data.push(0xC0 | (value >> 24) as u8);
            self.data.push((value >> 16) as u8);
            self.data.push((value >> 8) as u8);
            self.data.push(value as u8);
        } else {
            return Err(malformed_error!(
                "Value {} is too large for a compressed integer",
                value
            ));
        }

        Ok(())
    }

    /// Append a collection length or index as a compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `value` exceeds [`MAX_COMPRESSED_UINT`].
    pub fn write_compressed_usize(&mut self, value: usize) -> Result<()> {
        let value = u32::try_from(value)
            .map_err(|_| malformed_error!("Length {} does not fit into 32 bits", value))?;
        self.write_compressed_uint(value)
    }

    /// Append a compressed signed integer as defined in ECMA-335 II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `value` lies outside the 29-bit range.
    pub fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        let (width, max) = if (-64..64).contains(&value) {
            (6, 0x7F)
        } else if (-8192..8192).contains(&value) {
            (13, 0x3FFF)
        } else if (-0x1000_0000..0x1000_0000).contains(&value) {
            (28, MAX_COMPRESSED_UINT)
        } else {
            return Err(malformed_error!(
                "Value {} is too large for a compressed signed integer",
                value
            ));
        };

        let encoded = if value < 0 {
            ((((value + (1 << width)) as u32) << 1) | 1) & max
        } else {
            (value as u32) << 1
        };
        match width {
            6 => self.data.push(encoded as u8),
            13 => {
                self.data.push(0x80 | (encoded >> 8) as u8);
                self.data.push(encoded as u8);
            }
            _ => {
                self.data.push(0xC0 | (encoded >> 24) as u8);
                self.data.push((encoded >> 16) as u8);
                self.data.push((encoded >> 8) as u8);
                self.data.push(encoded as u8);
            }
        }
        Ok(())
    }

    /// Append a null-terminated UTF-8 string.
    pub fn write_string_utf8(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    /// Pad with zero bytes up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let aligned = self.data.len().next_multiple_of(alignment);
        self.data.resize(aligned, 0);
    }

    /// Append a UTF-8 string prefixed with its compressed byte length.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the string is too long to be encoded.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) -> Result<()> {
        self.write_compressed_usize(value.len())?;
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Append a GUID in its 16 byte on-disk layout.
    pub fn write_guid(&mut self, guid: uguid::Guid) {
        self.data.extend_from_slice(&guid.to_bytes());
    }

    /// Append a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    /// Consume the writer and return the written bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    #[test]
    fn compressed_uint_boundaries() {
        let values = [0, 0x7F, 0x80, 0x3FFF, 0x4000, MAX_COMPRESSED_UINT];
        let mut writer = Writer::new();
        for value in values {
            writer.write_compressed_uint(value).unwrap();
        }

        let data = writer.into_inner();
        assert_eq!(data.len(), 1 + 1 + 2 + 2 + 4 + 4);

        let mut parser = Parser::new(&data);
        for value in values {
            assert_eq!(parser.read_compressed_uint().unwrap(), value);
        }
    }

    #[test]
    fn compressed_uint_too_large() {
        let mut writer = Writer::new();
        assert!(writer.write_compressed_uint(MAX_COMPRESSED_UINT + 1).is_err());
    }

    #[test]
    fn compressed_int_widths() {
        let values = [0, 3, -3, 63, -64, 64, -65, 8191, -8192, 8192, 268_435_455, -268_435_456];
        let mut writer = Writer::new();
        for value in values {
            writer.write_compressed_int(value).unwrap();
        }
        assert!(writer.write_compressed_int(0x1000_0000).is_err());

        let data = writer.into_inner();
        assert_eq!(&data[..3], &[0x00, 0x06, 0x7B]);
        let mut parser = Parser::new(&data);
        for value in values {
            assert_eq!(parser.read_compressed_int().unwrap(), value);
        }
        assert!(!parser.has_more_data());
    }

    #[test]
    fn strings_and_alignment() {
        let mut writer = Writer::new();
        writer.write_string_utf8("abc");
        writer.write_le(1_u8);
        writer.align(4);
        writer.align(4);
        assert_eq!(writer.into_inner(), b"abc\0\x01\0\0\0".to_vec());
    }

    #[test]
    fn patch_previous_value() {
        let mut writer = Writer::new();
        writer.write_le(0_u32);
        writer.write_le(7_u8);
        writer.patch_le(0, 0xAABBCCDD_u32).unwrap();
        assert_eq!(writer.into_inner(), vec![0xDD, 0xCC, 0xBB, 0xAA, 7]);
    }
}
