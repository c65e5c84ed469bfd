//! Low-level byte order and safe reading/writing utilities for module images and symbol files.
//!
//! This module provides endian-aware, bounds-checked reading and writing of primitive values.
//! Every format in this crate (module images, native and portable symbol files) is
//! little-endian, so only little-endian helpers are provided.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - Trait defining byte conversion for primitive types
//! - [`crate::file::io::read_le_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::write_le_at`] - Write a value at an offset and advance the offset
//!
//! # Error Handling
//!
//! All reading and writing functions return [`crate::Result<T>`] and fail with
//! [`crate::Error::OutOfBounds`] if the buffer is too short.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading and writing operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait CilIO: Sized + Copy {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $size:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are not enough bytes after `offset`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = <T as CilIO>::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit after `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_sequential() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        let first: u16 = read_le_at(&data, &mut offset).unwrap();
        let second: u16 = read_le_at(&data, &mut offset).unwrap();
        let third: u32 = read_le_at(&data, &mut offset).unwrap();

        assert_eq!((first, second, third), (1, 2, 3));
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_out_of_bounds() {
        let data = [0x01, 0x02, 0x03];
        assert!(matches!(
            read_le_at::<u32>(&data, &mut 0),
            Err(Error::OutOfBounds)
        ));

        let mut offset = usize::MAX;
        assert!(matches!(
            read_le_at::<u8>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn write_then_patch() {
        let mut data = [0u8; 6];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0x0201_u16).unwrap();
        write_le_at(&mut data, &mut offset, -1_i32).unwrap();
        assert_eq!(data, [0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFF]);

        assert!(write_le_at(&mut data, &mut offset, 1_u8).is_err());
    }

    #[test]
    fn floats_keep_bit_pattern() {
        let value: f64 = read_le_at(&1.5_f64.to_le_bytes(), &mut 0).unwrap();
        assert_eq!(value.to_bits(), 1.5_f64.to_bits());
    }
}
