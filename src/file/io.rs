//! Low-level little-endian reading and writing of fixed-width integers.
//!
//! Every PE structure is stored little-endian. This module provides the bounds-checked
//! primitives the [`crate::file::parser::Parser`] and [`crate::file::writer::Writer`]
//! cursors are built on.
//!
//! # Key Components
//!
//! - [`crate::file::io::PeIO`] - Trait mapping an integer type onto its byte array
//! - [`crate::file::io::read_le`] - Read a value from the start of a buffer
//! - [`crate::file::io::read_le_at`] - Read a value at an offset, advancing the offset
//! - [`crate::file::io::write_le_at`] - Write a value at an offset, advancing the offset
//!
//! # Error Handling
//!
//! The offset arithmetic is checked: an offset that would wrap, or a read or write that
//! would extend past the end of the buffer, returns [`crate::Error::OutOfBounds`] and leaves
//! the offset unchanged.
//!
//! # Examples
//!
//! ```rust
//! use peforge::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x5A4D_u16)?;
//! write_le_at(&mut data, &mut offset, 0x80_u32)?;
//!
//! offset = 0;
//! let magic: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(magic, 0x5A4D);
//! # Ok::<(), peforge::Error>(())
//! ```

use crate::Result;

/// Trait for integer types that can be read from and written to PE structures.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait PeIO: Sized + Copy {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_pe_io {
    ($($ty:ty),*) => {
        $(
            impl PeIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

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

impl_pe_io!(u8, u16, u32, u64);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: PeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`.
///
/// On success the offset is advanced by `size_of::<T>()`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the read would extend past the end of `data`.
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };

    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely writes `value` in little-endian byte order at `offset`.
///
/// On success the offset is advanced by `size_of::<T>()`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the write would extend past the end of `data`.
pub fn write_le_at<T: PeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };

    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}
