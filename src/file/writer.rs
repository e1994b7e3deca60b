//! Cursor-based, bounds-checked writer for PE structures.
//!
//! [`crate::file::writer::Writer`] is the serialization counterpart of
//! [`crate::file::parser::Parser`]: it walks a pre-sized mutable buffer and refuses to write
//! past its end.

use crate::{
    file::io::{write_le_at, PeIO},
    Result,
};

/// A cursor over a mutable, pre-sized byte buffer.
pub struct Writer<'a> {
    /// The output buffer
    data: &'a mut [u8],
    /// Current position within the output buffer
    position: usize,
}

impl<'a> Writer<'a> {
    /// Create a new writer positioned at the start of `data`.
    pub fn new(data: &'a mut [u8]) -> Self {
        Writer { data, position: 0 }
    }

    /// Get the current position of the writer within the buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the current position to the specified index.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the buffer length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Write `value` in little-endian format and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn write_le<T: PeIO>(&mut self, value: T) -> Result<()> {
        write_le_at(self.data, &mut self.position, value)
    }

    /// Copy `bytes` to the current position and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the bytes do not fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(end) = self.position.checked_add(bytes.len()) else {
            return Err(out_of_bounds_error!());
        };

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }
}
