//! Byte sources, sinks and cursors for PE images.
//!
//! This module contains everything that touches raw bytes: the [`crate::file::Backend`]
//! abstraction over input buffers, the bounds-checked [`crate::file::parser::Parser`] and
//! [`crate::file::writer::Writer`] cursors, and the memory-mapped [`crate::file::output::Output`]
//! used when an image is written straight to disk.
//!
//! # Key Components
//!
//! - [`crate::file::Backend`] - Trait for input data sources
//! - [`crate::file::memory::Memory`] - Owned in-memory buffer
//! - [`crate::file::physical::Physical`] - Read-only memory-mapped file
//! - [`crate::file::output::Output`] - Writable memory-mapped file, removed unless finalized
//! - [`crate::file::io`] - Little-endian integer primitives
//!
//! # Examples
//!
//! ```rust
//! use peforge::file::{memory::Memory, Backend};
//!
//! let backend = Memory::new(vec![0x4D, 0x5A]);
//! assert_eq!(backend.data(), b"MZ");
//! ```

pub mod io;
pub mod memory;
pub mod output;
pub mod parser;
pub mod physical;
pub mod writer;

/// Backend trait for input data sources.
///
/// The loader only ever needs a contiguous view of the input, so implementations just hand
/// out the complete buffer. Parsing copies everything it keeps, which means a backend can be
/// dropped as soon as [`crate::PeImage`] construction returns.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];
}
