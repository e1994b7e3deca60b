// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' and 'file/output.rs' use mmap to map files into memory

//! # peforge
//!
//! Load, edit, relayout and re-emit Portable Executable images (PE32 and PE32+).
//!
//! `peforge` parses an executable into a typed model, lets the caller change it (add, remove
//! and reorder sections, point data directories at new places, swap the DOS stub or the data
//! appended to the file) and writes a file whose addresses, file offsets and aggregate size
//! fields are recomputed to match the new section layout.
//!
//! ## Features
//!
//! - **Hostile input** - every read is bounds checked and size arithmetic on header fields is
//!   overflow checked before it is used as an offset or length
//! - **Section-relative directories** - data directories follow their owning section when it
//!   moves, the certificate table keeps its file offset semantics
//! - **Deterministic layout** - a single forward pass packs sections on their alignments and
//!   derives `size_of_code`, `size_of_image` and friends
//! - **Trailing data** - overlays and signatures behind the last section survive a
//!   read-modify-write cycle
//! - **No partial results** - a failed load, recalculation or write leaves nothing behind
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peforge::prelude::*;
//!
//! let mut image = PeImage::from_file("app.exe")?;
//! println!("{} image with {} sections", image.kind(), image.sections().len());
//!
//! // Put the last section first and let the layout follow.
//! let last = image.sections().len() - 1;
//! image.move_section(last, 0)?;
//! image.recalculate()?;
//!
//! image.write_file_with("app.reordered.exe", WriteOptions::with_checksum())?;
//! # Ok::<(), peforge::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Input backends, bounds-checked cursors and the memory-mapped output file
//! - [`pe`] - Headers, sections, directories, layout recalculation and serialization
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! The library logs through the [`log`](https://docs.rs/log) facade: milestones at `debug`,
//! per-section details at `trace`, and tolerated anomalies (bad signatures in permissive mode,
//! unmapped directories) at `warn`. Install any logger to see them.
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use peforge::prelude::*;
///
/// let image = PeImage::from_file("app.exe")?;
/// if let Some(text) = image.section_by_name(".text") {
///     println!(".text at 0x{:X}", text.virtual_address);
/// }
/// # Ok::<(), peforge::Error>(())
/// ```
pub mod prelude;

/// Byte level input and output.
///
/// Input is handed to the parser through the [`file::Backend`] trait, either as an owned
/// buffer ([`file::memory::Memory`]) or as a memory-mapped file ([`file::physical::Physical`]).
/// Images written to disk go through [`file::output::Output`], which removes the file again if
/// writing fails.
pub mod file;

/// The PE model and the algorithms working on it.
///
/// # Examples
///
/// ```rust
/// use peforge::pe::layout::align_up;
///
/// assert_eq!(align_up(0x1C8, 0x200)?, 0x200);
/// assert_eq!(align_up(0x1000, 0x1000)?, 0x1000);
/// # Ok::<(), peforge::Error>(())
/// ```
pub mod pe;

/// `peforge` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use peforge::{PeImage, Result};
///
/// fn section_count(path: &str) -> Result<usize> {
///     Ok(PeImage::from_file(path)?.sections().len())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `peforge` Error type and its classification.
///
/// See [`Error::kind`] for the mapping onto I/O, format, overflow and allocation failures.
pub use error::{Error, ErrorKind};

/// Main entry point: the editable image.
///
/// # Example
///
/// ```rust,no_run
/// use peforge::PeImage;
///
/// let image = PeImage::from_file("app.exe")?;
/// println!("{} trailing bytes", image.trailing_data().len());
/// # Ok::<(), peforge::Error>(())
/// ```
pub use pe::image::PeImage;

/// Section types.
pub use pe::section::{Section, SectionCharacteristics, SectionId};

/// Header types and generic field access.
pub use pe::{
    coff::{CoffHeader, FileCharacteristics, MachineType},
    dos::DosHeader,
    header::{Header, HeaderField},
    optional::{DllCharacteristics, ImageKind, OptionalHeader, Subsystem},
};

/// Data directory types.
pub use pe::directory::{DataDirectory, DataDirectoryType, RawDataDirectory};

/// Load and write configuration.
pub use pe::options::{LoadOptions, WriteOptions};

/// Bounds-checked reading of little-endian structures.
///
/// # Example
///
/// ```rust
/// use peforge::Parser;
///
/// let mut parser = Parser::new(b"PE\0\0");
/// assert_eq!(parser.read_le::<u32>()?, 0x4550);
/// # Ok::<(), peforge::Error>(())
/// ```
pub use file::parser::Parser;
