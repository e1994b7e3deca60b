//! The Portable Executable model.
//!
//! This module contains the typed representation of a PE image and the algorithms that work on
//! it. Parsing runs leaf first, DOS header, PE header, section table and finally directory
//! resolution, and produces a [`crate::pe::image::PeImage`]. Before writing, the layout is
//! recalculated from the section order and the image is assembled into one buffer.
//!
//! # Key Components
//!
//! - [`crate::pe::image::PeImage`] - Aggregate root owning headers, sections and trailing data
//! - [`crate::pe::dos`] - MS-DOS header and stub
//! - [`crate::pe::coff`], [`crate::pe::optional`], [`crate::pe::header`] - PE headers
//! - [`crate::pe::section`] - Section headers and contents
//! - [`crate::pe::directory`] - Section-relative data directories
//! - [`crate::pe::layout`] - Layout recalculation
//! - [`crate::pe::checksum`] - Image checksum
//! - [`crate::pe::options`] - Load and write configuration

pub mod checksum;
pub mod coff;
pub mod directory;
pub mod dos;
pub mod header;
pub mod image;
pub mod layout;
pub mod optional;
pub mod options;
pub mod section;

pub(crate) mod assembler;

/// The `PE\0\0` signature, read as a little-endian `u32`.
pub const PE_SIGNATURE: u32 = 0x0000_4550;

/// Size of the PE signature in bytes.
pub const PE_SIGNATURE_SIZE: usize = 4;
