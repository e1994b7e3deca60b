//! # peforge Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! peforge library. Import it to get quick access to everything needed for a typical
//! load, edit, recalculate and write cycle.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all peforge operations
pub use crate::Error;

/// Coarse classification of errors
pub use crate::ErrorKind;

/// The result type used throughout peforge
pub use crate::Result;

/// Configuration for loading and writing images
pub use crate::{LoadOptions, WriteOptions};

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The editable image
pub use crate::PeImage;

/// Low-level parsing utilities
pub use crate::Parser;

// ================================================================================================
// Headers
// ================================================================================================

/// DOS, COFF and optional headers
pub use crate::{
    CoffHeader, DllCharacteristics, DosHeader, FileCharacteristics, Header, HeaderField,
    ImageKind, MachineType, OptionalHeader, Subsystem,
};

// ================================================================================================
// Sections and Directories
// ================================================================================================

/// Sections and their flags
pub use crate::{Section, SectionCharacteristics, SectionId};

/// Section-relative data directories
pub use crate::{DataDirectory, DataDirectoryType};
