//! Physical file backend for memory-mapped I/O.
//!
//! [`crate::file::physical::Physical`] maps an image from disk read-only instead of reading it
//! into a heap buffer. The loader copies every byte it keeps, so the mapping only has to live
//! for the duration of [`crate::PeImage::from_file`].

use super::Backend;
use crate::Result;

use memmap2::Mmap;
use std::{fs, path::Path};

/// A read-only, memory-mapped file.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data, `None` for empty files which cannot be mapped
    data: Option<Mmap>,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the PE file on disk
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Physical { data: None });
        }

        // The mapping is private to this backend and never handed out mutably.
        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data: Some(mmap) })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        match &self.data {
            Some(mmap) => mmap.as_ref(),
            None => &[],
        }
    }
}
