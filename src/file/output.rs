//! Memory-mapped output file.
//!
//! [`crate::file::output::Output`] creates the target file at its final size, maps it writable
//! and lets the assembler fill it in place. A file that is dropped without
//! [`crate::file::output::Output::finalize`] being called is deleted again, so a failed write
//! never leaves a truncated image behind.
//!
//! # Examples
//!
//! ```rust,no_run
//! use peforge::file::output::Output;
//!
//! let mut output = Output::create("out.bin", 4096)?;
//! output.write_at(0, b"MZ")?;
//! output.finalize()?;
//! # Ok::<(), peforge::Error>(())
//! ```

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::Result;

/// A writable memory-mapped file with cleanup-on-drop semantics.
pub struct Output {
    /// The writable mapping of the target file
    mmap: MmapMut,
    /// Where the file lives, needed for removal on drop
    target_path: PathBuf,
    /// Set once `finalize` flushed the mapping successfully
    finalized: bool,
}

impl Output {
    /// Creates (or truncates) `target_path`, sizes it to `size` bytes and maps it.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be created, resized or mapped,
    /// and [`crate::Error::Malformed`] for a zero `size`, which cannot be mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(malformed_error!("Cannot map an empty output file"));
        }

        let target_path = target_path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)?;

        if let Err(error) = file.set_len(size) {
            let _ = std::fs::remove_file(&target_path);
            return Err(error.into());
        }

        // The mapping is exclusively owned by this struct for its whole lifetime.
        let mmap = match unsafe { MmapOptions::new().map_mut(&file) } {
            Ok(mmap) => mmap,
            Err(error) => {
                let _ = std::fs::remove_file(&target_path);
                return Err(error.into());
            }
        };

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Returns the whole mapping as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Copies `data` to `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let Ok(start) = usize::try_from(offset) else {
            return Err(out_of_bounds_error!());
        };
        let Some(end) = start.checked_add(data.len()) else {
            return Err(out_of_bounds_error!());
        };

        if end > self.mmap.len() {
            return Err(out_of_bounds_error!());
        }

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Returns the size of the mapped file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Returns the path of the file being written.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flushes the mapping to disk and keeps the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if flushing fails, in which case the file is removed.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap.flush()?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::tempdir;

    #[test]
    fn finalized_file_is_kept() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("kept.bin");

        let mut output = Output::create(&path, 8).unwrap();
        assert_eq!(output.size(), 8);
        assert_eq!(output.target_path(), path.as_path());
        output.write_at(2, b"PE").unwrap();
        output.as_mut_slice()[7] = 0xFF;
        output.finalize().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![0, 0, b'P', b'E', 0, 0, 0, 0xFF]);
    }

    #[test]
    fn dropped_file_is_removed() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("dropped.bin");

        {
            let mut output = Output::create(&path, 16).unwrap();
            output.write_at(0, b"MZ").unwrap();
            assert!(path.exists());
        }

        assert!(!path.exists());
    }

    #[test]
    fn bounds() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bounds.bin");

        let mut output = Output::create(&path, 4).unwrap();
        assert!(matches!(
            output.write_at(3, b"AB"),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            output.write_at(u64::MAX, b"A"),
            Err(Error::OutOfBounds { .. })
        ));

        assert!(Output::create(temp_dir.path().join("zero.bin"), 0).is_err());
    }
}
