use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! overflow_error {
    ($msg:expr) => {
        crate::Error::Overflow {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Overflow {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Coarse classification of an [`Error`].
///
/// Every [`Error`] variant belongs to exactly one of these classes, which lets callers
/// react to the kind of failure without matching on the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Opening, reading, mapping or writing a file failed.
    Io,
    /// The input is not a well-formed PE image, or the model cannot be laid out.
    Format,
    /// Size or offset arithmetic would exceed the representable range.
    Overflow,
    /// A buffer could not be allocated.
    Allocation,
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Parsing never returns a partially populated model: any of these errors aborts the whole
/// operation and releases everything allocated up to that point. Recalculation and
/// serialization likewise leave the caller's [`crate::PeImage`] untouched when they fail.
///
/// # Examples
///
/// ```rust,no_run
/// use peforge::{Error, ErrorKind, PeImage};
/// use std::path::Path;
///
/// match PeImage::from_file(Path::new("app.exe")) {
///     Ok(image) => println!("{} sections", image.sections().len()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(error) if error.kind() == ErrorKind::Overflow => {
///         eprintln!("Hostile size fields: {}", error);
///     }
///     Err(error) => eprintln!("Other error: {}", error),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed, or the model cannot be laid out.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// Raised by every bounds-checked read when a field would extend past the end
    /// of the input buffer.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The optional header carries a magic value that is neither PE32 nor PE32+.
    #[error("Unsupported optional header magic - 0x{0:04X}")]
    UnsupportedMagic(u16),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Size or offset arithmetic would have wrapped.
    ///
    /// Header fields such as `number_of_rva_and_sizes` are attacker controlled; products and
    /// sums derived from them are computed with checked arithmetic and rejected here instead
    /// of being truncated.
    #[error("Overflow - {file}:{line}: {message}")]
    Overflow {
        /// Description of the computation that overflowed
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A buffer of the given size could not be allocated.
    #[error("Failed to allocate a buffer of {size} bytes")]
    Allocation {
        /// The requested buffer size in bytes
        size: usize,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

impl Error {
    /// Returns the class this error belongs to.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use peforge::{Error, ErrorKind, PeImage};
    ///
    /// let error = PeImage::from_slice(&[]).unwrap_err();
    /// assert!(matches!(error, Error::Empty));
    /// assert_eq!(error.kind(), ErrorKind::Format);
    /// ```
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileError(_) => ErrorKind::Io,
            Error::Malformed { .. }
            | Error::OutOfBounds { .. }
            | Error::UnsupportedMagic(_)
            | Error::Empty => ErrorKind::Format,
            Error::Overflow { .. } => ErrorKind::Overflow,
            Error::Allocation { .. } => ErrorKind::Allocation,
        }
    }
}

/// Allocates a zeroed buffer of `size` bytes, reporting failure instead of aborting.
pub(crate) fn try_alloc(size: usize) -> crate::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| Error::Allocation { size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Copies `data` into a freshly allocated buffer, reporting allocation failure.
pub(crate) fn try_copy(data: &[u8]) -> crate::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(data.len())
        .map_err(|_| Error::Allocation { size: data.len() })?;
    buffer.extend_from_slice(data);
    Ok(buffer)
}
