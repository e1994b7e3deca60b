//! Load and write configuration.

/// Configuration for loading an image
///
/// Bounds and overflow checks cannot be disabled; the options only relax the checks a fuzzer
/// or an interop test wants to get past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Reject input whose `MZ` or `PE\0\0` signature is missing (default: true)
    pub verify_signatures: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            verify_signatures: true,
        }
    }
}

impl LoadOptions {
    /// Creates the default configuration, rejecting bad signatures
    #[must_use]
    pub fn strict() -> Self {
        Self::default()
    }

    /// Creates a configuration that tolerates bad `MZ` and `PE\0\0` signatures
    ///
    /// Every size and offset is still validated, so hostile input is rejected the same way.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            verify_signatures: false,
        }
    }
}

/// Configuration for serializing an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Recompute the optional header `CheckSum` over the assembled bytes (default: false)
    pub update_checksum: bool,
}

impl WriteOptions {
    /// Creates a configuration that writes a freshly computed checksum
    #[must_use]
    pub fn with_checksum() -> Self {
        Self {
            update_checksum: true,
        }
    }
}
