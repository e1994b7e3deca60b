//! Section headers and section contents.
//!
//! Each section is described by a 40-byte entry in the section table and owns the bytes it
//! maps into memory. Sections are identified by a [`SectionId`] that stays stable while the
//! section list is reordered, so data directories can refer to their owning section without
//! holding an index that shifts on insertion or removal.

use std::fmt;

use bitflags::bitflags;

use crate::{
    file::{parser::Parser, writer::Writer},
    Result,
};

/// Size of one section table entry in bytes.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Name of the linker-injected import binding section, which never counts as code.
pub const BIND_SECTION_NAME: &str = ".bind";

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Section characteristics. Bits without a named flag (the object-file alignment nibble)
    /// are kept as-is.
    pub struct SectionCharacteristics: u32 {
        /// Section should not be padded to the next boundary (object files only)
        const TYPE_NO_PAD = 0x0000_0008;
        /// Section contains executable code
        const CNT_CODE = 0x0000_0020;
        /// Section contains initialized data
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// Reserved
        const LNK_OTHER = 0x0000_0100;
        /// Section contains comments or other information (object files only)
        const LNK_INFO = 0x0000_0200;
        /// Section will not become part of the image (object files only)
        const LNK_REMOVE = 0x0000_0800;
        /// Section contains COMDAT data (object files only)
        const LNK_COMDAT = 0x0000_1000;
        /// Section contains data referenced through the global pointer
        const GPREL = 0x0000_8000;
        /// Section contains extended relocations
        const LNK_NRELOC_OVFL = 0x0100_0000;
        /// Section can be discarded as needed
        const MEM_DISCARDABLE = 0x0200_0000;
        /// Section cannot be cached
        const MEM_NOT_CACHED = 0x0400_0000;
        /// Section is not pageable
        const MEM_NOT_PAGED = 0x0800_0000;
        /// Section can be shared in memory
        const MEM_SHARED = 0x1000_0000;
        /// Section can be executed as code
        const MEM_EXECUTE = 0x2000_0000;
        /// Section can be read
        const MEM_READ = 0x4000_0000;
        /// Section can be written to
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Stable identifier of a section within one [`crate::PeImage`].
///
/// Identifiers are handed out by the image when a section is loaded or added and are never
/// reused, so an id of a removed section simply stops resolving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SectionId(pub(crate) u32);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A section header together with the bytes it maps.
///
/// `contents` holds the initialized part of the section. At load time that is
/// `min(virtual_size, size_of_raw_data)` bytes; the remainder of the raw data (file alignment
/// padding) is zero when written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Identifier assigned by the owning image
    pub(crate) id: SectionId,
    /// Name, NUL padded to eight bytes
    pub name: [u8; 8],
    /// Size of the section when loaded into memory
    pub virtual_size: u32,
    /// RVA of the section when loaded into memory
    pub virtual_address: u32,
    /// Size of the initialized data on disk, a multiple of the file alignment
    pub size_of_raw_data: u32,
    /// File offset of the section data, zero for sections without raw data
    pub pointer_to_raw_data: u32,
    /// File offset of the relocation entries, zero for images
    pub pointer_to_relocations: u32,
    /// File offset of the COFF line numbers (deprecated)
    pub pointer_to_linenumbers: u32,
    /// Number of relocation entries
    pub number_of_relocations: u16,
    /// Number of COFF line number entries (deprecated)
    pub number_of_linenumbers: u16,
    /// Section flags
    pub characteristics: SectionCharacteristics,
    /// Section bytes
    pub(crate) contents: Vec<u8>,
}

impl Section {
    /// Creates a section holding `contents`.
    ///
    /// Both sizes start out as the length of `contents`; placement and raw size rounding
    /// happen during layout recalculation.
    ///
    /// # Arguments
    /// * `name` - Section name, at most eight bytes
    /// * `characteristics` - Section flags
    /// * `contents` - Initialized section bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name is longer than eight bytes and
    /// [`crate::Error::Overflow`] if `contents` is larger than 4 GiB.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use peforge::{Section, SectionCharacteristics};
    ///
    /// let section = Section::new(
    ///     ".rdata",
    ///     SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
    ///     vec![0xAA; 0x30],
    /// )?;
    /// assert_eq!(section.name(), ".rdata");
    /// assert_eq!(section.virtual_size, 0x30);
    /// # Ok::<(), peforge::Error>(())
    /// ```
    pub fn new(
        name: &str,
        characteristics: SectionCharacteristics,
        contents: Vec<u8>,
    ) -> Result<Section> {
        let mut section = Section {
            id: SectionId(0),
            name: [0; 8],
            virtual_size: 0,
            virtual_address: 0,
            size_of_raw_data: 0,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics,
            contents: Vec::new(),
        };
        section.set_name(name)?;
        section.set_contents(contents)?;
        Ok(section)
    }

    /// Reads one section table entry at the parser's position. The contents stay empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry is truncated.
    pub(crate) fn read(parser: &mut Parser, id: SectionId) -> Result<Section> {
        Ok(Section {
            id,
            name: parser.read_array::<8>()?,
            virtual_size: parser.read_le::<u32>()?,
            virtual_address: parser.read_le::<u32>()?,
            size_of_raw_data: parser.read_le::<u32>()?,
            pointer_to_raw_data: parser.read_le::<u32>()?,
            pointer_to_relocations: parser.read_le::<u32>()?,
            pointer_to_linenumbers: parser.read_le::<u32>()?,
            number_of_relocations: parser.read_le::<u16>()?,
            number_of_linenumbers: parser.read_le::<u16>()?,
            characteristics: SectionCharacteristics::from_bits_retain(parser.read_le::<u32>()?),
            contents: Vec::new(),
        })
    }

    /// Writes this section's table entry at the writer's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the writer runs out of space.
    pub(crate) fn write_header(&self, writer: &mut Writer) -> Result<()> {
        writer.write_bytes(&self.name)?;
        writer.write_le(self.virtual_size)?;
        writer.write_le(self.virtual_address)?;
        writer.write_le(self.size_of_raw_data)?;
        writer.write_le(self.pointer_to_raw_data)?;
        writer.write_le(self.pointer_to_relocations)?;
        writer.write_le(self.pointer_to_linenumbers)?;
        writer.write_le(self.number_of_relocations)?;
        writer.write_le(self.number_of_linenumbers)?;
        writer.write_le(self.characteristics.bits())
    }

    /// Returns the identifier assigned by the owning image.
    #[must_use]
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// Returns the name with trailing NUL padding removed.
    ///
    /// Non-UTF-8 bytes are replaced, so this is meant for display and lookups, not for
    /// round-tripping; use the `name` field for the raw bytes.
    #[must_use]
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Replaces the name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `name` is longer than eight bytes.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let bytes = name.as_bytes();
        if bytes.len() > self.name.len() {
            return Err(malformed_error!(
                "Section name '{}' is longer than 8 bytes",
                name
            ));
        }

        self.name = [0; 8];
        self.name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the section bytes.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Replaces the section bytes and resets both sizes to their length.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] if `contents` is larger than 4 GiB.
    pub fn set_contents(&mut self, contents: Vec<u8>) -> Result<()> {
        let Ok(size) = u32::try_from(contents.len()) else {
            return Err(overflow_error!(
                "Section contents of {} bytes",
                contents.len()
            ));
        };

        self.virtual_size = size;
        self.size_of_raw_data = size;
        self.contents = contents;
        Ok(())
    }

    /// Returns `true` if the section is flagged as containing code.
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.characteristics
            .contains(SectionCharacteristics::CNT_CODE)
    }

    /// Returns `true` if `rva` lies inside the section once loaded.
    ///
    /// The loaded extent is `virtual_size`, or `size_of_raw_data` for sections whose virtual
    /// size is zero.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        let extent = if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        };

        let start = u64::from(self.virtual_address);
        let rva = u64::from(rva);
        rva >= start && rva < start + u64::from(extent)
    }
}
