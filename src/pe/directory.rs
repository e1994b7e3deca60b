//! Data directories and their mapping onto sections.
//!
//! On disk a data directory is an `(rva, size)` pair. In the model each directory is stored
//! relative to the section that contains it, `(section, offset, size)`, so it follows the
//! section when layout recalculation moves it. The certificate table is the exception: its
//! address field is a file offset and is never looked up in the section table.

use log::{trace, warn};
use strum::{Display, EnumCount, EnumIter, FromRepr};

use crate::{
    file::{parser::Parser, writer::Writer},
    pe::section::{Section, SectionId},
    Result,
};

/// Size of one data directory entry in bytes.
pub const DATA_DIRECTORY_SIZE: usize = 8;

/// The standard data directory indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumIter, EnumCount, FromRepr)]
#[repr(u32)]
pub enum DataDirectoryType {
    /// Export table (`.edata`)
    ExportTable = 0,
    /// Import table (`.idata`)
    ImportTable = 1,
    /// Resource table (`.rsrc`)
    ResourceTable = 2,
    /// Exception table (`.pdata`)
    ExceptionTable = 3,
    /// Attribute certificate table, addressed by file offset
    CertificateTable = 4,
    /// Base relocation table (`.reloc`)
    BaseRelocationTable = 5,
    /// Debug data (`.debug`)
    Debug = 6,
    /// Reserved, must be zero
    Architecture = 7,
    /// RVA of the global pointer register value, size must be zero
    GlobalPtr = 8,
    /// Thread local storage table (`.tls`)
    TlsTable = 9,
    /// Load configuration table
    LoadConfigTable = 10,
    /// Bound import table
    BoundImport = 11,
    /// Import address table
    ImportAddressTable = 12,
    /// Delay import descriptor
    DelayImportDescriptor = 13,
    /// CLR runtime header (`.cormeta`)
    ClrRuntimeHeader = 14,
    /// Reserved, must be zero
    Reserved = 15,
}

impl DataDirectoryType {
    /// Returns the directory array index of this type.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A data directory entry as stored in the optional header.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RawDataDirectory {
    /// RVA of the table, a file offset for the certificate table
    pub virtual_address: u32,
    /// Size of the table in bytes
    pub size: u32,
}

impl RawDataDirectory {
    /// Reads one entry at the parser's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry is truncated.
    pub fn read(parser: &mut Parser) -> Result<RawDataDirectory> {
        Ok(RawDataDirectory {
            virtual_address: parser.read_le::<u32>()?,
            size: parser.read_le::<u32>()?,
        })
    }

    /// Writes this entry at the writer's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the writer runs out of space.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_le(self.virtual_address)?;
        writer.write_le(self.size)
    }
}

/// A data directory expressed relative to its owning section.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DataDirectory {
    /// Position in the directory array
    pub index: u32,
    /// Owning section, `None` for absent, unmapped and certificate directories
    pub section: Option<SectionId>,
    /// Offset from the start of the owning section; for the certificate table, the file offset
    pub offset: u32,
    /// Size of the table in bytes
    pub size: u32,
    /// The raw `(rva, size)` pair this entry was loaded from
    pub original: RawDataDirectory,
}

impl DataDirectory {
    /// Creates an empty directory entry for `index`.
    #[must_use]
    pub fn empty(index: u32) -> DataDirectory {
        DataDirectory {
            index,
            section: None,
            offset: 0,
            size: 0,
            original: RawDataDirectory::default(),
        }
    }

    /// Returns the standard type of this entry, `None` for indices past the standard sixteen.
    #[must_use]
    pub fn kind(&self) -> Option<DataDirectoryType> {
        DataDirectoryType::from_repr(self.index)
    }

    /// Returns `true` if this entry is the certificate table.
    #[must_use]
    pub fn is_certificate_table(&self) -> bool {
        self.index == DataDirectoryType::CertificateTable as u32
    }
}

/// Maps raw directory entries onto the sections that contain them.
///
/// A section contains an RVA when `virtual_address <= rva <= virtual_address + size_of_raw_data`.
/// Overlapping sections are not rejected; the first matching section in table order wins.
pub(crate) fn resolve(raw: &[RawDataDirectory], sections: &[Section]) -> Vec<DataDirectory> {
    let mut directories = Vec::with_capacity(raw.len());

    for (index, entry) in (0_u32..).zip(raw.iter()) {
        let mut directory = DataDirectory::empty(index);
        directory.original = *entry;

        if entry.virtual_address == 0 {
            directories.push(directory);
            continue;
        }

        directory.size = entry.size;

        if directory.is_certificate_table() {
            directory.offset = entry.virtual_address;
            trace!(
                "Certificate table at file offset 0x{:X}, {} bytes",
                entry.virtual_address,
                entry.size
            );
            directories.push(directory);
            continue;
        }

        let rva = u64::from(entry.virtual_address);
        let owner = sections.iter().find(|section| {
            let start = u64::from(section.virtual_address);
            start <= rva && start + u64::from(section.size_of_raw_data) >= rva
        });

        match owner {
            Some(section) => {
                directory.section = Some(section.id());
                directory.offset = entry.virtual_address - section.virtual_address;
                trace!(
                    "Directory {} at 0x{:X} resolved to section '{}' + 0x{:X}",
                    index,
                    entry.virtual_address,
                    section.name(),
                    directory.offset
                );
            }
            None => {
                warn!(
                    "Directory {} at 0x{:X} is not contained in any section",
                    index, entry.virtual_address
                );
            }
        }

        directories.push(directory);
    }

    directories
}
