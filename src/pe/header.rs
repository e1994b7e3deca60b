//! The PE header: COFF header, optional header and data directory array.
//!
//! [`Header`] bundles the three parts that follow the `PE\0\0` signature. It also offers
//! typed, name-addressable access to every scalar field through [`HeaderField`], which is
//! what field-editing front ends use instead of matching on the individual structs.
//!
//! # Examples
//!
//! ```rust,no_run
//! use peforge::{HeaderField, PeImage};
//!
//! let mut image = PeImage::from_file("app.exe")?;
//! let header = image.header_mut();
//!
//! let field: HeaderField = "size_of_stack_reserve".parse()?;
//! header.set(field, 0x20_0000)?;
//! assert_eq!(header.get(field), Some(0x20_0000));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use strum::{Display, EnumCount, EnumIter, EnumString};

use crate::{
    file::{parser::Parser, writer::Writer},
    pe::{
        coff::{CoffHeader, FileCharacteristics, MachineType, COFF_HEADER_SIZE},
        directory::{DataDirectoryType, RawDataDirectory, DATA_DIRECTORY_SIZE},
        optional::{DllCharacteristics, ImageKind, OptionalHeader},
    },
    Error, Result,
};

/// Every scalar field of the COFF and optional headers.
///
/// Field names convert to and from their `snake_case` spelling, e.g. `size_of_image`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumIter, EnumCount, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HeaderField {
    /// COFF `Machine`
    Machine,
    /// COFF `NumberOfSections`
    NumberOfSections,
    /// COFF `TimeDateStamp`
    TimeDateStamp,
    /// COFF `PointerToSymbolTable`
    PointerToSymbolTable,
    /// COFF `NumberOfSymbols`
    NumberOfSymbols,
    /// COFF `SizeOfOptionalHeader`
    SizeOfOptionalHeader,
    /// COFF `Characteristics`
    Characteristics,
    /// Optional header `Magic`; setting it switches between PE32 and PE32+
    Magic,
    /// `MajorLinkerVersion`
    MajorLinkerVersion,
    /// `MinorLinkerVersion`
    MinorLinkerVersion,
    /// `SizeOfCode`
    SizeOfCode,
    /// `SizeOfInitializedData`
    SizeOfInitializedData,
    /// `SizeOfUninitializedData`
    SizeOfUninitializedData,
    /// `AddressOfEntryPoint`
    AddressOfEntryPoint,
    /// `BaseOfCode`
    BaseOfCode,
    /// `BaseOfData`, PE32 only
    BaseOfData,
    /// `ImageBase`
    ImageBase,
    /// `SectionAlignment`
    SectionAlignment,
    /// `FileAlignment`
    FileAlignment,
    /// `MajorOperatingSystemVersion`
    MajorOperatingSystemVersion,
    /// `MinorOperatingSystemVersion`
    MinorOperatingSystemVersion,
    /// `MajorImageVersion`
    MajorImageVersion,
    /// `MinorImageVersion`
    MinorImageVersion,
    /// `MajorSubsystemVersion`
    MajorSubsystemVersion,
    /// `MinorSubsystemVersion`
    MinorSubsystemVersion,
    /// `Win32VersionValue`
    Win32VersionValue,
    /// `SizeOfImage`
    SizeOfImage,
    /// `SizeOfHeaders`
    SizeOfHeaders,
    /// `CheckSum`
    CheckSum,
    /// `Subsystem`
    Subsystem,
    /// `DllCharacteristics`
    DllCharacteristics,
    /// `SizeOfStackReserve`
    SizeOfStackReserve,
    /// `SizeOfStackCommit`
    SizeOfStackCommit,
    /// `SizeOfHeapReserve`
    SizeOfHeapReserve,
    /// `SizeOfHeapCommit`
    SizeOfHeapCommit,
    /// `LoaderFlags`
    LoaderFlags,
    /// `NumberOfRvaAndSizes`
    NumberOfRvaAndSizes,
}

/// COFF header, optional header and the raw data directory array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The COFF file header
    pub coff: CoffHeader,
    /// The fixed part of the optional header
    pub optional: OptionalHeader,
    /// The raw data directory entries, `number_of_rva_and_sizes` long
    pub data_directories: Vec<RawDataDirectory>,
}

impl Header {
    /// Creates the header of an empty executable with the sixteen standard directories.
    ///
    /// PE32 headers target x86, PE32+ headers x64.
    #[must_use]
    pub fn new(kind: ImageKind) -> Header {
        let (machine, characteristics) = match kind {
            ImageKind::Pe32 => (
                MachineType::I386,
                FileCharacteristics::EXECUTABLE_IMAGE | FileCharacteristics::MACHINE_32BIT,
            ),
            ImageKind::Pe32Plus => (
                MachineType::Amd64,
                FileCharacteristics::EXECUTABLE_IMAGE | FileCharacteristics::LARGE_ADDRESS_AWARE,
            ),
        };

        let mut optional = OptionalHeader::new(kind);
        optional.number_of_rva_and_sizes = DataDirectoryType::COUNT as u32;

        let mut header = Header {
            coff: CoffHeader {
                machine: machine as u16,
                number_of_sections: 0,
                time_date_stamp: 0,
                pointer_to_symbol_table: 0,
                number_of_symbols: 0,
                size_of_optional_header: 0,
                characteristics,
            },
            optional,
            data_directories: vec![RawDataDirectory::default(); DataDirectoryType::COUNT],
        };
        header.coff.size_of_optional_header = header.optional_header_size() as u16;
        header
    }

    /// Reads the header starting at `offset`, directly behind the `PE\0\0` signature.
    ///
    /// The directory count is validated before it is used: it must not overflow when
    /// multiplied by the entry size, and the array must fit inside `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] for a directory count above `u32::MAX / 8`,
    /// [`crate::Error::Malformed`] if the directory array extends past the end of `data`,
    /// and the errors of the COFF and optional header readers.
    pub fn read(data: &[u8], offset: usize) -> Result<Header> {
        let mut parser = Parser::new(data);
        parser.seek(offset)?;

        let coff = CoffHeader::read(&mut parser)?;
        let optional = OptionalHeader::read(&mut parser)?;

        let count = optional.number_of_rva_and_sizes;
        if count > u32::MAX / DATA_DIRECTORY_SIZE as u32 {
            return Err(overflow_error!(
                "File too small for directory entries - {} entries",
                count
            ));
        }

        let directories_size = count as usize * DATA_DIRECTORY_SIZE;
        let Some(section_offset) = parser.pos().checked_add(directories_size) else {
            return Err(overflow_error!("Directory array of {} bytes", directories_size));
        };
        if section_offset > data.len() {
            return Err(malformed_error!(
                "File too small for directory entries - {} entries",
                count
            ));
        }

        let mut data_directories = Vec::new();
        data_directories
            .try_reserve_exact(count as usize)
            .map_err(|_| Error::Allocation {
                size: directories_size,
            })?;
        for _ in 0..count {
            data_directories.push(RawDataDirectory::read(&mut parser)?);
        }

        Ok(Header {
            coff,
            optional,
            data_directories,
        })
    }

    /// Writes the header at the writer's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `number_of_rva_and_sizes` disagrees with the
    /// directory array, and the errors of the COFF and optional header writers.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        if self.optional.number_of_rva_and_sizes as usize != self.data_directories.len() {
            return Err(malformed_error!(
                "number_of_rva_and_sizes {} does not match {} directories",
                self.optional.number_of_rva_and_sizes,
                self.data_directories.len()
            ));
        }

        self.coff.write(writer)?;
        self.optional.write(writer)?;
        for directory in &self.data_directories {
            directory.write(writer)?;
        }
        Ok(())
    }

    /// Returns the layout variant of the optional header.
    #[must_use]
    pub fn kind(&self) -> ImageKind {
        self.optional.kind
    }

    /// Size of the optional header including the directory array, as stored in
    /// `size_of_optional_header`.
    #[must_use]
    pub fn optional_header_size(&self) -> usize {
        self.optional.kind.optional_header_size()
            + self.data_directories.len() * DATA_DIRECTORY_SIZE
    }

    /// Size in bytes of the COFF header, the optional header and the directory array.
    #[must_use]
    pub fn size(&self) -> usize {
        COFF_HEADER_SIZE + self.optional_header_size()
    }

    /// Reads a field by identifier.
    ///
    /// Returns `None` only for [`HeaderField::BaseOfData`] on PE32+ headers.
    #[must_use]
    pub fn get(&self, field: HeaderField) -> Option<u64> {
        let coff = &self.coff;
        let optional = &self.optional;

        let value = match field {
            HeaderField::Machine => u64::from(coff.machine),
            HeaderField::NumberOfSections => u64::from(coff.number_of_sections),
            HeaderField::TimeDateStamp => u64::from(coff.time_date_stamp),
            HeaderField::PointerToSymbolTable => u64::from(coff.pointer_to_symbol_table),
            HeaderField::NumberOfSymbols => u64::from(coff.number_of_symbols),
            HeaderField::SizeOfOptionalHeader => u64::from(coff.size_of_optional_header),
            HeaderField::Characteristics => u64::from(coff.characteristics.bits()),
            HeaderField::Magic => u64::from(optional.kind.magic()),
            HeaderField::MajorLinkerVersion => u64::from(optional.major_linker_version),
            HeaderField::MinorLinkerVersion => u64::from(optional.minor_linker_version),
            HeaderField::SizeOfCode => u64::from(optional.size_of_code),
            HeaderField::SizeOfInitializedData => u64::from(optional.size_of_initialized_data),
            HeaderField::SizeOfUninitializedData => {
                u64::from(optional.size_of_uninitialized_data)
            }
            HeaderField::AddressOfEntryPoint => u64::from(optional.address_of_entry_point),
            HeaderField::BaseOfCode => u64::from(optional.base_of_code),
            HeaderField::BaseOfData => return optional.base_of_data.map(u64::from),
            HeaderField::ImageBase => optional.image_base,
            HeaderField::SectionAlignment => u64::from(optional.section_alignment),
            HeaderField::FileAlignment => u64::from(optional.file_alignment),
            HeaderField::MajorOperatingSystemVersion => {
                u64::from(optional.major_operating_system_version)
            }
            HeaderField::MinorOperatingSystemVersion => {
                u64::from(optional.minor_operating_system_version)
            }
            HeaderField::MajorImageVersion => u64::from(optional.major_image_version),
            HeaderField::MinorImageVersion => u64::from(optional.minor_image_version),
            HeaderField::MajorSubsystemVersion => u64::from(optional.major_subsystem_version),
            HeaderField::MinorSubsystemVersion => u64::from(optional.minor_subsystem_version),
            HeaderField::Win32VersionValue => u64::from(optional.win32_version_value),
            HeaderField::SizeOfImage => u64::from(optional.size_of_image),
            HeaderField::SizeOfHeaders => u64::from(optional.size_of_headers),
            HeaderField::CheckSum => u64::from(optional.check_sum),
            HeaderField::Subsystem => u64::from(optional.subsystem),
            HeaderField::DllCharacteristics => u64::from(optional.dll_characteristics.bits()),
            HeaderField::SizeOfStackReserve => optional.size_of_stack_reserve,
            HeaderField::SizeOfStackCommit => optional.size_of_stack_commit,
            HeaderField::SizeOfHeapReserve => optional.size_of_heap_reserve,
            HeaderField::SizeOfHeapCommit => optional.size_of_heap_commit,
            HeaderField::LoaderFlags => u64::from(optional.loader_flags),
            HeaderField::NumberOfRvaAndSizes => u64::from(optional.number_of_rva_and_sizes),
        };

        Some(value)
    }

    /// Writes a field by identifier.
    ///
    /// Counts that the layout recalculation derives from the model (`number_of_sections`,
    /// `number_of_rva_and_sizes`, `size_of_optional_header`) can be set, but are overwritten
    /// on the next recalculation. The directory count is owned by the image's directory list,
    /// see [`crate::PeImage::set_directory_count`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] if `value` does not fit the field's width for the
    /// current layout, [`crate::Error::UnsupportedMagic`] for an unknown magic, and
    /// [`crate::Error::Malformed`] when setting `base_of_data` on a PE32+ header or
    /// `number_of_rva_and_sizes` on any header.
    pub fn set(&mut self, field: HeaderField, value: u64) -> Result<()> {
        let kind = self.optional.kind;
        let coff = &mut self.coff;
        let optional = &mut self.optional;

        match field {
            HeaderField::Machine => coff.machine = narrow(field, value)?,
            HeaderField::NumberOfSections => coff.number_of_sections = narrow(field, value)?,
            HeaderField::TimeDateStamp => coff.time_date_stamp = narrow(field, value)?,
            HeaderField::PointerToSymbolTable => {
                coff.pointer_to_symbol_table = narrow(field, value)?;
            }
            HeaderField::NumberOfSymbols => coff.number_of_symbols = narrow(field, value)?,
            HeaderField::SizeOfOptionalHeader => {
                coff.size_of_optional_header = narrow(field, value)?;
            }
            HeaderField::Characteristics => {
                coff.characteristics = FileCharacteristics::from_bits_retain(narrow(field, value)?);
            }
            HeaderField::Magic => {
                let kind = ImageKind::from_magic(narrow(field, value)?)?;
                optional.set_kind(kind);
            }
            HeaderField::MajorLinkerVersion => optional.major_linker_version = narrow(field, value)?,
            HeaderField::MinorLinkerVersion => optional.minor_linker_version = narrow(field, value)?,
            HeaderField::SizeOfCode => optional.size_of_code = narrow(field, value)?,
            HeaderField::SizeOfInitializedData => {
                optional.size_of_initialized_data = narrow(field, value)?;
            }
            HeaderField::SizeOfUninitializedData => {
                optional.size_of_uninitialized_data = narrow(field, value)?;
            }
            HeaderField::AddressOfEntryPoint => {
                optional.address_of_entry_point = narrow(field, value)?;
            }
            HeaderField::BaseOfCode => optional.base_of_code = narrow(field, value)?,
            HeaderField::BaseOfData => {
                if kind != ImageKind::Pe32 {
                    return Err(malformed_error!("{} headers have no base_of_data", kind));
                }
                optional.base_of_data = Some(narrow(field, value)?);
            }
            HeaderField::ImageBase => optional.image_base = address(field, kind, value)?,
            HeaderField::SectionAlignment => optional.section_alignment = narrow(field, value)?,
            HeaderField::FileAlignment => optional.file_alignment = narrow(field, value)?,
            HeaderField::MajorOperatingSystemVersion => {
                optional.major_operating_system_version = narrow(field, value)?;
            }
            HeaderField::MinorOperatingSystemVersion => {
                optional.minor_operating_system_version = narrow(field, value)?;
            }
            HeaderField::MajorImageVersion => optional.major_image_version = narrow(field, value)?,
            HeaderField::MinorImageVersion => optional.minor_image_version = narrow(field, value)?,
            HeaderField::MajorSubsystemVersion => {
                optional.major_subsystem_version = narrow(field, value)?;
            }
            HeaderField::MinorSubsystemVersion => {
                optional.minor_subsystem_version = narrow(field, value)?;
            }
            HeaderField::Win32VersionValue => optional.win32_version_value = narrow(field, value)?,
            HeaderField::SizeOfImage => optional.size_of_image = narrow(field, value)?,
            HeaderField::SizeOfHeaders => optional.size_of_headers = narrow(field, value)?,
            HeaderField::CheckSum => optional.check_sum = narrow(field, value)?,
            HeaderField::Subsystem => optional.subsystem = narrow(field, value)?,
            HeaderField::DllCharacteristics => {
                optional.dll_characteristics =
                    DllCharacteristics::from_bits_retain(narrow(field, value)?);
            }
            HeaderField::SizeOfStackReserve => {
                optional.size_of_stack_reserve = address(field, kind, value)?;
            }
            HeaderField::SizeOfStackCommit => {
                optional.size_of_stack_commit = address(field, kind, value)?;
            }
            HeaderField::SizeOfHeapReserve => {
                optional.size_of_heap_reserve = address(field, kind, value)?;
            }
            HeaderField::SizeOfHeapCommit => {
                optional.size_of_heap_commit = address(field, kind, value)?;
            }
            HeaderField::LoaderFlags => optional.loader_flags = narrow(field, value)?,
            HeaderField::NumberOfRvaAndSizes => {
                return Err(malformed_error!(
                    "{} follows the directory array - use PeImage::set_directory_count",
                    field
                ));
            }
        }

        Ok(())
    }
}

fn narrow<T: TryFrom<u64>>(field: HeaderField, value: u64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| overflow_error!("Value 0x{:X} does not fit {}", value, field))
}

fn address(field: HeaderField, kind: ImageKind, value: u64) -> Result<u64> {
    if value > kind.max_address() {
        return Err(overflow_error!(
            "Value 0x{:X} does not fit {} of a {} header",
            value,
            field,
            kind
        ));
    }
    Ok(value)
}
