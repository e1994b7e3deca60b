//! The PE32 / PE32+ optional header.
//!
//! Despite its name, every image carries an optional header. It comes in two widths, selected
//! by its leading `magic` value: PE32 images store the image base and the stack/heap sizes as
//! 32-bit values and carry a `BaseOfData` field, PE32+ images widen those fields to 64 bits and
//! drop `BaseOfData`. [`OptionalHeader`] models both with the wider types and records which
//! variant it was read from in [`ImageKind`].
//!
//! The data directory array that follows the fixed part is owned by
//! [`crate::pe::header::Header`].

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::{
    file::{parser::Parser, writer::Writer},
    Error, Result,
};

/// Optional header magic of 32-bit images.
pub const PE32_MAGIC: u16 = 0x10B;
/// Optional header magic of 64-bit images.
pub const PE32PLUS_MAGIC: u16 = 0x20B;

/// Offset of the `CheckSum` field from the start of the optional header, equal for both widths.
pub const CHECKSUM_OFFSET: usize = 64;

/// The two optional header layouts.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum ImageKind {
    /// 32-bit image, magic `0x10B`
    #[strum(serialize = "PE32")]
    Pe32,
    /// 64-bit image, magic `0x20B`
    #[strum(serialize = "PE32+")]
    Pe32Plus,
}

impl ImageKind {
    /// Maps an optional header magic onto its layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMagic`] for anything but PE32 and PE32+.
    pub fn from_magic(magic: u16) -> Result<ImageKind> {
        match magic {
            PE32_MAGIC => Ok(ImageKind::Pe32),
            PE32PLUS_MAGIC => Ok(ImageKind::Pe32Plus),
            other => Err(Error::UnsupportedMagic(other)),
        }
    }

    /// Returns the magic value identifying this layout.
    #[must_use]
    pub fn magic(self) -> u16 {
        match self {
            ImageKind::Pe32 => PE32_MAGIC,
            ImageKind::Pe32Plus => PE32PLUS_MAGIC,
        }
    }

    /// Size in bytes of the fixed part of the optional header, without data directories.
    #[must_use]
    pub fn optional_header_size(self) -> usize {
        match self {
            // 28 standard + 68 windows-specific
            ImageKind::Pe32 => 96,
            // 24 standard + 88 windows-specific
            ImageKind::Pe32Plus => 112,
        }
    }

    /// Largest value an address-sized field (image base, stack and heap sizes) can hold.
    #[must_use]
    pub fn max_address(self) -> u64 {
        match self {
            ImageKind::Pe32 => u64::from(u32::MAX),
            ImageKind::Pe32Plus => u64::MAX,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// DLL characteristics of the optional header
    pub struct DllCharacteristics: u16 {
        /// Image can handle a high entropy 64-bit virtual address space
        const HIGH_ENTROPY_VA = 0x0020;
        /// DLL can be relocated at load time
        const DYNAMIC_BASE = 0x0040;
        /// Code integrity checks are enforced
        const FORCE_INTEGRITY = 0x0080;
        /// Image is NX compatible
        const NX_COMPAT = 0x0100;
        /// Isolation aware, but do not isolate the image
        const NO_ISOLATION = 0x0200;
        /// Does not use structured exception handling
        const NO_SEH = 0x0400;
        /// Do not bind the image
        const NO_BIND = 0x0800;
        /// Image must execute in an AppContainer
        const APPCONTAINER = 0x1000;
        /// A WDM driver
        const WDM_DRIVER = 0x2000;
        /// Image supports Control Flow Guard
        const GUARD_CF = 0x4000;
        /// Terminal Server aware
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// Well-known values of the optional header `Subsystem` field.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, FromRepr)]
#[repr(u16)]
pub enum Subsystem {
    /// An unknown subsystem
    Unknown = 0,
    /// Device drivers and native Windows processes
    Native = 1,
    /// The Windows graphical user interface subsystem
    WindowsGui = 2,
    /// The Windows character subsystem
    WindowsCui = 3,
    /// The OS/2 character subsystem
    Os2Cui = 5,
    /// The Posix character subsystem
    PosixCui = 7,
    /// Native Win9x driver
    NativeWindows = 8,
    /// Windows CE
    WindowsCeGui = 9,
    /// An EFI application
    EfiApplication = 10,
    /// An EFI driver with boot services
    EfiBootServiceDriver = 11,
    /// An EFI driver with run-time services
    EfiRuntimeDriver = 12,
    /// An EFI ROM image
    EfiRom = 13,
    /// XBOX
    Xbox = 14,
    /// Windows boot application
    WindowsBootApplication = 16,
}

/// The fixed part of the optional header.
///
/// `base_of_data` is `Some` exactly for [`ImageKind::Pe32`] headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    /// Layout variant, derived from the magic
    pub kind: ImageKind,
    /// Linker major version
    pub major_linker_version: u8,
    /// Linker minor version
    pub minor_linker_version: u8,
    /// Sum of the sizes of all code sections
    pub size_of_code: u32,
    /// Sum of the sizes of all initialized data sections
    pub size_of_initialized_data: u32,
    /// Sum of the sizes of all uninitialized data sections
    pub size_of_uninitialized_data: u32,
    /// RVA of the entry point, zero if none
    pub address_of_entry_point: u32,
    /// RVA of the first code section
    pub base_of_code: u32,
    /// RVA of the first data section, PE32 only
    pub base_of_data: Option<u32>,
    /// Preferred load address
    pub image_base: u64,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Alignment of raw section data in the file
    pub file_alignment: u32,
    /// Required operating system major version
    pub major_operating_system_version: u16,
    /// Required operating system minor version
    pub minor_operating_system_version: u16,
    /// Image major version
    pub major_image_version: u16,
    /// Image minor version
    pub minor_image_version: u16,
    /// Subsystem major version
    pub major_subsystem_version: u16,
    /// Subsystem minor version
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero
    pub win32_version_value: u32,
    /// Size of the loaded image, a multiple of `section_alignment`
    pub size_of_image: u32,
    /// Size of all headers rounded up to `file_alignment`
    pub size_of_headers: u32,
    /// Image checksum, see [`crate::pe::checksum`]
    pub check_sum: u32,
    /// See [`Subsystem`]
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: DllCharacteristics,
    /// Stack size to reserve
    pub size_of_stack_reserve: u64,
    /// Stack size to commit
    pub size_of_stack_commit: u64,
    /// Heap size to reserve
    pub size_of_heap_reserve: u64,
    /// Heap size to commit
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero
    pub loader_flags: u32,
    /// Number of data directory entries following the fixed part
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    /// Creates a header with common linker defaults for a console application.
    ///
    /// All layout derived sizes are zero until the image is recalculated.
    #[must_use]
    pub fn new(kind: ImageKind) -> OptionalHeader {
        let (base_of_data, image_base, dll_characteristics) = match kind {
            ImageKind::Pe32 => (
                Some(0),
                0x40_0000,
                DllCharacteristics::DYNAMIC_BASE | DllCharacteristics::NX_COMPAT,
            ),
            ImageKind::Pe32Plus => (
                None,
                0x1_4000_0000,
                DllCharacteristics::HIGH_ENTROPY_VA
                    | DllCharacteristics::DYNAMIC_BASE
                    | DllCharacteristics::NX_COMPAT,
            ),
        };

        OptionalHeader {
            kind,
            major_linker_version: 0,
            minor_linker_version: 0,
            size_of_code: 0,
            size_of_initialized_data: 0,
            size_of_uninitialized_data: 0,
            address_of_entry_point: 0,
            base_of_code: 0,
            base_of_data,
            image_base,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            win32_version_value: 0,
            size_of_image: 0,
            size_of_headers: 0,
            check_sum: 0,
            subsystem: Subsystem::WindowsCui as u16,
            dll_characteristics,
            size_of_stack_reserve: 0x10_0000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x10_0000,
            size_of_heap_commit: 0x1000,
            loader_flags: 0,
            number_of_rva_and_sizes: 0,
        }
    }

    /// Reads the fixed part of the optional header at the parser's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMagic`] for an unknown magic and
    /// [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn read(parser: &mut Parser) -> Result<OptionalHeader> {
        let kind = ImageKind::from_magic(parser.read_le::<u16>()?)?;

        let major_linker_version = parser.read_le::<u8>()?;
        let minor_linker_version = parser.read_le::<u8>()?;
        let size_of_code = parser.read_le::<u32>()?;
        let size_of_initialized_data = parser.read_le::<u32>()?;
        let size_of_uninitialized_data = parser.read_le::<u32>()?;
        let address_of_entry_point = parser.read_le::<u32>()?;
        let base_of_code = parser.read_le::<u32>()?;

        let (base_of_data, image_base) = match kind {
            ImageKind::Pe32 => {
                let base_of_data = parser.read_le::<u32>()?;
                (Some(base_of_data), u64::from(parser.read_le::<u32>()?))
            }
            ImageKind::Pe32Plus => (None, parser.read_le::<u64>()?),
        };

        let section_alignment = parser.read_le::<u32>()?;
        let file_alignment = parser.read_le::<u32>()?;
        let major_operating_system_version = parser.read_le::<u16>()?;
        let minor_operating_system_version = parser.read_le::<u16>()?;
        let major_image_version = parser.read_le::<u16>()?;
        let minor_image_version = parser.read_le::<u16>()?;
        let major_subsystem_version = parser.read_le::<u16>()?;
        let minor_subsystem_version = parser.read_le::<u16>()?;
        let win32_version_value = parser.read_le::<u32>()?;
        let size_of_image = parser.read_le::<u32>()?;
        let size_of_headers = parser.read_le::<u32>()?;
        let check_sum = parser.read_le::<u32>()?;
        let subsystem = parser.read_le::<u16>()?;
        let dll_characteristics = DllCharacteristics::from_bits_retain(parser.read_le::<u16>()?);

        let size_of_stack_reserve = read_address(parser, kind)?;
        let size_of_stack_commit = read_address(parser, kind)?;
        let size_of_heap_reserve = read_address(parser, kind)?;
        let size_of_heap_commit = read_address(parser, kind)?;

        let loader_flags = parser.read_le::<u32>()?;
        let number_of_rva_and_sizes = parser.read_le::<u32>()?;

        Ok(OptionalHeader {
            kind,
            major_linker_version,
            minor_linker_version,
            size_of_code,
            size_of_initialized_data,
            size_of_uninitialized_data,
            address_of_entry_point,
            base_of_code,
            base_of_data,
            image_base,
            section_alignment,
            file_alignment,
            major_operating_system_version,
            minor_operating_system_version,
            major_image_version,
            minor_image_version,
            major_subsystem_version,
            minor_subsystem_version,
            win32_version_value,
            size_of_image,
            size_of_headers,
            check_sum,
            subsystem,
            dll_characteristics,
            size_of_stack_reserve,
            size_of_stack_commit,
            size_of_heap_reserve,
            size_of_heap_commit,
            loader_flags,
            number_of_rva_and_sizes,
        })
    }

    /// Writes the fixed part of the optional header at the writer's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] if an address-sized field of a PE32 header does not
    /// fit in 32 bits, and [`crate::Error::OutOfBounds`] if the writer runs out of space.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_le(self.kind.magic())?;
        writer.write_le(self.major_linker_version)?;
        writer.write_le(self.minor_linker_version)?;
        writer.write_le(self.size_of_code)?;
        writer.write_le(self.size_of_initialized_data)?;
        writer.write_le(self.size_of_uninitialized_data)?;
        writer.write_le(self.address_of_entry_point)?;
        writer.write_le(self.base_of_code)?;

        match self.kind {
            ImageKind::Pe32 => {
                writer.write_le(self.base_of_data.unwrap_or(0))?;
                write_address(writer, self.kind, self.image_base, "image_base")?;
            }
            ImageKind::Pe32Plus => writer.write_le(self.image_base)?,
        }

        writer.write_le(self.section_alignment)?;
        writer.write_le(self.file_alignment)?;
        writer.write_le(self.major_operating_system_version)?;
        writer.write_le(self.minor_operating_system_version)?;
        writer.write_le(self.major_image_version)?;
        writer.write_le(self.minor_image_version)?;
        writer.write_le(self.major_subsystem_version)?;
        writer.write_le(self.minor_subsystem_version)?;
        writer.write_le(self.win32_version_value)?;
        writer.write_le(self.size_of_image)?;
        writer.write_le(self.size_of_headers)?;
        writer.write_le(self.check_sum)?;
        writer.write_le(self.subsystem)?;
        writer.write_le(self.dll_characteristics.bits())?;

        write_address(writer, self.kind, self.size_of_stack_reserve, "size_of_stack_reserve")?;
        write_address(writer, self.kind, self.size_of_stack_commit, "size_of_stack_commit")?;
        write_address(writer, self.kind, self.size_of_heap_reserve, "size_of_heap_reserve")?;
        write_address(writer, self.kind, self.size_of_heap_commit, "size_of_heap_commit")?;

        writer.write_le(self.loader_flags)?;
        writer.write_le(self.number_of_rva_and_sizes)
    }

    /// Returns the named subsystem, or `None` for values this crate does not know.
    #[must_use]
    pub fn subsystem_type(&self) -> Option<Subsystem> {
        Subsystem::from_repr(self.subsystem)
    }

    /// Switches the header to the other layout.
    ///
    /// Moving to PE32 introduces a zero `base_of_data`; moving to PE32+ drops it. Address-sized
    /// fields are kept and checked when the header is written.
    pub fn set_kind(&mut self, kind: ImageKind) {
        self.base_of_data = match kind {
            ImageKind::Pe32 => Some(self.base_of_data.unwrap_or(0)),
            ImageKind::Pe32Plus => None,
        };
        self.kind = kind;
    }
}

fn read_address(parser: &mut Parser, kind: ImageKind) -> Result<u64> {
    match kind {
        ImageKind::Pe32 => Ok(u64::from(parser.read_le::<u32>()?)),
        ImageKind::Pe32Plus => parser.read_le::<u64>(),
    }
}

fn write_address(writer: &mut Writer, kind: ImageKind, value: u64, name: &str) -> Result<()> {
    match kind {
        ImageKind::Pe32 => {
            let Ok(narrow) = u32::try_from(value) else {
                return Err(overflow_error!(
                    "{} 0x{:X} does not fit a PE32 header",
                    name,
                    value
                ));
            };
            writer.write_le(narrow)
        }
        ImageKind::Pe32Plus => writer.write_le(value),
    }
}
