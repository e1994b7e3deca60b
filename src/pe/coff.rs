//! The COFF file header.

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::{
    file::{parser::Parser, writer::Writer},
    Result,
};

/// Size of the COFF file header in bytes.
pub const COFF_HEADER_SIZE: usize = 20;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Image characteristics stored in the COFF header
    pub struct FileCharacteristics: u16 {
        /// Image contains no base relocations and must load at its preferred base
        const RELOCS_STRIPPED = 0x0001;
        /// Image is valid and can be run
        const EXECUTABLE_IMAGE = 0x0002;
        /// COFF line numbers have been removed (deprecated)
        const LINE_NUMS_STRIPPED = 0x0004;
        /// COFF local symbols have been removed (deprecated)
        const LOCAL_SYMS_STRIPPED = 0x0008;
        /// Aggressively trim the working set (obsolete)
        const AGGRESSIVE_WS_TRIM = 0x0010;
        /// Application can handle addresses above 2 GB
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// Little endian (deprecated)
        const BYTES_REVERSED_LO = 0x0080;
        /// Machine is based on a 32-bit-word architecture
        const MACHINE_32BIT = 0x0100;
        /// Debugging information is removed from the image
        const DEBUG_STRIPPED = 0x0200;
        /// Copy the image to swap if it is on removable media
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        /// Copy the image to swap if it is on network media
        const NET_RUN_FROM_SWAP = 0x0800;
        /// The image is a system file
        const SYSTEM = 0x1000;
        /// The image is a dynamic-link library
        const DLL = 0x2000;
        /// Run only on a uniprocessor machine
        const UP_SYSTEM_ONLY = 0x4000;
        /// Big endian (deprecated)
        const BYTES_REVERSED_HI = 0x8000;
    }
}

/// Well-known values of the COFF `Machine` field.
///
/// The header keeps the raw `u16`; [`CoffHeader::machine_type`] maps it onto this enum when
/// the value is known.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, FromRepr)]
#[repr(u16)]
pub enum MachineType {
    /// Applicable to any machine type
    Unknown = 0x0000,
    /// Intel 386 and compatible
    I386 = 0x014C,
    /// MIPS little endian
    R4000 = 0x0166,
    /// Alpha AXP
    Alpha = 0x0184,
    /// ARM little endian
    Arm = 0x01C0,
    /// ARM Thumb-2 little endian
    ArmNt = 0x01C4,
    /// Matsushita AM33
    Am33 = 0x01D3,
    /// Power PC little endian
    PowerPc = 0x01F0,
    /// Intel Itanium
    Ia64 = 0x0200,
    /// EFI byte code
    Ebc = 0x0EBC,
    /// RISC-V 32-bit
    RiscV32 = 0x5032,
    /// RISC-V 64-bit
    RiscV64 = 0x5064,
    /// x64
    Amd64 = 0x8664,
    /// ARM64 little endian
    Arm64 = 0xAA64,
}

/// The 20-byte COFF file header following the `PE\0\0` signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffHeader {
    /// Target machine, see [`MachineType`]
    pub machine: u16,
    /// Number of entries in the section table
    pub number_of_sections: u16,
    /// Seconds since 1970-01-01 at link time
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, usually zero for images
    pub pointer_to_symbol_table: u32,
    /// Number of entries in the COFF symbol table
    pub number_of_symbols: u32,
    /// Size of the optional header including its data directories
    pub size_of_optional_header: u16,
    /// Image characteristics
    pub characteristics: FileCharacteristics,
}

impl CoffHeader {
    /// Reads the COFF header at the parser's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn read(parser: &mut Parser) -> Result<CoffHeader> {
        Ok(CoffHeader {
            machine: parser.read_le::<u16>()?,
            number_of_sections: parser.read_le::<u16>()?,
            time_date_stamp: parser.read_le::<u32>()?,
            pointer_to_symbol_table: parser.read_le::<u32>()?,
            number_of_symbols: parser.read_le::<u32>()?,
            size_of_optional_header: parser.read_le::<u16>()?,
            characteristics: FileCharacteristics::from_bits_retain(parser.read_le::<u16>()?),
        })
    }

    /// Writes the COFF header at the writer's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the writer runs out of space.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_le(self.machine)?;
        writer.write_le(self.number_of_sections)?;
        writer.write_le(self.time_date_stamp)?;
        writer.write_le(self.pointer_to_symbol_table)?;
        writer.write_le(self.number_of_symbols)?;
        writer.write_le(self.size_of_optional_header)?;
        writer.write_le(self.characteristics.bits())
    }

    /// Returns the named machine type, or `None` for values this crate does not know.
    #[must_use]
    pub fn machine_type(&self) -> Option<MachineType> {
        MachineType::from_repr(self.machine)
    }
}
