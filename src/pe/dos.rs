//! The legacy MS-DOS header and stub program.
//!
//! Every PE image starts with a 64-byte MS-DOS header followed by a small real-mode program
//! (the stub) that prints a message when the image is run under DOS. The only field the
//! Windows loader cares about is `e_lfanew` at offset `0x3C`, the file offset of the `PE\0\0`
//! signature. All other fields are kept verbatim so the header re-serializes exactly.

use crate::{
    error::try_copy,
    file::{parser::Parser, writer::Writer},
    Result,
};

/// Size of the fixed MS-DOS header in bytes.
pub const DOS_HEADER_SIZE: usize = 64;

/// The `MZ` signature, read as a little-endian `u16`.
pub const MZ_SIGNATURE: u16 = 0x5A4D;

/// Shortest printable run accepted as a stub message.
const MIN_MESSAGE_LEN: usize = 4;

/// The stub emitted by common linkers: print the message through `int 21h` and exit.
const DEFAULT_STUB: &[u8; 64] = b"\x0e\x1f\xba\x0e\x00\xb4\x09\xcd\x21\xb8\x01\x4c\xcd\x21\
This program cannot be run in DOS mode.\r\r\n$\0\0\0\0\0\0\0";

/// The MS-DOS header, its stub bytes and the message printed by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DosHeader {
    /// Magic number, `MZ` for valid images
    pub signature: u16,
    /// Bytes on the last page of the file
    pub e_cblp: u16,
    /// Pages in the file
    pub e_cp: u16,
    /// Relocations
    pub e_crlc: u16,
    /// Size of the header in paragraphs
    pub e_cparhdr: u16,
    /// Minimum extra paragraphs needed
    pub e_minalloc: u16,
    /// Maximum extra paragraphs needed
    pub e_maxalloc: u16,
    /// Initial (relative) SS value
    pub e_ss: u16,
    /// Initial SP value
    pub e_sp: u16,
    /// Checksum
    pub e_csum: u16,
    /// Initial IP value
    pub e_ip: u16,
    /// Initial (relative) CS value
    pub e_cs: u16,
    /// File address of the relocation table
    pub e_lfarlc: u16,
    /// Overlay number
    pub e_ovno: u16,
    /// Reserved words
    pub e_res: [u16; 4],
    /// OEM identifier
    pub e_oemid: u16,
    /// OEM information
    pub e_oeminfo: u16,
    /// Reserved words
    pub e_res2: [u16; 10],
    /// `e_lfanew`, the file offset of the PE signature
    pe_header_offset: u32,
    /// Bytes between the fixed header and the PE signature
    stub: Vec<u8>,
    /// Printable message found in the stub
    message: Option<String>,
}

impl DosHeader {
    /// Creates the header and stub a linker emits for a new image.
    ///
    /// The PE signature follows the stub at offset `0x80`.
    #[must_use]
    pub fn new() -> DosHeader {
        DosHeader {
            signature: MZ_SIGNATURE,
            e_cblp: 0x90,
            e_cp: 3,
            e_crlc: 0,
            e_cparhdr: 4,
            e_minalloc: 0,
            e_maxalloc: 0xFFFF,
            e_ss: 0,
            e_sp: 0xB8,
            e_csum: 0,
            e_ip: 0,
            e_cs: 0,
            e_lfarlc: 0x40,
            e_ovno: 0,
            e_res: [0; 4],
            e_oemid: 0,
            e_oeminfo: 0,
            e_res2: [0; 10],
            pe_header_offset: (DOS_HEADER_SIZE + DEFAULT_STUB.len()) as u32,
            stub: DEFAULT_STUB.to_vec(),
            message: find_message(DEFAULT_STUB),
        }
    }

    /// Reads the fixed 64-byte header from the start of `data`.
    ///
    /// The stub is not extracted here because `e_lfanew` has to be validated against the
    /// buffer first; see [`DosHeader::load_stub`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the fixed header.
    pub fn read(data: &[u8]) -> Result<DosHeader> {
        let mut parser = Parser::new(data);

        let signature = parser.read_le::<u16>()?;
        let e_cblp = parser.read_le::<u16>()?;
        let e_cp = parser.read_le::<u16>()?;
        let e_crlc = parser.read_le::<u16>()?;
        let e_cparhdr = parser.read_le::<u16>()?;
        let e_minalloc = parser.read_le::<u16>()?;
        let e_maxalloc = parser.read_le::<u16>()?;
        let e_ss = parser.read_le::<u16>()?;
        let e_sp = parser.read_le::<u16>()?;
        let e_csum = parser.read_le::<u16>()?;
        let e_ip = parser.read_le::<u16>()?;
        let e_cs = parser.read_le::<u16>()?;
        let e_lfarlc = parser.read_le::<u16>()?;
        let e_ovno = parser.read_le::<u16>()?;

        let mut e_res = [0u16; 4];
        for value in &mut e_res {
            *value = parser.read_le::<u16>()?;
        }

        let e_oemid = parser.read_le::<u16>()?;
        let e_oeminfo = parser.read_le::<u16>()?;

        let mut e_res2 = [0u16; 10];
        for value in &mut e_res2 {
            *value = parser.read_le::<u16>()?;
        }

        let pe_header_offset = parser.read_le::<u32>()?;

        Ok(DosHeader {
            signature,
            e_cblp,
            e_cp,
            e_crlc,
            e_cparhdr,
            e_minalloc,
            e_maxalloc,
            e_ss,
            e_sp,
            e_csum,
            e_ip,
            e_cs,
            e_lfarlc,
            e_ovno,
            e_res,
            e_oemid,
            e_oeminfo,
            e_res2,
            pe_header_offset,
            stub: Vec::new(),
            message: None,
        })
    }

    /// Copies the stub program out of `data` and looks for its message.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `e_lfanew` points into the fixed header or past
    /// the end of `data`, and [`crate::Error::Allocation`] if the stub cannot be copied.
    pub fn load_stub(&mut self, data: &[u8]) -> Result<()> {
        let pe_header_offset = self.pe_header_offset as usize;
        if pe_header_offset < DOS_HEADER_SIZE {
            return Err(malformed_error!(
                "DOS header size larger than PE header offset - {}",
                pe_header_offset
            ));
        }

        if pe_header_offset > data.len() {
            return Err(malformed_error!(
                "PE header offset {} outside of file",
                pe_header_offset
            ));
        }

        self.stub = try_copy(&data[DOS_HEADER_SIZE..pe_header_offset])?;
        self.message = find_message(&self.stub);
        Ok(())
    }

    /// Returns `e_lfanew`, the file offset of the PE signature.
    #[must_use]
    pub fn pe_header_offset(&self) -> u32 {
        self.pe_header_offset
    }

    /// Returns the stub program bytes.
    #[must_use]
    pub fn stub(&self) -> &[u8] {
        &self.stub
    }

    /// Returns the message the stub prints, if one was recognized.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Replaces the stub program and moves the PE signature directly behind it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] if the resulting `e_lfanew` does not fit in 32 bits.
    pub fn set_stub(&mut self, stub: Vec<u8>) -> Result<()> {
        let Some(offset) = stub
            .len()
            .checked_add(DOS_HEADER_SIZE)
            .and_then(|offset| u32::try_from(offset).ok())
        else {
            return Err(overflow_error!("DOS stub of {} bytes", stub.len()));
        };

        self.pe_header_offset = offset;
        self.message = find_message(&stub);
        self.stub = stub;
        Ok(())
    }

    /// Serializes the fixed header followed by the stub.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the writer runs out of space.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_le(self.signature)?;
        writer.write_le(self.e_cblp)?;
        writer.write_le(self.e_cp)?;
        writer.write_le(self.e_crlc)?;
        writer.write_le(self.e_cparhdr)?;
        writer.write_le(self.e_minalloc)?;
        writer.write_le(self.e_maxalloc)?;
        writer.write_le(self.e_ss)?;
        writer.write_le(self.e_sp)?;
        writer.write_le(self.e_csum)?;
        writer.write_le(self.e_ip)?;
        writer.write_le(self.e_cs)?;
        writer.write_le(self.e_lfarlc)?;
        writer.write_le(self.e_ovno)?;
        for value in self.e_res {
            writer.write_le(value)?;
        }
        writer.write_le(self.e_oemid)?;
        writer.write_le(self.e_oeminfo)?;
        for value in self.e_res2 {
            writer.write_le(value)?;
        }
        writer.write_le(self.pe_header_offset)?;
        writer.write_bytes(&self.stub)
    }
}

impl Default for DosHeader {
    fn default() -> Self {
        DosHeader::new()
    }
}

/// Finds the `$`-terminated string printed through `int 21h, ah=09h`.
///
/// The longest printable run directly in front of the first `$` is taken as the message. The
/// run may start inside the `int 21h` opcode (`CD 21` ends in `!`), so leading punctuation is
/// dropped.
fn find_message(stub: &[u8]) -> Option<String> {
    let end = stub.iter().position(|&byte| byte == b'$')?;

    let start = stub[..end]
        .iter()
        .rposition(|&byte| {
            !(byte.is_ascii_graphic() || matches!(byte, b' ' | b'\r' | b'\n' | b'\t'))
        })
        .map_or(0, |position| position + 1);

    let message = String::from_utf8_lossy(&stub[start..end]);
    let message = message
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim_end_matches(['\r', '\n']);
    if message.trim().len() < MIN_MESSAGE_LEN {
        return None;
    }

    Some(message.to_string())
}
