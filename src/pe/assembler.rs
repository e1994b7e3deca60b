//! Serialization of a [`crate::PeImage`] into one contiguous buffer.
//!
//! The output is laid out as
//!
//! ```text
//! [DOS header + stub][PE\0\0][COFF + optional header + directories][section table]
//! ... section contents at their pointer_to_raw_data ...
//! [trailing data]
//! ```
//!
//! The section region ends where the section that reaches farthest into the file ends, not
//! where the last section in table order ends. Trailing data starts exactly there. Gaps
//! between the pieces are zero.

use log::debug;

use crate::{
    error::try_alloc,
    file::writer::Writer,
    pe::{
        checksum,
        coff::COFF_HEADER_SIZE,
        image::PeImage,
        optional::CHECKSUM_OFFSET,
        section::SECTION_HEADER_SIZE,
        PE_SIGNATURE, PE_SIGNATURE_SIZE,
    },
    Result,
};

/// Where the pieces of a serialized image end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileLayout {
    /// End of the section table
    pub headers_end: usize,
    /// Start of the trailing data
    pub end_of_sections: usize,
    /// Size of the complete file
    pub total_size: usize,
}

impl FileLayout {
    /// Computes the output layout of `image` and checks that it can be serialized as-is.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the header counts disagree with the model, a
    /// section holds more bytes than its raw size or its raw data starts inside the headers, and [`crate::Error::Overflow`] if the file
    /// would exceed the address space.
    pub(crate) fn create(image: &PeImage) -> Result<FileLayout> {
        let header = image.header();
        let sections = image.sections();

        if usize::from(header.coff.number_of_sections) != sections.len() {
            return Err(malformed_error!(
                "Header lists {} sections but the image holds {} - recalculate the layout first",
                header.coff.number_of_sections,
                sections.len()
            ));
        }

        if header.optional.number_of_rva_and_sizes as usize != header.data_directories.len() {
            return Err(malformed_error!(
                "Header lists {} directories but holds {} - recalculate the layout first",
                header.optional.number_of_rva_and_sizes,
                header.data_directories.len()
            ));
        }

        let headers_end = u64::from(image.dos_header().pe_header_offset())
            + PE_SIGNATURE_SIZE as u64
            + header.size() as u64
            + sections.len() as u64 * SECTION_HEADER_SIZE as u64;

        let mut sections_end = 0_u64;
        for section in sections {
            if section.contents().len() as u64 > u64::from(section.size_of_raw_data) {
                return Err(malformed_error!(
                    "Section '{}' holds 0x{:X} bytes but only 0x{:X} bytes of raw data",
                    section.name(),
                    section.contents().len(),
                    section.size_of_raw_data
                ));
            }

            if section.size_of_raw_data != 0 {
                if u64::from(section.pointer_to_raw_data) < headers_end {
                    return Err(malformed_error!(
                        "Section '{}' raw data at 0x{:X} overlaps the headers ending at 0x{:X}",
                        section.name(),
                        section.pointer_to_raw_data,
                        headers_end
                    ));
                }

                let end = u64::from(section.pointer_to_raw_data)
                    + u64::from(section.size_of_raw_data);
                sections_end = sections_end.max(end);
            }
        }

        let end_of_sections = headers_end.max(sections_end);
        let total_size = end_of_sections + image.trailing_data().len() as u64;

        let (Ok(headers_end), Ok(end_of_sections), Ok(total_size)) = (
            usize::try_from(headers_end),
            usize::try_from(end_of_sections),
            usize::try_from(total_size),
        ) else {
            return Err(overflow_error!("Image of 0x{:X} bytes", total_size));
        };

        Ok(FileLayout {
            headers_end,
            end_of_sections,
            total_size,
        })
    }

    /// File offset of the optional header `CheckSum` field.
    pub(crate) fn checksum_offset(image: &PeImage) -> usize {
        image.dos_header().pe_header_offset() as usize
            + PE_SIGNATURE_SIZE
            + COFF_HEADER_SIZE
            + CHECKSUM_OFFSET
    }
}

/// Serializes `image` into `buffer`, which must be `layout.total_size` zeroed bytes.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `buffer` is too small and the header writers'
/// errors.
pub(crate) fn write(image: &PeImage, layout: &FileLayout, buffer: &mut [u8]) -> Result<()> {
    let mut writer = Writer::new(buffer);

    image.dos_header().write(&mut writer)?;
    writer.write_le(PE_SIGNATURE)?;
    image.header().write(&mut writer)?;
    for section in image.sections() {
        section.write_header(&mut writer)?;
    }

    for section in image.sections() {
        if section.contents().is_empty() {
            continue;
        }

        writer.seek(section.pointer_to_raw_data as usize)?;
        writer.write_bytes(section.contents())?;
    }

    writer.seek(layout.end_of_sections)?;
    writer.write_bytes(image.trailing_data())?;

    Ok(())
}

/// Stores the checksum of `buffer` in its `CheckSum` field.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the field lies outside `buffer`.
pub(crate) fn update_checksum(image: &PeImage, buffer: &mut [u8]) -> Result<()> {
    let offset = FileLayout::checksum_offset(image);
    let value = checksum::compute(buffer, offset);

    let mut writer = Writer::new(buffer);
    writer.seek(offset)?;
    writer.write_le(value)?;

    debug!("Updated checksum to 0x{:08X}", value);
    Ok(())
}

/// Serializes `image` into a newly allocated buffer.
///
/// # Errors
/// Returns [`crate::Error::Allocation`] if the buffer cannot be allocated, and the errors of
/// [`FileLayout::create`] and [`write`].
pub(crate) fn assemble(image: &PeImage, update: bool) -> Result<Vec<u8>> {
    let layout = FileLayout::create(image)?;
    let mut buffer = try_alloc(layout.total_size)?;

    write(image, &layout, &mut buffer)?;
    if update {
        update_checksum(image, &mut buffer)?;
    }

    debug!(
        "Assembled {} bytes (headers 0x{:X}, sections end 0x{:X})",
        layout.total_size, layout.headers_end, layout.end_of_sections
    );
    Ok(buffer)
}
