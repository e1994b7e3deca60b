//! Layout recalculation.
//!
//! After sections were added, removed, resized or reordered, the positions and aggregate sizes
//! stored in the headers no longer describe the image. [`LayoutPlan::create`] walks the section
//! list once, in order, and derives every value anew:
//!
//! - virtual addresses are packed from the layout anchor upwards, each section starting on a
//!   `section_alignment` boundary,
//! - raw data is packed directly behind the headers on `file_alignment` boundaries,
//! - `size_of_code`, `size_of_initialized_data`, `size_of_uninitialized_data`, `base_of_code`,
//!   `base_of_data`, `size_of_image` and `size_of_headers` are recomputed,
//! - each data directory's RVA is rebuilt from its owning section's new address.
//!
//! The plan is computed completely before anything is changed, so a failing recalculation
//! leaves the image as it was. [`LayoutPlan::apply`] then writes the plan into the model.

use log::{debug, trace};

use crate::{
    pe::{
        coff::COFF_HEADER_SIZE,
        directory::{DataDirectory, RawDataDirectory, DATA_DIRECTORY_SIZE},
        header::Header,
        optional::ImageKind,
        section::{Section, SectionCharacteristics, BIND_SECTION_NAME, SECTION_HEADER_SIZE},
        PE_SIGNATURE_SIZE,
    },
    Result,
};

/// Rounds `value` up to the next multiple of `alignment`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a zero alignment and [`crate::Error::Overflow`] if
/// the result does not fit in 64 bits.
pub fn align_up(value: u64, alignment: u64) -> Result<u64> {
    if alignment == 0 {
        return Err(malformed_error!("Alignment must not be zero"));
    }

    let remainder = value % alignment;
    if remainder == 0 {
        return Ok(value);
    }

    value
        .checked_add(alignment - remainder)
        .ok_or_else(|| overflow_error!("Aligning 0x{:X} to 0x{:X}", value, alignment))
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| overflow_error!("{} 0x{:X} exceeds 32 bits", what, value))
}

fn add(lhs: u64, rhs: u64, what: &str) -> Result<u64> {
    lhs.checked_add(rhs)
        .ok_or_else(|| overflow_error!("{} overflows", what))
}

/// New placement of one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    /// New RVA
    pub virtual_address: u32,
    /// New file offset, unchanged for sections without raw data
    pub pointer_to_raw_data: u32,
    /// Normalized raw data size
    pub size_of_raw_data: u32,
}

/// Every value a recalculation changes, computed up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// One placement per section, in section order
    pub sections: Vec<SectionPlacement>,
    /// Rebuilt data directory array
    pub directories: Vec<RawDataDirectory>,
    /// RVA of the first code section, zero if there is none
    pub base_of_code: u32,
    /// RVA of the first non-code section, zero if there is none
    pub base_of_data: u32,
    /// Aggregate size of code sections
    pub size_of_code: u32,
    /// Aggregate size of initialized data sections
    pub size_of_initialized_data: u32,
    /// Aggregate size of uninitialized data sections
    pub size_of_uninitialized_data: u32,
    /// End of the last section in memory, rounded to the section alignment
    pub size_of_image: u32,
    /// Size of all headers, rounded to the file alignment
    pub size_of_headers: u32,
    /// Section count for the COFF header
    pub number_of_sections: u16,
    /// Optional header size including directories, for the COFF header
    pub size_of_optional_header: u16,
    /// Directory count for the optional header
    pub number_of_rva_and_sizes: u32,
}

impl LayoutPlan {
    /// Computes the layout of `sections` under `header`'s alignments.
    ///
    /// # Arguments
    /// * `pe_header_offset` - File offset of the `PE\0\0` signature, including the DOS stub
    /// * `header` - Header providing the image kind and both alignments
    /// * `sections` - Sections in their intended order
    /// * `directories` - Section-relative directories to rebuild
    /// * `anchor` - RVA of the first section; derived from the header size when `None`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if there are no sections or an alignment is zero,
    /// and [`crate::Error::Overflow`] if any address or size leaves its field's range.
    pub fn create(
        pe_header_offset: u32,
        header: &Header,
        sections: &[Section],
        directories: &[DataDirectory],
        anchor: Option<u32>,
    ) -> Result<LayoutPlan> {
        if sections.is_empty() {
            return Err(malformed_error!("Cannot lay out an image without sections"));
        }

        let optional = &header.optional;
        let file_alignment = u64::from(optional.file_alignment);
        let section_alignment = u64::from(optional.section_alignment);
        if file_alignment == 0 || section_alignment == 0 {
            return Err(malformed_error!(
                "Invalid alignment - file 0x{:X}, section 0x{:X}",
                file_alignment,
                section_alignment
            ));
        }

        let Ok(number_of_sections) = u16::try_from(sections.len()) else {
            return Err(overflow_error!("{} sections", sections.len()));
        };
        let number_of_rva_and_sizes = to_u32(directories.len() as u64, "Directory count")?;

        let optional_size =
            optional.kind.optional_header_size() as u64 + directories.len() as u64 * DATA_DIRECTORY_SIZE as u64;
        let Ok(size_of_optional_header) = u16::try_from(optional_size) else {
            return Err(overflow_error!("Optional header of {} bytes", optional_size));
        };

        let headers_end = u64::from(pe_header_offset)
            + PE_SIGNATURE_SIZE as u64
            + COFF_HEADER_SIZE as u64
            + optional_size
            + u64::from(number_of_sections) * SECTION_HEADER_SIZE as u64;
        let size_of_headers = align_up(headers_end, file_alignment)?;

        let anchor = match anchor {
            Some(anchor) => u64::from(anchor),
            None => align_up(size_of_headers, section_alignment)?,
        };

        let mut next_virtual = anchor;
        let mut next_physical = size_of_headers;

        let mut base_of_code = None;
        let mut base_of_data = None;
        let mut size_of_code = 0_u64;
        let mut size_of_initialized_data = 0_u64;
        let mut size_of_uninitialized_data = 0_u64;

        let mut placements = Vec::with_capacity(sections.len());
        for section in sections {
            let virtual_size = u64::from(section.virtual_size);
            let mut size_of_raw_data = u64::from(section.size_of_raw_data);

            // raw data shorter than the virtual size is kept, the loader zero-fills the rest
            if size_of_raw_data != 0 && virtual_size <= size_of_raw_data {
                size_of_raw_data = align_up(virtual_size, file_alignment)?;
            }

            let virtual_address = next_virtual;
            let pointer_to_raw_data = if size_of_raw_data != 0 {
                next_physical
            } else {
                u64::from(section.pointer_to_raw_data)
            };

            next_virtual = add(
                next_virtual,
                align_up(virtual_size, section_alignment)?,
                "Virtual layout",
            )?;
            next_physical = add(
                next_physical,
                align_up(size_of_raw_data, file_alignment)?,
                "Physical layout",
            )?;

            let characteristics = section.characteristics;
            if characteristics.contains(SectionCharacteristics::CNT_CODE) {
                base_of_code.get_or_insert(virtual_address);
                if section.name() != BIND_SECTION_NAME {
                    size_of_code += align_up(virtual_size, file_alignment)?;
                }
            } else {
                base_of_data.get_or_insert(virtual_address);
            }

            if characteristics.contains(SectionCharacteristics::CNT_INITIALIZED_DATA) {
                size_of_initialized_data += match optional.kind {
                    ImageKind::Pe32 => {
                        align_up(virtual_size, file_alignment)?.max(size_of_raw_data)
                    }
                    ImageKind::Pe32Plus => align_up(size_of_raw_data, file_alignment)?,
                };
            }

            if characteristics.contains(SectionCharacteristics::CNT_UNINITIALIZED_DATA) {
                size_of_uninitialized_data += align_up(virtual_size, file_alignment)?;
            }

            let placement = SectionPlacement {
                virtual_address: to_u32(virtual_address, "Section virtual address")?,
                pointer_to_raw_data: to_u32(pointer_to_raw_data, "Section file offset")?,
                size_of_raw_data: to_u32(size_of_raw_data, "Section raw size")?,
            };
            trace!(
                "Section '{}' placed at RVA 0x{:X}, file offset 0x{:X}, raw size 0x{:X}",
                section.name(),
                placement.virtual_address,
                placement.pointer_to_raw_data,
                placement.size_of_raw_data
            );
            placements.push(placement);
        }

        let (last_section, last_placement) = sections
            .iter()
            .zip(placements.iter())
            .last()
            .ok_or_else(|| malformed_error!("Cannot lay out an image without sections"))?;
        let virtual_end = u64::from(last_placement.virtual_address) + u64::from(last_section.virtual_size);
        let size_of_image = align_up(virtual_end, section_alignment)?;

        let mut rebuilt = Vec::with_capacity(directories.len());
        for directory in directories {
            let placement = directory.section.and_then(|id| {
                sections
                    .iter()
                    .position(|section| section.id() == id)
                    .map(|index| placements[index])
            });

            let entry = match placement {
                Some(placement) => RawDataDirectory {
                    virtual_address: to_u32(
                        u64::from(placement.virtual_address) + u64::from(directory.offset),
                        "Directory address",
                    )?,
                    size: directory.size,
                },
                None => RawDataDirectory::default(),
            };
            rebuilt.push(entry);
        }

        let plan = LayoutPlan {
            sections: placements,
            directories: rebuilt,
            base_of_code: to_u32(base_of_code.unwrap_or(0), "base_of_code")?,
            base_of_data: to_u32(base_of_data.unwrap_or(0), "base_of_data")?,
            size_of_code: to_u32(align_up(size_of_code, file_alignment)?, "size_of_code")?,
            size_of_initialized_data: to_u32(
                align_up(size_of_initialized_data, file_alignment)?,
                "size_of_initialized_data",
            )?,
            size_of_uninitialized_data: to_u32(
                align_up(size_of_uninitialized_data, file_alignment)?,
                "size_of_uninitialized_data",
            )?,
            size_of_image: to_u32(size_of_image, "size_of_image")?,
            size_of_headers: to_u32(size_of_headers, "size_of_headers")?,
            number_of_sections,
            size_of_optional_header,
            number_of_rva_and_sizes,
        };

        debug!(
            "Layout planned: {} sections, size_of_image 0x{:X}, size_of_headers 0x{:X}",
            plan.number_of_sections, plan.size_of_image, plan.size_of_headers
        );

        Ok(plan)
    }

    /// Writes the plan into `header` and `sections`.
    ///
    /// `sections` must be the slice the plan was created from.
    pub fn apply(self, header: &mut Header, sections: &mut [Section]) {
        for (section, placement) in sections.iter_mut().zip(self.sections) {
            section.virtual_address = placement.virtual_address;
            section.pointer_to_raw_data = placement.pointer_to_raw_data;
            section.size_of_raw_data = placement.size_of_raw_data;
        }

        header.coff.number_of_sections = self.number_of_sections;
        header.coff.size_of_optional_header = self.size_of_optional_header;

        let optional = &mut header.optional;
        optional.base_of_code = self.base_of_code;
        if optional.kind == ImageKind::Pe32 {
            optional.base_of_data = Some(self.base_of_data);
        }
        optional.size_of_code = self.size_of_code;
        optional.size_of_initialized_data = self.size_of_initialized_data;
        optional.size_of_uninitialized_data = self.size_of_uninitialized_data;
        optional.size_of_image = self.size_of_image;
        optional.size_of_headers = self.size_of_headers;
        optional.number_of_rva_and_sizes = self.number_of_rva_and_sizes;

        header.data_directories = self.directories;
    }
}
