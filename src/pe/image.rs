//! The PE image aggregate.
//!
//! [`PeImage`] owns everything read from an input file: the DOS header and stub, the PE
//! header, the sections with their contents, the section-relative data directories and any
//! bytes trailing the last section. It is built by a single parsing pass that either returns a
//! complete model or an error, can be edited freely, and is written back after a call to
//! [`PeImage::recalculate`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use peforge::{PeImage, Section, SectionCharacteristics};
//!
//! let mut image = PeImage::from_file("app.exe")?;
//!
//! let section = Section::new(
//!     ".extra",
//!     SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
//!     b"payload".to_vec(),
//! )?;
//! image.add_section(section)?;
//!
//! image.recalculate()?;
//! image.write_file("app.patched.exe")?;
//! # Ok::<(), peforge::Error>(())
//! ```

use std::path::Path;

use log::{debug, trace, warn};

use crate::{
    error::try_copy,
    file::{
        io::read_le,
        memory::Memory,
        output::Output,
        parser::Parser,
        physical::Physical,
        Backend,
    },
    pe::{
        assembler::{self, FileLayout},
        directory::{
            self, DataDirectory, DataDirectoryType, RawDataDirectory, DATA_DIRECTORY_SIZE,
        },
        dos::{DosHeader, MZ_SIGNATURE},
        header::Header,
        layout::LayoutPlan,
        optional::ImageKind,
        options::{LoadOptions, WriteOptions},
        section::{Section, SectionId, SECTION_HEADER_SIZE},
        PE_SIGNATURE, PE_SIGNATURE_SIZE,
    },
    Error, Result,
};

/// An editable PE32 or PE32+ image.
#[derive(Debug, Clone)]
pub struct PeImage {
    /// MS-DOS header and stub
    dos: DosHeader,
    /// COFF header, optional header and raw directory array
    header: Header,
    /// Sections in file order
    sections: Vec<Section>,
    /// Section-relative data directories
    directories: Vec<DataDirectory>,
    /// Bytes behind the last section's raw data
    trailing_data: Vec<u8>,
    /// RVA of the first section at load time, the floor of the virtual layout
    start_of_sections: Option<u32>,
    /// Next identifier handed out to a section
    next_section_id: u32,
}

impl PeImage {
    /// Creates an image without sections, using common linker defaults.
    ///
    /// At least one section has to be added before the layout can be recalculated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use peforge::{ImageKind, PeImage, Section, SectionCharacteristics};
    ///
    /// let mut image = PeImage::new(ImageKind::Pe32Plus);
    /// image.add_section(Section::new(".text", SectionCharacteristics::CNT_CODE, vec![0xC3])?)?;
    /// image.recalculate()?;
    ///
    /// let bytes = image.to_bytes()?;
    /// let reparsed = PeImage::from_slice(&bytes)?;
    /// assert_eq!(reparsed.sections()[0].name(), ".text");
    /// # Ok::<(), peforge::Error>(())
    /// ```
    #[must_use]
    pub fn new(kind: ImageKind) -> PeImage {
        let header = Header::new(kind);
        let directories = (0..header.optional.number_of_rva_and_sizes)
            .map(DataDirectory::empty)
            .collect();

        PeImage {
            dos: DosHeader::new(),
            header,
            sections: Vec::new(),
            directories,
            trailing_data: Vec::new(),
            start_of_sections: None,
            next_section_id: 0,
        }
    }

    /// Parses an image from a file on disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and the
    /// errors of [`PeImage::from_slice`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<PeImage> {
        Self::from_file_with(path, LoadOptions::default())
    }

    /// Parses an image from a file on disk with explicit options.
    ///
    /// # Errors
    /// See [`PeImage::from_file`].
    pub fn from_file_with(path: impl AsRef<Path>, options: LoadOptions) -> Result<PeImage> {
        let input = Physical::new(path)?;
        Self::load(&input, options)
    }

    /// Parses an image from an owned buffer.
    ///
    /// # Errors
    /// See [`PeImage::from_slice`].
    pub fn from_mem(data: Vec<u8>) -> Result<PeImage> {
        Self::from_mem_with(data, LoadOptions::default())
    }

    /// Parses an image from an owned buffer with explicit options.
    ///
    /// # Errors
    /// See [`PeImage::from_slice`].
    pub fn from_mem_with(data: Vec<u8>, options: LoadOptions) -> Result<PeImage> {
        let input = Memory::new(data);
        Self::load(&input, options)
    }

    /// Parses an image from a borrowed buffer.
    ///
    /// All bytes the model keeps are copied, so `data` can be dropped afterwards.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] or
    /// [`crate::Error::OutOfBounds`] for input that is not a well-formed PE image,
    /// [`crate::Error::UnsupportedMagic`] for an unknown optional header,
    /// [`crate::Error::Overflow`] for size fields that would overflow, and
    /// [`crate::Error::Allocation`] if a buffer cannot be allocated.
    pub fn from_slice(data: &[u8]) -> Result<PeImage> {
        Self::from_slice_with(data, LoadOptions::default())
    }

    /// Parses an image from a borrowed buffer with explicit options.
    ///
    /// # Errors
    /// See [`PeImage::from_slice`].
    pub fn from_slice_with(data: &[u8], options: LoadOptions) -> Result<PeImage> {
        Self::parse(data, options)
    }

    fn load(input: &dyn Backend, options: LoadOptions) -> Result<PeImage> {
        Self::parse(input.data(), options)
    }

    fn parse(data: &[u8], options: LoadOptions) -> Result<PeImage> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut dos = DosHeader::read(data)?;
        if dos.signature != MZ_SIGNATURE {
            if options.verify_signatures {
                return Err(malformed_error!("Not a PE file (MZ signature missing)"));
            }
            warn!("Ignoring missing MZ signature (0x{:04X})", dos.signature);
        }

        let pe_header_offset = dos.pe_header_offset() as usize;
        if (data.len() as u64) < pe_header_offset as u64 + PE_SIGNATURE_SIZE as u64 {
            return Err(malformed_error!(
                "Not a PE file (file too small) - PE header offset {}",
                pe_header_offset
            ));
        }

        dos.load_stub(data)?;

        let signature = read_le::<u32>(&data[pe_header_offset..])?;
        if signature != PE_SIGNATURE {
            if options.verify_signatures {
                return Err(malformed_error!("Not a PE file (PE00 signature missing)"));
            }
            warn!("Ignoring missing PE signature (0x{:08X})", signature);
        }

        let header_offset = pe_header_offset + PE_SIGNATURE_SIZE;
        let header = Header::read(data, header_offset)?;

        let section_offset = header_offset + header.size();
        let section_count = usize::from(header.coff.number_of_sections);
        let start_of_section_data = section_offset + section_count * SECTION_HEADER_SIZE;
        if start_of_section_data > data.len() {
            return Err(malformed_error!(
                "File too small for section headers - {} sections",
                section_count
            ));
        }

        let mut parser = Parser::new(data);
        parser.seek(section_offset)?;

        let mut sections = Vec::new();
        sections
            .try_reserve_exact(section_count)
            .map_err(|_| Error::Allocation {
                size: section_count * std::mem::size_of::<Section>(),
            })?;

        let mut end_of_section_data = start_of_section_data as u64;
        for index in 0..header.coff.number_of_sections {
            let mut section = Section::read(&mut parser, SectionId(u32::from(index)))?;

            let start = u64::from(section.pointer_to_raw_data);
            let data_size = u64::from(section.virtual_size.min(section.size_of_raw_data));
            if start + data_size > data.len() as u64 {
                return Err(malformed_error!(
                    "Section data outside of file - section {} at 0x{:X}, 0x{:X} bytes",
                    index,
                    start,
                    data_size
                ));
            }

            section.contents = try_copy(&data[start as usize..(start + data_size) as usize])?;
            if section.size_of_raw_data != 0 {
                end_of_section_data =
                    end_of_section_data.max(start + u64::from(section.size_of_raw_data));
            }

            trace!(
                "Section '{}': RVA 0x{:X}, virtual size 0x{:X}, raw 0x{:X} at 0x{:X}",
                section.name(),
                section.virtual_address,
                section.virtual_size,
                section.size_of_raw_data,
                section.pointer_to_raw_data
            );
            sections.push(section);
        }

        let directories = directory::resolve(&header.data_directories, &sections);

        let trailing_data = if (data.len() as u64) > end_of_section_data {
            try_copy(&data[end_of_section_data as usize..])?
        } else {
            Vec::new()
        };

        debug!(
            "Loaded {} image: {} sections, {} directories, {} trailing bytes",
            header.kind(),
            sections.len(),
            directories.len(),
            trailing_data.len()
        );

        Ok(PeImage {
            dos,
            start_of_sections: sections.first().map(|section| section.virtual_address),
            next_section_id: u32::from(header.coff.number_of_sections),
            header,
            sections,
            directories,
            trailing_data,
        })
    }

    /// Returns the MS-DOS header.
    #[must_use]
    pub fn dos_header(&self) -> &DosHeader {
        &self.dos
    }

    /// Returns the MS-DOS header for editing, e.g. to replace the stub.
    pub fn dos_header_mut(&mut self) -> &mut DosHeader {
        &mut self.dos
    }

    /// Returns the PE header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the PE header for editing.
    ///
    /// Values derived from the section layout are overwritten by [`PeImage::recalculate`].
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Returns whether this is a PE32 or PE32+ image.
    #[must_use]
    pub fn kind(&self) -> ImageKind {
        self.header.kind()
    }

    /// Returns the sections in file order.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns the sections in file order for editing.
    pub fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    /// Looks up a section by identifier.
    #[must_use]
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|section| section.id() == id)
    }

    /// Looks up a section by identifier for editing.
    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.iter_mut().find(|section| section.id() == id)
    }

    /// Returns the position of a section in the section table.
    #[must_use]
    pub fn section_index(&self, id: SectionId) -> Option<usize> {
        self.sections.iter().position(|section| section.id() == id)
    }

    /// Returns the first section with the given name.
    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// Returns the first section whose loaded extent contains `rva`.
    #[must_use]
    pub fn section_by_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|section| section.contains_rva(rva))
    }

    /// Appends a section and returns its identifier.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] if the image already holds 65535 sections.
    pub fn add_section(&mut self, section: Section) -> Result<SectionId> {
        self.insert_section(self.sections.len(), section)
    }

    /// Inserts a section at `index` and returns its identifier.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is past the end of the section table
    /// and [`crate::Error::Overflow`] if the image already holds 65535 sections.
    pub fn insert_section(&mut self, index: usize, mut section: Section) -> Result<SectionId> {
        if index > self.sections.len() {
            return Err(malformed_error!(
                "Section index {} out of range ({} sections)",
                index,
                self.sections.len()
            ));
        }

        if self.sections.len() >= usize::from(u16::MAX) {
            return Err(overflow_error!("Section table is full"));
        }

        let id = SectionId(self.next_section_id);
        self.next_section_id = self
            .next_section_id
            .checked_add(1)
            .ok_or_else(|| overflow_error!("Section identifiers exhausted"))?;

        section.id = id;
        trace!("Inserting section '{}' as {} at {}", section.name(), id, index);
        self.sections.insert(index, section);
        Ok(id)
    }

    /// Removes a section and returns it.
    ///
    /// Directories owned by the section become section-less and are cleared by the next
    /// recalculation.
    pub fn remove_section(&mut self, id: SectionId) -> Option<Section> {
        let index = self.section_index(id)?;
        let section = self.sections.remove(index);

        for directory in &mut self.directories {
            if directory.section == Some(id) {
                directory.section = None;
            }
        }

        Some(section)
    }

    /// Moves the section at `from` to position `to`, shifting the sections in between.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if either index is out of range.
    pub fn move_section(&mut self, from: usize, to: usize) -> Result<()> {
        let count = self.sections.len();
        if from >= count || to >= count {
            return Err(malformed_error!(
                "Cannot move section {} to {} ({} sections)",
                from,
                to,
                count
            ));
        }

        let section = self.sections.remove(from);
        self.sections.insert(to, section);
        Ok(())
    }

    /// Returns the data directories, one per header entry.
    #[must_use]
    pub fn directories(&self) -> &[DataDirectory] {
        &self.directories
    }

    /// Returns the directory of the given type, if the header has an entry for it.
    #[must_use]
    pub fn directory(&self, kind: DataDirectoryType) -> Option<&DataDirectory> {
        self.directories.get(kind.index())
    }

    /// Returns the current RVA of a directory, computed from its owning section.
    #[must_use]
    pub fn directory_rva(&self, kind: DataDirectoryType) -> Option<u32> {
        let directory = self.directory(kind)?;
        let section = self.section(directory.section?)?;
        section.virtual_address.checked_add(directory.offset)
    }

    /// Points a directory at `offset` bytes into a section.
    ///
    /// The directory array grows if the header has fewer entries than `kind` needs.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for the certificate table, whose address is a file
    /// offset, and for unknown sections.
    pub fn set_directory(
        &mut self,
        kind: DataDirectoryType,
        section: SectionId,
        offset: u32,
        size: u32,
    ) -> Result<()> {
        if kind == DataDirectoryType::CertificateTable {
            return Err(malformed_error!(
                "The certificate table is addressed by file offset, not by section"
            ));
        }

        if self.section(section).is_none() {
            return Err(malformed_error!("Unknown section {}", section));
        }

        let index = kind.index();
        while self.directories.len() <= index {
            let next = self.directories.len() as u32;
            self.directories.push(DataDirectory::empty(next));
        }

        let directory = &mut self.directories[index];
        directory.section = Some(section);
        directory.offset = offset;
        directory.size = size;
        Ok(())
    }

    /// Detaches a directory from its section; it is written as zero after recalculation.
    pub fn clear_directory(&mut self, kind: DataDirectoryType) {
        if let Some(directory) = self.directories.get_mut(kind.index()) {
            directory.section = None;
            directory.offset = 0;
            directory.size = 0;
        }
    }

    /// Sets `number_of_rva_and_sizes`, growing or truncating the directory list.
    ///
    /// New entries are empty. Truncation drops the entries at the end, with their section
    /// references. The header's count, its raw directory array and the optional header size
    /// follow immediately, so the image can be serialized without a recalculation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Overflow`] for counts whose directory array would not fit the
    /// 32-bit address space, and [`crate::Error::Allocation`] if the arrays cannot grow.
    pub fn set_directory_count(&mut self, count: u32) -> Result<()> {
        if count > u32::MAX / DATA_DIRECTORY_SIZE as u32 {
            return Err(overflow_error!("{} directory entries", count));
        }

        let optional_size = self.header.optional.kind.optional_header_size()
            + count as usize * DATA_DIRECTORY_SIZE;
        let Ok(size_of_optional_header) = u16::try_from(optional_size) else {
            return Err(overflow_error!("Optional header of {} bytes", optional_size));
        };

        let count = count as usize;
        let additional = count.saturating_sub(self.directories.len());
        self.directories
            .try_reserve_exact(additional)
            .map_err(|_| Error::Allocation {
                size: additional * std::mem::size_of::<DataDirectory>(),
            })?;
        let additional = count.saturating_sub(self.header.data_directories.len());
        self.header
            .data_directories
            .try_reserve_exact(additional)
            .map_err(|_| Error::Allocation {
                size: additional * DATA_DIRECTORY_SIZE,
            })?;

        self.directories.truncate(count);
        while self.directories.len() < count {
            let next = self.directories.len() as u32;
            self.directories.push(DataDirectory::empty(next));
        }
        self.header
            .data_directories
            .resize(count, RawDataDirectory::default());

        self.header.optional.number_of_rva_and_sizes = count as u32;
        self.header.coff.size_of_optional_header = size_of_optional_header;
        trace!("Directory count set to {}", count);
        Ok(())
    }

    /// Returns the bytes behind the last section's raw data.
    #[must_use]
    pub fn trailing_data(&self) -> &[u8] {
        &self.trailing_data
    }

    /// Replaces the trailing data.
    pub fn set_trailing_data(&mut self, data: Vec<u8>) {
        self.trailing_data = data;
    }

    /// Removes the trailing data.
    pub fn clear_trailing_data(&mut self) {
        self.trailing_data.clear();
    }

    /// Recomputes addresses, file offsets and aggregate sizes from the current section order.
    ///
    /// Sections are packed in order starting at the RVA the first section had when the image
    /// was loaded. Every data directory is rebuilt from its owning section's new address;
    /// directories without an owning section, the certificate table included, are cleared.
    ///
    /// The signature blob a certificate table points at usually lives in the trailing data and
    /// survives, but its header entry does not. Callers writing a signed image back out restore
    /// it through [`Header::data_directories`] after recalculating, using the new file offset
    /// of the trailing data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for images without sections or with a zero
    /// alignment, and [`crate::Error::Overflow`] if the layout exceeds the 32-bit fields. The
    /// image is unchanged when an error is returned.
    pub fn recalculate(&mut self) -> Result<()> {
        let plan = LayoutPlan::create(
            self.dos.pe_header_offset(),
            &self.header,
            &self.sections,
            &self.directories,
            self.start_of_sections,
        )?;

        plan.apply(&mut self.header, &mut self.sections);
        if self.start_of_sections.is_none() {
            self.start_of_sections = self.sections.first().map(|section| section.virtual_address);
        }
        Ok(())
    }

    /// Serializes the image into a new buffer.
    ///
    /// The model is written as it is; call [`PeImage::recalculate`] after editing sections.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the header counts are out of sync with the model,
    /// a section holds more bytes than its raw size or its raw data starts inside the headers,
    /// and [`crate::Error::Allocation`] if the buffer cannot be allocated.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(WriteOptions::default())
    }

    /// Serializes the image into a new buffer with explicit options.
    ///
    /// # Errors
    /// See [`PeImage::to_bytes`].
    pub fn to_bytes_with(&self, options: WriteOptions) -> Result<Vec<u8>> {
        assembler::assemble(self, options.update_checksum)
    }

    /// Serializes the image straight into a file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be created or written, and the
    /// errors of [`PeImage::to_bytes`]. No file is left behind on failure.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_file_with(path, WriteOptions::default())
    }

    /// Serializes the image straight into a file with explicit options.
    ///
    /// # Errors
    /// See [`PeImage::write_file`].
    pub fn write_file_with(&self, path: impl AsRef<Path>, options: WriteOptions) -> Result<()> {
        let layout = FileLayout::create(self)?;
        let mut output = Output::create(path, layout.total_size as u64)?;

        assembler::write(self, &layout, output.as_mut_slice())?;
        if options.update_checksum {
            assembler::update_checksum(self, output.as_mut_slice())?;
        }

        debug!(
            "Writing {} bytes to {}",
            layout.total_size,
            output.target_path().display()
        );
        output.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pe::{
            checksum, directory::RawDataDirectory, header::HeaderField,
            section::SectionCharacteristics,
        },
        test::factories::ImageBuilder,
        ErrorKind,
    };

    const IMPORT: usize = 1;
    const CERTIFICATE: usize = 4;

    fn load(data: &[u8]) -> PeImage {
        PeImage::from_slice(data).unwrap()
    }

    #[test]
    fn load_pe32() {
        let builder = ImageBuilder::simple(ImageKind::Pe32).trailing(b"OVERLAY".to_vec());
        let image = load(&builder.build());

        assert_eq!(image.kind(), ImageKind::Pe32);
        assert_eq!(image.dos_header().pe_header_offset(), 0x80);
        assert_eq!(
            image.dos_header().message(),
            Some("This program cannot be run in DOS mode.")
        );
        assert_eq!(image.directories().len(), 16);

        let sections = image.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name(), ".text");
        assert_eq!(sections[0].virtual_address, builder.section_rva(0));
        assert_eq!(sections[0].contents(), &[0xC3; 0x180][..]);
        assert_eq!(sections[1].contents(), &[0x11; 0x40][..]);
        assert_eq!(sections[1].size_of_raw_data, 0x200);

        assert_eq!(image.trailing_data(), b"OVERLAY");
        assert_eq!(
            image.section_by_rva(builder.section_rva(1) + 4).map(Section::name),
            Some(".data".to_string())
        );
        assert!(image.section_by_name(".rsrc").is_none());
    }

    #[test]
    fn load_pe32plus_with_bss() {
        let builder = ImageBuilder::new(ImageKind::Pe32Plus)
            .code(".text", vec![0x90; 0x10])
            .bss(".bss", 0x2400)
            .data(".data", vec![0x22; 0x300]);
        let image = load(&builder.build());

        assert_eq!(image.kind(), ImageKind::Pe32Plus);
        let bss = image.section_by_name(".bss").unwrap();
        assert_eq!(bss.size_of_raw_data, 0);
        assert!(bss.contents().is_empty());
        assert_eq!(
            image.section_by_name(".data").unwrap().virtual_address,
            builder.section_rva(2)
        );
        assert!(image.trailing_data().is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(PeImage::from_slice(&[]), Err(Error::Empty)));

        let data = ImageBuilder::simple(ImageKind::Pe32).build();

        let truncated = PeImage::from_slice(&data[..0x83]).unwrap_err();
        assert!(matches!(truncated, Error::Malformed { .. }));

        let no_section_table = PeImage::from_slice(&data[..0x1A0]).unwrap_err();
        assert!(matches!(no_section_table, Error::Malformed { .. }));

        let cut_section = PeImage::from_slice(&data[..0x420]).unwrap_err();
        assert!(matches!(cut_section, Error::Malformed { .. }));

        let mut bad_magic = data.clone();
        bad_magic[0x98..0x9A].copy_from_slice(&0x107_u16.to_le_bytes());
        assert!(matches!(
            PeImage::from_slice(&bad_magic),
            Err(Error::UnsupportedMagic(0x107))
        ));

        let mut hostile = data.clone();
        hostile[0x3C..0x40].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            PeImage::from_slice(&hostile).unwrap_err().kind(),
            ErrorKind::Format
        );
    }

    #[test]
    fn signatures() {
        let mut data = ImageBuilder::simple(ImageKind::Pe32).build();
        data[0] = b'X';
        data[0x80] = b'X';

        assert!(matches!(
            PeImage::from_slice(&data),
            Err(Error::Malformed { .. })
        ));
        assert!(PeImage::from_slice_with(&data, LoadOptions::strict()).is_err());

        let image = PeImage::from_slice_with(&data, LoadOptions::permissive()).unwrap();
        assert_eq!(image.sections().len(), 2);

        let truncated = PeImage::from_slice_with(&data[..0x100], LoadOptions::permissive());
        assert!(truncated.is_err());
    }

    #[test]
    fn recalculation_is_idempotent() {
        for kind in [ImageKind::Pe32, ImageKind::Pe32Plus] {
            let builder = ImageBuilder::new(kind)
                .code(".text", vec![0xCC; 0x1234])
                .bss(".bss", 0x800)
                .data(".rdata", vec![0x33; 0x10])
                .trailing(vec![0xEE; 0x33]);
            let rdata = builder.section_rva(2);
            let data = builder.directory(IMPORT, rdata + 0x8, 0x28).build();

            let mut image = load(&data);
            image.recalculate().unwrap();
            assert_eq!(image.to_bytes().unwrap(), data, "{kind}");
        }
    }

    #[test]
    fn directories_follow_moved_section() {
        let builder = ImageBuilder::simple(ImageKind::Pe32);
        let data_rva = builder.section_rva(1);
        let data = builder.directory(IMPORT, data_rva + 0x10, 0x28).build();

        let mut image = load(&data);
        let owner = image.directory(DataDirectoryType::ImportTable).unwrap();
        assert_eq!(owner.offset, 0x10);
        let owner = owner.section.unwrap();

        image.move_section(1, 0).unwrap();
        image.recalculate().unwrap();

        let moved = image.section(owner).unwrap().virtual_address;
        assert_eq!(moved, data_rva - 0x1000);
        assert_eq!(
            image.directory_rva(DataDirectoryType::ImportTable),
            Some(moved + 0x10)
        );
        assert_eq!(image.header().data_directories[IMPORT].virtual_address, moved + 0x10);
        assert_eq!(image.header().data_directories[IMPORT].size, 0x28);

        let reparsed = load(&image.to_bytes().unwrap());
        assert_eq!(reparsed.sections()[0].name(), ".data");
        assert_eq!(reparsed.sections()[0].contents(), &[0x11; 0x40][..]);
    }

    #[test]
    fn certificate_table_is_not_resolved() {
        let builder = ImageBuilder::simple(ImageKind::Pe32).trailing(vec![0xAB; 0x10]);
        let text_rva = builder.section_rva(0);
        let data = builder.directory(CERTIFICATE, text_rva, 0x10).build();

        let mut image = load(&data);
        let certificate = image.directory(DataDirectoryType::CertificateTable).unwrap();
        assert_eq!(certificate.section, None);
        assert_eq!(certificate.offset, text_rva);
        assert_eq!(image.directory_rva(DataDirectoryType::CertificateTable), None);

        image.recalculate().unwrap();
        assert_eq!(
            image.header().data_directories[CERTIFICATE],
            RawDataDirectory::default()
        );
        assert_eq!(image.trailing_data(), &[0xAB; 0x10][..]);

        let overlay = (data.len() - 0x10) as u32;
        image.header_mut().data_directories[CERTIFICATE] = RawDataDirectory {
            virtual_address: overlay,
            size: 0x10,
        };
        let bytes = image.to_bytes().unwrap();
        assert_eq!(&bytes[overlay as usize..], &[0xAB; 0x10][..]);
        let reloaded = load(&bytes);
        let certificate = reloaded
            .directory(DataDirectoryType::CertificateTable)
            .unwrap();
        assert_eq!((certificate.offset, certificate.size), (overlay, 0x10));
    }

    #[test]
    fn directory_count() {
        let builder = ImageBuilder::simple(ImageKind::Pe32);
        let data_rva = builder.section_rva(1);
        let mut image = load(&builder.directory(IMPORT, data_rva, 0x28).build());

        assert!(image
            .header_mut()
            .set(HeaderField::NumberOfRvaAndSizes, 6)
            .is_err());
        assert_eq!(image.header().optional.number_of_rva_and_sizes, 16);

        image.set_directory_count(6).unwrap();
        assert_eq!(image.directories().len(), 6);
        assert_eq!(image.header().data_directories.len(), 6);
        assert_eq!(image.header().coff.size_of_optional_header, 96 + 6 * 8);
        assert!(image.to_bytes().is_ok());

        image.recalculate().unwrap();
        assert_eq!(image.header().optional.number_of_rva_and_sizes, 6);
        let reloaded = load(&image.to_bytes().unwrap());
        assert_eq!(reloaded.header().optional.number_of_rva_and_sizes, 6);
        assert_eq!(reloaded.directories().len(), 6);
        assert_eq!(
            reloaded.directory_rva(DataDirectoryType::ImportTable),
            Some(reloaded.sections()[1].virtual_address)
        );

        image.set_directory_count(0x20).unwrap();
        assert_eq!(image.directories().len(), 0x20);
        assert_eq!(image.directories()[0x1F].index, 0x1F);
        assert_eq!(image.directories()[0x1F].section, None);
        assert_eq!(
            image.directory_rva(DataDirectoryType::ImportTable),
            Some(image.sections()[1].virtual_address)
        );

        assert!(matches!(
            image.set_directory_count(u32::MAX),
            Err(Error::Overflow { .. })
        ));
        assert!(matches!(
            image.set_directory_count(u32::MAX / 8),
            Err(Error::Overflow { .. })
        ));
        assert_eq!(image.directories().len(), 0x20);
    }

    #[test]
    fn raw_data_inside_headers_is_rejected() {
        let data = ImageBuilder::simple(ImageKind::Pe32).build();
        let mut image = load(&data);

        image.sections_mut()[1].pointer_to_raw_data = 0x80;
        let err = image.to_bytes().unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));

        image.recalculate().unwrap();
        assert_eq!(image.to_bytes().unwrap(), data);

        let text = &mut image.sections_mut()[0];
        text.set_contents(Vec::new()).unwrap();
        text.pointer_to_raw_data = 0;
        assert!(image.to_bytes().is_ok());
    }

    #[test]
    fn remove_section_clears_directories() {
        let builder = ImageBuilder::simple(ImageKind::Pe32Plus);
        let data_rva = builder.section_rva(1);
        let mut image = load(&builder.directory(IMPORT, data_rva, 0x40).build());

        let id = image.section_by_name(".data").unwrap().id();
        let removed = image.remove_section(id).unwrap();
        assert_eq!(removed.name(), ".data");
        assert!(image.remove_section(id).is_none());
        assert!(image.section(id).is_none());

        assert!(matches!(image.to_bytes(), Err(Error::Malformed { .. })));

        image.recalculate().unwrap();
        assert_eq!(image.header().coff.number_of_sections, 1);
        assert_eq!(
            image.header().data_directories[IMPORT],
            RawDataDirectory::default()
        );
        assert_eq!(load(&image.to_bytes().unwrap()).sections().len(), 1);
    }

    #[test]
    fn section_management() {
        let mut image = load(&ImageBuilder::simple(ImageKind::Pe32).build());
        let anchor = image.sections()[0].virtual_address;

        let section = Section::new(
            ".first",
            SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
            vec![1, 2, 3],
        )
        .unwrap();
        let first = image.insert_section(0, section).unwrap();
        let tail = image
            .add_section(Section::new(".tail", SectionCharacteristics::MEM_READ, vec![4]).unwrap())
            .unwrap();
        assert_ne!(first, tail);
        assert_eq!(image.section_index(first), Some(0));
        assert_eq!(image.section_index(tail), Some(3));

        assert!(image
            .insert_section(9, Section::new(".x", SectionCharacteristics::empty(), vec![]).unwrap())
            .is_err());
        assert!(matches!(
            image.move_section(0, 4),
            Err(Error::Malformed { .. })
        ));

        image.recalculate().unwrap();
        let sections = image.sections();
        assert_eq!(sections[0].virtual_address, anchor);
        assert_eq!(sections[0].size_of_raw_data, 0x200);
        assert_eq!(image.header().optional.base_of_data, Some(anchor));
        for pair in sections.windows(2) {
            assert!(pair[1].virtual_address >= pair[0].virtual_address + pair[0].virtual_size);
            assert!(
                pair[1].pointer_to_raw_data
                    >= pair[0].pointer_to_raw_data + pair[0].size_of_raw_data
            );
        }

        let reparsed = load(&image.to_bytes().unwrap());
        assert_eq!(reparsed.section_by_name(".first").unwrap().contents(), &[1, 2, 3]);
        assert_eq!(reparsed.section_by_name(".tail").unwrap().contents(), &[4]);
    }

    #[test]
    fn new_image() {
        let mut image = PeImage::new(ImageKind::Pe32Plus);
        assert!(matches!(image.recalculate(), Err(Error::Malformed { .. })));
        assert_eq!(image.header().optional.size_of_image, 0);

        let text = image
            .add_section(
                Section::new(
                    ".text",
                    SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE,
                    vec![0xC3; 0x20],
                )
                .unwrap(),
            )
            .unwrap();
        image
            .set_directory(DataDirectoryType::ExceptionTable, text, 0x10, 0x0C)
            .unwrap();
        assert!(image
            .set_directory(DataDirectoryType::CertificateTable, text, 0, 8)
            .is_err());
        assert!(image
            .set_directory(DataDirectoryType::ImportTable, SectionId(99), 0, 8)
            .is_err());

        image.recalculate().unwrap();
        let header = image.header();
        assert_eq!(header.optional.size_of_headers, 0x200);
        assert_eq!(image.sections()[0].virtual_address, 0x1000);
        assert_eq!(image.sections()[0].pointer_to_raw_data, 0x200);
        assert_eq!(header.optional.size_of_image, 0x2000);
        assert_eq!(header.optional.size_of_code, 0x200);
        assert_eq!(header.optional.base_of_data, None);

        let bytes = image.to_bytes().unwrap();
        assert_eq!(bytes.len(), 0x400);

        let reparsed = load(&bytes);
        assert_eq!(
            reparsed.directory_rva(DataDirectoryType::ExceptionTable),
            Some(0x1010)
        );

        image.clear_directory(DataDirectoryType::ExceptionTable);
        image.recalculate().unwrap();
        assert_eq!(image.directory_rva(DataDirectoryType::ExceptionTable), None);
    }

    #[test]
    fn replaced_stub_moves_headers() {
        let mut image = load(&ImageBuilder::simple(ImageKind::Pe32).build());
        image.dos_header_mut().set_stub(vec![0xCC; 0x1C0]).unwrap();
        image.recalculate().unwrap();

        assert_eq!(image.header().optional.size_of_headers, 0x400);
        assert_eq!(image.sections()[0].pointer_to_raw_data, 0x400);

        let reparsed = load(&image.to_bytes().unwrap());
        assert_eq!(reparsed.dos_header().pe_header_offset(), 0x200);
        assert_eq!(reparsed.dos_header().message(), None);
        assert_eq!(reparsed.sections()[0].contents(), &[0xC3; 0x180][..]);
    }

    #[test]
    fn trailing_data() {
        let mut image = load(&ImageBuilder::simple(ImageKind::Pe32).build());
        let plain = image.to_bytes().unwrap();

        image.set_trailing_data(b"appended".to_vec());
        let bytes = image.to_bytes().unwrap();
        assert_eq!(bytes.len(), plain.len() + 8);
        assert!(bytes.ends_with(b"appended"));
        assert_eq!(load(&bytes).trailing_data(), b"appended");

        image.clear_trailing_data();
        assert_eq!(image.to_bytes().unwrap(), plain);
    }

    #[test]
    fn write_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = ImageBuilder::simple(ImageKind::Pe32Plus)
            .trailing(vec![7; 5])
            .build();
        let image = load(&data);

        let plain = dir.path().join("plain.exe");
        image.write_file(&plain).unwrap();
        assert_eq!(std::fs::read(&plain).unwrap(), data);
        assert_eq!(
            PeImage::from_file(&plain).unwrap().trailing_data(),
            &[7; 5][..]
        );

        let signed = dir.path().join("checksum.exe");
        image
            .write_file_with(&signed, WriteOptions::with_checksum())
            .unwrap();
        let bytes = std::fs::read(&signed).unwrap();
        let offset = 0x80 + 4 + 20 + 64;
        let stored = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        assert_ne!(stored, 0);
        assert_eq!(stored, checksum::compute(&bytes, offset));
        assert_eq!(
            image.to_bytes_with(WriteOptions::with_checksum()).unwrap(),
            bytes
        );

        let mut unsynced = image.clone();
        unsynced
            .add_section(Section::new(".new", SectionCharacteristics::MEM_READ, vec![1]).unwrap())
            .unwrap();
        let failed = dir.path().join("failed.exe");
        assert!(unsynced.write_file(&failed).is_err());
        assert!(!failed.exists());
    }

    #[test]
    fn from_mem_and_file() {
        let data = ImageBuilder::simple(ImageKind::Pe32).build();
        let image = PeImage::from_mem(data.clone()).unwrap();
        assert_eq!(image.sections().len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.exe");
        std::fs::write(&path, &data).unwrap();
        let mapped = PeImage::from_file(&path).unwrap();
        assert_eq!(mapped.to_bytes().unwrap(), data);

        assert!(matches!(
            PeImage::from_file(dir.path().join("missing.exe")),
            Err(Error::FileError(_))
        ));

        let empty = dir.path().join("empty.exe");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(PeImage::from_file(&empty), Err(Error::Empty)));
    }
}
