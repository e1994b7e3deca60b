//! Layout recalculation through the public API.
//!
//! These tests build images from scratch, edit them and check the header fields and section
//! placements a recalculation produces.

use peforge::prelude::*;

const CODE: SectionCharacteristics = SectionCharacteristics::CNT_CODE
    .union(SectionCharacteristics::MEM_EXECUTE)
    .union(SectionCharacteristics::MEM_READ);
const DATA: SectionCharacteristics =
    SectionCharacteristics::CNT_INITIALIZED_DATA.union(SectionCharacteristics::MEM_READ);
const BSS: SectionCharacteristics = SectionCharacteristics::CNT_UNINITIALIZED_DATA
    .union(SectionCharacteristics::MEM_READ)
    .union(SectionCharacteristics::MEM_WRITE);

fn bss(name: &str, virtual_size: u32) -> Result<Section> {
    let mut section = Section::new(name, BSS, Vec::new())?;
    section.virtual_size = virtual_size;
    Ok(section)
}

fn mixed_image(kind: ImageKind) -> Result<PeImage> {
    let mut image = PeImage::new(kind);
    image.add_section(Section::new(".text", CODE, vec![0x90; 0x1801])?)?;
    image.add_section(bss(".bss", 0x3000)?)?;
    image.add_section(Section::new(".rdata", DATA, vec![0x01; 0x10])?)?;
    image.add_section(Section::new(".data", DATA, vec![0x02; 0x200])?)?;
    image.recalculate()?;
    Ok(image)
}

#[test]
fn two_section_pe32() -> Result<()> {
    let mut image = PeImage::new(ImageKind::Pe32);
    image.add_section(Section::new(".text", CODE, vec![0xCC; 0x1000])?)?;
    image.add_section(Section::new(".data", DATA, vec![0x00; 0x200])?)?;
    image.recalculate()?;

    let text = image.section_by_name(".text").unwrap();
    let data = image.section_by_name(".data").unwrap();
    let optional = &image.header().optional;

    assert_eq!(data.virtual_address, text.virtual_address + 0x1000);
    assert_eq!(optional.size_of_code, 0x1000);
    assert_eq!(optional.base_of_code, text.virtual_address);
    assert_eq!(optional.base_of_data, Some(data.virtual_address));
    assert_eq!(optional.size_of_initialized_data, 0x200);
    assert_eq!(optional.size_of_image, data.virtual_address + 0x1000);
    Ok(())
}

#[test]
fn alignment_and_packing() -> Result<()> {
    for kind in [ImageKind::Pe32, ImageKind::Pe32Plus] {
        let image = mixed_image(kind)?;
        let optional = &image.header().optional;
        let sections = image.sections();

        for section in sections {
            assert_eq!(section.virtual_address % optional.section_alignment, 0);
            if section.size_of_raw_data > 0 {
                assert_eq!(section.pointer_to_raw_data % optional.file_alignment, 0);
                assert!(section.pointer_to_raw_data >= optional.size_of_headers);
            }
        }

        for pair in sections.windows(2) {
            assert!(pair[1].virtual_address >= pair[0].virtual_address + pair[0].virtual_size);
        }

        let raw: Vec<&Section> = sections.iter().filter(|s| s.size_of_raw_data > 0).collect();
        for pair in raw.windows(2) {
            assert!(
                pair[1].pointer_to_raw_data
                    >= pair[0].pointer_to_raw_data + pair[0].size_of_raw_data
            );
        }

        assert_eq!(optional.size_of_uninitialized_data, 0x3000);
        assert_eq!(optional.size_of_code, 0x1A00);
        assert_eq!(image.header().coff.number_of_sections, 4);
    }
    Ok(())
}

#[test]
fn initialized_data_differs_by_kind() -> Result<()> {
    for (kind, expected) in [(ImageKind::Pe32, 0x400), (ImageKind::Pe32Plus, 0x400)] {
        let image = mixed_image(kind)?;
        assert_eq!(image.header().optional.size_of_initialized_data, expected);
    }

    // Raw data shorter than the virtual size is where the two kinds disagree.
    for (kind, expected) in [(ImageKind::Pe32, 0x1000), (ImageKind::Pe32Plus, 0x200)] {
        let mut image = PeImage::new(kind);
        let mut data = Section::new(".data", DATA, vec![0x55; 0x200])?;
        data.virtual_size = 0x1000;
        image.add_section(data)?;
        image.recalculate()?;

        assert_eq!(image.sections()[0].size_of_raw_data, 0x200);
        assert_eq!(
            image.header().optional.size_of_initialized_data,
            expected,
            "{kind}"
        );
    }
    Ok(())
}

#[test]
fn directories_move_with_their_section() -> Result<()> {
    let mut image = mixed_image(ImageKind::Pe32Plus)?;
    let rdata = image.section_by_name(".rdata").unwrap().id();
    image.set_directory(DataDirectoryType::ImportTable, rdata, 0x4, 0x8)?;
    image.set_directory(DataDirectoryType::ImportAddressTable, rdata, 0x0, 0x4)?;
    image.recalculate()?;

    let before = image.section(rdata).unwrap().virtual_address;
    let import_before = image.directory_rva(DataDirectoryType::ImportTable).unwrap();
    assert_eq!(import_before, before + 0x4);

    let index = image.section_index(rdata).unwrap();
    image.move_section(index, 0)?;
    image.recalculate()?;

    let after = image.section(rdata).unwrap().virtual_address;
    assert_ne!(before, after);

    let directories = &image.header().data_directories;
    let import = directories[DataDirectoryType::ImportTable.index()];
    let iat = directories[DataDirectoryType::ImportAddressTable.index()];
    assert_eq!(
        i64::from(import.virtual_address) - i64::from(import_before),
        i64::from(after) - i64::from(before)
    );
    assert_eq!(import.size, 0x8);
    assert_eq!(iat.virtual_address, after);
    assert_eq!(iat.size, 0x4);
    Ok(())
}

#[test]
fn anchor_survives_reordering() -> Result<()> {
    let mut image = mixed_image(ImageKind::Pe32)?;
    let anchor = image.sections()[0].virtual_address;

    image.move_section(3, 0)?;
    image.recalculate()?;
    assert_eq!(image.sections()[0].virtual_address, anchor);
    assert_eq!(image.sections()[0].name(), ".data");

    // Reparsing captures the same anchor again.
    let mut reparsed = PeImage::from_slice(&image.to_bytes()?)?;
    reparsed.move_section(0, 3)?;
    reparsed.recalculate()?;
    assert_eq!(reparsed.sections()[0].virtual_address, anchor);
    assert_eq!(reparsed.sections()[0].name(), ".text");
    Ok(())
}

#[test]
fn failed_recalculation_keeps_the_image() -> Result<()> {
    let mut image = mixed_image(ImageKind::Pe32)?;
    let before = image.to_bytes()?;

    image.header_mut().optional.file_alignment = 0;
    let error = image.recalculate().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Format);

    image.header_mut().optional.file_alignment = 0x200;
    assert_eq!(image.to_bytes()?, before);
    Ok(())
}

#[test]
fn header_fields_by_name() -> Result<()> {
    let mut image = mixed_image(ImageKind::Pe32)?;

    let field: HeaderField = "size_of_image".parse().unwrap();
    assert_eq!(field, HeaderField::SizeOfImage);
    assert_eq!(
        image.header().get(field),
        Some(u64::from(image.header().optional.size_of_image))
    );

    image
        .header_mut()
        .set(HeaderField::AddressOfEntryPoint, 0x1000)?;
    assert_eq!(image.header().optional.address_of_entry_point, 0x1000);

    let error = image
        .header_mut()
        .set(HeaderField::SizeOfHeaders, u64::from(u32::MAX) + 1)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Overflow);
    Ok(())
}
