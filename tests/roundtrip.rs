//! Read, recalculate and write cycles through the public API.

use peforge::prelude::*;

const CODE: SectionCharacteristics = SectionCharacteristics::CNT_CODE
    .union(SectionCharacteristics::MEM_EXECUTE)
    .union(SectionCharacteristics::MEM_READ);
const DATA: SectionCharacteristics =
    SectionCharacteristics::CNT_INITIALIZED_DATA.union(SectionCharacteristics::MEM_READ);

/// File offset of the PE signature.
fn pe_offset(bytes: &[u8]) -> usize {
    u32::from_le_bytes(bytes[0x3C..0x40].try_into().unwrap()) as usize
}

fn sample(kind: ImageKind) -> Result<Vec<u8>> {
    let mut image = PeImage::new(kind);
    let text = image.add_section(Section::new(".text", CODE, vec![0xC3; 0x345])?)?;
    let rdata = image.add_section(Section::new(".rdata", DATA, (0..=255).collect())?)?;
    image.add_section(Section::new(".data", DATA, vec![0x42; 0x1001])?)?;
    image.set_directory(DataDirectoryType::ImportTable, rdata, 0x20, 0x28)?;
    image.set_directory(DataDirectoryType::ExceptionTable, text, 0x100, 0x18)?;
    image.set_trailing_data(b"overlay data behind the last section".to_vec());
    image.recalculate()?;
    image.to_bytes()
}

#[test]
fn recalculation_is_idempotent() -> Result<()> {
    for kind in [ImageKind::Pe32, ImageKind::Pe32Plus] {
        let bytes = sample(kind)?;

        let mut image = PeImage::from_slice(&bytes)?;
        assert_eq!(image.kind(), kind);
        image.recalculate()?;
        assert_eq!(image.to_bytes()?, bytes, "{kind}");
    }
    Ok(())
}

#[test]
fn trailing_data_is_preserved() -> Result<()> {
    let bytes = sample(ImageKind::Pe32)?;
    let overlay: Vec<u8> = (0..0x1234_u32).map(|i| (i * 7) as u8).collect();

    let mut image = PeImage::from_slice(&bytes)?;
    image.set_trailing_data(overlay.clone());
    image.recalculate()?;
    let with_overlay = image.to_bytes()?;

    let mut reparsed = PeImage::from_slice(&with_overlay)?;
    assert_eq!(reparsed.trailing_data(), &overlay[..]);
    reparsed.recalculate()?;
    let again = reparsed.to_bytes()?;
    assert_eq!(again, with_overlay);
    assert!(again.ends_with(&overlay));
    Ok(())
}

#[test]
fn contents_and_directories_survive() -> Result<()> {
    let image = PeImage::from_slice(&sample(ImageKind::Pe32Plus)?)?;

    let rdata = image.section_by_name(".rdata").unwrap();
    assert_eq!(rdata.contents(), &(0..=255).collect::<Vec<u8>>()[..]);

    let import = image.directory(DataDirectoryType::ImportTable).unwrap();
    assert_eq!(import.section, Some(rdata.id()));
    assert_eq!(import.offset, 0x20);
    assert_eq!(import.size, 0x28);

    let exception = image.directory(DataDirectoryType::ExceptionTable).unwrap();
    assert_eq!(
        exception.section,
        Some(image.section_by_name(".text").unwrap().id())
    );
    assert_eq!(
        image.dos_header().message(),
        Some("This program cannot be run in DOS mode.")
    );
    Ok(())
}

#[test]
fn certificate_table_uses_file_offsets() -> Result<()> {
    let mut bytes = sample(ImageKind::Pe32)?;
    let image = PeImage::from_slice(&bytes)?;
    let text_rva = image.section_by_name(".text").unwrap().virtual_address;

    // Certificate table entry: PE32 optional header is 96 bytes, entry 4 follows.
    let entry = pe_offset(&bytes) + 4 + 20 + 96 + 4 * 8;
    bytes[entry..entry + 4].copy_from_slice(&text_rva.to_le_bytes());
    bytes[entry + 4..entry + 8].copy_from_slice(&0x10_u32.to_le_bytes());

    let image = PeImage::from_slice(&bytes)?;
    let certificate = image.directory(DataDirectoryType::CertificateTable).unwrap();
    assert!(certificate.is_certificate_table());
    assert_eq!(certificate.section, None);
    assert_eq!(certificate.offset, text_rva);
    assert_eq!(certificate.size, 0x10);
    Ok(())
}

#[test]
fn truncated_input_is_rejected() -> Result<()> {
    let bytes = sample(ImageKind::Pe32)?;
    let offset = pe_offset(&bytes);

    let error = PeImage::from_slice(&bytes[..offset + 3]).unwrap_err();
    assert!(matches!(error, Error::Malformed { .. }));
    assert_eq!(error.kind(), ErrorKind::Format);

    for len in [1, 0x3F, offset + 4, offset + 30, offset + 300] {
        let error = PeImage::from_slice(&bytes[..len]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Format, "length {len}");
    }
    Ok(())
}

#[test]
fn directory_count_overflow_is_rejected() -> Result<()> {
    let mut bytes = sample(ImageKind::Pe32Plus)?;

    // NumberOfRvaAndSizes is the last field of the 112-byte PE32+ optional header.
    let field = pe_offset(&bytes) + 4 + 20 + 108;
    bytes[field..field + 4].copy_from_slice(&(u32::MAX / 8 + 1).to_le_bytes());

    let error = PeImage::from_slice(&bytes).unwrap_err();
    assert!(matches!(error, Error::Overflow { .. }));
    assert_eq!(error.kind(), ErrorKind::Overflow);
    Ok(())
}

#[test]
fn permissive_loading() -> Result<()> {
    let mut bytes = sample(ImageKind::Pe32)?;
    let offset = pe_offset(&bytes);
    bytes[0..2].copy_from_slice(b"ZM");
    bytes[offset..offset + 4].copy_from_slice(b"NE\0\0");

    assert!(PeImage::from_slice(&bytes).is_err());

    let image = PeImage::from_slice_with(&bytes, LoadOptions::permissive())?;
    assert_eq!(image.sections().len(), 3);
    assert_eq!(image.dos_header().signature, u16::from_le_bytes(*b"ZM"));
    Ok(())
}

#[test]
fn file_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.exe");
    let output = dir.path().join("output.exe");
    std::fs::write(&input, sample(ImageKind::Pe32Plus)?)?;

    let mut image = PeImage::from_file(&input)?;
    let extra = Section::new(".extra", DATA, b"payload".to_vec())?;
    let extra = image.insert_section(1, extra)?;
    image.recalculate()?;
    image.write_file_with(&output, WriteOptions::with_checksum())?;

    let written = PeImage::from_file(&output)?;
    assert_eq!(written.sections().len(), 4);
    assert_eq!(written.sections()[1].name(), ".extra");
    assert_eq!(written.sections()[1].contents(), b"payload");
    assert_eq!(written.trailing_data(), image.trailing_data());
    assert_ne!(written.header().optional.check_sum, 0);
    assert_eq!(
        written.sections()[1].virtual_address,
        image.section(extra).unwrap().virtual_address
    );
    Ok(())
}
