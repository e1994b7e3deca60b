#![no_main]

use libfuzzer_sys::fuzz_target;
use peforge::{LoadOptions, PeImage};

fuzz_target!(|data: &[u8]| {
    let Ok(mut image) = PeImage::from_slice_with(data, LoadOptions::permissive()) else {
        return;
    };

    // Hostile headers may declare absurd alignments; only sane images are laid out.
    let optional = &image.header().optional;
    if optional.file_alignment > 0x1_0000 || optional.section_alignment > 0x10_0000 {
        return;
    }

    let raw_total: u64 = image
        .sections()
        .iter()
        .map(|section| u64::from(section.size_of_raw_data))
        .sum();
    if raw_total > 64 << 20 {
        return;
    }

    if image.recalculate().is_ok() {
        if let Ok(bytes) = image.to_bytes() {
            let _ = PeImage::from_slice_with(&bytes, LoadOptions::permissive());
        }
    }
});
