//! The PE image checksum.
//!
//! The loader only verifies the checksum for drivers, boot-time DLLs and DLLs loaded into
//! critical system processes, but tools compare it for any image. The algorithm treats the file
//! as an array of little-endian 16-bit words with the checksum field itself read as zero, adds
//! them up with end-around carry, folds the sum to 16 bits and finally adds the file length.

/// Computes the checksum of `data`, ignoring the four bytes at `checksum_offset`.
///
/// A trailing odd byte is treated as the low byte of a final word.
///
/// # Examples
///
/// ```rust
/// use peforge::pe::checksum::compute;
///
/// let data = [0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x00];
/// // 0x0001 + 0x0002 + length 8
/// assert_eq!(compute(&data, 2), 11);
/// ```
#[must_use]
pub fn compute(data: &[u8], checksum_offset: usize) -> u32 {
    let skip = checksum_offset..checksum_offset.saturating_add(4);
    let byte_at = |index: usize| -> u64 {
        if skip.contains(&index) {
            0
        } else {
            u64::from(data[index])
        }
    };

    let mut sum: u64 = 0;
    let mut offset = 0;
    while offset < data.len() {
        let low = byte_at(offset);
        let high = if offset + 1 < data.len() {
            byte_at(offset + 1)
        } else {
            0
        };

        sum += low | (high << 8);
        sum = (sum & 0xFFFF) + (sum >> 16);
        offset += 2;
    }

    sum = (sum & 0xFFFF) + (sum >> 16);
    let folded = (sum & 0xFFFF) as u32;

    #[allow(clippy::cast_possible_truncation)]
    let length = data.len() as u32;
    folded.wrapping_add(length)
}
