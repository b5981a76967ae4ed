use std::borrow::Cow;

const TABLE_DIR_OFFSET: usize = 12;
const TABLE_ENTRY_SIZE: usize = 16;
const FS_TYPE_OFFSET: usize = 8;
const HEAD_CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;
const CHECKSUM_MAGIC: u32 = 0xB1B0_AFBA;

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let slice = bytes.get(at..at + 4)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Big-endian u32 sum; bytes past the end of the buffer read as zero.
fn checksum(bytes: &[u8], offset: usize, length: usize) -> u32 {
    let mut sum = 0u32;
    let mut pos = offset;
    let end = offset.saturating_add(length);
    while pos < end {
        let mut word = [0u8; 4];
        for (i, slot) in word.iter_mut().enumerate() {
            *slot = bytes.get(pos + i).copied().unwrap_or(0);
        }
        sum = sum.wrapping_add(u32::from_be_bytes(word));
        pos += 4;
    }
    sum
}

/// Clears the OS/2 `fsType` licensing bits of a TrueType font so it can be embedded.
///
/// Only `.ttf` files are touched. When `fsType` is already zero, or the font has no OS/2 table,
/// the input is returned as is. Otherwise the OS/2 table checksum and the `head`
/// `checkSumAdjustment` are recomputed.
pub fn ensure_embeddable<'a>(bytes: &'a [u8], file_name: &str) -> Cow<'a, [u8]> {
    if bytes.len() < TABLE_DIR_OFFSET || !file_name.to_ascii_lowercase().ends_with(".ttf") {
        return Cow::Borrowed(bytes);
    }
    let Some(num_tables) = read_u16(bytes, 4) else {
        return Cow::Borrowed(bytes);
    };

    let mut patched = bytes.to_vec();
    let mut modified = false;
    let mut head_entry = None;
    for idx in 0..num_tables as usize {
        let entry = TABLE_DIR_OFFSET + idx * TABLE_ENTRY_SIZE;
        if entry + TABLE_ENTRY_SIZE > patched.len() {
            break;
        }
        match &patched[entry..entry + 4] {
            b"OS/2" => {
                let (Some(table_offset), Some(table_length)) =
                    (read_u32(&patched, entry + 8), read_u32(&patched, entry + 12))
                else {
                    continue;
                };
                let fs_type_at = table_offset as usize + FS_TYPE_OFFSET;
                match read_u16(&patched, fs_type_at) {
                    Some(0) => {}
                    Some(fs_type) => {
                        patched[fs_type_at..fs_type_at + 2].copy_from_slice(&[0, 0]);
                        let sum = checksum(&patched, table_offset as usize, table_length as usize);
                        write_u32(&mut patched, entry + 4, sum);
                        modified = true;
                        tracing::debug!(font = file_name, fs_type, "font fsType reset to 0");
                    }
                    None => {
                        tracing::warn!(font = file_name, offset = fs_type_at, "OS/2 fsType out of range");
                    }
                }
            }
            b"head" => head_entry = Some(entry),
            _ => {}
        }
    }

    if !modified {
        return Cow::Borrowed(bytes);
    }
    let Some(head_entry) = head_entry else {
        tracing::warn!(font = file_name, "font has no head table, checkSumAdjustment left as is");
        return Cow::Owned(patched);
    };
    let Some(head_offset) = read_u32(&patched, head_entry + 8).map(|v| v as usize) else {
        return Cow::Owned(patched);
    };
    let adjustment_at = head_offset + HEAD_CHECKSUM_ADJUSTMENT_OFFSET;
    if adjustment_at + 4 > patched.len() {
        tracing::warn!(font = file_name, head_offset, "head table offset out of range");
        return Cow::Owned(patched);
    }
    write_u32(&mut patched, adjustment_at, 0);
    let total = checksum(&patched, 0, patched.len());
    write_u32(&mut patched, adjustment_at, CHECKSUM_MAGIC.wrapping_sub(total));
    Cow::Owned(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OS2_AT: usize = 44;
    const HEAD_AT: usize = 60;

    fn synthetic_font(fs_type: u16) -> Vec<u8> {
        let mut font = vec![0u8; 76];
        font[0..4].copy_from_slice(&[0, 1, 0, 0]);
        font[4..6].copy_from_slice(&2u16.to_be_bytes());
        let mut entry = |idx: usize, tag: &[u8; 4], offset: u32, length: u32| {
            let at = TABLE_DIR_OFFSET + idx * TABLE_ENTRY_SIZE;
            font[at..at + 4].copy_from_slice(tag);
            font[at + 8..at + 12].copy_from_slice(&offset.to_be_bytes());
            font[at + 12..at + 16].copy_from_slice(&length.to_be_bytes());
        };
        entry(0, b"OS/2", OS2_AT as u32, 16);
        entry(1, b"head", HEAD_AT as u32, 16);
        font[OS2_AT..OS2_AT + 2].copy_from_slice(&4u16.to_be_bytes());
        font[OS2_AT + 8..OS2_AT + 10].copy_from_slice(&fs_type.to_be_bytes());
        font[HEAD_AT + 8..HEAD_AT + 12].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        font
    }

    #[test]
    fn restricted_font_is_patched_and_checksums_recomputed() {
        let font = synthetic_font(0x0008);
        let patched = ensure_embeddable(&font, "Restricted.TTF");
        assert!(matches!(patched, Cow::Owned(_)));
        assert_eq!(read_u16(&patched, OS2_AT + FS_TYPE_OFFSET), Some(0));
        let os2_sum = checksum(&patched, OS2_AT, 16);
        assert_eq!(read_u32(&patched, TABLE_DIR_OFFSET + 4), Some(os2_sum));
        assert_eq!(checksum(&patched, 0, patched.len()), CHECKSUM_MAGIC);
        assert_eq!(patched.len(), font.len());
    }

    #[test]
    fn embeddable_font_is_returned_untouched() {
        let font = synthetic_font(0);
        assert!(matches!(ensure_embeddable(&font, "Open.ttf"), Cow::Borrowed(_)));
    }

    #[test]
    fn non_ttf_and_short_inputs_are_ignored() {
        let font = synthetic_font(0x0002);
        assert!(matches!(ensure_embeddable(&font, "Restricted.otf"), Cow::Borrowed(_)));
        assert!(matches!(ensure_embeddable(&[0u8; 4], "tiny.ttf"), Cow::Borrowed(_)));
    }

    #[test]
    fn missing_head_still_clears_fs_type() {
        let mut font = synthetic_font(0x0004);
        font[TABLE_DIR_OFFSET + TABLE_ENTRY_SIZE..TABLE_DIR_OFFSET + TABLE_ENTRY_SIZE + 4]
            .copy_from_slice(b"name");
        let patched = ensure_embeddable(&font, "x.ttf");
        assert_eq!(read_u16(&patched, OS2_AT + FS_TYPE_OFFSET), Some(0));
        assert_eq!(read_u32(&patched, HEAD_AT + 8), Some(0xDEAD_BEEF));
    }
}
