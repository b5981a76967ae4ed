//! Baseline little-endian CMYK TIFF writer.
//!
//! One IFD, one strip, chunky 8-bit CMYK with the output profile at tag 34675. Values that do not
//! fit the 4-byte IFD slot are appended after the IFD in tag order, each padded to an even length,
//! and the strip follows them.

use crate::error::ExportError;
use crate::raster::{PixelImage, SampleFormat};

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;
const TYPE_UNDEFINED: u16 = 7;

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_X_RESOLUTION: u16 = 282;
const TAG_Y_RESOLUTION: u16 = 283;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_RESOLUTION_UNIT: u16 = 296;
const TAG_PREDICTOR: u16 = 317;
const TAG_INK_SET: u16 = 332;
const TAG_NUMBER_OF_INKS: u16 = 334;
const TAG_EXTRA_SAMPLES: u16 = 338;
pub const TAG_ICC_PROFILE: u16 = 34675;

const HEADER_LEN: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
}

impl TiffCompression {
    /// Blank means no compression; anything but `none`/`lzw` is refused.
    pub fn parse(value: Option<&str>) -> Result<Self, ExportError> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("none") => Ok(TiffCompression::None),
            Some("lzw") => Ok(TiffCompression::Lzw),
            Some(other) => Err(ExportError::UnsupportedCompression(format!(
                "tiffCompression '{other}' is not supported (expected none or lzw)"
            ))),
        }
    }

    fn tag_value(self) -> u16 {
        match self {
            TiffCompression::None => 1,
            TiffCompression::Lzw => 5,
        }
    }
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    value: Vec<u8>,
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Self::shorts(tag, &[value])
    }

    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: TYPE_SHORT,
            count: values.len() as u32,
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self {
            tag,
            field_type: TYPE_LONG,
            count: 1,
            value: value.to_le_bytes().to_vec(),
        }
    }

    fn rational(tag: u16, numerator: u32, denominator: u32) -> Self {
        let mut value = numerator.to_le_bytes().to_vec();
        value.extend_from_slice(&denominator.to_le_bytes());
        Self {
            tag,
            field_type: TYPE_RATIONAL,
            count: 1,
            value,
        }
    }

    fn undefined(tag: u16, bytes: &[u8]) -> Self {
        Self {
            tag,
            field_type: TYPE_UNDEFINED,
            count: bytes.len() as u32,
            value: bytes.to_vec(),
        }
    }

    fn is_inline(&self) -> bool {
        self.value.len() <= 4
    }
}

/// Horizontal differencing per sample, right to left so each delta reads the original neighbour.
fn apply_horizontal_predictor(data: &mut [u8], width: usize, samples: usize) {
    let stride = width * samples;
    if stride == 0 {
        return;
    }
    for row in data.chunks_exact_mut(stride) {
        for idx in (samples..stride).rev() {
            row[idx] = row[idx].wrapping_sub(row[idx - samples]);
        }
    }
}

fn lzw_compress(data: &[u8]) -> Result<Vec<u8>, weezl::LzwError> {
    weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8).encode(data)
}

/// Encodes a CMYK raster. When LZW fails the strip is written uncompressed without a predictor.
pub fn encode_cmyk_tiff(
    image: &PixelImage,
    ppi: u32,
    compression: TiffCompression,
    icc: &[u8],
) -> Result<Vec<u8>, ExportError> {
    if image.format() != SampleFormat::Cmyk8 {
        return Err(ExportError::InternalError(
            "tiff encoder expects a cmyk raster".to_string(),
        ));
    }
    let ppi = ppi.max(1);
    let width = image.width();
    let height = image.height();

    let (strip, compression) = match compression {
        TiffCompression::None => (image.data().to_vec(), TiffCompression::None),
        TiffCompression::Lzw => {
            let mut differenced = image.data().to_vec();
            apply_horizontal_predictor(&mut differenced, width as usize, 4);
            match lzw_compress(&differenced) {
                Ok(packed) => (packed, TiffCompression::Lzw),
                Err(err) => {
                    tracing::warn!(error = ?err, "lzw compression failed, writing uncompressed tiff");
                    (image.data().to_vec(), TiffCompression::None)
                }
            }
        }
    };
    let strip_len = u32::try_from(strip.len())
        .map_err(|_| ExportError::InternalError("tiff strip exceeds 4 GiB".to_string()))?;

    let mut entries = vec![
        Entry::long(TAG_IMAGE_WIDTH, width),
        Entry::long(TAG_IMAGE_LENGTH, height),
        Entry::shorts(TAG_BITS_PER_SAMPLE, &[8, 8, 8, 8]),
        Entry::short(TAG_COMPRESSION, compression.tag_value()),
        Entry::short(TAG_PHOTOMETRIC, 5),
        Entry::long(TAG_STRIP_OFFSETS, 0),
        Entry::short(TAG_SAMPLES_PER_PIXEL, 4),
        Entry::long(TAG_ROWS_PER_STRIP, height),
        Entry::long(TAG_STRIP_BYTE_COUNTS, strip_len),
        Entry::rational(TAG_X_RESOLUTION, ppi, 1),
        Entry::rational(TAG_Y_RESOLUTION, ppi, 1),
        Entry::short(TAG_PLANAR_CONFIGURATION, 1),
        Entry::short(TAG_RESOLUTION_UNIT, 2),
    ];
    if compression == TiffCompression::Lzw {
        entries.push(Entry::short(TAG_PREDICTOR, 2));
    }
    entries.push(Entry::short(TAG_INK_SET, 1));
    entries.push(Entry::short(TAG_NUMBER_OF_INKS, 4));
    entries.push(Entry::short(TAG_EXTRA_SAMPLES, 0));
    if !icc.is_empty() {
        entries.push(Entry::undefined(TAG_ICC_PROFILE, icc));
    }

    let ifd_size = 2 + 12 * entries.len() as u32 + 4;
    let externals_start = HEADER_LEN + ifd_size;
    let mut externals = Vec::new();
    let mut slots = Vec::with_capacity(entries.len());
    for entry in &entries {
        if entry.is_inline() {
            let mut slot = [0u8; 4];
            slot[..entry.value.len()].copy_from_slice(&entry.value);
            slots.push(slot);
        } else {
            let offset = externals_start + externals.len() as u32;
            externals.extend_from_slice(&entry.value);
            if entry.value.len() % 2 == 1 {
                externals.push(0);
            }
            slots.push(offset.to_le_bytes());
        }
    }
    let strip_offset = externals_start + externals.len() as u32;
    for (entry, slot) in entries.iter().zip(slots.iter_mut()) {
        if entry.tag == TAG_STRIP_OFFSETS {
            *slot = strip_offset.to_le_bytes();
        }
    }

    let total = strip_offset as usize + strip.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&HEADER_LEN.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (entry, slot) in entries.iter().zip(slots.iter()) {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.field_type.to_le_bytes());
        out.extend_from_slice(&entry.count.to_le_bytes());
        out.extend_from_slice(slot);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&externals);
    out.extend_from_slice(&strip);

    tracing::debug!(
        width,
        height,
        ppi,
        compressed = compression == TiffCompression::Lzw,
        bytes = out.len(),
        "tiff encoded"
    );
    Ok(out)
}
