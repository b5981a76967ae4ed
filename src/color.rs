use crate::error::ExportError;
use crate::profile::ColorProfile;
use rayon::prelude::*;

/// Inputs at or below this normalized level with R = G = B are forced to pure K.
const NEUTRAL_BLACK_THRESHOLD: f32 = 0.02;

/// Pixels handed to the colour engine per parallel work item.
const CMYK_CHUNK_PIXELS: usize = 16 * 1024;

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() || value <= 0.0 {
        0.0
    } else if value > 1.0 {
        1.0
    } else {
        value
    }
}

/// Naive device conversion used for content-stream operators and as the ICC fallback.
pub fn device_rgb_to_cmyk(r: f32, g: f32, b: f32) -> [f32; 4] {
    let r = clamp_unit(r);
    let g = clamp_unit(g);
    let b = clamp_unit(b);
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 - 1e-6 {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let c = (1.0 - r - k) / (1.0 - k);
    let m = (1.0 - g - k) / (1.0 - k);
    let y = (1.0 - b - k) / (1.0 - k);
    [clamp_unit(c), clamp_unit(m), clamp_unit(y), clamp_unit(k)]
}

/// `c m y k k` for fills, `c m y k K` for strokes, six fixed decimals.
pub fn cmyk_operator(cmyk: [f32; 4], stroke: bool) -> String {
    let op = if stroke { 'K' } else { 'k' };
    format!(
        "{:.6} {:.6} {:.6} {:.6} {}",
        clamp_unit(cmyk[0]),
        clamp_unit(cmyk[1]),
        clamp_unit(cmyk[2]),
        clamp_unit(cmyk[3]),
        op
    )
}

fn unit_to_u8(value: f32) -> u8 {
    (clamp_unit(value) * 255.0).round() as u8
}

/// Maps sRGB colours and rasters into the device CMYK space of one profile.
#[derive(Debug, Clone, Copy)]
pub struct ColorMapper<'a> {
    profile: &'a ColorProfile,
}

impl<'a> ColorMapper<'a> {
    pub fn new(profile: &'a ColorProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &'a ColorProfile {
        self.profile
    }

    /// Absent colours map to no ink; near-black neutrals map to pure K.
    pub fn map_rgb(&self, rgb: Option<[u8; 3]>) -> [f32; 4] {
        let Some([r, g, b]) = rgb else {
            return [0.0; 4];
        };
        if r == g && g == b && (r as f32 / 255.0) <= NEUTRAL_BLACK_THRESHOLD {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let cmyk = match self.profile.transform() {
            Some(transform) => {
                let mut out = [0u8; 4];
                match transform.transform(&[r, g, b], &mut out) {
                    Ok(()) => out.map(|v| v as f32 / 255.0),
                    Err(err) => {
                        tracing::warn!(profile = self.profile.id(), error = ?err, "icc transform failed");
                        device_rgb_to_cmyk(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
                    }
                }
            }
            None => device_rgb_to_cmyk(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0),
        };
        cmyk.map(clamp_unit)
    }

    /// Converts opaque interleaved RGB to interleaved 8-bit CMYK.
    pub fn image_to_cmyk(&self, rgb: &[u8]) -> Result<Vec<u8>, ExportError> {
        if rgb.len() % 3 != 0 {
            return Err(ExportError::InternalError(format!(
                "rgb buffer length {} is not a multiple of 3",
                rgb.len()
            )));
        }
        let pixels = rgb.len() / 3;
        let mut cmyk = vec![0u8; pixels * 4];
        let src_chunks = rgb.par_chunks(CMYK_CHUNK_PIXELS * 3);
        let dst_chunks = cmyk.par_chunks_mut(CMYK_CHUNK_PIXELS * 4);
        match self.profile.transform() {
            Some(transform) => {
                src_chunks
                    .zip(dst_chunks)
                    .try_for_each(|(src, dst)| transform.transform(src, dst))
                    .map_err(|err| {
                        ExportError::InternalError(format!("icc image transform failed: {err:?}"))
                    })?;
            }
            None => {
                src_chunks.zip(dst_chunks).for_each(|(src, dst)| {
                    for (px, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                        let cmyk = device_rgb_to_cmyk(
                            px[0] as f32 / 255.0,
                            px[1] as f32 / 255.0,
                            px[2] as f32 / 255.0,
                        );
                        for (slot, value) in out.iter_mut().zip(cmyk) {
                            *slot = unit_to_u8(value);
                        }
                    }
                });
            }
        }
        Ok(cmyk)
    }
}
