use crate::color::ColorMapper;
use crate::error::ExportError;
use crate::perf::StageTimer;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use tiny_skia::{Pixmap, PixmapPaint, Transform};

pub const MAX_TIFF_DIMENSION: u32 = 6000;
pub const MAX_TIFF_PIXELS: u64 = 36_000_000;
/// Ceiling for rasters embedded in a PDF page or rendered as an SVG fallback.
pub const MAX_RASTER_DIMENSION: u32 = 20_000;
pub const MAX_RASTER_PIXELS: u64 = 100_000_000;
pub const CMYK_JPEG_QUALITY: f32 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Rgb8,
    /// Straight (non-premultiplied) alpha.
    Rgba8,
    Cmyk8,
}

impl SampleFormat {
    pub fn channels(self) -> usize {
        match self {
            SampleFormat::Rgb8 => 3,
            SampleFormat::Rgba8 | SampleFormat::Cmyk8 => 4,
        }
    }
}

/// An owned, interleaved 8-bit raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    width: u32,
    height: u32,
    format: SampleFormat,
    data: Vec<u8>,
}

impl PixelImage {
    pub fn new(
        width: u32,
        height: u32,
        format: SampleFormat,
        data: Vec<u8>,
    ) -> Result<Self, ExportError> {
        let expected = width as usize * height as usize * format.channels();
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ExportError::InternalError(format!(
                "pixel buffer {}x{} {:?} has {} bytes, expected {}",
                width,
                height,
                format,
                data.len(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Takes a premultiplied tiny-skia surface and demultiplies it.
    pub fn from_pixmap(pixmap: &Pixmap) -> Result<Self, ExportError> {
        let mut data = Vec::with_capacity(pixmap.data().len());
        for px in pixmap.pixels() {
            let c = px.demultiply();
            data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Self::new(pixmap.width(), pixmap.height(), SampleFormat::Rgba8, data)
    }

    fn into_rgba_image(self) -> Result<RgbaImage, ExportError> {
        let rgba = match self.format {
            SampleFormat::Rgba8 => self.data,
            SampleFormat::Rgb8 => self
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            SampleFormat::Cmyk8 => {
                return Err(ExportError::InternalError(
                    "cmyk rasters cannot be rescaled".to_string(),
                ));
            }
        };
        RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| ExportError::InternalError("rgba buffer size mismatch".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// Gamma-aware Catmull-Rom resampling.
    #[default]
    Bicubic,
    /// Nearest-neighbour at twice the target size, then a 2x2 box down.
    TextHint,
}

impl ScaleMode {
    /// `bicubic` (blank) or `text`/`text-hint`; anything else is `None`.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("bicubic") => Some(ScaleMode::Bicubic),
            Some("text" | "text-hint" | "texthint") => Some(ScaleMode::TextHint),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialias {
    #[default]
    None,
    Fast,
    Balanced,
    Best,
}

struct Kernel {
    size: usize,
    weights: &'static [u32],
    divisor: u32,
    passes: usize,
}

const BOX_3: [u32; 9] = [1, 1, 1, 1, 1, 1, 1, 1, 1];
const GAUSS_3: [u32; 9] = [1, 2, 1, 2, 4, 2, 1, 2, 1];
#[rustfmt::skip]
const GAUSS_5: [u32; 25] = [
    1, 4, 7, 4, 1,
    4, 16, 26, 16, 4,
    7, 26, 41, 26, 7,
    4, 16, 26, 16, 4,
    1, 4, 7, 4, 1,
];

impl Antialias {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("none") => Some(Antialias::None),
            Some("fast") => Some(Antialias::Fast),
            Some("balanced") => Some(Antialias::Balanced),
            Some("best") => Some(Antialias::Best),
            Some(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Antialias::None => "none",
            Antialias::Fast => "fast",
            Antialias::Balanced => "balanced",
            Antialias::Best => "best",
        }
    }

    fn kernel(self) -> Option<Kernel> {
        match self {
            Antialias::None => None,
            Antialias::Fast => Some(Kernel {
                size: 3,
                weights: &BOX_3,
                divisor: 9,
                passes: 1,
            }),
            Antialias::Balanced => Some(Kernel {
                size: 3,
                weights: &GAUSS_3,
                divisor: 16,
                passes: 1,
            }),
            Antialias::Best => Some(Kernel {
                size: 5,
                weights: &GAUSS_5,
                divisor: 273,
                passes: 2,
            }),
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<PixelImage, ExportError> {
    let decoded = match image::guess_format(bytes) {
        Ok(format) => image::load_from_memory_with_format(bytes, format),
        Err(_) => image::load_from_memory(bytes),
    }
    .map_err(|err| ExportError::MalformedInput(format!("unreadable raster image: {err}")))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelImage::new(width, height, SampleFormat::Rgba8, rgba.into_raw())
        .map_err(|_| ExportError::MalformedInput("raster image has no pixels".to_string()))
}

/// Requested dimensions win independently; missing or zero ones keep the source's.
pub fn target_size(source: (u32, u32), width_px: Option<u32>, height_px: Option<u32>) -> (u32, u32) {
    let pick = |requested: Option<u32>, fallback: u32| match requested {
        Some(v) if v > 0 => v,
        _ => fallback,
    };
    (pick(width_px, source.0), pick(height_px, source.1))
}

/// Largest isotropic downscale that satisfies both the per-side and total pixel caps.
pub fn clamp_to_limits(width: u32, height: u32, max_dimension: u32, max_pixels: u64) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let mut scale = 1.0f64;
    if width > max_dimension {
        scale = scale.min(max_dimension as f64 / width as f64);
    }
    if height > max_dimension {
        scale = scale.min(max_dimension as f64 / height as f64);
    }
    let pixels = width as u64 * height as u64;
    if pixels > max_pixels {
        scale = scale.min((max_pixels as f64 / pixels as f64).sqrt());
    }
    if scale >= 1.0 {
        return (width, height);
    }
    let w = ((width as f64 * scale).floor() as u32).clamp(1, max_dimension);
    let h = ((height as f64 * scale).floor() as u32).clamp(1, max_dimension);
    (w, h)
}

pub fn scale(
    image: PixelImage,
    width: u32,
    height: u32,
    mode: ScaleMode,
) -> Result<PixelImage, ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::InternalError(format!(
            "invalid scale target {width}x{height}"
        )));
    }
    if image.width == width && image.height == height {
        return Ok(image);
    }
    let rgba = image.into_rgba_image()?;
    let scaled = match mode {
        ScaleMode::Bicubic => gamma_aware_resize(&rgba, width, height),
        ScaleMode::TextHint => text_hint_resize(&rgba, width, height)?,
    };
    PixelImage::new(width, height, SampleFormat::Rgba8, scaled.into_raw())
}

fn srgb_to_linear(v: u8) -> f32 {
    let c = v as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> u8 {
    let c = v.clamp(0.0, 1.0);
    let s = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (s * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Resamples premultiplied linear-light RGBA so dark edges do not thin out or halo.
fn gamma_aware_resize(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let lut: Vec<f32> = (0..=255u8).map(srgb_to_linear).collect();
    let linear: ImageBuffer<Rgba<f32>, Vec<f32>> =
        ImageBuffer::from_fn(src.width(), src.height(), |x, y| {
            let p = src.get_pixel(x, y).0;
            let a = p[3] as f32 / 255.0;
            Rgba([
                lut[p[0] as usize] * a,
                lut[p[1] as usize] * a,
                lut[p[2] as usize] * a,
                a,
            ])
        });
    let resized = image::imageops::resize(&linear, width, height, FilterType::CatmullRom);
    ImageBuffer::from_fn(width, height, |x, y| {
        let p = resized.get_pixel(x, y).0;
        let a = p[3].clamp(0.0, 1.0);
        if a <= f32::EPSILON {
            return Rgba([0, 0, 0, 0]);
        }
        Rgba([
            linear_to_srgb(p[0] / a),
            linear_to_srgb(p[1] / a),
            linear_to_srgb(p[2] / a),
            (a * 255.0).round() as u8,
        ])
    })
}

fn text_hint_resize(src: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, ExportError> {
    let (Some(double_width), Some(double_height)) = (width.checked_mul(2), height.checked_mul(2))
    else {
        return Err(ExportError::SizeLimit(format!(
            "text-hint scale target {width}x{height} is too large"
        )));
    };
    let doubled = image::imageops::resize(src, double_width, double_height, FilterType::Nearest);
    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let mut alpha = 0u32;
        let mut rgb = [0u32; 3];
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let p = doubled.get_pixel(x * 2 + dx, y * 2 + dy).0;
            let a = p[3] as u32;
            alpha += a;
            for c in 0..3 {
                rgb[c] += p[c] as u32 * a;
            }
        }
        if alpha == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        Rgba([
            ((rgb[0] + alpha / 2) / alpha) as u8,
            ((rgb[1] + alpha / 2) / alpha) as u8,
            ((rgb[2] + alpha / 2) / alpha) as u8,
            ((alpha + 2) / 4) as u8,
        ])
    }))
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

/// Moves a straight-alpha raster onto a premultiplied tiny-skia surface.
pub fn premultiply(image: PixelImage) -> Result<Pixmap, ExportError> {
    let (width, height) = (image.width, image.height);
    let rgba = image.into_rgba_image()?;
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        ExportError::InternalError(format!("invalid raster size {width}x{height}"))
    })?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Ok(pixmap)
}

/// Convolves premultiplied RGBA in place. Border pixels the kernel cannot cover are kept.
pub fn antialias(pixmap: &mut Pixmap, mode: Antialias) {
    let Some(kernel) = mode.kernel() else {
        return;
    };
    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    for _ in 0..kernel.passes {
        let out = convolve(pixmap.data(), width, height, &kernel);
        pixmap.data_mut().copy_from_slice(&out);
    }
}

fn convolve(src: &[u8], width: usize, height: usize, kernel: &Kernel) -> Vec<u8> {
    let mut out = src.to_vec();
    let radius = kernel.size / 2;
    if width <= radius * 2 || height <= radius * 2 {
        return out;
    }
    let stride = width * 4;
    let half = kernel.divisor / 2;
    out.par_chunks_mut(stride)
        .enumerate()
        .skip(radius)
        .take(height - radius * 2)
        .for_each(|(y, row)| {
            for x in radius..width - radius {
                let mut acc = [0u32; 4];
                for ky in 0..kernel.size {
                    let base = (y + ky - radius) * stride;
                    for kx in 0..kernel.size {
                        let weight = kernel.weights[ky * kernel.size + kx];
                        let idx = base + (x + kx - radius) * 4;
                        for (c, slot) in acc.iter_mut().enumerate() {
                            *slot += src[idx + c] as u32 * weight;
                        }
                    }
                }
                for (c, sum) in acc.iter().enumerate() {
                    row[x * 4 + c] = ((sum + half) / kernel.divisor).min(255) as u8;
                }
            }
        });
    out
}

/// Paints a premultiplied surface over opaque white and drops alpha.
pub fn composite_on_white(pixmap: &Pixmap) -> Result<PixelImage, ExportError> {
    let mut canvas = Pixmap::new(pixmap.width(), pixmap.height()).ok_or_else(|| {
        ExportError::InternalError(format!(
            "invalid raster size {}x{}",
            pixmap.width(),
            pixmap.height()
        ))
    })?;
    canvas.fill(tiny_skia::Color::WHITE);
    canvas.draw_pixmap(
        0,
        0,
        pixmap.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    let rgb: Vec<u8> = canvas
        .data()
        .chunks_exact(4)
        .flat_map(|p| [p[0], p[1], p[2]])
        .collect();
    PixelImage::new(canvas.width(), canvas.height(), SampleFormat::Rgb8, rgb)
}

/// Converts to device CMYK. Alpha is flattened on white first; CMYK input passes through.
pub fn to_cmyk(image: PixelImage, mapper: &ColorMapper<'_>) -> Result<PixelImage, ExportError> {
    let rgb = match image.format {
        SampleFormat::Cmyk8 => return Ok(image),
        SampleFormat::Rgb8 => image,
        SampleFormat::Rgba8 => composite_on_white(&premultiply(image)?)?,
    };
    let (width, height) = (rgb.width, rgb.height);
    let cmyk = mapper.image_to_cmyk(&rgb.data)?;
    drop(rgb);
    PixelImage::new(width, height, SampleFormat::Cmyk8, cmyk)
}

/// Baseline JPEG with four (Adobe-inverted) CMYK components.
pub fn encode_cmyk_jpeg(image: &PixelImage, quality: f32) -> Result<Vec<u8>, ExportError> {
    if image.format != SampleFormat::Cmyk8 {
        return Err(ExportError::InternalError(
            "jpeg encoder expects a cmyk raster".to_string(),
        ));
    }
    let (Ok(width), Ok(height)) = (u16::try_from(image.width), u16::try_from(image.height)) else {
        return Err(ExportError::InternalError(format!(
            "raster {}x{} exceeds jpeg limits",
            image.width, image.height
        )));
    };
    let quality = (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut out = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut out, quality);
    encoder
        .encode(&image.data, width, height, jpeg_encoder::ColorType::Cmyk)
        .map_err(|err| ExportError::InternalError(format!("cmyk jpeg encode failed: {err}")))?;
    Ok(out)
}

/// What `render_cmyk` does with a target beyond its pixel limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Oversize {
    #[default]
    Downscale,
    Reject,
}

/// Knobs for the decode -> scale -> antialias -> composite -> cmyk chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterPlan {
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
    /// Largest edge and pixel count; `None` leaves the size unclamped.
    pub pixel_limits: Option<(u32, u64)>,
    pub oversize: Oversize,
    pub antialias: Antialias,
    pub scale_mode: ScaleMode,
}

impl Default for RasterPlan {
    fn default() -> Self {
        Self {
            width_px: None,
            height_px: None,
            pixel_limits: None,
            oversize: Oversize::Downscale,
            antialias: Antialias::None,
            scale_mode: ScaleMode::Bicubic,
        }
    }
}

/// Runs every stage after decode; each stage consumes its predecessor.
pub fn render_cmyk(
    source: PixelImage,
    plan: &RasterPlan,
    mapper: &ColorMapper<'_>,
    timer: &mut StageTimer,
) -> Result<PixelImage, ExportError> {
    if source.format == SampleFormat::Cmyk8 {
        return Ok(source);
    }
    let (mut width, mut height) =
        target_size((source.width, source.height), plan.width_px, plan.height_px);
    if let Some((max_dimension, max_pixels)) = plan.pixel_limits {
        let (w, h) = clamp_to_limits(width, height, max_dimension, max_pixels);
        if (w, h) != (width, height) && plan.oversize == Oversize::Reject {
            return Err(ExportError::SizeLimit(format!(
                "raster {width}x{height} exceeds {max_dimension}px per side or {max_pixels} pixels"
            )));
        }
        if (w, h) != (width, height) {
            tracing::info!(
                requested_width = width,
                requested_height = height,
                width = w,
                height = h,
                "raster exceeds pixel limits, downscaling"
            );
            width = w;
            height = h;
        }
    }
    let scaled = timer.time("scale", || scale(source, width, height, plan.scale_mode))?;
    tracing::debug!(width, height, stage = "scaled", "raster stage");
    let mut surface = premultiply(scaled)?;
    timer.time("antialias", || antialias(&mut surface, plan.antialias));
    let flattened = timer.time("composite", || composite_on_white(&surface))?;
    drop(surface);
    let cmyk = timer.time("cmyk", || to_cmyk(flattened, mapper))?;
    tracing::debug!(
        width = cmyk.width,
        height = cmyk.height,
        stage = "cmyk",
        "raster stage"
    );
    Ok(cmyk)
}
