//! Conversion request model: the parsed form fields of one `/convert` call.

use crate::error::ExportError;
use crate::raster::{Antialias, ScaleMode};
use crate::standard::{PdfStandard, PdfVersion};
use crate::tiff::TiffCompression;
use std::path::Path;

pub const DEFAULT_NAME: &str = "export";
pub const DEFAULT_DPI: u32 = 72;
pub const PX_TO_PT: f32 = 72.0 / 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Pdf,
    Tiff,
}

impl OutputFormat {
    /// Case-insensitive; blank means PDF.
    pub fn parse(value: Option<&str>) -> Result<Self, ExportError> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(OutputFormat::Pdf);
        };
        match raw.to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "tiff" => Ok(OutputFormat::Tiff),
            _ => Err(ExportError::UnsupportedFormat(format!(
                "format '{raw}' is not supported, expected pdf or tiff"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Tiff => "tif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Tiff => "image/tiff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SvgTextMode {
    #[default]
    Embed,
    Outline,
}

impl SvgTextMode {
    pub fn parse(value: Option<&str>) -> Result<Self, ExportError> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(SvgTextMode::Embed);
        };
        match raw.to_ascii_lowercase().as_str() {
            "embed" => Ok(SvgTextMode::Embed),
            "outline" => Ok(SvgTextMode::Outline),
            _ => Err(ExportError::UnsupportedFormat(format!(
                "svgTextMode '{raw}' is not supported, expected embed or outline"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    Svg,
    Pdf,
    Image,
}

impl UploadType {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadType::Svg => "svg",
            UploadType::Pdf => "pdf",
            UploadType::Image => "image",
        }
    }
}

/// MIME type first, then the file extension.
pub fn detect_upload_type(
    content_type: Option<&str>,
    file_name: Option<&str>,
) -> Result<UploadType, ExportError> {
    if let Some(mime) = content_type.map(|v| v.trim().to_ascii_lowercase()) {
        if mime.contains("svg") {
            return Ok(UploadType::Svg);
        }
        if mime.contains("pdf") {
            return Ok(UploadType::Pdf);
        }
        if mime.starts_with("image/") {
            return Ok(UploadType::Image);
        }
    }
    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("svg") => Ok(UploadType::Svg),
        Some("pdf") => Ok(UploadType::Pdf),
        Some("png" | "jpg" | "jpeg" | "tif" | "tiff") => Ok(UploadType::Image),
        _ => Err(ExportError::UnrecognizedInput(format!(
            "cannot detect upload type of '{}' ({})",
            file_name.unwrap_or("<unnamed>"),
            content_type.unwrap_or("no content type")
        ))),
    }
}

fn is_reserved(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_whitespace()
}

/// Runs of path-reserved characters or whitespace collapse to one `_`.
pub fn sanitize_name(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or("");
    let mut out = String::with_capacity(trimmed.len());
    let mut in_run = false;
    for c in trimmed.chars() {
        if is_reserved(c) {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    if out.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        out
    }
}

/// One uploaded file as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: Option<&str>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.map(str::to_string),
            content_type: content_type.map(str::to_string),
            bytes,
        }
    }

    pub fn upload_type(&self) -> Result<UploadType, ExportError> {
        detect_upload_type(self.content_type.as_deref(), self.file_name.as_deref())
    }
}

/// Validated parameters of one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub format: OutputFormat,
    pub name: String,
    /// Zero means unspecified.
    pub dpi: u32,
    /// TIFF resolution override; zero means "use dpi".
    pub ppi: u32,
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
    pub pdf_version: PdfVersion,
    pub pdf_standard: PdfStandard,
    pub color_profile: Option<String>,
    pub tiff_compression: TiffCompression,
    pub tiff_antialias: Antialias,
    pub tiff_scale_mode: ScaleMode,
    pub svg_text_mode: SvgTextMode,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pdf,
            name: DEFAULT_NAME.to_string(),
            dpi: 0,
            ppi: 0,
            width_px: None,
            height_px: None,
            pdf_version: PdfVersion::parse_or_fallback(None),
            pdf_standard: PdfStandard::None,
            color_profile: None,
            tiff_compression: TiffCompression::None,
            tiff_antialias: Antialias::None,
            tiff_scale_mode: ScaleMode::Bicubic,
            svg_text_mode: SvgTextMode::Embed,
        }
    }
}

impl ConversionRequest {
    /// Resolution for PDF raster pages: never below 72.
    pub fn effective_dpi(&self) -> u32 {
        self.dpi.max(DEFAULT_DPI)
    }

    /// TIFF resolution tag: `ppi` when set, else the effective dpi.
    pub fn effective_ppi(&self) -> u32 {
        if self.ppi > 0 {
            self.ppi
        } else {
            self.effective_dpi()
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format.extension())
    }
}

/// Raw string form fields, as collected from the multipart body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFields {
    pub fields: Vec<(String, String)>,
}

impl RequestFields {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Last non-blank value of the first matching key.
    pub fn get(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| {
            self.fields
                .iter()
                .rev()
                .find(|(key, value)| key == name && !value.trim().is_empty())
                .map(|(_, value)| value.trim())
        })
    }

    fn positive(&self, names: &[&str]) -> Result<Option<u32>, ExportError> {
        let Some(raw) = self.get(names) else {
            return Ok(None);
        };
        let value = raw.parse::<u32>().map_err(|_| {
            ExportError::MalformedInput(format!("field '{}' must be a positive integer, got '{raw}'", names[0]))
        })?;
        Ok((value > 0).then_some(value))
    }

    pub fn to_request(&self) -> Result<ConversionRequest, ExportError> {
        let tiff_antialias = match self.get(&["tiffAntialias"]) {
            None => Antialias::None,
            Some(raw) => Antialias::parse(Some(raw)).ok_or_else(|| {
                ExportError::UnsupportedFormat(format!(
                    "tiffAntialias '{raw}' is not supported, expected none, fast, balanced or best"
                ))
            })?,
        };
        let tiff_scale_mode = match self.get(&["tiffScaleMode"]) {
            None => ScaleMode::Bicubic,
            Some(raw) => ScaleMode::parse(Some(raw)).ok_or_else(|| {
                ExportError::UnsupportedFormat(format!(
                    "tiffScaleMode '{raw}' is not supported, expected bicubic or text-hint"
                ))
            })?,
        };
        Ok(ConversionRequest {
            format: OutputFormat::parse(self.get(&["format"]))?,
            name: sanitize_name(self.get(&["name"])),
            dpi: self.positive(&["dpi"])?.unwrap_or(0),
            ppi: self.positive(&["ppi", "tiffPpi", "tiffDpi"])?.unwrap_or(0),
            width_px: self.positive(&["widthPx"])?,
            height_px: self.positive(&["heightPx"])?,
            pdf_version: PdfVersion::parse_or_fallback(self.get(&["pdfVersion"])),
            pdf_standard: PdfStandard::parse(self.get(&["pdfStandard"]))?,
            color_profile: self.get(&["pdfColorProfile"]).map(str::to_ascii_lowercase),
            tiff_compression: TiffCompression::parse(self.get(&["tiffCompression"]))?,
            tiff_antialias,
            tiff_scale_mode,
            svg_text_mode: SvgTextMode::parse(self.get(&["svgTextMode"]))?,
        })
    }

    /// Per-file size for multi-file requests, falling back to the shared value.
    pub fn size_for(&self, index: usize, shared: &ConversionRequest) -> Result<(Option<u32>, Option<u32>), ExportError> {
        let width_key = format!("widthPx_{index}");
        let height_key = format!("heightPx_{index}");
        let width = self.positive(&[width_key.as_str()])?.or(shared.width_px);
        let height = self.positive(&[height_key.as_str()])?.or(shared.height_px);
        Ok((width, height))
    }
}
