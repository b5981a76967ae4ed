mod color;
mod config;
mod error;
mod export;
mod finalize;
mod font_patch;
mod fonts;
mod pdfinspect;
mod perf;
mod profile;
mod raster;
mod recolor;
mod request;
mod server;
mod standard;
mod svg;
mod tiff;

pub use color::{ColorMapper, cmyk_operator, device_rgb_to_cmyk};
pub use config::{DEFAULT_MAX_UPLOAD_BYTES, PipelineLimits, ServerConfig};
pub use error::ExportError;
pub use export::{ExportOutput, ExportService, SizedUpload};
pub use finalize::{
    FinalizeSummary, ICC_REGISTRY, PRODUCER, find_transparency, finalize_document, load_document,
    merge_documents, pdf_date, save_document,
};
pub use font_patch::ensure_embeddable;
pub use fonts::FontLibrary;
pub use pdfinspect::{
    PdfInspectError, PdfInspectErrorCode, PdfInspectReport, composition_compatibility_issues,
    inspect_document, inspect_pdf_bytes, inspect_pdf_path, require_pdf_composition_compatibility,
};
pub use perf::{PerfJournal, StageTimer};
pub use profile::{
    BUILTIN_PROFILES, ColorProfile, DEFAULT_PROFILE_ID, ProfileDescriptor, ProfileStore,
};
pub use raster::{
    Antialias, PixelImage, RasterPlan, SampleFormat, ScaleMode, decode, encode_cmyk_jpeg,
    render_cmyk,
};
pub use recolor::{RecolorStats, recolor_content, recolor_form_tree};
pub use request::{
    ConversionRequest, OutputFormat, RequestFields, SvgTextMode, Upload, UploadType,
    detect_upload_type, sanitize_name,
};
pub use server::{ApiError, AppState, router};
pub use standard::{PdfStandard, PdfVersion};
pub use svg::{SvgPage, SvgRenderOptions, render_svg};
pub use tiff::{TiffCompression, encode_cmyk_tiff};
