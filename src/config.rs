use crate::raster::{
    CMYK_JPEG_QUALITY, MAX_RASTER_DIMENSION, MAX_RASTER_PIXELS, MAX_TIFF_DIMENSION, MAX_TIFF_PIXELS,
};
use crate::request::PX_TO_PT;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Command line and environment configuration for the HTTP server.
#[derive(Debug, Clone, Parser)]
#[command(name = "print-export-server", version, about = "CMYK PDF and TIFF print export service")]
pub struct ServerConfig {
    /// Bind address.
    #[arg(long, env = "PRINT_EXPORT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "PRINT_EXPORT_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the catalog ICC files.
    #[arg(long, env = "PRINT_EXPORT_PROFILES_DIR", default_value = "profiles")]
    pub profiles_dir: PathBuf,

    /// Extra .ttf/.otf fonts for SVG text.
    #[arg(long, env = "PRINT_EXPORT_FONTS_DIR")]
    pub fonts_dir: Option<PathBuf>,

    /// Skip system font discovery.
    #[arg(long, env = "PRINT_EXPORT_NO_SYSTEM_FONTS")]
    pub no_system_fonts: bool,

    /// Multipart body limit in bytes.
    #[arg(long, env = "PRINT_EXPORT_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Append per-stage timings as JSON lines to this file.
    #[arg(long, env = "PRINT_EXPORT_PERF_LOG")]
    pub perf_log: Option<PathBuf>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse::<SocketAddr>()
            .map_err(|err| anyhow::anyhow!("invalid bind address {raw}: {err}"))
    }
}

/// Fixed pipeline constants shared by the export paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineLimits {
    pub max_tiff_dimension: u32,
    pub max_tiff_pixels: u64,
    pub max_raster_dimension: u32,
    pub max_raster_pixels: u64,
    pub jpeg_quality: f32,
    pub px_to_pt: f32,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_tiff_dimension: MAX_TIFF_DIMENSION,
            max_tiff_pixels: MAX_TIFF_PIXELS,
            max_raster_dimension: MAX_RASTER_DIMENSION,
            max_raster_pixels: MAX_RASTER_PIXELS,
            jpeg_quality: CMYK_JPEG_QUALITY,
            px_to_pt: PX_TO_PT,
        }
    }
}
