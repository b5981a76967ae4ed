//! Pipeline orchestration: one upload (or several, for PDF) in, one print file out.

use crate::color::ColorMapper;
use crate::config::PipelineLimits;
use crate::error::ExportError;
use crate::finalize::{add_single_page, finalize_document, load_document, merge_documents, save_document};
use crate::fonts::FontLibrary;
use crate::pdfinspect::{inspect_pdf_bytes, require_pdf_composition_compatibility};
use crate::perf::{PerfJournal, StageTimer};
use crate::profile::{ColorProfile, ProfileStore};
use crate::raster::{
    Antialias, Oversize, PixelImage, RasterPlan, decode, encode_cmyk_jpeg, render_cmyk,
};
use crate::request::{ConversionRequest, OutputFormat, Upload, UploadType};
use crate::svg::{SvgPage, SvgRenderOptions, render_svg};
use crate::tiff::encode_cmyk_tiff;
use lopdf::{Document, Object, Stream, dictionary};
use std::sync::Arc;
use time::OffsetDateTime;

/// Finished response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutput {
    pub file_name: String,
    pub content_type: &'static str,
    pub payload: Vec<u8>,
}

/// One file of a multi-file request with its own pixel size.
#[derive(Debug, Clone)]
pub struct SizedUpload {
    pub upload: Upload,
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
}

/// Everything a conversion needs that outlives a request. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExportService {
    profiles: Arc<ProfileStore>,
    fonts: FontLibrary,
    limits: PipelineLimits,
    journal: Option<PerfJournal>,
}

impl ExportService {
    pub fn new(profiles: ProfileStore, fonts: FontLibrary) -> Self {
        Self {
            profiles: Arc::new(profiles),
            fonts,
            limits: PipelineLimits::default(),
            journal: None,
        }
    }

    pub fn with_perf_journal(mut self, journal: Option<PerfJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn fonts(&self) -> &FontLibrary {
        &self.fonts
    }

    pub fn convert(&self, upload: &Upload, request: &ConversionRequest) -> Result<ExportOutput, ExportError> {
        let upload_type = upload.upload_type()?;
        let profile = self.profiles.select(request.color_profile.as_deref())?;
        let mut timer = StageTimer::new(self.journal.clone());
        tracing::info!(
            format = request.format.extension(),
            upload = upload_type.as_str(),
            name = %request.name,
            bytes = upload.bytes.len(),
            width_px = ?request.width_px,
            height_px = ?request.height_px,
            profile = profile.id(),
            "conversion requested"
        );
        let payload = match request.format {
            OutputFormat::Pdf => {
                let mut doc = self.pdf_document(
                    upload,
                    upload_type,
                    request,
                    request.width_px,
                    request.height_px,
                    profile,
                    &mut timer,
                )?;
                self.finish_pdf(&mut doc, request, profile, &mut timer)?
            }
            OutputFormat::Tiff => self.tiff_bytes(upload, upload_type, request, profile, &mut timer)?,
        };
        self.log_done(request, payload.len(), &timer);
        Ok(ExportOutput {
            file_name: request.file_name(),
            content_type: request.format.content_type(),
            payload,
        })
    }

    /// Runs every file through the single-file PDF path, then merges and finalizes once.
    pub fn convert_many(
        &self,
        uploads: &[SizedUpload],
        request: &ConversionRequest,
    ) -> Result<ExportOutput, ExportError> {
        if request.format != OutputFormat::Pdf {
            return Err(ExportError::UnsupportedFormat(format!(
                "format '{}' cannot merge several files, only pdf can",
                request.format.extension()
            )));
        }
        if uploads.is_empty() {
            return Err(ExportError::MalformedInput("no files uploaded".to_string()));
        }
        let profile = self.profiles.select(request.color_profile.as_deref())?;
        let mut timer = StageTimer::new(self.journal.clone());
        tracing::info!(
            files = uploads.len(),
            name = %request.name,
            profile = profile.id(),
            "multi-file conversion requested"
        );
        let mut docs = Vec::with_capacity(uploads.len());
        for (index, item) in uploads.iter().enumerate() {
            let upload_type = item.upload.upload_type()?;
            tracing::debug!(index, upload = upload_type.as_str(), bytes = item.upload.bytes.len(), "merge item");
            let doc = self.pdf_document(
                &item.upload,
                upload_type,
                request,
                item.width_px,
                item.height_px,
                profile,
                &mut timer,
            )?;
            docs.push(doc);
        }
        let mut merged = timer.time("merge", || merge_documents(docs))?;
        let payload = self.finish_pdf(&mut merged, request, profile, &mut timer)?;
        self.log_done(request, payload.len(), &timer);
        Ok(ExportOutput {
            file_name: request.file_name(),
            content_type: OutputFormat::Pdf.content_type(),
            payload,
        })
    }

    fn log_done(&self, request: &ConversionRequest, bytes: usize, timer: &StageTimer) {
        tracing::info!(
            name = %request.name,
            format = request.format.extension(),
            bytes,
            ms = format!("{:.1}", timer.total_ms()),
            "conversion finished"
        );
    }

    fn finish_pdf(
        &self,
        doc: &mut Document,
        request: &ConversionRequest,
        profile: &ColorProfile,
        timer: &mut StageTimer,
    ) -> Result<Vec<u8>, ExportError> {
        let now = OffsetDateTime::now_utc();
        timer.time("finalize", || {
            finalize_document(doc, profile, request.pdf_standard, request.pdf_version, now)
        })?;
        timer.time("encode", || save_document(doc))
    }

    #[allow(clippy::too_many_arguments)]
    fn pdf_document(
        &self,
        upload: &Upload,
        upload_type: UploadType,
        request: &ConversionRequest,
        width_px: Option<u32>,
        height_px: Option<u32>,
        profile: &ColorProfile,
        timer: &mut StageTimer,
    ) -> Result<Document, ExportError> {
        match upload_type {
            UploadType::Svg => {
                let options = SvgRenderOptions {
                    text_mode: request.svg_text_mode,
                    target_width_pt: width_px.map(|px| px as f32 * self.limits.px_to_pt),
                    target_height_pt: height_px.map(|px| px as f32 * self.limits.px_to_pt),
                    dpi: request.effective_dpi(),
                };
                match render_svg(&upload.bytes, &self.fonts, &options, timer)? {
                    SvgPage::Vector { document, .. } => Ok(document),
                    SvgPage::Raster {
                        image,
                        width_pt,
                        height_pt,
                    } => {
                        let plan = RasterPlan {
                            antialias: Antialias::Balanced,
                            ..RasterPlan::default()
                        };
                        let cmyk = render_cmyk(image, &plan, &ColorMapper::new(profile), timer)?;
                        self.image_pdf(&cmyk, width_pt, height_pt, timer)
                    }
                }
            }
            UploadType::Image => {
                let source = timer.time("decode", || decode(&upload.bytes))?;
                let plan = RasterPlan {
                    width_px,
                    height_px,
                    pixel_limits: Some((self.limits.max_raster_dimension, self.limits.max_raster_pixels)),
                    oversize: Oversize::Reject,
                    ..RasterPlan::default()
                };
                let cmyk = render_cmyk(source, &plan, &ColorMapper::new(profile), timer)?;
                let width_pt = cmyk.width() as f32 * self.limits.px_to_pt;
                let height_pt = cmyk.height() as f32 * self.limits.px_to_pt;
                self.image_pdf(&cmyk, width_pt, height_pt, timer)
            }
            UploadType::Pdf => {
                let report = inspect_pdf_bytes(&upload.bytes)?;
                require_pdf_composition_compatibility(&report)?;
                tracing::debug!(
                    version = %report.pdf_version,
                    pages = report.page_count,
                    rgb_vectors = report.has_rgb_vectors,
                    rgb_images = report.has_rgb_images,
                    "pdf upload passed through"
                );
                load_document(&upload.bytes)
            }
        }
    }

    /// Single page showing a DCT-encoded DeviceCMYK image edge to edge.
    fn image_pdf(
        &self,
        cmyk: &PixelImage,
        width_pt: f32,
        height_pt: f32,
        timer: &mut StageTimer,
    ) -> Result<Document, ExportError> {
        let jpeg = timer.time("encode", || encode_cmyk_jpeg(cmyk, self.limits.jpeg_quality))?;
        let mut doc = Document::with_version("1.4");
        // Adobe CMYK JPEGs store inverted samples.
        let decode: Vec<Object> = [1, 0, 1, 0, 1, 0, 1, 0].iter().map(|v| Object::Integer(*v)).collect();
        let image_id = doc.add_object(
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => cmyk.width() as i64,
                    "Height" => cmyk.height() as i64,
                    "ColorSpace" => "DeviceCMYK",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                    "Decode" => decode,
                },
                jpeg,
            )
            .with_compression(false),
        );
        let content = format!("q {width_pt:.4} 0 0 {height_pt:.4} 0 0 cm /Im0 Do Q").into_bytes();
        add_single_page(
            &mut doc,
            [0.0, 0.0, width_pt, height_pt],
            content,
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        );
        Ok(doc)
    }

    fn tiff_bytes(
        &self,
        upload: &Upload,
        upload_type: UploadType,
        request: &ConversionRequest,
        profile: &ColorProfile,
        timer: &mut StageTimer,
    ) -> Result<Vec<u8>, ExportError> {
        let is_png = matches!(image::guess_format(&upload.bytes), Ok(image::ImageFormat::Png));
        if upload_type != UploadType::Image || !is_png {
            return Err(ExportError::UnsupportedFormat(format!(
                "tiff export needs a png upload, got {}",
                upload_type.as_str()
            )));
        }
        let source = timer.time("decode", || decode(&upload.bytes))?;
        tracing::debug!(width = source.width(), height = source.height(), stage = "source", "raster stage");
        let plan = RasterPlan {
            width_px: request.width_px,
            height_px: request.height_px,
            pixel_limits: Some((self.limits.max_tiff_dimension, self.limits.max_tiff_pixels)),
            oversize: Oversize::Downscale,
            antialias: request.tiff_antialias,
            scale_mode: request.tiff_scale_mode,
        };
        let cmyk = render_cmyk(source, &plan, &ColorMapper::new(profile), timer)?;
        let ppi = request.effective_ppi();
        timer.count(
            "tiff",
            &[
                ("width", u64::from(cmyk.width())),
                ("height", u64::from(cmyk.height())),
                ("ppi", u64::from(ppi)),
            ],
        );
        let icc = profile.icc_bytes();
        timer.time("encode", || {
            encode_cmyk_tiff(&cmyk, ppi, request.tiff_compression, &icc)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::tests::{make_single_page_pdf, pdf_bytes};
    use crate::pdfinspect::inspect_pdf_bytes;
    use crate::profile::tests::test_store;
    use crate::request::RequestFields;
    use crate::standard::PdfStandard;
    use crate::tiff::tests::{rational_value, short_value, walk_ifd};
    use image::{Rgba, RgbaImage};

    const VECTOR_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200">
  <rect x="10" y="10" width="180" height="180" fill="rgb(255,0,0)"/>
  <text x="20" y="100" font-family="'Open Sans', Arial" font-size="24">Vector</text>
</svg>"#;

    const TRANSLUCENT_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100">
  <rect x="0" y="0" width="100" height="100" fill="#00ff00" fill-opacity="0.5"/>
</svg>"##;

    const TEXT_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="240" height="80">
  <text x="10" y="50" font-family="'Tuffy', Arial" font-size="32" fill="#202020">Tuffy text</text>
</svg>"##;

    fn service() -> ExportService {
        ExportService::new(test_store(), FontLibrary::empty())
    }

    fn service_with_tuffy() -> ExportService {
        let mut fonts = FontLibrary::empty();
        fonts
            .register_bytes(
                include_bytes!("../testdata/fonts/Tuffy.ttf").to_vec(),
                "Tuffy.ttf",
            )
            .expect("tuffy");
        ExportService::new(test_store(), fonts)
    }

    fn png(width: u32, height: u32, px: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(px));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).expect("png");
        out.into_inner()
    }

    fn request(pairs: &[(&str, &str)]) -> ConversionRequest {
        let mut fields = RequestFields::default();
        for (k, v) in pairs {
            fields.push(*k, *v);
        }
        fields.to_request().expect("request")
    }

    fn svg_upload(svg: &str) -> Upload {
        Upload::new(Some("art.svg"), Some("image/svg+xml"), svg.as_bytes().to_vec())
    }

    #[test]
    fn png_to_pdf_embeds_a_cmyk_image_sized_in_points() {
        let upload = Upload::new(Some("a.png"), Some("image/png"), png(96, 48, [0, 128, 255, 255]));
        let out = service()
            .convert(&upload, &request(&[("format", "pdf"), ("name", "photo")]))
            .expect("convert");
        assert_eq!(out.file_name, "photo.pdf");
        assert_eq!(out.content_type, "application/pdf");
        let report = inspect_pdf_bytes(&out.payload).expect("inspect");
        assert!(report.has_cmyk_images);
        assert!(!report.has_rgb_images);
        assert_eq!(report.output_intent_count, 1);
        let doc = Document::load_mem(&out.payload).expect("load");
        let page = *doc.get_pages().values().next().expect("page");
        assert_eq!(crate::finalize::media_box(&doc, page), Some([0.0, 0.0, 72.0, 36.0]));
    }

    #[test]
    fn png_to_tiff_carries_resolution_lzw_and_icc() {
        let upload = Upload::new(Some("a.png"), Some("image/png"), png(100, 100, [0, 128, 255, 255]));
        let svc = service();
        let out = svc
            .convert(
                &upload,
                &request(&[("format", "tiff"), ("ppi", "300"), ("tiffCompression", "lzw")]),
            )
            .expect("convert");
        assert_eq!(out.content_type, "image/tiff");
        assert_eq!(out.file_name, "export.tif");
        let (_, map) = walk_ifd(&out.payload);
        assert_eq!(map[&256].slot, 100);
        assert_eq!(map[&257].slot, 100);
        assert_eq!(short_value(&map, 259), 5);
        assert_eq!(short_value(&map, 262), 5);
        assert_eq!(short_value(&map, 277), 4);
        assert_eq!(short_value(&map, 296), 2);
        assert_eq!(short_value(&map, 317), 2);
        assert_eq!(rational_value(&out.payload, &map, 282), (300, 1));
        assert_eq!(rational_value(&out.payload, &map, 283), (300, 1));
        let icc_len = svc.profiles().default_profile().icc_len();
        assert_eq!(map[&crate::tiff::TAG_ICC_PROFILE].count as usize, icc_len);
    }

    #[test]
    fn tiff_needs_a_png_upload() {
        let err = service()
            .convert(&svg_upload(VECTOR_SVG), &request(&[("format", "tiff")]))
            .expect_err("svg to tiff");
        assert!(matches!(err, ExportError::UnsupportedFormat(_)));
    }

    #[test]
    fn pdf_passthrough_to_pdfx4() {
        let source = pdf_bytes(make_single_page_pdf("X4", [0, 0, 300, 300]));
        let upload = Upload::new(Some("in.pdf"), Some("application/pdf"), source);
        let out = service()
            .convert(
                &upload,
                &request(&[("format", "pdf"), ("pdfStandard", "pdfx-4:2008")]),
            )
            .expect("convert");
        let report = inspect_pdf_bytes(&out.payload).expect("inspect");
        assert!(report.pdf_version.as_str() >= "1.6");
        assert_eq!(report.gts_pdfx_version.as_deref(), Some("PDF/X-4"));
        assert_eq!(report.trapped.as_deref(), Some("True"));
        assert_eq!(report.output_intent_count, 1);
    }

    #[test]
    fn empty_pdf_upload_is_malformed() {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let upload = Upload::new(Some("empty.pdf"), None, pdf_bytes(doc));
        let err = service()
            .convert(&upload, &request(&[("format", "pdf")]))
            .expect_err("empty");
        assert!(matches!(err, ExportError::MalformedInput(_)));
    }

    #[test]
    fn svg_vector_output_uses_cmyk_operators_only() {
        let out = service()
            .convert(&svg_upload(VECTOR_SVG), &request(&[("format", "pdf"), ("ppi", "150")]))
            .expect("convert");
        let report = inspect_pdf_bytes(&out.payload).expect("inspect");
        assert!(report.has_cmyk_vectors);
        assert!(!report.has_rgb_vectors);
    }

    #[test]
    fn embed_mode_embeds_the_text_font() {
        let out = service_with_tuffy()
            .convert(&svg_upload(TEXT_SVG), &request(&[("format", "pdf")]))
            .expect("convert");
        let report = inspect_pdf_bytes(&out.payload).expect("inspect");
        assert!(!report.fonts.is_empty());
        assert!(report.fonts.iter().any(|font| font.contains("Tuffy")), "{:?}", report.fonts);
        assert!(!report.has_rgb_vectors);
    }

    #[test]
    fn outline_mode_embeds_no_fonts() {
        let out = service_with_tuffy()
            .convert(
                &svg_upload(TEXT_SVG),
                &request(&[("format", "pdf"), ("svgTextMode", "outline")]),
            )
            .expect("convert");
        let report = inspect_pdf_bytes(&out.payload).expect("inspect");
        assert!(report.fonts.is_empty(), "{:?}", report.fonts);
        assert!(report.has_cmyk_vectors);
    }

    #[test]
    fn oversized_image_pdf_target_is_refused() {
        let upload = Upload::new(Some("a.png"), Some("image/png"), png(4, 4, [0, 0, 0, 255]));
        let err = service()
            .convert(
                &upload,
                &request(&[("format", "pdf"), ("widthPx", "60000"), ("heightPx", "60000")]),
            )
            .expect_err("too large");
        assert!(matches!(err, ExportError::SizeLimit(_)));
        assert_eq!(err.http_status(), 413);
    }

    #[test]
    fn pdfx1a_rejects_translucent_svg() {
        let err = service()
            .convert(
                &svg_upload(TRANSLUCENT_SVG),
                &request(&[("format", "pdf"), ("pdfStandard", "pdfx-1a")]),
            )
            .expect_err("transparency");
        assert!(matches!(err, ExportError::StandardViolation(_)));
        assert!(err.message().contains("transparency"));
        assert_eq!(request(&[("pdfStandard", "pdfx-1a")]).pdf_standard, PdfStandard::X1a2001);
    }

    #[test]
    fn unknown_profile_is_refused() {
        let upload = Upload::new(Some("a.png"), None, png(2, 2, [0, 0, 0, 255]));
        let err = service()
            .convert(&upload, &request(&[("pdfColorProfile", "gracol_2013")]))
            .expect_err("profile");
        assert!(matches!(err, ExportError::UnsupportedProfile(_)));
    }

    #[test]
    fn multi_file_merge_keeps_order_and_per_file_sizes() {
        let items = vec![
            SizedUpload {
                upload: Upload::new(Some("a.png"), None, png(10, 10, [255, 0, 0, 255])),
                width_px: Some(96),
                height_px: Some(96),
            },
            SizedUpload {
                upload: Upload::new(Some("b.pdf"), None, pdf_bytes(make_single_page_pdf("B", [0, 0, 200, 100]))),
                width_px: None,
                height_px: None,
            },
        ];
        let out = service()
            .convert_many(&items, &request(&[("format", "pdf"), ("name", "book")]))
            .expect("merge");
        assert_eq!(out.file_name, "book.pdf");
        let doc = Document::load_mem(&out.payload).expect("load");
        let pages: Vec<_> = doc.get_pages().values().copied().collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(crate::finalize::media_box(&doc, pages[0]), Some([0.0, 0.0, 72.0, 72.0]));
        assert_eq!(crate::finalize::media_box(&doc, pages[1]), Some([0.0, 0.0, 200.0, 100.0]));
        assert_eq!(inspect_pdf_bytes(&out.payload).expect("inspect").output_intent_count, 1);

        let err = service()
            .convert_many(&items, &request(&[("format", "tiff")]))
            .expect_err("tiff merge");
        assert!(matches!(err, ExportError::UnsupportedFormat(_)));
    }
}
