use crate::error::ExportError;
use crate::finalize::find_transparency;
use crate::recolor::{rgb_space_names, stream_bytes, summarize_content};
use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfInspectErrorCode {
    PdfParseFailed,
    PdfEncryptedUnsupported,
    PdfEmptyOrNoPages,
    PdfIoError,
}

impl PdfInspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfInspectErrorCode::PdfParseFailed => "PDF_PARSE_FAILED",
            PdfInspectErrorCode::PdfEncryptedUnsupported => "PDF_ENCRYPTED_UNSUPPORTED",
            PdfInspectErrorCode::PdfEmptyOrNoPages => "PDF_EMPTY_OR_NO_PAGES",
            PdfInspectErrorCode::PdfIoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectError {
    pub code: PdfInspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for PdfInspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PdfInspectError {}

impl From<PdfInspectError> for ExportError {
    fn from(err: PdfInspectError) -> Self {
        match err.code {
            PdfInspectErrorCode::PdfIoError => ExportError::InternalError(err.to_string()),
            _ => ExportError::MalformedInput(err.message),
        }
    }
}

/// What a PDF contains, as far as print output is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    /// `BaseFont` names from pages and nested forms, sorted and deduplicated.
    pub fonts: Vec<String>,
    pub has_cmyk_images: bool,
    pub has_rgb_images: bool,
    /// `k`/`K` operators in page or form content.
    pub has_cmyk_vectors: bool,
    /// `rg`/`RG` operators in page or form content.
    pub has_rgb_vectors: bool,
    pub has_transparency: bool,
    pub output_intent_count: usize,
    pub gts_pdfx_version: Option<String>,
    pub trapped: Option<String>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, PdfInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfParseFailed,
        message: err.to_string(),
    })?;
    Ok(inspect_document(&pdf, bytes.len()))
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, PdfInspectError> {
    let data = std::fs::read(path).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfIoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

pub fn inspect_document(pdf: &LoDocument, file_size_bytes: usize) -> PdfInspectReport {
    let mut report = PdfInspectReport {
        pdf_version: pdf.version.clone(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes,
        ..PdfInspectReport::default()
    };
    let pages = pdf.get_pages();
    report.page_count = pages.len();
    if report.encrypted {
        return report;
    }

    let mut scan = ContentScan::default();
    for page_id in pages.values() {
        let resources = page_resources(pdf, *page_id);
        if let Ok(content) = pdf.get_page_content(*page_id) {
            scan.content(pdf, &content, resources.as_ref());
        }
        if let Some(resources) = &resources {
            scan.resources(pdf, resources);
        }
    }
    report.fonts = scan.fonts.into_iter().collect();
    report.has_cmyk_images = scan.cmyk_images;
    report.has_rgb_images = scan.rgb_images;
    report.has_cmyk_vectors = scan.cmyk_vectors;
    report.has_rgb_vectors = scan.rgb_vectors;
    report.has_transparency = find_transparency(pdf).is_some();

    if let Some(catalog) = pdf
        .trailer
        .get(b"Root")
        .ok()
        .and_then(|root| resolve_dict(pdf, root))
    {
        report.output_intent_count = catalog
            .get(b"OutputIntents")
            .ok()
            .and_then(|obj| resolve(pdf, obj).as_array().ok())
            .map_or(0, Vec::len);
    }
    if let Some(info) = pdf
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve_dict(pdf, info))
    {
        report.gts_pdfx_version = info_text(info, b"GTS_PDFXVersion");
        report.trapped = info_text(info, b"Trapped");
    }
    report
}

pub fn composition_compatibility_issues(report: &PdfInspectReport) -> Vec<PdfInspectErrorCode> {
    let mut issues = Vec::new();
    if report.encrypted {
        issues.push(PdfInspectErrorCode::PdfEncryptedUnsupported);
    }
    if report.page_count == 0 {
        issues.push(PdfInspectErrorCode::PdfEmptyOrNoPages);
    }
    issues
}

pub fn require_pdf_composition_compatibility(
    report: &PdfInspectReport,
) -> Result<(), PdfInspectError> {
    for issue in composition_compatibility_issues(report) {
        match issue {
            PdfInspectErrorCode::PdfEncryptedUnsupported => {
                return Err(PdfInspectError {
                    code: PdfInspectErrorCode::PdfEncryptedUnsupported,
                    message: "encrypted pdf uploads are not supported".to_string(),
                });
            }
            PdfInspectErrorCode::PdfEmptyOrNoPages => {
                return Err(PdfInspectError {
                    code: PdfInspectErrorCode::PdfEmptyOrNoPages,
                    message: "pdf has no pages".to_string(),
                });
            }
            PdfInspectErrorCode::PdfParseFailed | PdfInspectErrorCode::PdfIoError => {}
        }
    }
    Ok(())
}

#[derive(Default)]
struct ContentScan {
    fonts: BTreeSet<String>,
    cmyk_images: bool,
    rgb_images: bool,
    cmyk_vectors: bool,
    rgb_vectors: bool,
    visited: BTreeSet<ObjectId>,
}

impl ContentScan {
    fn content(&mut self, pdf: &LoDocument, content: &[u8], resources: Option<&Dictionary>) {
        let rgb_spaces = resources
            .map(|resources| rgb_space_names(pdf, resources))
            .unwrap_or_default();
        let summary = summarize_content(content, &rgb_spaces);
        let ops = &summary.operators;
        self.cmyk_vectors |= ops.contains(b"k".as_slice()) || ops.contains(b"K".as_slice());
        self.rgb_vectors |= summary.rgb_colour;
    }

    fn resources(&mut self, pdf: &LoDocument, resources: &Dictionary) {
        if let Some(fonts) = resources.get(b"Font").ok().and_then(|f| resolve_dict(pdf, f)) {
            for (_, font) in fonts.iter() {
                let base = resolve_dict(pdf, font)
                    .and_then(|font| font.get(b"BaseFont").and_then(LoObject::as_name).ok());
                if let Some(base) = base {
                    self.fonts.insert(String::from_utf8_lossy(base).into_owned());
                }
            }
        }

        let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| resolve_dict(pdf, x)) else {
            return;
        };
        for (_, xobject) in xobjects.iter() {
            let LoObject::Reference(id) = xobject else {
                continue;
            };
            if !self.visited.insert(*id) {
                continue;
            }
            let Ok(stream) = pdf.get_object(*id).and_then(LoObject::as_stream) else {
                continue;
            };
            match stream.dict.get(b"Subtype").and_then(LoObject::as_name) {
                Ok(b"Image") => match stream
                    .dict
                    .get(b"ColorSpace")
                    .ok()
                    .and_then(|cs| image_components(pdf, cs))
                {
                    Some(4) => self.cmyk_images = true,
                    Some(3) => self.rgb_images = true,
                    _ => {}
                },
                Ok(b"Form") => {
                    let nested = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|r| resolve_dict(pdf, r))
                        .cloned();
                    if let Ok(content) = stream_bytes(stream) {
                        self.content(pdf, &content, nested.as_ref());
                    }
                    if let Some(nested) = &nested {
                        self.resources(pdf, nested);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Component count of DeviceCMYK/DeviceRGB and ICCBased image colour spaces.
fn image_components(pdf: &LoDocument, cs: &LoObject) -> Option<i64> {
    match resolve(pdf, cs) {
        LoObject::Name(name) => match name.as_slice() {
            b"DeviceCMYK" => Some(4),
            b"DeviceRGB" | b"CalRGB" => Some(3),
            _ => None,
        },
        LoObject::Array(parts) => {
            let family = parts.first().and_then(|p| p.as_name().ok())?;
            match family {
                b"ICCBased" => parts
                    .get(1)
                    .and_then(|stream| resolve_dict(pdf, stream))
                    .and_then(|dict| dict.get(b"N").and_then(LoObject::as_i64).ok()),
                b"CalRGB" => Some(3),
                _ => None,
            }
        }
        _ => None,
    }
}

fn page_resources(pdf: &LoDocument, page_id: ObjectId) -> Option<Dictionary> {
    let mut current = Some(page_id);
    let mut seen = BTreeSet::new();
    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        let dict = pdf.get_object(id).and_then(LoObject::as_dict).ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve_dict(pdf, resources).cloned();
        }
        current = dict.get(b"Parent").and_then(LoObject::as_reference).ok();
    }
    None
}

fn resolve<'a>(pdf: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => pdf.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

fn resolve_dict<'a>(pdf: &'a LoDocument, obj: &'a LoObject) -> Option<&'a Dictionary> {
    match resolve(pdf, obj) {
        LoObject::Dictionary(dict) => Some(dict),
        LoObject::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn info_text(info: &Dictionary, key: &[u8]) -> Option<String> {
    match info.get(key).ok()? {
        LoObject::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        LoObject::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::add_single_page;
    use crate::finalize::tests::{make_single_page_pdf, pdf_bytes};
    use lopdf::{Stream as LoStream, dictionary};
    use std::io::Write;

    fn make_single_page_pdf_bytes(text: &str) -> Vec<u8> {
        let mut doc = make_single_page_pdf(text, [0, 0, 612, 792]);
        doc.compress();
        pdf_bytes(doc)
    }

    #[test]
    fn inspect_pdf_bytes_reads_version_and_page_count() {
        let bytes = make_single_page_pdf_bytes("HELLO");
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 1);
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert_eq!(report.pdf_version, "1.5");
        assert_eq!(report.fonts, vec!["Helvetica".to_string()]);
        assert_eq!(report.output_intent_count, 0);
        assert!(!report.has_transparency);
        assert!(report.trapped.is_none());
    }

    #[test]
    fn inspect_pdf_bytes_rejects_malformed_data() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert_eq!(err.code, PdfInspectErrorCode::PdfParseFailed);
        assert!(matches!(ExportError::from(err), ExportError::MalformedInput(_)));
    }

    #[test]
    fn inspect_pdf_path_reports_io_error_for_missing_file() {
        let missing = std::env::temp_dir().join(format!(
            "print_export_pdfinspect_missing_{}_{}.pdf",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let err = inspect_pdf_path(&missing).expect_err("missing");
        assert_eq!(err.code, PdfInspectErrorCode::PdfIoError);
        assert!(ExportError::from(err).is_internal());
    }

    #[test]
    fn composition_compatibility_rejects_encrypted() {
        let report = PdfInspectReport {
            pdf_version: "1.7".to_string(),
            page_count: 1,
            encrypted: true,
            ..PdfInspectReport::default()
        };
        let issues = composition_compatibility_issues(&report);
        assert!(issues.contains(&PdfInspectErrorCode::PdfEncryptedUnsupported));

        let err = require_pdf_composition_compatibility(&report).expect_err("must fail");
        assert_eq!(err.code, PdfInspectErrorCode::PdfEncryptedUnsupported);
    }

    #[test]
    fn composition_compatibility_rejects_empty_page_count() {
        let report = PdfInspectReport {
            pdf_version: "1.7".to_string(),
            ..PdfInspectReport::default()
        };
        let issues = composition_compatibility_issues(&report);
        assert_eq!(issues, vec![PdfInspectErrorCode::PdfEmptyOrNoPages]);
        let err = require_pdf_composition_compatibility(&report).expect_err("must fail");
        assert_eq!(err.code, PdfInspectErrorCode::PdfEmptyOrNoPages);
    }

    #[test]
    fn nested_forms_and_images_are_classified() {
        let mut doc = LoDocument::with_version("1.6");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "ABCDEF+Jost",
        });
        let rgb_image = doc.add_object(LoStream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![0, 0, 0],
        ));
        let icc_id = doc.add_object(LoStream::new(dictionary! { "N" => 4 }, Vec::new()));
        let cmyk_image = doc.add_object(LoStream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => vec![LoObject::Name(b"ICCBased".to_vec()), icc_id.into()],
                "BitsPerComponent" => 8,
            },
            vec![0, 0, 0, 0],
        ));
        let inner = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F0" => font_id },
                    "XObject" => dictionary! { "Im1" => cmyk_image },
                },
            },
            b"1 0 0 RG 0 0 m 10 10 l S /Im1 Do".to_vec(),
        ));
        let outer = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Fm1" => inner, "Im0" => rgb_image },
                },
            },
            b"/Fm1 Do /Im0 Do".to_vec(),
        ));
        add_single_page(
            &mut doc,
            [0.0, 0.0, 10.0, 10.0],
            b"0 0 0 1 k /Fm0 Do".to_vec(),
            dictionary! { "XObject" => dictionary! { "Fm0" => outer } },
        );

        let report = inspect_pdf_bytes(&pdf_bytes(doc)).expect("inspect");
        assert_eq!(report.fonts, vec!["ABCDEF+Jost".to_string()]);
        assert!(report.has_cmyk_images);
        assert!(report.has_rgb_images);
        assert!(report.has_cmyk_vectors);
        assert!(report.has_rgb_vectors);
    }

    fn vector_report(content: &[u8], resources: Dictionary, icc: Option<LoStream>) -> PdfInspectReport {
        let mut doc = LoDocument::with_version("1.6");
        let mut resources = resources;
        if let Some(icc) = icc {
            let icc_id = doc.add_object(icc);
            resources.set(
                "ColorSpace",
                dictionary! {
                    "srgb" => vec![LoObject::Name(b"ICCBased".to_vec()), icc_id.into()],
                },
            );
        }
        add_single_page(&mut doc, [0.0, 0.0, 10.0, 10.0], content.to_vec(), resources);
        inspect_pdf_bytes(&pdf_bytes(doc)).expect("inspect")
    }

    #[test]
    fn rgb_fills_through_colour_space_operators_are_detected() {
        let report = vector_report(b"/DeviceRGB cs 1 0 0 sc 0 0 10 10 re f", Dictionary::new(), None);
        assert!(report.has_rgb_vectors);
        assert!(!report.has_cmyk_vectors);

        let icc = LoStream::new(dictionary! { "N" => 3 }, Vec::new());
        let report = vector_report(b"/srgb cs 0 0 1 scn 0 0 5 5 re f", Dictionary::new(), Some(icc));
        assert!(report.has_rgb_vectors);

        let icc = LoStream::new(dictionary! { "N" => 4 }, Vec::new());
        let report = vector_report(b"/srgb cs 0 0 1 0 scn 0 0 5 5 re f", Dictionary::new(), Some(icc));
        assert!(!report.has_rgb_vectors);
    }

    #[test]
    fn inspect_pdf_path_matches_bytes_report() {
        let bytes = make_single_page_pdf_bytes("PATH");
        let temp_dir = std::env::temp_dir().join(format!(
            "print_export_pdfinspect_path_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&temp_dir).expect("mkdir");
        let path = temp_dir.join("one.pdf");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(&bytes).expect("write");

        let from_path = inspect_pdf_path(&path).expect("inspect path");
        let from_bytes = inspect_pdf_bytes(&bytes).expect("inspect bytes");
        assert_eq!(from_path, from_bytes);
    }
}
