//! SVG to single-page CMYK PDF.
//!
//! The SVG is converted by svg2pdf, the first page of its output is wrapped into a form XObject,
//! recoloured to DeviceCMYK and placed on a fresh page scaled to the target size. Text is either
//! embedded with its fonts or drawn as outlines. When svg2pdf refuses the document for a reason
//! other than fonts, the SVG is rasterised with resvg and handed back for the image path.

use crate::error::ExportError;
use crate::finalize::{add_single_page, media_box, rect_object};
use crate::fonts::FontLibrary;
use crate::perf::StageTimer;
use crate::raster::{MAX_RASTER_DIMENSION, MAX_TIFF_PIXELS, PixelImage, clamp_to_limits};
use crate::recolor::{RecolorStats, recolor_form_tree};
use crate::request::SvgTextMode;
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use svg2pdf::usvg;
use svg2pdf::{ConversionError, ConversionOptions, PageOptions};

pub const A4_WIDTH_PT: f32 = 595.0;
pub const A4_HEIGHT_PT: f32 = 842.0;
pub const BLEED_SCALE: f32 = 1.001;
const SVG_DPI: f32 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvgRenderOptions {
    pub text_mode: SvgTextMode,
    pub target_width_pt: Option<f32>,
    pub target_height_pt: Option<f32>,
    /// Used only when the SVG has to be rasterised.
    pub dpi: u32,
}

impl Default for SvgRenderOptions {
    fn default() -> Self {
        Self {
            text_mode: SvgTextMode::Embed,
            target_width_pt: None,
            target_height_pt: None,
            dpi: 72,
        }
    }
}

#[derive(Debug)]
pub enum SvgPage {
    /// Single-page document with the recoloured form placed on it.
    Vector {
        document: Document,
        width_pt: f32,
        height_pt: f32,
        recolor: RecolorStats,
    },
    /// The SVG could only be rasterised; the page keeps the vector page size.
    Raster {
        image: PixelImage,
        width_pt: f32,
        height_pt: f32,
    },
}

enum ConvertFailure {
    Font(String),
    Other(String),
}

/// `font-family` value or declaration found in SVG source.
struct FontFamilySpan {
    /// Whole attribute or declaration, including a trailing `;` for CSS.
    start: usize,
    end: usize,
    value_start: usize,
    value_end: usize,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn skip_ws(bytes: &[u8], mut at: usize) -> usize {
    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    at
}

fn find_font_families(svg: &str) -> Vec<FontFamilySpan> {
    const KEY: &[u8] = b"font-family";
    let bytes = svg.as_bytes();
    let mut spans = Vec::new();
    let mut at = 0;
    while at + KEY.len() <= bytes.len() {
        if !bytes[at..at + KEY.len()].eq_ignore_ascii_case(KEY)
            || (at > 0 && is_ident_byte(bytes[at - 1]))
        {
            at += 1;
            continue;
        }
        let start = at;
        let after = skip_ws(bytes, at + KEY.len());
        match bytes.get(after) {
            Some(b'=') => {
                let open = skip_ws(bytes, after + 1);
                let Some(&quote) = bytes.get(open).filter(|q| **q == b'"' || **q == b'\'') else {
                    at = after + 1;
                    continue;
                };
                let Some(len) = bytes[open + 1..].iter().position(|b| *b == quote) else {
                    break;
                };
                let close = open + 1 + len;
                spans.push(FontFamilySpan {
                    start,
                    end: close + 1,
                    value_start: open + 1,
                    value_end: close,
                });
                at = close + 1;
            }
            Some(b':') => {
                let value_start = skip_ws(bytes, after + 1);
                let mut pos = value_start;
                let mut token_start = true;
                while pos < bytes.len() {
                    match bytes[pos] {
                        b';' | b'}' | b'<' | b'>' => break,
                        q @ (b'"' | b'\'') if token_start => {
                            match bytes[pos + 1..].iter().position(|b| *b == q) {
                                Some(len) => pos += len + 2,
                                None => break,
                            }
                            token_start = false;
                        }
                        b'"' | b'\'' => break,
                        b',' => {
                            token_start = true;
                            pos += 1;
                        }
                        b if b.is_ascii_whitespace() => pos += 1,
                        _ => {
                            token_start = false;
                            pos += 1;
                        }
                    }
                }
                let mut value_end = pos;
                while value_end > value_start && bytes[value_end - 1].is_ascii_whitespace() {
                    value_end -= 1;
                }
                let end = if bytes.get(pos) == Some(&b';') { pos + 1 } else { pos };
                spans.push(FontFamilySpan {
                    start,
                    end,
                    value_start,
                    value_end,
                });
                at = pos.max(start + 1);
            }
            _ => at = after,
        }
    }
    spans
}

/// First non-empty family of a CSS family list, without quotes.
pub fn primary_font_family(raw: &str) -> Option<String> {
    raw.split(',')
        .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .find(|part| !part.is_empty())
        .map(str::to_string)
}

/// Collapses every `font-family` list to its primary family. Idempotent.
pub fn normalize_font_families(svg: &str) -> String {
    let mut out = String::with_capacity(svg.len());
    let mut copied = 0;
    for span in find_font_families(svg) {
        let raw = &svg[span.value_start..span.value_end];
        let Some(primary) = primary_font_family(raw) else {
            continue;
        };
        if primary != raw {
            tracing::debug!(from = raw, to = %primary, "svg font-family normalized");
        }
        out.push_str(&svg[copied..span.value_start]);
        out.push_str(&primary);
        copied = span.value_end;
    }
    out.push_str(&svg[copied..]);
    out
}

/// Removes every `font-family` attribute and CSS declaration.
pub fn strip_font_families(svg: &str) -> String {
    let mut out = String::with_capacity(svg.len());
    let mut copied = 0;
    for span in find_font_families(svg) {
        out.push_str(&svg[copied..span.start]);
        copied = span.end;
    }
    out.push_str(&svg[copied..]);
    out
}

fn parse_tree(svg: &str, fonts: &FontLibrary) -> Result<usvg::Tree, ExportError> {
    let mut options = usvg::Options::default();
    options.fontdb = fonts.database();
    if let Some(family) = fonts.default_family() {
        options.font_family = family.to_string();
    }
    usvg::Tree::from_str(svg, &options)
        .map_err(|err| ExportError::MalformedInput(format!("unreadable svg: {err}")))
}

fn classify_failure(err: ConversionError) -> ConvertFailure {
    match err {
        ConversionError::InvalidFont(_)
        | ConversionError::SubsetError(_)
        | ConversionError::MissingGlyphs => ConvertFailure::Font(err.to_string()),
        other => ConvertFailure::Other(other.to_string()),
    }
}

fn convert_tree(tree: &usvg::Tree, embed_text: bool) -> Result<Vec<u8>, ConvertFailure> {
    let mut conversion = ConversionOptions::default();
    conversion.embed_text = embed_text;
    let page = PageOptions { dpi: SVG_DPI };
    svg2pdf::to_pdf(tree, conversion, page).map_err(classify_failure)
}

/// Bounding box in points; degenerate boxes fall back to A4.
fn usable_bbox(bbox: Option<[f32; 4]>) -> [f32; 4] {
    match bbox {
        Some([llx, lly, urx, ury])
            if [llx, lly, urx, ury].iter().all(|v| v.is_finite())
                && urx - llx > 0.0
                && ury - lly > 0.0 =>
        {
            [llx, lly, urx, ury]
        }
        _ => [0.0, 0.0, A4_WIDTH_PT, A4_HEIGHT_PT],
    }
}

fn page_size(bbox: [f32; 4], options: &SvgRenderOptions) -> (f32, f32) {
    let pick = |target: Option<f32>, intrinsic: f32, a4: f32| match target {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ if intrinsic.is_finite() && intrinsic > 0.0 => intrinsic,
        _ => a4,
    };
    (
        pick(options.target_width_pt, bbox[2] - bbox[0], A4_WIDTH_PT),
        pick(options.target_height_pt, bbox[3] - bbox[1], A4_HEIGHT_PT),
    )
}

/// `[sx 0 0 sy tx ty]` mapping the bbox onto the page with the bleed factor.
pub fn placement_matrix(bbox: [f32; 4], width_pt: f32, height_pt: f32) -> [f32; 6] {
    let sx = width_pt / (bbox[2] - bbox[0]) * BLEED_SCALE;
    let sy = height_pt / (bbox[3] - bbox[1]) * BLEED_SCALE;
    [sx, 0.0, 0.0, sy, -sx * bbox[0], -sy * bbox[1]]
}

fn page_resources(doc: &Document, page_id: lopdf::ObjectId) -> Dictionary {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(resources)) => return resources.clone(),
            Ok(Object::Reference(rid)) => {
                if let Ok(resources) = doc.get_object(*rid).and_then(Object::as_dict) {
                    return resources.clone();
                }
                break;
            }
            _ => {}
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Dictionary::new()
}

/// Turns svg2pdf output into our page: form XObject, recolour, placement.
fn place_converted(
    pdf: &[u8],
    options: &SvgRenderOptions,
    timer: &mut StageTimer,
) -> Result<SvgPage, ExportError> {
    let mut doc = Document::load_mem(pdf).map_err(|err| {
        ExportError::InternalError(format!("svg conversion output unreadable: {err}"))
    })?;
    let page_id = doc
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| ExportError::InternalError("svg conversion produced no page".to_string()))?;
    let bbox = usable_bbox(media_box(&doc, page_id));
    let content = doc
        .get_page_content(page_id)
        .map_err(|err| ExportError::InternalError(format!("svg page content unreadable: {err}")))?;
    let resources = page_resources(&doc, page_id);

    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => rect_object(bbox),
            "Resources" => resources,
        },
        content,
    ));
    let recolor = timer.time("recolor", || recolor_form_tree(&mut doc, &[form_id]))?;

    let (width_pt, height_pt) = page_size(bbox, options);
    let [sx, _, _, sy, tx, ty] = placement_matrix(bbox, width_pt, height_pt);
    let content = format!("q {sx:.6} 0 0 {sy:.6} {tx:.6} {ty:.6} cm /Fm0 Do Q").into_bytes();
    add_single_page(
        &mut doc,
        [0.0, 0.0, width_pt, height_pt],
        content,
        dictionary! { "XObject" => dictionary! { "Fm0" => form_id } },
    );
    doc.prune_objects();
    tracing::info!(
        bbox_width = bbox[2] - bbox[0],
        bbox_height = bbox[3] - bbox[1],
        width_pt,
        height_pt,
        scale_x = sx,
        scale_y = sy,
        fills = recolor.fills,
        strokes = recolor.strokes,
        "svg placed"
    );
    Ok(SvgPage::Vector {
        document: doc,
        width_pt,
        height_pt,
        recolor,
    })
}

fn rasterize(
    tree: &usvg::Tree,
    options: &SvgRenderOptions,
    timer: &mut StageTimer,
) -> Result<SvgPage, ExportError> {
    let size = tree.size();
    let bbox = usable_bbox(Some([0.0, 0.0, size.width(), size.height()]));
    let (width_pt, height_pt) = page_size(bbox, options);
    let density = options.dpi.max(72) as f32 / 72.0;
    let (width_px, height_px) = clamp_to_limits(
        ((width_pt * density).round() as u32).max(1),
        ((height_pt * density).round() as u32).max(1),
        MAX_RASTER_DIMENSION,
        MAX_TIFF_PIXELS,
    );
    let mut pixmap = tiny_skia::Pixmap::new(width_px, height_px).ok_or_else(|| {
        ExportError::InternalError(format!("cannot allocate {width_px}x{height_px} svg raster"))
    })?;
    let transform = tiny_skia::Transform::from_scale(
        width_px as f32 / size.width(),
        height_px as f32 / size.height(),
    );
    timer.time("svg.rasterize", || {
        resvg::render(tree, transform, &mut pixmap.as_mut())
    });
    let image = PixelImage::from_pixmap(&pixmap)?;
    Ok(SvgPage::Raster {
        image,
        width_pt,
        height_pt,
    })
}

/// Renders one SVG upload to a PDF page, or a raster when vector conversion is refused.
pub fn render_svg(
    bytes: &[u8],
    fonts: &FontLibrary,
    options: &SvgRenderOptions,
    timer: &mut StageTimer,
) -> Result<SvgPage, ExportError> {
    let source = std::str::from_utf8(bytes)
        .map_err(|err| ExportError::MalformedInput(format!("svg is not valid utf-8: {err}")))?;
    roxmltree::Document::parse(source)
        .map_err(|err| ExportError::MalformedInput(format!("unreadable svg: {err}")))?;

    let (first_pass, embed_text) = match options.text_mode {
        SvgTextMode::Outline => (strip_font_families(source), false),
        SvgTextMode::Embed => (normalize_font_families(source), true),
    };
    let mut current = first_pass;
    let mut sanitized = options.text_mode == SvgTextMode::Outline;
    loop {
        let tree = parse_tree(&current, fonts)?;
        match timer.time("svg.convert", || convert_tree(&tree, embed_text)) {
            Ok(pdf) => return place_converted(&pdf, options, timer),
            Err(ConvertFailure::Font(message)) => {
                if sanitized {
                    return Err(ExportError::UnsupportedFont(format!(
                        "svg fonts cannot be embedded: {message}"
                    )));
                }
                let stripped = strip_font_families(source);
                if stripped == current {
                    return Err(ExportError::UnsupportedFont(format!(
                        "svg fonts cannot be embedded: {message}"
                    )));
                }
                tracing::warn!(error = %message, "svg font unsupported, retrying without font-family");
                current = stripped;
                sanitized = true;
            }
            Err(ConvertFailure::Other(message)) => {
                tracing::warn!(error = %message, "svg vector conversion failed, rasterising");
                return rasterize(&tree, options, timer);
            }
        }
    }
}
