use crate::error::ExportError;
use crate::profile::ColorProfile;
use crate::standard::{PdfStandard, PdfVersion};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::collections::BTreeSet;
use time::OffsetDateTime;

pub const PRODUCER: &str = "Figma Export Server";
pub const ICC_REGISTRY: &str = "http://www.color.org";

pub(crate) fn lopdf_err(err: lopdf::Error) -> ExportError {
    ExportError::InternalError(format!("pdf write error: {err}"))
}

pub(crate) fn malformed_pdf_err(err: lopdf::Error) -> ExportError {
    ExportError::MalformedInput(format!("unreadable pdf: {err}"))
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// `D:YYYYMMDDHHmmSS+00'00'`
pub fn pdf_date(now: OffsetDateTime) -> String {
    let utc = now.to_offset(time::UtcOffset::UTC);
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}+00'00'",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second()
    )
}

/// Walks the `Parent` chain for inheritable page attributes.
fn inherited_attr(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    let mut seen = BTreeSet::new();
    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f32; 4]> {
    let obj = inherited_attr(doc, page_id, b"MediaBox")?;
    let arr = match resolve(doc, &obj) {
        Object::Array(arr) => arr.clone(),
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, value) in out.iter_mut().zip(arr.iter()) {
        *slot = number(resolve(doc, value))?;
    }
    Some(out)
}

pub(crate) fn rect_object(rect: [f32; 4]) -> Object {
    Object::Array(rect.iter().map(|v| Object::Real(*v)).collect())
}

/// Adds a Pages tree with one page and a catalog; returns the page id.
pub(crate) fn add_single_page(
    doc: &mut Document,
    media: [f32; 4],
    content: Vec<u8>,
    resources: Dictionary,
) -> ObjectId {
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => rect_object(media),
        "Contents" => content_id,
        "Resources" => resources,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    page_id
}

fn is_transparency_group(doc: &Document, dict: &Dictionary) -> bool {
    dict.get(b"Group")
        .ok()
        .and_then(|g| resolve_dict(doc, g))
        .and_then(|g| g.get(b"S").and_then(Object::as_name).ok())
        .is_some_and(|s| s == b"Transparency")
}

fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, value)| collect_references(value, out)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, value)| collect_references(value, out)),
        _ => {}
    }
}

/// Objects reachable from the catalog.
fn reachable_objects(doc: &Document) -> BTreeSet<ObjectId> {
    let mut seen = BTreeSet::new();
    let mut pending: Vec<ObjectId> = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .into_iter()
        .collect();
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Ok(object) = doc.get_object(id) {
            collect_references(object, &mut pending);
        }
    }
    seen
}

/// First transparency construct the document renders, described for an error message.
/// Unreferenced objects are ignored.
pub fn find_transparency(doc: &Document) -> Option<String> {
    for id in reachable_objects(doc) {
        let Some(object) = doc.objects.get(&id) else {
            continue;
        };
        let dict = match object {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => &stream.dict,
            _ => continue,
        };
        let type_name = dict.get(b"Type").and_then(Object::as_name).ok();
        let subtype = dict.get(b"Subtype").and_then(Object::as_name).ok();

        if type_name == Some(b"Page".as_slice()) && is_transparency_group(doc, dict) {
            return Some(format!("page {} {} declares a transparency group", id.0, id.1));
        }
        if subtype == Some(b"Form".as_slice()) && is_transparency_group(doc, dict) {
            return Some(format!("form xobject {} {} declares a transparency group", id.0, id.1));
        }
        if subtype == Some(b"Image".as_slice()) {
            match dict.get(b"SMask") {
                Ok(Object::Integer(0)) | Ok(Object::Null) | Err(_) => {}
                Ok(Object::Name(name)) if name == b"None" => {}
                Ok(_) => {
                    return Some(format!("image {} {} uses a soft mask", id.0, id.1));
                }
            }
            if dict
                .get(b"SMaskInData")
                .and_then(Object::as_i64)
                .is_ok_and(|v| v != 0)
            {
                return Some(format!("image {} {} has SMaskInData", id.0, id.1));
            }
            continue;
        }
        for key in [b"ca".as_slice(), b"CA".as_slice()] {
            if let Some(alpha) = dict.get(key).ok().and_then(number) {
                if alpha < 1.0 {
                    return Some(format!(
                        "graphics state {} {} sets {} {}",
                        id.0,
                        id.1,
                        String::from_utf8_lossy(key),
                        alpha
                    ));
                }
            }
        }
        if type_name == Some(b"ExtGState".as_slice()) || dict.has(b"ca") || dict.has(b"CA") {
            match dict.get(b"SMask") {
                Ok(Object::Name(name)) if name == b"None" => {}
                Ok(_) => {
                    return Some(format!("graphics state {} {} uses a soft mask", id.0, id.1));
                }
                Err(_) => {}
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeSummary {
    pub version: String,
    pub standard: PdfStandard,
    pub pages: usize,
}

/// Stamps version, info, output intent and PDF/X keys. Running it twice leaves one intent.
pub fn finalize_document(
    doc: &mut Document,
    profile: &ColorProfile,
    standard: PdfStandard,
    requested: PdfVersion,
    now: OffsetDateTime,
) -> Result<FinalizeSummary, ExportError> {
    if standard.forbids_transparency() {
        if let Some(found) = find_transparency(doc) {
            return Err(ExportError::StandardViolation(format!(
                "transparency is not allowed in {}: {}",
                standard.id(),
                found
            )));
        }
    }

    let version = standard.effective_version(requested);
    doc.version = version.as_string();

    let date = pdf_date(now);
    let info_id = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) if doc.get_object(*id).and_then(Object::as_dict).is_ok() => *id,
        Ok(Object::Dictionary(dict)) => {
            let dict = dict.clone();
            doc.add_object(dict)
        }
        _ => doc.add_object(Dictionary::new()),
    };
    doc.trailer.set("Info", info_id);
    {
        let info = doc
            .get_object_mut(info_id)
            .and_then(Object::as_dict_mut)
            .map_err(lopdf_err)?;
        info.set("Producer", Object::string_literal(PRODUCER));
        info.set("Creator", Object::string_literal(PRODUCER));
        info.set("CreationDate", Object::string_literal(date.clone()));
        info.set("ModDate", Object::string_literal(date));
        info.set("Keywords", Object::string_literal(standard.id()));
        let trapped: &str = if standard.is_pdfx() { "True" } else { "False" };
        info.set("Trapped", Object::Name(trapped.as_bytes().to_vec()));
        match (standard.gts_pdfx_version(), standard.gts_pdfx_conformance()) {
            (Some(version), Some(conformance)) => {
                info.set("GTS_PDFXVersion", Object::string_literal(version));
                info.set("GTS_PDFXConformance", Object::string_literal(conformance));
            }
            _ => {
                info.remove(b"GTS_PDFXVersion");
                info.remove(b"GTS_PDFXConformance");
            }
        }
    }

    let icc_id = doc.add_object(Stream::new(
        dictionary! {
            "N" => 4,
            "Alternate" => "DeviceCMYK",
        },
        profile.icc_bytes(),
    ));
    let intent_id = doc.add_object(dictionary! {
        "Type" => "OutputIntent",
        "S" => "GTS_PDFX",
        "OutputConditionIdentifier" => Object::string_literal(profile.output_condition_identifier()),
        "OutputCondition" => Object::string_literal(profile.output_condition()),
        "RegistryName" => Object::string_literal(ICC_REGISTRY),
        "Info" => Object::string_literal(profile.display_name()),
        "DestOutputProfile" => icc_id,
    });

    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| ExportError::MalformedInput("pdf has no document catalog".to_string()))?;
    {
        let catalog = doc
            .get_object_mut(catalog_id)
            .and_then(Object::as_dict_mut)
            .map_err(|_| ExportError::MalformedInput("pdf catalog is not a dictionary".to_string()))?;
        catalog.set("OutputIntents", vec![Object::Reference(intent_id)]);
        if standard.is_pdfx() {
            catalog.set("MarkInfo", dictionary! { "Marked" => true });
        }
    }

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    if standard.is_pdfx() {
        for page_id in &page_ids {
            let Some(media) = media_box(doc, *page_id) else {
                continue;
            };
            if let Ok(page) = doc.get_object_mut(*page_id).and_then(Object::as_dict_mut) {
                if !page.has(b"TrimBox") {
                    page.set("TrimBox", rect_object(media));
                }
                if !page.has(b"BleedBox") {
                    page.set("BleedBox", rect_object(media));
                }
            }
        }
    }

    tracing::debug!(
        version = %doc.version,
        standard = standard.id(),
        profile = profile.id(),
        pages = page_ids.len(),
        "pdf finalized"
    );
    Ok(FinalizeSummary {
        version: doc.version.clone(),
        standard,
        pages: page_ids.len(),
    })
}

/// Drops orphaned objects (including replaced output intents) and serializes.
pub fn save_document(doc: &mut Document) -> Result<Vec<u8>, ExportError> {
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|err| {
        ExportError::InternalError(format!("pdf serialization failed: {err}"))
    })?;
    Ok(out)
}

pub fn load_document(bytes: &[u8]) -> Result<Document, ExportError> {
    let doc = Document::load_mem(bytes).map_err(malformed_pdf_err)?;
    if doc.is_encrypted() {
        return Err(ExportError::MalformedInput(
            "encrypted pdf is not supported".to_string(),
        ));
    }
    Ok(doc)
}

fn import_document_objects(dst: &mut Document, mut src: Document) -> Result<Vec<ObjectId>, ExportError> {
    if src.is_encrypted() {
        return Err(ExportError::MalformedInput(
            "encrypted pdf cannot be merged".to_string(),
        ));
    }
    let inheritable: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];
    let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
    for page_id in &page_ids {
        let inherited: Vec<(&[u8], Object)> = inheritable
            .iter()
            .filter_map(|key| inherited_attr(&src, *page_id, key).map(|v| (*key, v)))
            .collect();
        if let Ok(page) = src.get_object_mut(*page_id).and_then(Object::as_dict_mut) {
            for (key, value) in inherited {
                if !page.has(key) {
                    page.set(key.to_vec(), value);
                }
            }
        }
    }

    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    Ok(page_ids)
}

/// Concatenates documents page by page into a fresh page tree.
pub fn merge_documents(docs: Vec<Document>) -> Result<Document, ExportError> {
    if docs.is_empty() {
        return Err(ExportError::MalformedInput(
            "no documents to merge".to_string(),
        ));
    }
    let version = docs
        .iter()
        .map(|d| d.version.clone())
        .max()
        .unwrap_or_else(|| "1.4".to_string());
    let mut merged = Document::with_version(version);
    let pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for src in docs {
        for page_id in import_document_objects(&mut merged, src)? {
            if let Ok(page) = merged.get_object_mut(page_id).and_then(Object::as_dict_mut) {
                page.set("Parent", pages_id);
            }
            kids.push(Object::Reference(page_id));
        }
    }
    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.prune_objects();
    Ok(merged)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::profile::tests::test_store;

    pub(crate) fn make_single_page_pdf(text: &str, media: [i64; 4]) -> Document {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = format!("BT /F1 18 Tf 72 720 Td ({text}) Tj ET").into_bytes();
        add_single_page(
            &mut doc,
            media.map(|v| v as f32),
            content,
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
        );
        doc
    }

    /// Lists `id` under `/Resources/<category>/<name>` of the first page.
    pub(crate) fn reference_from_page(doc: &mut Document, category: &str, name: &str, id: ObjectId) {
        let page_id = *doc.get_pages().values().next().expect("page");
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .expect("page");
        let resources = page
            .get_mut(b"Resources")
            .and_then(Object::as_dict_mut)
            .expect("resources");
        if !resources.has(category.as_bytes()) {
            resources.set(category, Dictionary::new());
        }
        resources
            .get_mut(category.as_bytes())
            .and_then(Object::as_dict_mut)
            .expect("category")
            .set(name, id);
    }

    pub(crate) fn pdf_bytes(mut doc: Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    fn info(doc: &Document) -> &Dictionary {
        let id = doc
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .expect("info ref");
        doc.get_object(id).and_then(Object::as_dict).expect("info")
    }

    fn catalog(doc: &Document) -> &Dictionary {
        let id = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .expect("root");
        doc.get_object(id).and_then(Object::as_dict).expect("catalog")
    }

    fn string(dict: &Dictionary, key: &[u8]) -> String {
        match dict.get(key).expect("key") {
            Object::String(bytes, _) => String::from_utf8_lossy(bytes).to_string(),
            Object::Name(name) => String::from_utf8_lossy(name).to_string(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pdf_date_is_utc_compact() {
        let at = OffsetDateTime::from_unix_timestamp(0).expect("epoch");
        assert_eq!(pdf_date(at), "D:19700101000000+00'00'");
    }

    #[test]
    fn plain_finalize_sets_info_and_single_intent() {
        let store = test_store();
        let mut doc = make_single_page_pdf("hi", [0, 0, 200, 100]);
        let now = OffsetDateTime::now_utc();
        let v = PdfVersion::parse_or_fallback(None);
        finalize_document(&mut doc, store.default_profile(), PdfStandard::None, v, now).expect("first");
        finalize_document(&mut doc, store.default_profile(), PdfStandard::None, v, now).expect("second");
        assert_eq!(doc.version, "1.4");
        let info = info(&doc);
        assert_eq!(string(info, b"Producer"), PRODUCER);
        assert_eq!(string(info, b"Creator"), PRODUCER);
        assert_eq!(string(info, b"Trapped"), "False");
        assert_eq!(string(info, b"Keywords"), "none");
        assert!(!info.has(b"GTS_PDFXVersion"));
        let intents = catalog(&doc)
            .get(b"OutputIntents")
            .and_then(Object::as_array)
            .expect("intents");
        assert_eq!(intents.len(), 1);
        assert!(!catalog(&doc).has(b"MarkInfo"));
    }

    #[test]
    fn pdfx4_upgrades_version_and_marks_document() {
        let store = test_store();
        let profile = store.default_profile();
        let mut doc = make_single_page_pdf("x4", [0, 0, 300, 300]);
        let summary = finalize_document(
            &mut doc,
            profile,
            PdfStandard::X4_2008,
            PdfVersion::parse_or_fallback(Some("1.4")),
            OffsetDateTime::now_utc(),
        )
        .expect("finalize");
        assert_eq!(summary.version, "1.6");
        let info = info(&doc);
        assert_eq!(string(info, b"GTS_PDFXVersion"), "PDF/X-4");
        assert_eq!(string(info, b"GTS_PDFXConformance"), "PDF/X-4:2008");
        assert_eq!(string(info, b"Trapped"), "True");
        let catalog = catalog(&doc);
        let marked = catalog
            .get(b"MarkInfo")
            .and_then(Object::as_dict)
            .and_then(|m| m.get(b"Marked"))
            .and_then(Object::as_bool)
            .expect("marked");
        assert!(marked);
        let intent_id = catalog
            .get(b"OutputIntents")
            .and_then(Object::as_array)
            .expect("intents")[0]
            .as_reference()
            .expect("intent ref");
        let intent = doc.get_object(intent_id).and_then(Object::as_dict).expect("intent");
        assert_eq!(string(intent, b"S"), "GTS_PDFX");
        assert_eq!(string(intent, b"OutputConditionIdentifier"), "Coated FOGRA39");
        assert_eq!(string(intent, b"RegistryName"), ICC_REGISTRY);
        assert_eq!(string(intent, b"Info"), profile.display_name());
        let icc_id = intent
            .get(b"DestOutputProfile")
            .and_then(Object::as_reference)
            .expect("icc");
        let icc = doc.get_object(icc_id).and_then(Object::as_stream).expect("icc stream");
        assert_eq!(icc.dict.get(b"N").and_then(Object::as_i64).expect("n"), 4);
        assert_eq!(icc.content, profile.icc_bytes());

        let page_id = *doc.get_pages().values().next().expect("page");
        let page = doc.get_object(page_id).and_then(Object::as_dict).expect("page");
        assert!(page.has(b"TrimBox"));
        assert!(page.has(b"BleedBox"));
    }

    #[test]
    fn x1a_rejects_constant_alpha() {
        let store = test_store();
        let mut doc = make_single_page_pdf("alpha", [0, 0, 100, 100]);
        let gs = doc.add_object(dictionary! { "Type" => "ExtGState", "ca" => 0.5 });
        reference_from_page(&mut doc, "ExtGState", "GS0", gs);
        let err = finalize_document(
            &mut doc,
            store.default_profile(),
            PdfStandard::X1a2001,
            PdfVersion::parse_or_fallback(None),
            OffsetDateTime::now_utc(),
        )
        .expect_err("transparency");
        assert!(matches!(err, ExportError::StandardViolation(_)));
        assert!(err.message().contains("transparency"));
    }

    #[test]
    fn transparency_detection_covers_groups_and_masks() {
        let mut doc = make_single_page_pdf("t", [0, 0, 10, 10]);
        assert!(find_transparency(&doc).is_none());
        let opaque_mask = doc.add_object(Stream::new(
            dictionary! { "Subtype" => "Image", "SMask" => 0, "Width" => 1, "Height" => 1 },
            vec![0],
        ));
        reference_from_page(&mut doc, "XObject", "Im0", opaque_mask);
        let gs = doc.add_object(dictionary! { "Type" => "ExtGState", "CA" => 1, "SMask" => "None" });
        reference_from_page(&mut doc, "ExtGState", "GS0", gs);
        assert!(find_transparency(&doc).is_none());
        let mask_id = doc.add_object(Stream::new(dictionary! { "Subtype" => "Image" }, vec![0]));
        if let Ok(Object::Stream(image)) = doc.get_object_mut(opaque_mask) {
            image.dict.set("SMask", mask_id);
        }
        assert!(find_transparency(&doc).expect("smask").contains("soft mask"));

        let mut doc = make_single_page_pdf("g", [0, 0, 10, 10]);
        let form = doc.add_object(Stream::new(
            dictionary! {
                "Subtype" => "Form",
                "Group" => dictionary! { "S" => "Transparency" },
            },
            Vec::new(),
        ));
        reference_from_page(&mut doc, "XObject", "Fm0", form);
        assert!(find_transparency(&doc).expect("group").contains("transparency group"));
    }

    #[test]
    fn unreferenced_objects_are_not_transparency() {
        let mut doc = make_single_page_pdf("orphan", [0, 0, 10, 10]);
        let gs = doc.add_object(dictionary! { "Type" => "ExtGState", "ca" => 0.5 });
        doc.add_object(Stream::new(
            dictionary! {
                "Subtype" => "Form",
                "Group" => dictionary! { "S" => "Transparency" },
            },
            Vec::new(),
        ));
        assert!(find_transparency(&doc).is_none());

        reference_from_page(&mut doc, "ExtGState", "GS0", gs);
        let found = find_transparency(&doc).expect("referenced");
        assert!(found.contains("ca 0.5"), "{found}");
    }

    #[test]
    fn x3_2003_allows_transparency() {
        let store = test_store();
        let mut doc = make_single_page_pdf("x3", [0, 0, 100, 100]);
        doc.add_object(dictionary! { "Type" => "ExtGState", "ca" => 0.5 });
        finalize_document(
            &mut doc,
            store.default_profile(),
            PdfStandard::X3_2003,
            PdfVersion::parse_or_fallback(None),
            OffsetDateTime::now_utc(),
        )
        .expect("allowed");
    }

    #[test]
    fn merge_concatenates_pages_in_order() {
        let a = Document::load_mem(&pdf_bytes(make_single_page_pdf("A", [0, 0, 100, 100]))).expect("a");
        let b = Document::load_mem(&pdf_bytes(make_single_page_pdf("B", [0, 0, 200, 50]))).expect("b");
        let mut merged = merge_documents(vec![a, b]).expect("merge");
        let pages: Vec<ObjectId> = merged.get_pages().values().copied().collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(media_box(&merged, pages[1]), Some([0.0, 0.0, 200.0, 50.0]));
        let first = merged.get_page_content(pages[0]).expect("content");
        assert!(String::from_utf8_lossy(&first).contains("(A)"));
        let bytes = save_document(&mut merged).expect("save");
        let reloaded = load_document(&bytes).expect("reload");
        assert_eq!(reloaded.get_pages().len(), 2);
        merge_documents(Vec::new()).expect_err("empty");
    }

    #[test]
    fn garbage_is_malformed_input() {
        let err = load_document(b"%PDF-1.4 nonsense").expect_err("garbage");
        assert!(matches!(err, ExportError::MalformedInput(_)));
    }
}
