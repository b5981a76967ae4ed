//! Rewrites RGB colour operators in PDF content streams to DeviceCMYK.
//!
//! `r g b rg` / `r g b RG` become `c m y k k` / `c m y k K`. Colour set through `cs`/`CS` with an
//! RGB space followed by `sc`/`scn`/`SC`/`SCN` is rewritten the same way. The space selection
//! becomes a CMYK black, the initial colour of every RGB space. String literals, hex strings, comments and inline image data are copied untouched.

use crate::color::{cmyk_operator, device_rgb_to_cmyk};
use crate::error::ExportError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecolorStats {
    pub fills: usize,
    pub strokes: usize,
    pub streams: usize,
}

impl RecolorStats {
    fn add(&mut self, other: RecolorStats) {
        self.fills += other.fills;
        self.strokes += other.strokes;
        self.streams += other.streams;
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

#[derive(Clone, Copy, Default)]
struct SpaceState {
    fill_rgb: bool,
    stroke_rgb: bool,
}

struct Rewriter<'a> {
    src: &'a [u8],
    pos: usize,
    out: Vec<u8>,
    rgb_spaces: &'a HashSet<Vec<u8>>,
    /// Consecutive numeric operands: (start offset in `out`, value).
    numbers: Vec<(usize, f32)>,
    /// Name operand directly before the current token: (start offset in `out`, name).
    last_name: Option<(usize, Vec<u8>)>,
    state: SpaceState,
    saved: Vec<SpaceState>,
    stats: RecolorStats,
    operators: BTreeSet<Vec<u8>>,
}

impl<'a> Rewriter<'a> {
    fn new(src: &'a [u8], rgb_spaces: &'a HashSet<Vec<u8>>) -> Self {
        Self {
            src,
            pos: 0,
            out: Vec::with_capacity(src.len() + src.len() / 4),
            rgb_spaces,
            numbers: Vec::new(),
            last_name: None,
            state: SpaceState::default(),
            saved: Vec::new(),
            stats: RecolorStats::default(),
            operators: BTreeSet::new(),
        }
    }

    fn reset_operands(&mut self) {
        self.numbers.clear();
        self.last_name = None;
    }

    fn copy_to(&mut self, end: usize) {
        self.out.extend_from_slice(&self.src[self.pos..end]);
        self.pos = end;
    }

    fn run(mut self) -> (Vec<u8>, RecolorStats, BTreeSet<Vec<u8>>) {
        while self.pos < self.src.len() {
            let b = self.src[self.pos];
            if is_whitespace(b) {
                self.copy_to(self.pos + 1);
                continue;
            }
            match b {
                b'%' => {
                    let end = self.scan_until_eol(self.pos);
                    self.copy_to(end);
                    self.reset_operands();
                }
                b'(' => {
                    let end = self.scan_literal_string(self.pos);
                    self.copy_to(end);
                    self.reset_operands();
                }
                b'<' if self.src.get(self.pos + 1) == Some(&b'<') => {
                    self.copy_to(self.pos + 2);
                    self.reset_operands();
                }
                b'>' if self.src.get(self.pos + 1) == Some(&b'>') => {
                    self.copy_to(self.pos + 2);
                    self.reset_operands();
                }
                b'<' => {
                    let end = self.scan_hex_string(self.pos);
                    self.copy_to(end);
                    self.reset_operands();
                }
                b'/' => {
                    let end = self.scan_regular(self.pos + 1);
                    let name = self.src[self.pos + 1..end].to_vec();
                    let start = self.out.len();
                    self.copy_to(end);
                    self.numbers.clear();
                    self.last_name = Some((start, name));
                }
                b'[' | b']' | b'{' | b'}' | b')' | b'>' => {
                    self.copy_to(self.pos + 1);
                    self.reset_operands();
                }
                _ => {
                    let end = self.scan_regular(self.pos);
                    let token = &self.src[self.pos..end];
                    if let Some(value) = parse_number(token) {
                        let start = self.out.len();
                        self.copy_to(end);
                        self.last_name = None;
                        self.numbers.push((start, value));
                    } else {
                        let token = token.to_vec();
                        self.copy_to(end);
                        self.operator(&token);
                    }
                }
            }
        }
        (self.out, self.stats, self.operators)
    }

    fn operator(&mut self, op: &[u8]) {
        if !self.operators.contains(op) {
            self.operators.insert(op.to_vec());
        }
        match op {
            b"rg" | b"RG" => {
                self.replace_rgb(op == b"RG");
            }
            b"sc" | b"scn" if self.state.fill_rgb => {
                self.replace_rgb(false);
            }
            b"SC" | b"SCN" if self.state.stroke_rgb => {
                self.replace_rgb(true);
            }
            b"cs" | b"CS" => {
                let stroke = op == b"CS";
                let rgb = match &self.last_name {
                    Some((_, name)) => name == b"DeviceRGB" || self.rgb_spaces.contains(name),
                    None => false,
                };
                if let (true, Some((start, _))) = (rgb, &self.last_name) {
                    self.out.truncate(*start);
                    self.out
                        .extend_from_slice(cmyk_operator([0.0, 0.0, 0.0, 1.0], stroke).as_bytes());
                    if stroke {
                        self.stats.strokes += 1;
                    } else {
                        self.stats.fills += 1;
                    }
                }
                if stroke {
                    self.state.stroke_rgb = rgb;
                } else {
                    self.state.fill_rgb = rgb;
                }
            }
            b"k" | b"g" => self.state.fill_rgb = false,
            b"K" | b"G" => self.state.stroke_rgb = false,
            b"q" => self.saved.push(self.state),
            b"Q" => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            b"ID" => {
                let end = self.scan_inline_image(self.pos);
                self.copy_to(end);
            }
            _ => {}
        }
        self.reset_operands();
    }

    fn replace_rgb(&mut self, stroke: bool) {
        if self.numbers.len() < 3 {
            return;
        }
        let operands = &self.numbers[self.numbers.len() - 3..];
        let start = operands[0].0;
        let cmyk = device_rgb_to_cmyk(operands[0].1, operands[1].1, operands[2].1);
        self.out.truncate(start);
        self.out.extend_from_slice(cmyk_operator(cmyk, stroke).as_bytes());
        // The source stream's current space stays RGB; later `sc`/`SC` must keep converting.
        if stroke {
            self.stats.strokes += 1;
            self.state.stroke_rgb = true;
        } else {
            self.stats.fills += 1;
            self.state.fill_rgb = true;
        }
    }

    fn scan_regular(&self, from: usize) -> usize {
        let mut end = from;
        while end < self.src.len() && !is_whitespace(self.src[end]) && !is_delimiter(self.src[end]) {
            end += 1;
        }
        end
    }

    fn scan_until_eol(&self, from: usize) -> usize {
        let mut end = from;
        while end < self.src.len() && self.src[end] != b'\n' && self.src[end] != b'\r' {
            end += 1;
        }
        end
    }

    fn scan_literal_string(&self, from: usize) -> usize {
        let mut depth = 0usize;
        let mut idx = from;
        while idx < self.src.len() {
            match self.src[idx] {
                b'\\' => {
                    idx += 2;
                    continue;
                }
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return idx + 1;
                    }
                }
                _ => {}
            }
            idx += 1;
        }
        self.src.len()
    }

    fn scan_hex_string(&self, from: usize) -> usize {
        match self.src[from..].iter().position(|b| *b == b'>') {
            Some(rel) => from + rel + 1,
            None => self.src.len(),
        }
    }

    /// Inline image data ends at the first `EI` preceded by whitespace and followed by a
    /// delimiter, whitespace or end of stream.
    fn scan_inline_image(&self, from: usize) -> usize {
        let src = self.src;
        let mut idx = from;
        while idx + 2 <= src.len() {
            if src[idx] == b'E'
                && src[idx + 1] == b'I'
                && idx > from
                && is_whitespace(src[idx - 1])
                && src
                    .get(idx + 2)
                    .is_none_or(|b| is_whitespace(*b) || is_delimiter(*b))
            {
                return idx + 2;
            }
            idx += 1;
        }
        src.len()
    }
}

fn parse_number(token: &[u8]) -> Option<f32> {
    let first = *token.first()?;
    if !(first.is_ascii_digit() || matches!(first, b'+' | b'-' | b'.')) {
        return None;
    }
    if !token
        .iter()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.'))
    {
        return None;
    }
    std::str::from_utf8(token).ok()?.parse::<f32>().ok()
}

/// Rewrites one decoded content stream. `rgb_spaces` holds resource names (without the slash)
/// that resolve to an RGB colour space.
pub fn recolor_content(content: &[u8], rgb_spaces: &HashSet<Vec<u8>>) -> (Vec<u8>, RecolorStats) {
    let (out, mut stats, _) = Rewriter::new(content, rgb_spaces).run();
    stats.streams = 1;
    (out, stats)
}

/// What a content stream paints with, ignoring strings, comments and inline data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ContentSummary {
    pub operators: BTreeSet<Vec<u8>>,
    /// Any `rg`/`RG`, RGB space selection or `sc`/`scn` under an RGB space.
    pub rgb_colour: bool,
}

pub(crate) fn summarize_content(content: &[u8], rgb_spaces: &HashSet<Vec<u8>>) -> ContentSummary {
    let (_, stats, operators) = Rewriter::new(content, rgb_spaces).run();
    let rgb_colour = stats.fills + stats.strokes > 0
        || operators.contains(b"rg".as_slice())
        || operators.contains(b"RG".as_slice());
    ContentSummary {
        operators,
        rgb_colour,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Names in a resource dictionary's `ColorSpace` entry that resolve to an RGB space.
pub(crate) fn rgb_space_names(doc: &Document, resources: &Dictionary) -> HashSet<Vec<u8>> {
    let mut names = HashSet::new();
    if let Some(spaces) = resources.get(b"ColorSpace").ok().and_then(|c| resolve_dict(doc, c)) {
        for (name, space) in spaces.iter() {
            if is_rgb_space(doc, space) {
                names.insert(name.clone());
            }
        }
    }
    names
}

fn is_rgb_space(doc: &Document, obj: &Object) -> bool {
    match resolve(doc, obj) {
        Some(Object::Name(name)) => name == b"DeviceRGB" || name == b"CalRGB",
        Some(Object::Array(items)) => match items.first().and_then(|o| resolve(doc, o)) {
            Some(Object::Name(family)) if family == b"CalRGB" => true,
            Some(Object::Name(family)) if family == b"ICCBased" => items
                .get(1)
                .and_then(|o| resolve_dict(doc, o))
                .and_then(|dict| dict.get(b"N").ok())
                .and_then(|n| n.as_i64().ok())
                == Some(3),
            _ => false,
        },
        _ => false,
    }
}

pub(crate) fn stream_bytes(stream: &lopdf::Stream) -> Result<Vec<u8>, lopdf::Error> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content()
    } else {
        Ok(stream.content.clone())
    }
}

/// Rewrites the given form XObjects and every form or tiling pattern reachable from their
/// resources. Each stream is visited once even when shared or cyclic.
pub fn recolor_form_tree(doc: &mut Document, roots: &[ObjectId]) -> Result<RecolorStats, ExportError> {
    let mut visited: BTreeSet<ObjectId> = BTreeSet::new();
    let mut pending: Vec<ObjectId> = roots.to_vec();
    let mut total = RecolorStats::default();

    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(Object::Stream(stream)) = doc.get_object(id) else {
            continue;
        };
        let content = match stream_bytes(stream) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(object = ?id, error = %err, "content stream not decodable, left as is");
                continue;
            }
        };

        let mut rgb_spaces = HashSet::new();
        if let Some(resources) = stream.dict.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r)) {
            rgb_spaces = rgb_space_names(doc, resources);
            for key in [b"XObject".as_slice(), b"Pattern".as_slice()] {
                let Some(children) = resources.get(key).ok().and_then(|c| resolve_dict(doc, c)) else {
                    continue;
                };
                for (_, child) in children.iter() {
                    let Object::Reference(child_id) = child else {
                        continue;
                    };
                    if visited.contains(child_id) {
                        continue;
                    }
                    let Ok(Object::Stream(child_stream)) = doc.get_object(*child_id) else {
                        continue;
                    };
                    let is_form = child_stream
                        .dict
                        .get(b"Subtype")
                        .and_then(Object::as_name)
                        .is_ok_and(|s| s == b"Form");
                    let is_tiling = child_stream
                        .dict
                        .get(b"PatternType")
                        .and_then(Object::as_i64)
                        .is_ok_and(|t| t == 1);
                    if is_form || is_tiling {
                        pending.push(*child_id);
                    }
                }
            }
        }

        let (rewritten, stats) = recolor_content(&content, &rgb_spaces);
        total.add(stats);
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
            stream.set_plain_content(rewritten);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Stream, dictionary};

    fn rewrite(src: &str) -> String {
        let (out, _) = recolor_content(src.as_bytes(), &HashSet::new());
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn fill_and_stroke_operators_become_cmyk() {
        assert_eq!(
            rewrite("1 0 0 rg 0 0 10 10 re f"),
            "0.000000 1.000000 1.000000 0.000000 k 0 0 10 10 re f"
        );
        assert_eq!(
            rewrite("0 0 0 RG\n1 w"),
            "0.000000 0.000000 0.000000 1.000000 K\n1 w"
        );
        assert_eq!(
            rewrite(".5 .5 .5 rg"),
            "0.000000 0.000000 0.000000 0.500000 k"
        );
    }

    #[test]
    fn strings_and_comments_are_not_touched() {
        let src = "BT (1 0 0 rg \\) 0 1 0 rg) Tj <31207267> Tj ET % 0 0 1 rg\n0 1 0 rg";
        let out = rewrite(src);
        assert!(out.starts_with("BT (1 0 0 rg \\) 0 1 0 rg) Tj <31207267> Tj ET % 0 0 1 rg\n"));
        assert!(out.ends_with("1.000000 0.000000 1.000000 0.000000 k"));
    }

    #[test]
    fn nested_parentheses_stay_inside_the_string() {
        let out = rewrite("(a (1 0 0 rg) b) Tj");
        assert_eq!(out, "(a (1 0 0 rg) b) Tj");
    }

    #[test]
    fn too_few_operands_are_left_alone() {
        assert_eq!(rewrite("/X 0 rg"), "/X 0 rg");
        assert_eq!(rewrite("[1 0] 0 rg"), "[1 0] 0 rg");
    }

    #[test]
    fn rgb_colour_space_selection_is_rewritten() {
        let mut spaces = HashSet::new();
        spaces.insert(b"cs0".to_vec());
        let (out, stats) = recolor_content(
            b"/cs0 cs 0 0 1 sc /DeviceRGB CS 1 1 1 SC /Pattern cs /P0 scn",
            &spaces,
        );
        let out = String::from_utf8(out).expect("utf8");
        assert_eq!(
            out,
            "0.000000 0.000000 0.000000 1.000000 k 1.000000 1.000000 0.000000 0.000000 k \
             0.000000 0.000000 0.000000 1.000000 K 0.000000 0.000000 0.000000 0.000000 K \
             /Pattern cs /P0 scn"
        );
        assert_eq!((stats.fills, stats.strokes), (2, 2));
    }

    #[test]
    fn rgb_space_selection_alone_paints_black() {
        let (out, stats) = recolor_content(b"/DeviceRGB cs 0 0 10 10 re f", &HashSet::new());
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "0.000000 0.000000 0.000000 1.000000 k 0 0 10 10 re f"
        );
        assert_eq!(stats.fills, 1);
    }

    #[test]
    fn graphics_state_restores_space_tracking() {
        let mut spaces = HashSet::new();
        spaces.insert(b"rgb".to_vec());
        let (out, _) = recolor_content(b"/Gray cs q /rgb cs 1 0 0 sc Q 0.5 sc", &spaces);
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.ends_with("Q 0.5 sc"));
        assert!(out.contains("0.000000 1.000000 1.000000 0.000000 k"));
    }

    #[test]
    fn inline_image_data_is_copied_verbatim() {
        let src = b"BI /W 1 /H 1 ID \x00 1 0 0 rg\xff EI 1 0 0 rg";
        let (out, stats) = recolor_content(src, &HashSet::new());
        assert!(out.starts_with(b"BI /W 1 /H 1 ID \x00 1 0 0 rg\xff EI "));
        assert_eq!(stats.fills, 1);
    }

    #[test]
    fn operator_listing_skips_string_content() {
        let summary = summarize_content(b"q 1 0 0 RG (0 0 0 rg) Tj Q", &HashSet::new());
        let ops: Vec<&[u8]> = summary.operators.iter().map(Vec::as_slice).collect();
        assert_eq!(ops, vec![b"Q".as_slice(), b"RG".as_slice(), b"Tj".as_slice(), b"q".as_slice()]);
        assert!(summary.rgb_colour);
    }

    #[test]
    fn summary_sees_rgb_through_colour_space_operators() {
        let mut spaces = HashSet::new();
        spaces.insert(b"srgb".to_vec());
        assert!(summarize_content(b"/DeviceRGB cs 1 0 0 sc 0 0 10 10 re f", &HashSet::new()).rgb_colour);
        assert!(summarize_content(b"/srgb CS 0 0 1 SCN 0 0 5 5 re S", &spaces).rgb_colour);
        assert!(!summarize_content(b"/srgb CS 0 0 1 SCN", &HashSet::new()).rgb_colour);
        assert!(!summarize_content(b"/DeviceGray cs 0.5 sc 0 0 1 1 re f", &spaces).rgb_colour);
        assert!(!summarize_content(b"0 0 0 1 k 0 0 1 1 re f", &spaces).rgb_colour);
    }

    #[test]
    fn form_tree_is_walked_once_with_cycles() {
        let mut doc = Document::with_version("1.7");
        let inner_id = doc.new_object_id();
        let outer_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Fm1" => inner_id },
                },
            },
            b"0 1 0 rg /Fm1 Do".to_vec(),
        ));
        doc.objects.insert(
            inner_id,
            Object::Stream(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                    "Resources" => dictionary! {
                        "XObject" => dictionary! { "Fm0" => outer_id },
                        "ColorSpace" => dictionary! { "cs1" => "DeviceRGB" },
                    },
                },
                b"/cs1 CS 0 0 1 SC".to_vec(),
            )),
        );
        let stats = recolor_form_tree(&mut doc, &[outer_id]).expect("recolor");
        assert_eq!(stats.streams, 2);
        assert_eq!((stats.fills, stats.strokes), (1, 2));
        let inner = doc
            .get_object(inner_id)
            .and_then(Object::as_stream)
            .expect("inner");
        assert_eq!(
            inner.content,
            b"0.000000 0.000000 0.000000 1.000000 K 1.000000 1.000000 0.000000 0.000000 K".to_vec()
        );
    }
}
