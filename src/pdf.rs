//! PDF text extraction with a visual-line heuristic.
//!
//! Each page's content stream is interpreted just far enough to know where
//! every text-showing operator (`Tj`, `TJ`, `'`, `"`) lands: the text
//! matrix and the current transformation matrix are tracked so that the
//! baseline Y of each item can be computed in user space.
//!
//! Items are then concatenated in stream order. An item whose baseline Y
//! differs from the previous item on the same page is prefixed with a
//! single `\n`; everything else is joined without a separator. No other
//! whitespace normalization happens, since chunking depends on newline
//! density.
//!
//! Parsing is CPU bound and synchronous. The engine runs it on the
//! blocking pool; [`TextExtractor`] implementations must not assume which
//! thread they are called from.

use std::collections::BTreeMap;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use paper_chat_core::models::PageText;
use tracing::debug;

use crate::error::{RagError, Result};

/// A `TJ` adjustment below this (in thousandths of text space) reads as a
/// word gap rather than kerning.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// Text and metadata pulled out of one PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfDocument {
    /// Header version, e.g. `"1.7"`.
    pub version: String,
    /// Entries of the trailer's `/Info` dictionary, if any.
    pub info: BTreeMap<String, String>,
    /// Page count including pages without text.
    pub total_pages: u32,
    /// Pages with at least one text item, in page order.
    pub pages: Vec<PageText>,
}

impl PdfDocument {
    /// All page texts joined by a blank line.
    pub fn joined_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// True when no page produced any text item.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Turns PDF bytes into per-page text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<PdfDocument>;
}

/// [`TextExtractor`] backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<PdfDocument> {
        let doc = Document::load_mem(bytes).map_err(|e| RagError::PdfParse(e.to_string()))?;

        let page_ids = doc.get_pages();
        let total_pages = page_ids.len() as u32;
        let mut pages = Vec::new();

        for (page_number, page_id) in page_ids {
            let items = page_items(&doc, page_id).map_err(|e| {
                RagError::PdfParse(format!("page {}: {}", page_number, e))
            })?;
            if items.is_empty() {
                debug!(page = page_number, "Skipping page without text items");
                continue;
            }
            pages.push(PageText {
                page: page_number,
                text: layout_lines(items.iter().map(|i| (i.text.as_str(), i.y))),
            });
        }

        debug!(
            version = %doc.version,
            total_pages,
            text_pages = pages.len(),
            "Extracted PDF text"
        );

        Ok(PdfDocument {
            version: doc.version.clone(),
            info: info_dict(&doc),
            total_pages,
            pages,
        })
    }
}

/// Join `(text, baseline_y)` items into page text.
///
/// The first item never gets a separator; later items get a leading `\n`
/// whenever their baseline differs from the previous one.
pub fn layout_lines<'a, I>(items: I) -> String
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    let mut out = String::new();
    let mut last_y: Option<f32> = None;
    for (text, y) in items {
        if let Some(prev) = last_y {
            if prev != y {
                out.push('\n');
            }
        }
        out.push_str(text);
        last_y = Some(y);
    }
    out
}

// ============ Content stream interpretation ============

struct TextItem {
    text: String,
    y: f32,
}

/// Affine matrix `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translation(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    /// Y of the origin of `self` mapped through `ctm`.
    fn baseline_y(&self, ctm: &Matrix) -> f32 {
        self.then(ctm).0[5]
    }
}

struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    lm: Matrix,
    leading: f32,
    font: Option<Vec<u8>>,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            lm: Matrix::IDENTITY,
            leading: 0.0,
            font: None,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.lm = Matrix::translation(tx, ty).then(&self.lm);
        self.tm = self.lm;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn baseline_y(&self) -> f32 {
        self.tm.baseline_y(&self.ctm)
    }
}

fn number(obj: Option<&Object>) -> Option<f32> {
    match obj? {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    let mut m = [0.0f32; 6];
    for (slot, obj) in m.iter_mut().zip(operands.iter()) {
        *slot = number(Some(obj))?;
    }
    (operands.len() >= 6).then_some(Matrix(m))
}

fn page_items(doc: &Document, page_id: ObjectId) -> std::result::Result<Vec<TextItem>, String> {
    let content = match doc.get_page_content(page_id) {
        Ok(content) => content,
        // Pages without a content stream simply have no text.
        Err(_) => return Ok(Vec::new()),
    };
    let operations = Content::decode(&content)
        .map_err(|e| format!("invalid content stream: {}", e))?
        .operations;

    let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
    let encodings: BTreeMap<Vec<u8>, _> = fonts
        .into_iter()
        .filter_map(|(name, font)| font.get_font_encoding(doc).ok().map(|enc| (name, enc)))
        .collect();

    let decode = |font: &Option<Vec<u8>>, bytes: &[u8]| -> String {
        font.as_ref()
            .and_then(|name| encodings.get(name))
            .and_then(|enc| Document::decode_text(enc, bytes).ok())
            .unwrap_or_else(|| decode_pdf_string(bytes))
    };

    let mut state = TextState::new();
    let mut items = Vec::new();

    for op in &operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.ctm_stack.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = matrix(operands) {
                    state.ctm = m.then(&state.ctm);
                }
            }
            "BT" => {
                state.tm = Matrix::IDENTITY;
                state.lm = Matrix::IDENTITY;
            }
            "Tm" => {
                if let Some(m) = matrix(operands) {
                    state.tm = m;
                    state.lm = m;
                }
            }
            "Td" | "TD" => {
                let tx = number(operands.first()).unwrap_or(0.0);
                let ty = number(operands.get(1)).unwrap_or(0.0);
                if op.operator == "TD" {
                    state.leading = -ty;
                }
                state.move_line(tx, ty);
            }
            "TL" => {
                if let Some(tl) = number(operands.first()) {
                    state.leading = tl;
                }
            }
            "T*" => state.next_line(),
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    state.font = Some(name.clone());
                }
            }
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    items.push(TextItem {
                        text: decode(&state.font, bytes),
                        y: state.baseline_y(),
                    });
                }
            }
            "'" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    items.push(TextItem {
                        text: decode(&state.font, bytes),
                        y: state.baseline_y(),
                    });
                }
            }
            "\"" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    items.push(TextItem {
                        text: decode(&state.font, bytes),
                        y: state.baseline_y(),
                    });
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = operands.first() {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            Object::String(bytes, _) => text.push_str(&decode(&state.font, bytes)),
                            other => {
                                if let Some(adj) = number(Some(other)) {
                                    if adj < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                        text.push(' ');
                                    }
                                }
                            }
                        }
                    }
                    items.push(TextItem {
                        text,
                        y: state.baseline_y(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(items)
}

// ============ Metadata ============

fn info_dict(doc: &Document) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Ok(info) = doc.trailer.get(b"Info") else {
        return out;
    };
    let info = match info {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => obj,
            Err(_) => return out,
        },
        other => other,
    };
    let Ok(dict) = info.as_dict() else {
        return out;
    };

    for (key, value) in dict.iter() {
        let value = match value {
            Object::String(bytes, _) => decode_pdf_string(bytes),
            Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
            Object::Integer(i) => i.to_string(),
            Object::Real(r) => r.to_string(),
            Object::Boolean(b) => b.to_string(),
            _ => continue,
        };
        out.insert(String::from_utf8_lossy(key).into_owned(), value);
    }
    out
}

/// Decode a PDF string without font information.
///
/// UTF-16BE with a byte-order mark, then UTF-8, then Latin-1.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
