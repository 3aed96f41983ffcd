//! Shared fixtures for integration tests: hand-built PDFs and stub models.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use paper_chat::chat::ChatModel;
use paper_chat::config::{ClientConfig, ConfigKey, MapConfigSource};
use paper_chat::embedding::EmbeddingModel;
use paper_chat::registry::ClientFactory;
use paper_chat::{PdfRef, PdfResolver, RagError};
use paper_chat_core::models::Message;

// ============ PDF fixtures ============

/// Escape a literal for use inside a PDF `( … )` string.
pub fn pdf_literal(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// Content stream showing each line 14pt below the previous one.
pub fn lines_stream(lines: &[&str]) -> String {
    let mut ops = String::from("BT /F1 12 Tf 14 TL 72 720 Td");
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            ops.push_str(" T*");
        }
        ops.push_str(&format!(" ({}) Tj", pdf_literal(line)));
    }
    ops.push_str(" ET");
    ops
}

/// Build a PDF whose pages carry the given raw content streams.
///
/// Offsets in the xref table and each stream's `/Length` are computed, so
/// the output parses without any repair.
pub fn build_pdf(streams: &[String], title: Option<&str>) -> Vec<u8> {
    let page_count = streams.len();
    let font_id = 3;
    let first_page_id = 4;
    let info_id = first_page_id + 2 * page_count;
    let object_count = if title.is_some() { info_id } else { info_id - 1 };

    let mut objects: Vec<String> = Vec::with_capacity(object_count);
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", first_page_id + 2 * i))
        .collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_count
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string());
    for (i, stream) in streams.iter().enumerate() {
        let content_id = first_page_id + 2 * i + 1;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
             /Resources << /Font << /F1 {} 0 R >> >> >>",
            content_id, font_id
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }
    if let Some(title) = title {
        objects.push(format!(
            "<< /Title ({}) /Producer (paper-chat tests) >>",
            pdf_literal(title)
        ));
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    let info = if title.is_some() {
        format!(" /Info {} 0 R", info_id)
    } else {
        String::new()
    };
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R{} >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            info,
            xref_start
        )
        .as_bytes(),
    );
    out
}

/// One line of text per page.
pub fn simple_pdf(pages: &[&str]) -> Vec<u8> {
    let streams: Vec<String> = pages.iter().map(|p| lines_stream(&[p])).collect();
    build_pdf(&streams, None)
}

/// The two-page paper used by most engine scenarios.
pub fn attention_pdf() -> Vec<u8> {
    simple_pdf(&["Transformers use self-attention.", "RNNs process sequentially."])
}

// ============ Host fixtures ============

pub fn complete_config() -> MapConfigSource {
    MapConfigSource::new()
        .with(ConfigKey::LlmBaseUrl, "http://llm.invalid/v1")
        .with(ConfigKey::LlmModelName, "stub-chat")
        .with(ConfigKey::EmbeddingBaseUrl, "http://embed.invalid/v1")
        .with(ConfigKey::EmbeddingModelName, "stub-embed")
}

/// Resolver over an in-memory map of PDFs.
#[derive(Default)]
pub struct MemoryResolver {
    pdfs: Mutex<HashMap<String, Vec<u8>>>,
    pub calls: AtomicUsize,
}

impl MemoryResolver {
    pub fn with(self, id: &str, bytes: Vec<u8>) -> Self {
        self.pdfs.lock().unwrap().insert(id.to_string(), bytes);
        self
    }
}

#[async_trait]
impl PdfResolver for MemoryResolver {
    async fn resolve(&self, pdf: &PdfRef) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pdfs
            .lock()
            .unwrap()
            .get(&pdf.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such attachment: {}", pdf.id))
    }
}

// ============ Model stubs ============

/// Maps text containing "attention" to `[1, 0]`, everything else to `[0, 1]`.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub batches: Mutex<Vec<Vec<String>>>,
    /// Batches containing this text fail with HTTP 503.
    pub fail_on: Mutex<Option<String>>,
}

impl KeywordEmbedder {
    pub fn fail_on(&self, text: &str) {
        *self.fail_on.lock().unwrap() = Some(text.to_string());
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Texts embedded one at a time, i.e. retrieval queries.
    pub fn queries(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.len() == 1)
            .map(|b| b[0].clone())
            .collect()
    }

    /// Every text embedded so far.
    pub fn all_texts(&self) -> Vec<String> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl EmbeddingModel for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed_batch(&self, texts: &[String]) -> paper_chat::error::Result<Vec<Vec<f32>>> {
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if texts.iter().any(|t| t.contains(needle)) {
                return Err(RagError::Upstream {
                    status: Some(503),
                    message: "down".to_string(),
                });
            }
        }
        self.batches.lock().unwrap().push(texts.to_vec());
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("attention") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }
}

/// How [`ScriptedChat`] answers a synthesis request.
#[derive(Clone)]
pub enum SynthesisBehavior {
    /// Echo the first `<content>` of the context block.
    EchoFirstContext,
    Fail(u16),
    /// Never answer; used for cancellation.
    Hang,
}

/// Chat stub that rewrites follow-ups and answers from context.
pub struct ScriptedChat {
    pub rewrite: String,
    pub synthesis: Mutex<SynthesisBehavior>,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    pub fn new(rewrite: &str) -> Self {
        Self {
            rewrite: rewrite.to_string(),
            synthesis: Mutex::new(SynthesisBehavior::EchoFirstContext),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_synthesis(&self, behavior: SynthesisBehavior) {
        *self.synthesis.lock().unwrap() = behavior;
    }

    pub fn last_call(&self) -> Vec<Message> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

pub fn first_context(system: &str) -> Option<String> {
    let start = system.find("<content>")? + "<content>".len();
    let end = system[start..].find("</content>")? + start;
    Some(system[start..end].to_string())
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[Message]) -> paper_chat::error::Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let system = messages.first().map(|m| m.content.clone()).unwrap_or_default();

        if system.contains("Do NOT answer the question") {
            return Ok(self.rewrite.clone());
        }

        let behavior = self.synthesis.lock().unwrap().clone();
        match behavior {
            SynthesisBehavior::EchoFirstContext => {
                first_context(&system).ok_or(RagError::EmptyCompletion)
            }
            SynthesisBehavior::Fail(status) => Err(RagError::Upstream {
                status: Some(status),
                message: "request timed out".to_string(),
            }),
            SynthesisBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Factory handing out one shared stub and counting builds.
pub fn shared_factory<T: ?Sized + Send + Sync + 'static>(
    client: Arc<T>,
    builds: Arc<AtomicUsize>,
    configs: Arc<Mutex<Vec<ClientConfig>>>,
) -> ClientFactory<T> {
    Box::new(move |cfg: &ClientConfig| {
        builds.fetch_add(1, Ordering::SeqCst);
        configs.lock().unwrap().push(cfg.clone());
        Ok::<_, RagError>(Arc::clone(&client))
    })
}
