//! Core data models that flow through the paper-chat pipeline.
//!
//! Pages come out of the PDF extractor, get split into [`Chunk`]s, pick up
//! a vector to become [`EmbeddedChunk`]s, and are finally rendered into the
//! answer prompt next to the conversation's [`Message`] history.

use serde::{Deserialize, Serialize};

/// Text of a single PDF page, as produced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page: u32,
    pub text: String,
}

/// A bounded window of document text, the atomic unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Stable label of the PDF the chunk came from.
    pub source: Option<String>,
    /// 1-indexed page the chunk was cut from.
    pub page: Option<u32>,
    /// Position in document order. Breaks ties between equal similarities.
    pub ord: usize,
}

/// A [`Chunk`] paired with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

/// One entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}
