//! # paper-chat
//!
//! Ask grounded, multi-turn questions about an academic PDF.
//!
//! A PDF is extracted page by page, split into overlapping windows,
//! embedded through an OpenAI-compatible `/embeddings` endpoint and held in
//! an in-memory cosine index per conversation. Each question is rewritten
//! into a standalone query using the conversation history, the closest
//! windows are retrieved, and an OpenAI-compatible `/chat/completions`
//! endpoint answers from those windows only.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │   PDF    │──▶│ Extract  │──▶│  Chunk   │──▶│ Embed+Index │
//! │  bytes   │   │ (lopdf)  │   │          │   │ (per conv)  │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬──────┘
//!                                                     │
//!   question ──▶ reformulate ──▶ embed ──▶ top-k ◀────┘
//!                                           │
//!                                           ▼
//!                                      synthesize ──▶ answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pchat ask paper.pdf "What problem does this paper solve?"
//! pchat chat paper.pdf             # multi-turn session
//! pchat extract paper.pdf          # inspect extracted text
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Turn orchestration, PDF references |
//! | [`config`] | Host configuration and TOML file |
//! | [`error`] | Error taxonomy |
//! | [`pdf`] | Per-page text extraction |
//! | [`embedding`] | Embedding client |
//! | [`chat`] | Chat completion client |
//! | [`registry`] | Config-keyed client cache |
//! | [`retriever`] | History-aware retrieval |
//! | [`synthesizer`] | Grounded answer generation |
//! | [`conversation`] | Conversation state and store |
//!
//! Chunking, the vector index and prompt templates live in
//! [`paper_chat_core`], which is re-exported.

pub mod chat;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod engine;
pub mod error;
mod http;
pub mod pdf;
pub mod registry;
pub mod retriever;
pub mod synthesizer;

pub use paper_chat_core;

pub use engine::{FileResolver, PdfRef, PdfResolver, RagEngine};
pub use error::{ErrorKind, RagError};
