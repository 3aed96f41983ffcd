//! History-aware retrieval.
//!
//! Follow-up questions ("and its limitations?") retrieve poorly on their
//! own. When there is prior history, the chat model first rewrites the
//! question into a standalone one; that rewrite is what gets embedded and
//! searched. With an empty history the raw question is used as is.

use paper_chat_core::index::{ScoredChunk, VectorIndex};
use paper_chat_core::models::Message;
use paper_chat_core::prompt::reformulation_messages;
use tracing::debug;

use crate::chat::ChatModel;
use crate::embedding::EmbeddingModel;
use crate::error::{RagError, Result};

/// Outcome of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// The query that was embedded.
    pub query: String,
    pub hits: Vec<ScoredChunk>,
}

pub struct HistoryAwareRetriever<'a> {
    chat: &'a dyn ChatModel,
    embedder: &'a dyn EmbeddingModel,
    index: &'a VectorIndex,
    k: usize,
}

impl<'a> HistoryAwareRetriever<'a> {
    pub fn new(
        chat: &'a dyn ChatModel,
        embedder: &'a dyn EmbeddingModel,
        index: &'a VectorIndex,
        k: usize,
    ) -> Self {
        Self {
            chat,
            embedder,
            index,
            k,
        }
    }

    /// The question as it should be searched for.
    pub async fn standalone_query(&self, history: &[Message], question: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }
        let rewritten = self
            .chat
            .invoke(&reformulation_messages(history, question))
            .await?;
        let rewritten = rewritten.trim().to_string();
        debug!(original = %question, standalone = %rewritten, "Reformulated question");
        Ok(rewritten)
    }

    pub async fn retrieve(&self, history: &[Message], question: &str) -> Result<Retrieval> {
        let query = self.standalone_query(history, question).await?;
        let vector = self.embedder.embed_one(&query).await?;
        let hits = self
            .index
            .top_k(&vector, self.k)
            .map_err(RagError::internal)?;
        debug!(k = self.k, hits = hits.len(), "Retrieved chunks");
        Ok(Retrieval { query, hits })
    }
}
