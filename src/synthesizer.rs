//! Grounded answer generation from retrieved chunks.

use paper_chat_core::index::ScoredChunk;
use paper_chat_core::models::Message;
use paper_chat_core::prompt::answer_messages;
use tracing::debug;

use crate::chat::ChatModel;
use crate::error::Result;

pub struct AnswerSynthesizer<'a> {
    chat: &'a dyn ChatModel,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(chat: &'a dyn ChatModel) -> Self {
        Self { chat }
    }

    /// Answer the raw `question` from `hits`, with `history` for continuity.
    pub async fn synthesize(
        &self,
        hits: &[ScoredChunk],
        history: &[Message],
        question: &str,
    ) -> Result<String> {
        let messages = answer_messages(hits.iter().map(|h| &h.chunk), history, question);
        debug!(context_chunks = hits.len(), history = history.len(), "Synthesizing answer");
        self.chat.invoke(&messages).await
    }
}
