//! Prompt assembly for query reformulation and grounded answering.
//!
//! Both builders return the full message list sent to the chat model:
//!
//! ```text
//! reformulate: [system(REFORMULATE)] + history + [human(question)]
//! answer:      [system(ANSWER + context)] + history + [human(question)]
//! ```
//!
//! The answer prompt always carries the raw question, never the
//! reformulated one; reformulation only steers retrieval.

use crate::models::{Chunk, Message};

/// Replacement for a chunk without a source label.
pub const UNKNOWN_SOURCE: &str = "unknown_source";

/// System instruction for turning a follow-up into a standalone question.
pub const REFORMULATE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, reformulate the latest user question into a \
standalone question which can be understood without the chat history. \
Do NOT answer the question. Just reformulate it if needed and otherwise return it as is.";

/// System instruction for answering from retrieved passages.
///
/// `{context}` is replaced by [`format_docs`] output.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks about an \
academic paper. Answer the user's question using ONLY the retrieved context below. \
Always answer in the same language as the user's question. \
Do not translate technical terms, proper nouns, model names, or acronyms; keep them exactly as \
they appear in the context. \
Keep the answer to three or four sentences unless the user explicitly asks for more detail. \
If the answer is not contained in the context, say that you don't know.\n\n\
<context>\n{context}\n</context>";

/// Serialize retrieved chunks into the context block.
///
/// Each chunk becomes
/// `<document><content>…</content><source>…</source><page>…</page></document>`
/// and chunks are joined by a single newline. A missing source becomes
/// [`UNKNOWN_SOURCE`] and a missing page becomes `1`.
pub fn format_docs<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a Chunk>,
{
    chunks
        .into_iter()
        .map(|chunk| {
            let source = chunk
                .source
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN_SOURCE);
            let page = chunk.page.unwrap_or(1);
            format!(
                "<document><content>{}</content><source>{}</source><page>{}</page></document>",
                chunk.text, source, page
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Messages asking the model to rewrite `question` without needing `history`.
pub fn reformulation_messages(history: &[Message], question: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(REFORMULATE_SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(Message::human(question));
    messages
}

/// Messages asking the model to answer `question` from `context`.
pub fn answer_messages<'a, I>(context: I, history: &[Message], question: &str) -> Vec<Message>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let system = ANSWER_SYSTEM_PROMPT.replace("{context}", &format_docs(context));
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(Message::human(question));
    messages
}
