//! The orchestrator: one question in, one grounded answer out.
//!
//! A turn runs these steps:
//!
//! 1. Load and validate model settings from the host's [`ConfigSource`].
//! 2. Resolve the [`PdfRef`] to bytes and hash them.
//! 3. Lock the conversation and hold it until the turn ends. If it has no
//!    index for these bytes, extract, chunk, embed and index the PDF.
//! 4. Retrieve with the history-aware retriever.
//! 5. Synthesize the answer.
//! 6. Append the question/answer pair to the history.
//!
//! Step 6 is the only mutation of history and happens after the last
//! suspension point, so a turn that fails or is cancelled anywhere before
//! it leaves the history untouched.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use paper_chat_core::chunk::RecursiveSplitter;
use paper_chat_core::index::VectorIndex;
use paper_chat_core::models::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chat::{ChatModel, OpenAiChatClient};
use crate::config::{ClientConfig, ConfigSource, RagOptions, Settings};
use crate::conversation::{source_digest, ConversationStore};
use crate::embedding::{embed_chunks, EmbeddingModel, OpenAiEmbeddingClient};
use crate::error::{RagError, Result};
use crate::pdf::{PdfTextExtractor, TextExtractor};
use crate::registry::{ClientFactory, ClientRegistry};
use crate::retriever::HistoryAwareRetriever;
use crate::synthesizer::AnswerSynthesizer;

/// Opaque reference to a PDF, resolved to bytes by a [`PdfResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PdfRef {
    /// Identifier understood by the resolver (a path, an attachment key…).
    pub id: String,
    /// Stable label stored as each chunk's source. Defaults to `id`.
    pub label: Option<String>,
}

impl PdfRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used as the chunk source.
    pub fn source(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Host capability for turning a [`PdfRef`] into bytes.
#[async_trait]
pub trait PdfResolver: Send + Sync {
    async fn resolve(&self, pdf: &PdfRef) -> anyhow::Result<Vec<u8>>;
}

/// Resolves [`PdfRef::id`] as a filesystem path, optionally under a root.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    root: Option<PathBuf>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl PdfResolver for FileResolver {
    async fn resolve(&self, pdf: &PdfRef) -> anyhow::Result<Vec<u8>> {
        let path = match &self.root {
            Some(root) => root.join(&pdf.id),
            None => PathBuf::from(&pdf.id),
        };
        let bytes = tokio::fs::read(&path).await?;
        Ok(bytes)
    }
}

/// Conversational question answering over PDFs.
pub struct RagEngine {
    config: Arc<dyn ConfigSource>,
    resolver: Arc<dyn PdfResolver>,
    extractor: Arc<dyn TextExtractor>,
    options: RagOptions,
    chat_clients: ClientRegistry<dyn ChatModel>,
    embedding_clients: ClientRegistry<dyn EmbeddingModel>,
    conversations: ConversationStore,
}

/// Assembles a [`RagEngine`]; defaults to the OpenAI-compatible clients
/// and the `lopdf` extractor.
pub struct RagEngineBuilder {
    config: Arc<dyn ConfigSource>,
    resolver: Arc<dyn PdfResolver>,
    extractor: Arc<dyn TextExtractor>,
    options: RagOptions,
    chat_factory: Option<ClientFactory<dyn ChatModel>>,
    embedding_factory: Option<ClientFactory<dyn EmbeddingModel>>,
}

impl RagEngineBuilder {
    pub fn options(mut self, options: RagOptions) -> Self {
        self.options = options;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace how chat clients are built from their config.
    pub fn chat_factory(mut self, factory: ClientFactory<dyn ChatModel>) -> Self {
        self.chat_factory = Some(factory);
        self
    }

    /// Replace how embedding clients are built from their config.
    pub fn embedding_factory(mut self, factory: ClientFactory<dyn EmbeddingModel>) -> Self {
        self.embedding_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<RagEngine> {
        self.options
            .validate()
            .map_err(|e| RagError::ConfigIncomplete(e.to_string()))?;

        let chat_factory = self.chat_factory.unwrap_or_else(|| {
            let options = self.options.clone();
            let factory: ClientFactory<dyn ChatModel> =
                Box::new(move |cfg: &ClientConfig| OpenAiChatClient::shared(cfg, &options));
            factory
        });
        let embedding_factory = self.embedding_factory.unwrap_or_else(|| {
            let options = self.options.clone();
            let factory: ClientFactory<dyn EmbeddingModel> =
                Box::new(move |cfg: &ClientConfig| OpenAiEmbeddingClient::shared(cfg, &options));
            factory
        });

        Ok(RagEngine {
            config: self.config,
            resolver: self.resolver,
            extractor: self.extractor,
            options: self.options,
            chat_clients: ClientRegistry::new("chat", chat_factory),
            embedding_clients: ClientRegistry::new("embedding", embedding_factory),
            conversations: ConversationStore::new(),
        })
    }
}

impl RagEngine {
    pub fn builder(
        config: Arc<dyn ConfigSource>,
        resolver: Arc<dyn PdfResolver>,
    ) -> RagEngineBuilder {
        RagEngineBuilder {
            config,
            resolver,
            extractor: Arc::new(PdfTextExtractor),
            options: RagOptions::default(),
            chat_factory: None,
            embedding_factory: None,
        }
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    /// Answer `question` about `pdf` within conversation `conv_id`.
    pub async fn answer(&self, conv_id: &str, pdf: &PdfRef, question: &str) -> Result<String> {
        self.answer_with_cancel(conv_id, pdf, question, &CancellationToken::new())
            .await
    }

    /// Like [`answer`](Self::answer), but gives up with
    /// [`RagError::Cancelled`] once `cancel` fires.
    ///
    /// A turn whose answer was already appended completes normally even if
    /// `cancel` fires at the same moment.
    pub async fn answer_with_cancel(
        &self,
        conv_id: &str,
        pdf: &PdfRef,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let result = tokio::select! {
            biased;
            result = self.run_turn(conv_id, pdf, question) => result,
            _ = cancel.cancelled() => {
                debug!(conversation = %conv_id, "Turn cancelled");
                Err(RagError::Cancelled)
            }
        };
        if let Err(RagError::Internal(message)) = &result {
            error!(conversation = %conv_id, %message, "Turn failed");
        }
        result
    }

    async fn run_turn(&self, conv_id: &str, pdf: &PdfRef, question: &str) -> Result<String> {
        let settings = Settings::load(self.config.as_ref())?;
        let chat = self.chat_clients.acquire(&settings.llm)?;
        let embedder = self.embedding_clients.acquire(&settings.embedding)?;

        let bytes = self
            .resolver
            .resolve(pdf)
            .await
            .map_err(|e| RagError::PdfUnavailable {
                pdf: pdf.id.clone(),
                reason: format!("{:#}", e),
            })?;
        let digest = source_digest(&bytes);

        let mut conv = self.conversations.get_or_create(conv_id, &digest).await;

        let index = match conv.index() {
            Some(index) => Arc::clone(index),
            None => {
                let index = self.build_index(pdf, bytes, embedder.as_ref()).await?;
                conv.install_index(index)
            }
        };

        let retrieval = HistoryAwareRetriever::new(
            chat.as_ref(),
            embedder.as_ref(),
            &index,
            self.options.top_k,
        )
        .retrieve(conv.history(), question)
        .await?;

        let answer = AnswerSynthesizer::new(chat.as_ref())
            .synthesize(&retrieval.hits, conv.history(), question)
            .await?;

        conv.append_turn(question, answer.clone());
        info!(
            conversation = %conv_id,
            turns = conv.history().len() / 2,
            "Turn committed"
        );
        Ok(answer)
    }

    async fn build_index(
        &self,
        pdf: &PdfRef,
        bytes: Vec<u8>,
        embedder: &dyn EmbeddingModel,
    ) -> Result<VectorIndex> {
        let extractor = Arc::clone(&self.extractor);
        let document = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| RagError::internal(format!("extractor task failed: {}", e)))??;

        if document.is_empty() {
            return Err(RagError::Internal(format!(
                "no extractable text in '{}'",
                pdf.source()
            )));
        }

        let splitter = RecursiveSplitter::new(self.options.chunk_size, self.options.chunk_overlap)
            .map_err(|e| RagError::ConfigIncomplete(e.to_string()))?;
        let chunks = splitter.chunk_pages(&document.pages, pdf.source());
        if chunks.is_empty() {
            return Err(RagError::Internal(format!(
                "no chunks produced from '{}'",
                pdf.source()
            )));
        }
        let chunk_count = chunks.len();

        let embedded = embed_chunks(embedder, chunks).await?;
        let index = VectorIndex::build(embedded).map_err(RagError::internal)?;

        info!(
            source = %pdf.source(),
            pages = document.pages.len(),
            total_pages = document.total_pages,
            chunks = chunk_count,
            dims = index.dims(),
            "Indexed PDF"
        );
        Ok(index)
    }

    /// Forget history and index of `conv_id`.
    pub async fn reset_conversation(&self, conv_id: &str) {
        self.conversations.reset(conv_id).await;
    }

    /// Forget every conversation.
    pub async fn reset_all_conversations(&self) {
        self.conversations.reset_all().await;
    }

    /// Drop cached model clients; the next turn rebuilds them.
    pub fn reset_clients(&self) {
        self.chat_clients.reset();
        self.embedding_clients.reset();
    }

    /// Snapshot of the history of `conv_id`.
    pub async fn history(&self, conv_id: &str) -> Vec<Message> {
        self.conversations.history(conv_id).await
    }

    /// Number of conversations held in memory.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}
