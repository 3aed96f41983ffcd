//! Text embedding over an OpenAI-compatible `/embeddings` endpoint.
//!
//! Texts are sent in batches of `embedding_batch_size`. Some local servers
//! only accept a single string per request; when a batch is rejected with
//! a client error (400, 404, 413, 422) or comes back with the wrong number
//! of vectors, the batch is retried one text per request, with at most
//! `embedding_concurrency` requests in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use paper_chat_core::models::{Chunk, EmbeddedChunk};
use tracing::{debug, warn};

use crate::config::{ClientConfig, RagOptions, MAX_EMBEDDING_CONCURRENCY};
use crate::error::{RagError, Result};
use crate::http;

/// Status codes that mean "this server does not take batched input".
const BATCH_REJECT_STATUSES: [u16; 4] = [400, 404, 413, 422];

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Embed every text, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::internal("embedding backend returned no vector"))
    }
}

/// Embed chunks and pair each with its vector.
pub async fn embed_chunks(
    model: &dyn EmbeddingModel,
    chunks: Vec<Chunk>,
) -> Result<Vec<EmbeddedChunk>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = model.embed_batch(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(RagError::internal(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            vectors.len()
        )));
    }
    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
        .collect())
}

/// [`EmbeddingModel`] for any server speaking the OpenAI embeddings API.
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    config: ClientConfig,
    url: String,
    batch_size: usize,
    concurrency: usize,
    max_retries: u32,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &ClientConfig, options: &RagOptions) -> Result<Self> {
        Ok(Self {
            http: http::build_client(Duration::from_secs(options.embedding_timeout_secs))?,
            url: config.endpoint("embeddings"),
            config: config.clone(),
            batch_size: options.embedding_batch_size.max(1),
            concurrency: options
                .embedding_concurrency
                .clamp(1, MAX_EMBEDDING_CONCURRENCY),
            max_retries: options.max_retries,
        })
    }

    /// Shared-pointer constructor for use as a registry factory.
    pub fn shared(config: &ClientConfig, options: &RagOptions) -> Result<Arc<dyn EmbeddingModel>> {
        Ok(Arc::new(Self::new(config, options)?))
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.model_name,
            "input": input,
        });
        let json = http::post_json(
            &self.http,
            &self.url,
            self.config.bearer_token(),
            &body,
            self.max_retries,
        )
        .await?;
        parse_embeddings(&json)
    }

    async fn embed_individually(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        stream::iter(texts.iter().cloned().map(|text| async move {
            let mut vectors = self.request(std::slice::from_ref(&text)).await?;
            match (vectors.pop(), vectors.is_empty()) {
                (Some(v), true) => Ok(v),
                _ => Err(RagError::upstream(
                    None,
                    "embedding server returned the wrong number of vectors",
                )),
            }
        }))
        .buffered(self.concurrency)
        .try_collect()
        .await
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            if batch.len() == 1 {
                out.extend(self.embed_individually(batch).await?);
                continue;
            }
            match self.request(batch).await {
                Ok(vectors) if vectors.len() == batch.len() => out.extend(vectors),
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "Batch embedding count mismatch, falling back to single requests"
                    );
                    out.extend(self.embed_individually(batch).await?);
                }
                Err(e) if e.status().is_some_and(|s| BATCH_REJECT_STATUSES.contains(&s)) => {
                    warn!(error = %e, "Batch embedding rejected, falling back to single requests");
                    out.extend(self.embed_individually(batch).await?);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(count = out.len(), model = %self.config.model_name, "Embedded texts");
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::upstream(None, "invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::upstream(None, "invalid embeddings response: missing embedding"))?;
        let vector = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    RagError::upstream(
                        None,
                        format!("invalid embeddings response: non-numeric component {}", v),
                    )
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        if vector.is_empty() {
            return Err(RagError::upstream(None, "embedding server returned an empty vector"));
        }
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    if indexed.iter().enumerate().any(|(i, (index, _))| i != *index) {
        return Err(RagError::upstream(
            None,
            "invalid embeddings response: indices are not 0..n",
        ));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
