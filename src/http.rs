//! Shared JSON-over-HTTP plumbing for OpenAI-compatible servers.

use std::time::Duration;

use tracing::warn;

use crate::error::{RagError, Result};

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::internal(format!("failed to build HTTP client: {}", e)))
}

/// POST `body` to `url` and decode the JSON response.
///
/// Retry strategy, with backoff of 1s, 2s, 4s… between attempts:
/// - HTTP 429 or 5xx → retry
/// - other non-success status → fail immediately
/// - network error or timeout → retry
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json::<serde_json::Value>().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = RagError::upstream(Some(status.as_u16()), excerpt(&body_text));
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(%url, status = status.as_u16(), attempt, "Retryable upstream error");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                warn!(%url, attempt, error = %e, "Request failed");
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RagError::upstream(None, "request failed after retries")))
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
