//! JSON-over-HTTP calls with retry, shared by the remote embedding and
//! generation providers.
//!
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use serde_json::Value;
use std::time::Duration;

/// A JSON POST target.
pub(crate) struct JsonEndpoint<'a> {
    /// Provider label used in error messages (`"OpenAI"`, `"Ollama"`).
    pub label: &'a str,
    pub url: String,
    pub bearer: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// POST `body` and return the decoded JSON response. Errors are plain
/// strings so each caller can wrap them in its own error variant.
pub(crate) async fn post_json(endpoint: &JsonEndpoint<'_>, body: &Value) -> Result<Value, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(endpoint.timeout_secs))
        .build()
        .map_err(|e| format!("{} client error: {}", endpoint.label, e))?;

    let mut last_err = None;

    for attempt in 0..=endpoint.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(label = endpoint.label, attempt, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = &endpoint.bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| format!("{} response was not JSON: {}", endpoint.label, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", endpoint.label, status, body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(message);
                    continue;
                }
                return Err(message);
            }
            Err(e) => {
                last_err = Some(format!(
                    "{} connection error (is it reachable at {}?): {}",
                    endpoint.label, endpoint.url, e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", endpoint.label)))
}
