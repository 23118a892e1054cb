//! JSON-over-HTTPS transport shared by the vendor adapters.

use std::time::Instant;

use reqwest::Client;
use serde::Serialize;

use super::error::{LlmError, RetryConfig};

/// POSTs JSON bodies, retrying only requests that never reached the server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    retry_config: RetryConfig,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_retry_config(RetryConfig::default())
    }

    pub fn with_retry_config(retry_config: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            retry_config,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Send a single request and return the raw success body.
    async fn execute_request<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &B,
    ) -> Result<String, LlmError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| LlmError::from_send(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::from_send(&e))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }
        Ok(text)
    }

    /// POST `body` to `url`, retrying connection failures with backoff.
    pub async fn post_json<B: Serialize + ?Sized + Sync>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &B,
    ) -> anyhow::Result<String> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(url, headers, body).await {
                Ok(text) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(text);
                }
                Err(error) if self.retry_config.should_retry(&error, attempt) => {
                    let delay = self.retry_config.delay_for(attempt);
                    tracing::warn!(
                        "Attempt {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(attempts = attempt + 1, "Request failed: {}", error);
                    return Err(error.into());
                }
            }
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        // Port 9 on localhost is "discard"; nothing listens there in CI.
        let transport = HttpTransport::with_retry_config(RetryConfig::no_retries());
        let err = transport
            .post_json("http://127.0.0.1:9/v1", &[], &serde_json::json!({}))
            .await
            .unwrap_err();
        let llm = err.downcast_ref::<LlmError>().expect("LlmError");
        assert_eq!(llm.kind, LlmErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn non_connection_send_failures_are_not_retried() {
        // Default config would back off for seconds on a retryable error.
        let transport = HttpTransport::new();
        let started = Instant::now();
        let err = transport
            .post_json("not a url", &[], &serde_json::json!({}))
            .await
            .unwrap_err();
        let llm = err.downcast_ref::<LlmError>().expect("LlmError");
        assert_eq!(llm.kind, LlmErrorKind::RequestError);
        assert!(started.elapsed() < std::time::Duration::from_millis(900));
    }
}
