//! Shared HTTP client with retry
//!
//! Every OpenAI-compatible endpoint goes through [`HttpClient::execute`],
//! which retries transient failures with doubling backoff and fails fast
//! on client errors.

use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use voice_bridge_config::{BackendSettings, BridgeSettings};

use crate::LlmError;

/// Connection and retry settings shared by the HTTP backends
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// REST base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: String,
    /// Deadline for one attempt, see [`attempt_timeout`]
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry, doubled each time
    pub initial_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::endpoints::OPENAI_DEFAULT;
        use voice_bridge_config::constants::retry::{INITIAL_BACKOFF_MS, MAX_RETRIES};
        use voice_bridge_config::constants::timeouts::{CONNECT_MS, REMOTE_MS};

        let initial_backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        Self {
            base_url: OPENAI_DEFAULT.to_string(),
            api_key: String::new(),
            timeout: attempt_timeout(Duration::from_millis(REMOTE_MS), MAX_RETRIES, initial_backoff),
            connect_timeout: Duration::from_millis(CONNECT_MS),
            max_retries: MAX_RETRIES,
            initial_backoff,
        }
    }
}

impl HttpConfig {
    /// `remote_timeout_ms` is the budget for a whole call, retries included
    pub fn from_settings(backend: &BackendSettings, bridge: &BridgeSettings) -> Self {
        let initial_backoff = Duration::from_millis(backend.initial_backoff_ms);
        Self {
            base_url: backend.base_url.clone(),
            api_key: backend.api_key.clone(),
            timeout: attempt_timeout(
                Duration::from_millis(bridge.remote_timeout_ms),
                backend.max_retries,
                initial_backoff,
            ),
            connect_timeout: Duration::from_millis(bridge.connect_timeout_ms),
            max_retries: backend.max_retries,
            initial_backoff,
        }
    }
}

const MIN_ATTEMPT: Duration = Duration::from_millis(50);

/// Per-attempt deadline so that every attempt and the backoff between
/// them fit into `budget`
pub fn attempt_timeout(budget: Duration, max_retries: u32, initial_backoff: Duration) -> Duration {
    let backoff_total = (0..max_retries.min(31)).fold(Duration::ZERO, |total, n| {
        total.saturating_add(initial_backoff.saturating_mul(1 << n))
    });
    let usable = match budget.checked_sub(backoff_total) {
        Some(left) if !left.is_zero() => left,
        _ => budget,
    };
    (usable / max_retries.saturating_add(1)).max(MIN_ATTEMPT)
}

fn is_local(url: &str) -> bool {
    url.starts_with("http://localhost") || url.starts_with("http://127.0.0.1")
}

/// HTTP client for one OpenAI-compatible endpoint
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && !is_local(&config.base_url) {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Full URL for an API path such as `/audio/speech`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a request, retrying transient failures
    ///
    /// `build` is called once per attempt since request bodies such as
    /// multipart forms can't be replayed.
    pub async fn execute<F>(&self, operation: &'static str, build: F) -> Result<Response, LlmError>
    where
        F: Fn(&Client) -> Result<RequestBuilder, LlmError>,
    {
        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backend request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let mut request = build(&self.client)?;
            if !self.config.api_key.is_empty() {
                request = request.bearer_auth(&self.config.api_key);
            }

            let result = match request.send().await {
                Ok(response) => check_status(response).await,
                Err(e) => Err(LlmError::from(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(operation, error = %e, "Transient backend failure");
                    last_error = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.max_retries, 2);
        // (15s - 200ms - 400ms) over three attempts
        assert_eq!(config.timeout, Duration::from_millis(4800));
    }

    #[test]
    fn test_attempt_timeout_fits_budget() {
        let budget = Duration::from_millis(600);
        let backoff = Duration::from_millis(10);
        assert_eq!(attempt_timeout(budget, 2, backoff), Duration::from_millis(190));
        assert_eq!(attempt_timeout(budget, 0, backoff), budget);
        // backoff alone exceeds the budget
        assert_eq!(
            attempt_timeout(budget, 2, Duration::from_secs(1)),
            Duration::from_millis(200)
        );
        assert_eq!(attempt_timeout(Duration::from_millis(60), 5, backoff), MIN_ATTEMPT);
    }

    #[tokio::test]
    async fn test_hanging_backend_is_retried_within_budget() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let mut backend = BackendSettings::default();
        backend.base_url = format!("http://{}", addr);
        backend.max_retries = 2;
        backend.initial_backoff_ms = 10;
        let mut bridge = BridgeSettings::default();
        bridge.remote_timeout_ms = 600;
        let client = HttpClient::new(HttpConfig::from_settings(&backend, &bridge)).unwrap();

        let url = client.url("/audio/transcriptions");
        let outcome = tokio::time::timeout(
            Duration::from_millis(600),
            client.execute("transcribe", |c| Ok(c.post(&url))),
        )
        .await;

        assert!(matches!(outcome, Ok(Err(LlmError::Timeout)) | Err(_)));
        assert!(accepted.load(Ordering::SeqCst) >= 2, "only one attempt was made");
    }

    #[test]
    fn test_api_key_required_for_remote() {
        let result = HttpClient::new(HttpConfig::default());
        assert!(matches!(result, Err(LlmError::Configuration(_))));

        let local = HttpClient::new(HttpConfig {
            base_url: "http://localhost:8080/v1".to_string(),
            ..Default::default()
        });
        assert!(local.is_ok());
    }

    #[test]
    fn test_url_join() {
        let client = HttpClient::new(HttpConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/audio/speech"), "http://localhost:8080/v1/audio/speech");
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_reported() {
        let client = HttpClient::new(HttpConfig {
            // port 9 (discard) is not listening on test machines
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();

        let url = client.url("/models");
        let err = client
            .execute("list_models", |c| Ok(c.get(&url)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
