//! HTTP Transport
//!
//! Completion streams over HTTP via reqwest.
//!
//! # Completions API
//!
//! - `POST {base}/providers/{provider}/models/{model}/completions/` - stream a
//!   completion (`text/event-stream`)
//! - `GET {base}/providers/{provider}/models` - list model ids
//! - `GET {base}/providers` - list providers (used as a health check)

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;

use super::traits::{ByteStream, CompletionRequest, CompletionTransport, TransportError};
use crate::config::ClientConfig;

/// HTTP completions client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// API root
    base_url: Url,
    /// Timeout for non-streaming requests
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from resolved configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` for an unusable base URL and `Connect` if
    /// the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidEndpoint(config.base_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            base_url,
            request_timeout: config.request_timeout(),
            http_client,
        })
    }

    /// Create from environment variables
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn from_env() -> Result<Self, TransportError> {
        Self::new(&ClientConfig::from_env())
    }

    /// API root
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `segments` below the API root, with a trailing slash if asked
    fn endpoint<S: AsRef<str>>(
        &self,
        segments: &[S],
        trailing_slash: bool,
    ) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| TransportError::InvalidEndpoint(self.base_url.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.as_ref());
            }
            if trailing_slash {
                path.push("");
            }
        }
        Ok(url)
    }

    /// Completion endpoint for a request
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` if the base URL cannot take path segments.
    pub fn completion_url(&self, request: &CompletionRequest) -> Result<Url, TransportError> {
        self.endpoint(&request.endpoint_segments(), true)
    }

    /// Model listing endpoint for a provider
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` if the base URL cannot take path segments.
    pub fn models_url(&self, provider: &str) -> Result<Url, TransportError> {
        self.endpoint(&["providers", &provider.to_lowercase(), "models"], false)
    }

    /// Check if the API is reachable
    pub async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint(&["providers"], false) else {
            return false;
        };
        self.http_client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    /// List the model ids a provider offers
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` for connection failures, non-success
    /// statuses and bodies that are not a JSON array of strings.
    pub async fn list_models(&self, provider: &str) -> Result<Vec<String>, TransportError> {
        let response = self
            .http_client
            .get(self.models_url(provider)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = check_status(response).await?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

/// Turn non-success statuses into `TransportError::Status`
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status { status, body })
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, TransportError> {
        let url = self.completion_url(request)?;
        tracing::debug!(url = %url, room = %request.chatroom_id, "Opening completion stream");

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|fragment| {
                fragment
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::Read(e.to_string()))
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::new(&ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_completion_url() {
        let transport = transport("http://localhost:8000/api/");
        let request = Room::new("r1", "OpenAI", "gpt-4").completion_request("hi");

        assert_eq!(
            transport.completion_url(&request).unwrap().as_str(),
            "http://localhost:8000/api/providers/openai/models/gpt-4/completions/"
        );
    }

    #[test]
    fn test_base_url_without_trailing_slash() {
        let transport = transport("http://localhost:8000/api");
        assert_eq!(
            transport.models_url("Anthropic").unwrap().as_str(),
            "http://localhost:8000/api/providers/anthropic/models"
        );
    }

    #[test]
    fn test_model_segment_is_escaped() {
        let transport = transport("http://localhost:8000/api/");
        let request = Room::new("r1", "ollama", "library/llama3:8b").completion_request("hi");

        let url = transport.completion_url(&request).unwrap();
        assert_eq!(
            url.path(),
            "/api/providers/ollama/models/library%2Fllama3:8b/completions/"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        let result = HttpTransport::new(&ClientConfig {
            base_url: "mailto:someone@example.com".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));

        let result = HttpTransport::new(&ClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_open_refused_connection() {
        // Port 9 (discard) on localhost is almost never listening
        let transport = transport("http://127.0.0.1:9/api/");
        let request = Room::new("r1", "openai", "gpt-4").completion_request("hi");

        let result = transport.open(&request).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
