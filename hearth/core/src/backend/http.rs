//! HTTP Stream Transport
//!
//! Opens one streaming POST per outgoing message against the local model
//! server and exposes the response body as a cancellable byte stream.
//!
//! # Server API
//!
//! - `POST <endpoint>` with a JSON [`ChatRequest`] body
//! - Response: newline-delimited event lines (see `streaming::event`)
//!
//! Any non-2xx status fails `open` with `TransportError::Status`; the body is
//! read as an error description, never as stream data.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::traits::{ChatRequest, OpenStream, StreamTransport, TransportError};
use crate::config::ClientConfig;

/// Timeout for health checks
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest error body kept from a failed response
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// Streaming endpoint URL
    endpoint: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| TransportError::Connect {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            endpoint,
            http_client,
        })
    }

    /// Create from resolved client configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(
            config.endpoint.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
    }

    /// Get the streaming endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Scheme, host and port of the endpoint, used for health checks
    fn origin_url(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.endpoint).ok()?;
        Some(format!("{}/", url.origin().ascii_serialization()))
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<OpenStream, TransportError> {
        let send = self.http_client.post(&self.endpoint).json(request).send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(TransportError::Closed(
                    "cancelled before the server responded".to_string(),
                ));
            }
            response = send => response.map_err(|e| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::warn!(status, endpoint = %self.endpoint, "Server rejected stream request");
            return Err(TransportError::Status { status, body });
        }

        tracing::info!(
            endpoint = %self.endpoint,
            model = %request.model,
            "Opened response stream"
        );

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())))
            .boxed();

        Ok(OpenStream::new(bytes, cancel))
    }

    async fn health_check(&self) -> bool {
        let Some(url) = self.origin_url() else {
            return false;
        };
        self.http_client
            .get(url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .is_ok()
    }
}
