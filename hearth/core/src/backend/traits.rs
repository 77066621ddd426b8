//! Stream Transport Traits
//!
//! Trait definitions for the byte-level transport that carries one outgoing
//! message to the model server and brings back its event stream. The session
//! controller only ever talks to a `StreamTransport`; the HTTP client and the
//! in-memory channel transport are interchangeable behind it.
//!
//! # Contract
//!
//! - `open` issues exactly one request and returns an [`OpenStream`].
//! - A non-success response status is reported as an `Err` from `open`;
//!   the body is never handed out as stream data.
//! - A read failure mid-stream is yielded as an `Err` item, which is
//!   distinguishable from the natural end of the stream (`None`).
//! - Cancelling the stream's token ends the byte stream at the next poll.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Raw byte chunks as they arrive from the network
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Failures opening or reading a stream
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent
    #[error("Failed to reach {endpoint}: {reason}")]
    Connect {
        /// Endpoint that was attempted
        endpoint: String,
        /// Underlying cause
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("Server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (best effort, may be empty)
        body: String,
    },

    /// Reading the response body failed mid-stream
    #[error("Stream read failed: {0}")]
    Read(String),

    /// The transport shut down before the stream could be opened
    #[error("Transport closed: {0}")]
    Closed(String),
}

/// Sampling parameters sent with every request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Temperature (0.0-2.0, higher = more creative)
    pub temperature: f32,
    /// Nucleus sampling threshold (0.0-1.0)
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// Repetition penalty (1.0 = off)
    pub repeat_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}

/// A file already resolved by the upload subsystem
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Server-side file identifier
    pub id: String,
    /// Original file name (display only)
    pub name: String,
}

/// Request body for one outgoing message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,
    /// Model to answer with
    pub model: String,
    /// Sampling parameters
    #[serde(flatten)]
    pub params: GenerationParams,
    /// System instruction
    #[serde(
        rename = "system_prompt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system: Option<String>,
    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

impl ChatRequest {
    /// Create a new request with message and model
    pub fn new(message: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model: model.into(),
            params: GenerationParams::default(),
            system: None,
            attachments: Vec::new(),
        }
    }

    /// Set sampling parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set system instruction
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach a resolved file
    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Append a directive to the system instruction, creating one if absent
    pub fn append_system_directive(&mut self, directive: &str) {
        self.system = Some(match self.system.take() {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}\n\n{directive}"),
            _ => directive.to_string(),
        });
    }
}

/// An opened, abortable byte stream for one message
pub struct OpenStream {
    bytes: ByteStream,
    cancel: CancellationToken,
    ended: bool,
}

impl OpenStream {
    /// Wrap a byte stream so that it ends as soon as `cancel` fires
    pub fn new(bytes: ByteStream, cancel: CancellationToken) -> Self {
        let bytes = bytes
            .take_until(cancel.clone().cancelled_owned())
            .boxed();
        Self {
            bytes,
            cancel,
            ended: false,
        }
    }

    /// Read the next chunk
    ///
    /// Returns `None` once the stream ended naturally or was cancelled.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, TransportError>> {
        if self.ended {
            return None;
        }
        let item = self.bytes.next().await;
        if item.is_none() {
            self.ended = true;
        }
        item
    }

    /// Abort the stream
    ///
    /// Idempotent. Calling it after the stream ended naturally does nothing.
    pub fn cancel(&self) {
        if !self.ended {
            self.cancel.cancel();
        }
    }

    /// Whether the stream was aborted
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the stream reached its end
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl std::fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

/// Stream transport trait
///
/// Implement this trait to carry requests over a different channel.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Get the transport name (e.g., "http")
    fn name(&self) -> &str;

    /// Open a stream for one outgoing message
    ///
    /// The returned stream ends when `cancel` is cancelled.
    async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<OpenStream, TransportError>;

    /// Check if the server is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("Hello", "llama3.2")
            .with_temperature(3.5)
            .with_system("Be brief")
            .with_attachment(AttachmentRef {
                id: "file_1".to_string(),
                name: "notes.txt".to_string(),
            });

        assert_eq!(request.message, "Hello");
        assert_eq!(request.model, "llama3.2");
        assert!((request.params.temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(request.system.as_deref(), Some("Be brief"));
        assert_eq!(request.attachments.len(), 1);
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::new("Hi", "m");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["message"], "Hi");
        assert_eq!(json["model"], "m");
        assert_eq!(json["top_k"], 40);
        assert!(json.get("temperature").is_some());
        assert!(json.get("repeat_penalty").is_some());
        assert!(json.get("system_prompt").is_none());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn test_append_system_directive() {
        let mut request = ChatRequest::new("Hi", "m");
        request.append_system_directive("Summarize first.");
        assert_eq!(request.system.as_deref(), Some("Summarize first."));

        let mut request = ChatRequest::new("Hi", "m").with_system("Be brief");
        request.append_system_directive("Summarize first.");
        assert_eq!(
            request.system.as_deref(),
            Some("Be brief\n\nSummarize first.")
        );
    }

    #[tokio::test]
    async fn test_open_stream_ends_on_cancel() {
        let token = CancellationToken::new();
        let bytes = futures::stream::pending::<Result<Bytes, TransportError>>().boxed();
        let mut stream = OpenStream::new(bytes, token.clone());

        stream.cancel();
        stream.cancel();
        assert!(stream.is_cancelled());
        assert!(stream.next_chunk().await.is_none());
        assert!(stream.is_ended());
    }

    #[tokio::test]
    async fn test_cancel_after_natural_end_is_noop() {
        let token = CancellationToken::new();
        let bytes = futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed();
        let mut stream = OpenStream::new(bytes, token.clone());

        assert!(stream.next_chunk().await.is_some());
        assert!(stream.next_chunk().await.is_none());

        stream.cancel();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status {
            status: 503,
            body: "loading model".to_string(),
        };
        assert_eq!(err.to_string(), "Server returned 503: loading model");
    }
}
