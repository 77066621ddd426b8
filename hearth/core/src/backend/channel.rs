//! In-Memory Channel Transport
//!
//! A `StreamTransport` whose responses are fed through channels instead of the
//! network. Each call to `open` consumes the next queued response, so a test
//! (or a replay of a captured wire file) can script exactly which bytes arrive
//! and when.
//!
//! # Usage
//!
//! ```ignore
//! let transport = ChannelTransport::new();
//! let feed = transport.push_stream();
//! feed.send_str("data: {\"content\":\"Hel\"}\n");
//! feed.send_str("data: {\"content\":\"lo\",\"done\":true}\n");
//! drop(feed); // natural end of stream
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::traits::{ChatRequest, OpenStream, StreamTransport, TransportError};

type ChunkResult = Result<Bytes, TransportError>;

/// A queued response for the next `open` call
enum ScriptedResponse {
    Stream(mpsc::UnboundedReceiver<ChunkResult>),
    Reject(TransportError),
}

/// Sending half of a scripted stream
///
/// Dropping the feed ends the stream naturally.
#[derive(Clone, Debug)]
pub struct ChunkFeed {
    tx: mpsc::UnboundedSender<ChunkResult>,
}

impl ChunkFeed {
    /// Deliver raw bytes as one chunk
    ///
    /// Returns false if the stream was already dropped by the reader.
    pub fn send_bytes(&self, bytes: &[u8]) -> bool {
        self.tx.send(Ok(Bytes::copy_from_slice(bytes))).is_ok()
    }

    /// Deliver text as one chunk
    pub fn send_str(&self, text: &str) -> bool {
        self.send_bytes(text.as_bytes())
    }

    /// Fail the stream with a read error
    pub fn fail(&self, error: TransportError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

/// Channel-backed transport
#[derive(Default)]
pub struct ChannelTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ChannelTransport {
    /// Create a transport with no queued responses
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a live stream and return its feed
    pub fn push_stream(&self) -> ChunkFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.responses.lock().push_back(ScriptedResponse::Stream(rx));
        ChunkFeed { tx }
    }

    /// Queue a complete stream made of the given chunks
    pub fn push_chunks<I, C>(&self, chunks: I)
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let feed = self.push_stream();
        for chunk in chunks {
            feed.send_bytes(chunk.as_ref());
        }
    }

    /// Queue a failure for the next `open`
    pub fn push_rejection(&self, error: TransportError) {
        self.responses
            .lock()
            .push_back(ScriptedResponse::Reject(error));
    }

    /// Build a transport that replays captured wire bytes in fixed-size chunks
    #[must_use]
    pub fn from_wire_bytes(data: &[u8], chunk_size: usize) -> Self {
        let transport = Self::new();
        transport.push_chunks(data.chunks(chunk_size.max(1)));
        transport
    }

    /// Requests received so far, oldest first
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Number of times `open` was called
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl StreamTransport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<OpenStream, TransportError> {
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        match next {
            Some(ScriptedResponse::Stream(rx)) => {
                let bytes = UnboundedReceiverStream::new(rx).boxed();
                Ok(OpenStream::new(bytes, cancel))
            }
            Some(ScriptedResponse::Reject(error)) => Err(error),
            None => Err(TransportError::Closed(
                "no scripted response queued".to_string(),
            )),
        }
    }
}
