//! Stream Transports
//!
//! Byte-level access to the model server through a common trait interface.
//!
//! # Available Transports
//!
//! - **HTTP**: one streaming POST per message against the local server (default)
//! - **Channel**: in-memory scripted responses for tests and wire-file replay
//!
//! # Usage
//!
//! ```ignore
//! use hearth_core::backend::{ChatRequest, HttpTransport, StreamTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! let transport = HttpTransport::from_config(&config)?;
//! let request = ChatRequest::new("Hello!", "llama3.2");
//! let mut stream = transport.open(&request, CancellationToken::new()).await?;
//! while let Some(chunk) = stream.next_chunk().await { /* ... */ }
//! ```

mod channel;
mod http;
mod traits;

pub use channel::{ChannelTransport, ChunkFeed};
pub use http::HttpTransport;
pub use traits::{
    AttachmentRef, ByteStream, ChatRequest, GenerationParams, OpenStream, StreamTransport,
    TransportError,
};
