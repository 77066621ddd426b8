//! Hearth Core - Streaming Response Pipeline for a Local-Model Chat Client
//!
//! This crate turns a live, chunked event stream from a locally hosted model
//! server into progressively rendered, correctly committed conversation text.
//! It is completely independent of any UI framework: a terminal, a desktop
//! window, or a test harness attaches by draining [`ViewEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SessionController                          │
//! │                                                                   │
//! │  StreamTransport ──▶ FrameDecoder ──▶ EventParser                 │
//! │        ▲                                   │                      │
//! │        │ cancel token                      ▼                      │
//! │  SessionHandle          RenderScheduler ◀── ContentAccumulator    │
//! │                                │                                  │
//! │   ConversationBudget           │ Frame / Final                    │
//! │   (TokenMeter)                 ▼                                  │
//! │                          ViewEvent ──▶ view layer                 │
//! │   MessageStore ◀── committed records on terminal transitions      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`SessionController`]: The per-conversation state machine
//! - [`StreamTransport`]: Byte-level access to the model server
//! - [`FrameDecoder`] / [`EventParser`]: Bytes to lines to typed events
//! - [`RenderScheduler`]: At most one view update per display frame
//! - [`ConversationBudget`]: Near-limit tracking and one-shot summarization
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hearth_core::{HttpTransport, Prompt, SessionController, Transcript, load_config};
//! use tokio::sync::mpsc;
//!
//! let config = load_config()?;
//! let transport = Arc::new(HttpTransport::from_config(&config)?);
//! let transcript = Arc::new(Transcript::new().with_context_limit(config.context_limit));
//! let (tx, mut rx) = mpsc::unbounded_channel();
//!
//! let mut controller =
//!     SessionController::new(transport, transcript.clone(), transcript, config, tx);
//! controller.start(Prompt::new("Why is the sky blue?")).await?;
//! let state = controller.drive().await;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Stream transports (HTTP, in-memory channel)
//! - [`streaming`]: Frame decoding, event parsing, accumulation, render scheduling
//! - [`controller`]: Session state machine
//! - [`budget`]: Context budget and token estimation
//! - [`transcript`]: Persistence collaborator and in-memory transcript
//! - [`messages`]: Identifiers, records, and view events
//! - [`config`]: TOML / environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod budget;
pub mod config;
pub mod controller;
pub mod messages;
pub mod streaming;
pub mod transcript;

// Backend exports
pub use backend::{
    AttachmentRef, ChannelTransport, ChatRequest, ChunkFeed, GenerationParams, HttpTransport,
    OpenStream, StreamTransport, TransportError,
};

// Budget exports
pub use budget::{estimate_tokens, BudgetNotice, ConversationBudget, TokenMeter, TokenSnapshot};

// Controller exports
pub use controller::{
    ControllerError, Prompt, SessionController, SessionHandle, StepOutcome, StreamFailure,
};

// Message exports
pub use messages::{
    ChatRecord, MessageId, MessageRole, NotifyLevel, SessionId, StreamState, ViewEvent,
};

// Streaming exports
pub use streaming::{
    ContentAccumulator, DeltaEvent, EventParser, FixedRateClock, FrameBuffer, FrameClock,
    FrameDecoder, RenderScheduler, RenderTick, RenderUpdate, ScheduleStats, WireFormat,
};

// Transcript exports
pub use transcript::{MessageStore, StoreError, Transcript};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
