//! Streaming Pipeline Stages
//!
//! The per-message pipeline between the raw byte stream and the view. Each
//! stage is a plain value owned by the session controller; none of them spawn
//! tasks or hold locks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  bytes   ┌──────────────┐  lines  ┌─────────────┐
//! │ OpenStream   │ ───────▶ │ FrameDecoder │ ──────▶ │ EventParser │
//! └──────────────┘          └──────────────┘         └──────┬──────┘
//!                                                           │ DeltaEvent
//!                                                           ▼
//! ┌──────────────┐  Frame/Final  ┌──────────────────┐  ┌───────────────────┐
//! │  ViewEvent   │ ◀──────────── │ RenderScheduler  │◀─│ ContentAccumulator│
//! └──────────────┘               └──────────────────┘  └───────────────────┘
//! ```
//!
//! # Features
//!
//! - **Chunk-boundary invariance**: carry-over state is an explicit [`FrameBuffer`]
//! - **Tolerant parsing**: malformed lines degrade to [`DeltaEvent::Unknown`]
//! - **Frame-aligned coalescing**: at most one render tick outstanding per session
//! - **Single terminal flush**: [`RenderScheduler::final_flush`] runs exactly once

mod accumulator;
mod decoder;
mod event;
mod scheduler;

pub use accumulator::ContentAccumulator;
pub use decoder::{decode_chunk, finish, FrameBuffer, FrameDecoder};
pub use event::{DeltaEvent, EventParser, WireFormat};
pub use scheduler::{
    wait_for_tick, FixedRateClock, FrameClock, RenderScheduler, RenderTick, RenderUpdate,
    ScheduleStats,
};
