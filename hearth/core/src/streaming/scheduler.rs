//! Render Scheduler
//!
//! Coalesces bursts of deltas into at most one view update per display frame.
//! The first delta after a paint schedules a single tick aligned to the next
//! frame boundary; later deltas only grow the pending buffer until that tick
//! fires. This is the pipeline's backpressure valve: however fast the server
//! streams, the view sees one `RenderUpdate::Frame` per paint at most.
//!
//! On a terminal transition the controller calls [`RenderScheduler::final_flush`]
//! exactly once. It drains whatever is pending and cancels the outstanding
//! tick, so nothing can be painted after the session is torn down.
//!
//! # Frame Alignment
//!
//! ```text
//! paint:   |-------16.6ms-------|-------16.6ms-------|
//! deltas:     d1  d2 d3               d4
//! ticks:      ^ scheduled       ^ fires (d1..d3)     ^ fires (d4)
//! ```

use std::time::Duration;

use tokio::time::Instant;

use super::accumulator::ContentAccumulator;
use crate::messages::StreamState;

/// Source of paint deadlines
pub trait FrameClock: Send + Sync {
    /// The first paint boundary strictly after `after`
    fn next_paint(&self, after: Instant) -> Instant;
}

/// Paint boundaries at a fixed rate from an origin
#[derive(Clone, Copy, Debug)]
pub struct FixedRateClock {
    origin: Instant,
    interval: Duration,
}

impl FixedRateClock {
    /// Clock whose frames start now
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_origin(Instant::now(), interval)
    }

    /// Clock whose frames start at `origin`
    #[must_use]
    pub fn with_origin(origin: Instant, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self { origin, interval }
    }

    /// Frame length
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameClock for FixedRateClock {
    fn next_paint(&self, after: Instant) -> Instant {
        if after < self.origin {
            return self.origin;
        }
        let elapsed = after.duration_since(self.origin).as_nanos();
        let interval = self.interval.as_nanos();
        let frames = elapsed / interval + 1;
        let offset = u64::try_from(frames * interval).unwrap_or(u64::MAX);
        self.origin + Duration::from_nanos(offset)
    }
}

/// A scheduled flush handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTick {
    /// Identifies this tick; stale ids are ignored on fire
    pub id: u64,
    /// Paint boundary the tick is aligned to
    pub deadline: Instant,
}

/// Text handed to the view
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderUpdate {
    /// Coalesced deltas for one paint
    Frame {
        /// Text to append
        delta: String,
    },
    /// The one flush after a terminal transition
    Final {
        /// Text still pending at the transition
        delta: String,
        /// The full committed text at the transition
        committed: String,
        /// Terminal state that triggered the flush
        state: StreamState,
    },
}

impl RenderUpdate {
    /// Text to append to what the view already shows
    #[must_use]
    pub fn delta(&self) -> &str {
        match self {
            Self::Frame { delta } | Self::Final { delta, .. } => delta,
        }
    }

    /// Whether this is the terminal flush
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Counters for coalescing behaviour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    /// Ticks scheduled over the session
    pub ticks_scheduled: u32,
    /// Frame updates emitted
    pub frames_emitted: u32,
    /// Deltas that arrived while a tick was already outstanding
    pub deltas_coalesced: u32,
}

/// Per-session render scheduler
pub struct RenderScheduler {
    clock: Box<dyn FrameClock>,
    outstanding: Option<RenderTick>,
    next_id: u64,
    finalized: bool,
    stats: ScheduleStats,
}

impl RenderScheduler {
    /// Create a scheduler driven by `clock`
    pub fn new(clock: impl FrameClock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            outstanding: None,
            next_id: 0,
            finalized: false,
            stats: ScheduleStats::default(),
        }
    }

    /// Scheduler aligned to a fixed frame interval starting now
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(FixedRateClock::new(interval))
    }

    /// Note that a delta was applied
    ///
    /// Returns the newly scheduled tick, or `None` when a tick is already
    /// outstanding (the delta is coalesced into it) or the session is final.
    pub fn on_delta(&mut self, now: Instant) -> Option<RenderTick> {
        if self.finalized {
            return None;
        }
        if self.outstanding.is_some() {
            self.stats.deltas_coalesced += 1;
            return None;
        }

        self.next_id += 1;
        let tick = RenderTick {
            id: self.next_id,
            deadline: self.clock.next_paint(now),
        };
        self.outstanding = Some(tick);
        self.stats.ticks_scheduled += 1;
        Some(tick)
    }

    /// The tick currently waiting to fire
    #[must_use]
    pub fn outstanding(&self) -> Option<RenderTick> {
        self.outstanding
    }

    /// Fire a tick: drain the pending buffer into one frame
    ///
    /// A stale or unknown `tick_id` does nothing. An empty pending buffer
    /// clears the tick without emitting.
    pub fn fire(&mut self, tick_id: u64, acc: &mut ContentAccumulator) -> Option<RenderUpdate> {
        match self.outstanding {
            Some(tick) if tick.id == tick_id => self.outstanding = None,
            _ => return None,
        }

        let delta = acc.take_pending();
        if delta.is_empty() {
            return None;
        }
        self.stats.frames_emitted += 1;
        Some(RenderUpdate::Frame { delta })
    }

    /// Flush once after a terminal transition
    ///
    /// Cancels the outstanding tick. Only the first call produces an update.
    pub fn final_flush(
        &mut self,
        acc: &mut ContentAccumulator,
        state: StreamState,
    ) -> Option<RenderUpdate> {
        if self.finalized {
            tracing::warn!(state = ?state, "Final flush requested twice, ignoring");
            return None;
        }
        self.finalized = true;
        self.outstanding = None;

        Some(RenderUpdate::Final {
            delta: acc.take_pending(),
            committed: acc.committed().to_string(),
            state,
        })
    }

    /// Coalescing counters
    #[must_use]
    pub fn stats(&self) -> ScheduleStats {
        self.stats
    }
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("outstanding", &self.outstanding)
            .field("finalized", &self.finalized)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Wait for a tick's paint deadline
///
/// Resolves with the tick id. With no tick outstanding it never resolves,
/// which lets it sit in a `select!` next to the chunk read.
pub async fn wait_for_tick(tick: Option<RenderTick>) -> u64 {
    match tick {
        Some(tick) => {
            tokio::time::sleep_until(tick.deadline).await;
            tick.id
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq};

    const FRAME: Duration = Duration::from_millis(16);

    fn scheduler_at(origin: Instant) -> RenderScheduler {
        RenderScheduler::new(FixedRateClock::with_origin(origin, FRAME))
    }

    #[test]
    fn test_next_paint_is_frame_aligned() {
        let origin = Instant::now();
        let clock = FixedRateClock::with_origin(origin, FRAME);

        assert_eq!(clock.next_paint(origin), origin + FRAME);
        assert_eq!(
            clock.next_paint(origin + Duration::from_millis(5)),
            origin + FRAME
        );
        assert_eq!(clock.next_paint(origin + FRAME), origin + FRAME * 2);
        assert_eq!(
            clock.next_paint(origin + Duration::from_millis(40)),
            origin + FRAME * 3
        );
    }

    #[test]
    fn test_burst_schedules_one_tick() {
        let origin = Instant::now();
        let mut scheduler = scheduler_at(origin);
        let mut acc = ContentAccumulator::new();

        let mut scheduled = Vec::new();
        for i in 0..50 {
            acc.apply("x");
            if let Some(tick) = scheduler.on_delta(origin + Duration::from_micros(i * 100)) {
                scheduled.push(tick);
            }
        }

        assert_eq!(scheduled.len(), 1);
        let tick = scheduled[0];
        assert_eq!(scheduler.outstanding(), Some(tick));

        let update = scheduler.fire(tick.id, &mut acc).unwrap();
        assert_eq!(update.delta().len(), 50);
        assert!(scheduler.outstanding().is_none());

        let stats = scheduler.stats();
        assert_eq!(stats.ticks_scheduled, 1);
        assert_eq!(stats.frames_emitted, 1);
        assert_eq!(stats.deltas_coalesced, 49);
    }

    #[test]
    fn test_stale_tick_is_ignored() {
        let origin = Instant::now();
        let mut scheduler = scheduler_at(origin);
        let mut acc = ContentAccumulator::new();

        acc.apply("a");
        let first = scheduler.on_delta(origin).unwrap();
        assert!(scheduler.fire(first.id, &mut acc).is_some());

        acc.apply("b");
        let second = scheduler.on_delta(origin + FRAME).unwrap();
        assert_ne!(first.id, second.id);

        assert!(scheduler.fire(first.id, &mut acc).is_none());
        assert_eq!(scheduler.outstanding(), Some(second));
        assert!(acc.has_pending());
    }

    #[test]
    fn test_final_flush_cancels_tick_and_runs_once() {
        let origin = Instant::now();
        let mut scheduler = scheduler_at(origin);
        let mut acc = ContentAccumulator::new();

        acc.apply("Hel");
        let tick = scheduler.on_delta(origin).unwrap();
        assert!(scheduler.fire(tick.id, &mut acc).is_some());
        acc.apply("lo");
        let tick = scheduler.on_delta(origin + FRAME).unwrap();

        let update = scheduler
            .final_flush(&mut acc, StreamState::Completed)
            .unwrap();
        assert_eq!(
            update,
            RenderUpdate::Final {
                delta: "lo".to_string(),
                committed: "Hello".to_string(),
                state: StreamState::Completed,
            }
        );
        assert!(scheduler.outstanding().is_none());
        assert!(scheduler.fire(tick.id, &mut acc).is_none());

        assert!(scheduler
            .final_flush(&mut acc, StreamState::Completed)
            .is_none());
        assert!(scheduler.on_delta(origin + FRAME * 2).is_none());
    }

    #[test]
    fn test_final_flush_with_nothing_pending() {
        let mut scheduler = scheduler_at(Instant::now());
        let mut acc = ContentAccumulator::new();

        let update = scheduler
            .final_flush(&mut acc, StreamState::Cancelled)
            .unwrap();
        assert!(update.is_final());
        assert_eq!(update.delta(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_tick_resolves_at_deadline() {
        let origin = Instant::now();
        let tick = RenderTick {
            id: 7,
            deadline: origin + FRAME,
        };

        let mut wait = tokio_test::task::spawn(wait_for_tick(Some(tick)));
        assert_pending!(wait.poll());

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_pending!(wait.poll());

        tokio::time::advance(Duration::from_millis(6)).await;
        assert_ready_eq!(wait.poll(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_without_tick_never_resolves() {
        let mut wait = tokio_test::task::spawn(wait_for_tick(None));
        assert_pending!(wait.poll());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_pending!(wait.poll());
    }
}
