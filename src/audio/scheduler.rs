//! Gapless playback scheduling with barge-in support.
//!
//! Inbound frames arrive at irregular intervals. Each one is placed at
//! `max(cursor, now)` on the output clock and the cursor moves to its end, so
//! consecutive frames play back to back. If the producer stalls, `now` passes
//! the cursor and the next frame simply starts at `now`.
//!
//! Outstanding playbacks live in an arena keyed by [`PlaybackId`]; stopping or
//! completing an id that is already retired does nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, trace};

use super::device::OutputDevice;
use super::frame::AudioFrame;
use crate::error::SessionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackId(u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One scheduled playback, `[start, end)` on the output clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    pub start: Duration,
    pub end: Duration,
}

/// Taken before a chunk is decoded. A ticket issued before an interruption is
/// stale afterwards, and a frame scheduled with it is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTicket {
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Earliest start for the next frame; `None` until the first frame and after
    /// every interruption.
    cursor: Option<Duration>,
    live: BTreeMap<PlaybackId, PlaybackHandle>,
    next_id: u64,
    epoch: u64,
    talking: bool,
    resyncs: u64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> ScheduleTicket {
        ScheduleTicket { epoch: self.epoch }
    }

    /// Schedule `frame` for gapless playback.
    ///
    /// Returns `Ok(None)` when the frame is dropped: the ticket predates an
    /// interruption or the frame is empty. Errors come from the output device.
    pub fn schedule<O: OutputDevice + ?Sized>(
        &mut self,
        ticket: ScheduleTicket,
        frame: &AudioFrame,
        output: &mut O,
    ) -> SessionResult<Option<PlaybackHandle>> {
        if ticket.epoch != self.epoch {
            debug!(
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "Discarding chunk decoded before interruption"
            );
            return Ok(None);
        }
        if frame.is_empty() {
            return Ok(None);
        }

        let now = output.now();
        let start = match self.cursor {
            Some(cursor) if cursor >= now => cursor,
            Some(cursor) => {
                // 生产者跟不上实时播放，从当前时刻重新对齐
                self.resyncs += 1;
                debug!(lag = ?(now - cursor), "Playback underrun, resynchronizing to output clock");
                now
            }
            None => now,
        };

        let id = PlaybackId(self.next_id);
        output.schedule(id, frame, start)?;
        self.next_id += 1;

        let handle = PlaybackHandle {
            id,
            start,
            end: start + frame.duration(),
        };
        self.live.insert(id, handle);
        self.cursor = Some(handle.end);
        self.talking = true;

        trace!(%id, start = ?handle.start, end = ?handle.end, outstanding = self.live.len(), "Scheduled playback");
        Ok(Some(handle))
    }

    /// Natural completion of `id`. Returns true when this ended the talking
    /// state (the last outstanding playback finished).
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        if self.live.remove(&id).is_none() {
            return false;
        }
        if self.live.is_empty() && self.talking {
            self.talking = false;
            return true;
        }
        false
    }

    /// Barge-in: stop everything outstanding and forget the cursor.
    /// Returns true if audio was playing or pending.
    pub fn interrupt<O: OutputDevice + ?Sized>(&mut self, output: &mut O) -> bool {
        self.epoch += 1;
        let stopped = self.live.len();
        for id in self.live.keys() {
            output.stop(*id);
        }
        self.live.clear();
        self.cursor = None;

        if stopped > 0 {
            debug!(stopped, "Interrupted playback");
        }
        std::mem::replace(&mut self.talking, false)
    }

    /// Session teardown: interrupt, then make the device drop anything it
    /// still holds.
    pub fn shutdown<O: OutputDevice + ?Sized>(&mut self, output: &mut O) -> bool {
        let was_talking = self.interrupt(output);
        output.stop_all();
        was_talking
    }

    pub fn cursor(&self) -> Option<Duration> {
        self.cursor
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    pub fn outstanding_len(&self) -> usize {
        self.live.len()
    }

    /// How many times the cursor fell behind the output clock.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}
