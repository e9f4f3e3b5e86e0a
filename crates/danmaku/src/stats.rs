//! Counters for a client session.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::DecodeReport;

#[derive(Debug, Default)]
pub(crate) struct ClientStats {
    buffers: AtomicU64,
    frames: AtomicU64,
    events: AtomicU64,
    dropped_frames: AtomicU64,
    dropped_messages: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_failed: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Inbound buffers read from the transport.
    pub buffers: u64,
    /// Frames decoded from those buffers.
    pub frames: u64,
    /// Events pushed to the output queue.
    pub events: u64,
    /// Frames lost while decoding (bad compression, unknown version).
    pub dropped_frames: u64,
    /// Frames that decoded but could not be classified.
    pub dropped_messages: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_failed: u64,
    pub reconnects: u64,
}

impl ClientStats {
    pub fn record_buffer(&self, frames: usize, report: &DecodeReport) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        self.dropped_frames
            .fetch_add(report.dropped() as u64, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_message(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self, ok: bool) {
        if ok {
            self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buffers: self.buffers.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_failed: self.heartbeats_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
