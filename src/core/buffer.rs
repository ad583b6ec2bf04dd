//! Adaptive playback buffer decoupling vendor audio production from the
//! telephony playout cadence.
//!
//! Backends generate audio faster than real time; the telephony leg plays it
//! out at a fixed frame interval. This buffer absorbs the mismatch. At
//! capacity the incoming frame is dropped and an overflow is logged; the
//! egress cadence is never stalled to preserve a frame.

use std::collections::VecDeque;

use bytes::Bytes;

/// Utilization fraction at which an informational log is emitted.
const UTILIZATION_INFO: f64 = 0.75;
/// Utilization fraction at which a warning is emitted.
const UTILIZATION_WARN: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum UtilizationZone {
    Normal,
    Elevated,
    High,
}

/// Bounded FIFO of outbound telephony frames.
pub struct PlaybackBuffer {
    frames: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
    zone: UtilizationZone,
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(4_096)),
            capacity: capacity.max(1),
            dropped: 0,
            zone: UtilizationZone::Normal,
        }
    }

    /// Append a frame. At capacity the frame is dropped, the overflow is
    /// logged at error level, and `false` is returned. Never blocks.
    pub fn push(&mut self, frame: Bytes) -> bool {
        if self.frames.len() >= self.capacity {
            self.dropped += 1;
            tracing::error!(
                capacity = self.capacity,
                dropped = self.dropped,
                "Playback buffer overflow, dropping frame"
            );
            return false;
        }

        self.frames.push_back(frame);
        self.log_utilization();
        true
    }

    /// Remove and return the next frame in FIFO order, or `None` when empty.
    /// Never blocks.
    pub fn pop(&mut self) -> Option<Bytes> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.update_zone();
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped due to overflow since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Current occupancy as a fraction of capacity.
    pub fn utilization(&self) -> f64 {
        self.frames.len() as f64 / self.capacity as f64
    }

    /// Discard all queued frames. Used on barge-in so stale vendor audio is
    /// not played over the caller.
    pub fn clear(&mut self) {
        let discarded = self.frames.len();
        self.frames.clear();
        self.zone = UtilizationZone::Normal;
        if discarded > 0 {
            tracing::debug!(discarded, "Playback buffer cleared");
        }
    }

    // Threshold logs fire on upward zone crossings only, so a buffer hovering
    // around a boundary does not flood the log.
    fn log_utilization(&mut self) {
        let previous = self.zone;
        self.update_zone();
        if self.zone > previous {
            match self.zone {
                UtilizationZone::High => tracing::warn!(
                    occupancy = self.frames.len(),
                    capacity = self.capacity,
                    "Playback buffer above 90% utilization"
                ),
                UtilizationZone::Elevated => tracing::info!(
                    occupancy = self.frames.len(),
                    capacity = self.capacity,
                    "Playback buffer above 75% utilization"
                ),
                UtilizationZone::Normal => {}
            }
        }
    }

    fn update_zone(&mut self) {
        let utilization = self.utilization();
        self.zone = if utilization >= UTILIZATION_WARN {
            UtilizationZone::High
        } else if utilization >= UTILIZATION_INFO {
            UtilizationZone::Elevated
        } else {
            UtilizationZone::Normal
        };
    }
}
