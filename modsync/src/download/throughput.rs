//! Smoothed transfer rate over a fixed window of progress samples.

use std::collections::VecDeque;

use tokio::time::Instant;

/// Number of progress markers retained per transfer.
pub const THROUGHPUT_SLOTS: usize = 10;

/// Ring buffer of `(instant, bytes_so_far)` markers.
///
/// The rate is measured between the oldest and newest marker, which smooths
/// per-sample jitter while keeping memory fixed.
#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    markers: VecDeque<(Instant, u64)>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self {
            markers: VecDeque::with_capacity(THROUGHPUT_SLOTS),
        }
    }

    /// Append a marker, dropping the oldest when the buffer is full.
    pub fn record(&mut self, at: Instant, bytes: u64) {
        if self.markers.len() == THROUGHPUT_SLOTS {
            self.markers.pop_front();
        }
        self.markers.push_back((at, bytes));
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Bytes per second across the window, 0 with fewer than two markers.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.markers.front(), self.markers.back()) else {
            return 0.0;
        };
        if self.markers.len() < 2 {
            return 0.0;
        }

        let elapsed = t1.saturating_duration_since(t0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        b1.saturating_sub(b0) as f64 / elapsed
    }
}
