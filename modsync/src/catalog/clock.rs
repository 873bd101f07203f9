//! Server-relative clock.
//!
//! Locator expiry, rate-limit deadlines and response-cache age are all
//! expressed in catalog server time. [`ServerClock`] tracks the offset between
//! the server's `Date` header and the local wall clock so those comparisons
//! stay correct when the local clock is skewed.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Estimate of the catalog server's current time.
#[derive(Debug, Default)]
pub struct ServerClock {
    offset_secs: AtomicI64,
}

impl ServerClock {
    /// A clock that assumes no skew until a server time is observed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock with a known offset from the local clock.
    pub fn with_offset(offset_secs: i64) -> Self {
        Self {
            offset_secs: AtomicI64::new(offset_secs),
        }
    }

    /// Current server time in unix seconds.
    pub fn now(&self) -> i64 {
        local_unix_time() + self.offset_secs.load(Ordering::Relaxed)
    }

    /// Record a server timestamp observed in a response.
    pub fn observe(&self, server_time: i64) {
        self.offset_secs
            .store(server_time - local_unix_time(), Ordering::Relaxed);
    }

    /// Current offset (server minus local), in seconds.
    pub fn offset(&self) -> i64 {
        self.offset_secs.load(Ordering::Relaxed)
    }
}

fn local_unix_time() -> i64 {
    Utc::now().timestamp()
}
