//! Sliding-window rate limiter for terminal creation and resize requests.
//!
//! Keeps per-address attempt timestamps and rejects a request once the
//! address has used up its allowance within the rolling window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Requests allowed per address and window unless configured otherwise.
pub const DEFAULT_MAX_REQUESTS: u32 = 50;

/// Window length in seconds unless configured otherwise.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Per-address sliding-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed within the window.
    max_requests: u32,
    window: Duration,
    /// Address → timestamps of requests still inside the window.
    entries: HashMap<IpAddr, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            entries: HashMap::new(),
        }
    }

    /// Record a request from `addr` if it is within its allowance.
    ///
    /// Returns `false` when the request must be rejected.
    pub fn check_and_record(&mut self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let cutoff = self.cutoff(now);

        let attempts = self.entries.entry(addr).or_default();
        if let Some(cutoff) = cutoff {
            attempts.retain(|t| *t > cutoff);
        }

        if attempts.len() as u32 >= self.max_requests {
            return false;
        }

        attempts.push(now);
        true
    }

    /// Drop addresses with no requests left inside the window.
    pub fn gc(&mut self) {
        let Some(cutoff) = self.cutoff(Instant::now()) else {
            return;
        };
        self.entries.retain(|_, attempts| {
            attempts.retain(|t| *t > cutoff);
            !attempts.is_empty()
        });
    }

    /// Number of addresses currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// `None` while the process is younger than the window.
    fn cutoff(&self, now: Instant) -> Option<Instant> {
        now.checked_sub(self.window)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}
