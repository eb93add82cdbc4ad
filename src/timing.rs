//! Millisecond timekeeping on a wrapping 32-bit clock.
//!
//! Every comparison goes through [`elapsed_ms`] so the scheduler keeps working
//! after the counter wraps (about every 49.7 days).

use std::time::Instant;

/// Signed time from `since` to `now`, correct across a wrap of the counter.
pub fn elapsed_ms(now: u32, since: u32) -> i32 {
    now.wrapping_sub(since) as i32
}

/// Millisecond counter since start, truncated to 32 bits like a firmware tick.
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// A fixed period task timer.
#[derive(Clone, Copy, Debug)]
pub struct Interval {
    period_ms: u32,
    last_ms: u32,
}

impl Interval {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_ms: 0,
        }
    }

    /// True once per period; marks the tick as consumed.
    pub fn ready(&mut self, now: u32) -> bool {
        if elapsed_ms(now, self.last_ms) >= self.period_ms as i32 {
            self.last_ms = now;
            true
        } else {
            false
        }
    }
}

/// Exponential reconnect backoff: doubles on every attempt up to `max_ms`,
/// back to `base_ms` once a connection succeeds.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    base_ms: u32,
    max_ms: u32,
    current_ms: u32,
    next_try_ms: u32,
}

impl Backoff {
    pub fn new(base_ms: u32, max_ms: u32) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            current_ms: base_ms,
            next_try_ms: 0,
        }
    }

    pub fn current_ms(&self) -> u32 {
        self.current_ms
    }

    pub fn due(&self, now: u32) -> bool {
        elapsed_ms(now, self.next_try_ms) >= 0
    }

    /// Book an attempt made at `now`. Returns the wait before the next one.
    pub fn schedule_retry(&mut self, now: u32) -> u32 {
        let wait = self.current_ms;
        self.next_try_ms = now.wrapping_add(wait);
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        wait
    }

    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}
