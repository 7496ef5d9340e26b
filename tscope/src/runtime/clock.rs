//! Monotonic clock and short thread identity for the hot path.
//!
//! Both functions are called from hook-invoking threads only; neither
//! blocks nor allocates. The clock is monotonic relative to tracer init,
//! not wall-clock; the wall-clock epoch is captured once as run metadata.

#![allow(unsafe_code)] // gettid() requires unsafe

use std::cell::Cell;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic run clock. The epoch is captured at tracer init.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
    wall_epoch_ms: u64,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        let wall_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(0));
        Self { epoch: Instant::now(), wall_epoch_ms }
    }

    /// Nanoseconds since tracer init.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Milliseconds since tracer init (buffer-event timestamps).
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }

    /// Wall-clock epoch of tracer init, milliseconds since the Unix epoch.
    /// Recorded once so consumers can render human-readable times; all
    /// runtime comparisons use the monotonic deltas.
    #[must_use]
    pub fn wall_epoch_ms(&self) -> u64 {
        self.wall_epoch_ms
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    // Cached so the hook never repeats the syscall
    static SHORT_TID: Cell<u16> = const { Cell::new(0) };
}

/// Short thread identifier, stable within the process.
///
/// The OS thread id truncated to 16 bits; cached per thread after the
/// first call. Zero is never returned (a zero truncation maps to 1) so a
/// zeroed record field always means "never filled in".
#[must_use]
pub fn short_thread_id() -> u16 {
    SHORT_TID.with(|cell| {
        let cached = cell.get();
        if cached != 0 {
            return cached;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut tid = (unsafe { libc::gettid() }) as u16;
        if tid == 0 {
            tid = 1;
        }
        cell.set(tid);
        tid
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_epoch_is_plausible() {
        let clock = Clock::new();
        // After 2020-01-01 in ms
        assert!(clock.wall_epoch_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_thread_id_stable_and_nonzero() {
        let a = short_thread_id();
        let b = short_thread_id();
        assert_ne!(a, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_thread_ids_differ_across_threads() {
        let here = short_thread_id();
        let there = std::thread::spawn(short_thread_id).join().unwrap();
        // Truncation collisions are possible in principle, never for two
        // adjacent tids
        assert_ne!(here, there);
    }
}
