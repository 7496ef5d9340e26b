//! Token and phase tracking across decode calls.
//!
//! The engine processes tokens strictly sequentially: every op for token N
//! completes before token N+1 begins, and only the decode-calling thread
//! writes here. Relaxed atomics are the Rust rendering of that
//! single-sequential-writer contract; hook-side reads cost nothing.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::domain::Phase;

#[derive(Debug)]
pub struct TokenPhaseTracker {
    token: AtomicU32,
    phase: AtomicU8,
    started: AtomicBool,
}

impl TokenPhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: AtomicU32::new(0),
            phase: AtomicU8::new(Phase::Prompt.as_wire()),
            started: AtomicBool::new(false),
        }
    }

    /// Mark the start of a decode call. The first call yields token 0;
    /// each subsequent call advances the counter. The phase transition
    /// point (prompt -> generate) is the engine's to declare.
    pub fn begin_decode(&self, phase: Phase) -> u32 {
        let token = if self.started.swap(true, Ordering::Relaxed) {
            self.token.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            0
        };
        self.phase.store(phase.as_wire(), Ordering::Relaxed);
        token
    }

    /// Values the hook stamps into each record. Constant for the duration
    /// of one decode call.
    #[must_use]
    pub fn current(&self) -> (u32, Phase) {
        (
            self.token.load(Ordering::Relaxed),
            Phase::from_wire(self.phase.load(Ordering::Relaxed)),
        )
    }
}

impl Default for TokenPhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        let tracker = TokenPhaseTracker::new();
        assert_eq!(tracker.begin_decode(Phase::Prompt), 0);
        assert_eq!(tracker.current(), (0, Phase::Prompt));
    }

    #[test]
    fn test_counter_advances_per_decode() {
        let tracker = TokenPhaseTracker::new();
        assert_eq!(tracker.begin_decode(Phase::Prompt), 0);
        assert_eq!(tracker.begin_decode(Phase::Generate), 1);
        assert_eq!(tracker.begin_decode(Phase::Generate), 2);
        assert_eq!(tracker.current(), (2, Phase::Generate));
    }

    #[test]
    fn test_phase_flips_at_declared_boundary() {
        let tracker = TokenPhaseTracker::new();
        tracker.begin_decode(Phase::Prompt);
        assert_eq!(tracker.current().1, Phase::Prompt);
        tracker.begin_decode(Phase::Generate);
        assert_eq!(tracker.current().1, Phase::Generate);
    }
}
