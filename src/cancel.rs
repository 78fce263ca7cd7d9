//! The per-session cancel signal (spec §5): "a single atomic `cancel_gen`
//! signal per session, re-armed on each new turn... edge-triggered —
//! observers must latch once."
//!
//! Adapted from the teacher's `Arc<AtomicBool>` interrupt flag
//! (`llm::generate_response`'s `interrupt` parameter), generalised into a
//! small type so every worker shares one `Clone`-able handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An edge-triggered, re-armable cancel signal shared by every per-session
/// worker.
#[derive(Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create a fresh, unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` if this call performed the
    /// unset-to-set transition (spec §8 invariant 2: cancel idempotence —
    /// only the first of N>1 calls during one phase should trigger
    /// side effects like the MediaTransport `clear`).
    pub fn fire(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether the signal is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the signal for the next turn.
    pub fn rearm(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_fire_reports_the_transition() {
        let signal = CancelSignal::new();
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_set());
    }

    #[test]
    fn rearm_allows_firing_again() {
        let signal = CancelSignal::new();
        assert!(signal.fire());
        signal.rearm();
        assert!(!signal.is_set());
        assert!(signal.fire());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelSignal::new();
        let b = a.clone();
        assert!(a.fire());
        assert!(b.is_set());
    }
}
