//! Single-retry recovery policy for transient upstream failures (spec §4.8,
//! §7): "close and reopen the channel once; on second failure, degrade."
//!
//! Adapted from the teacher's multi-provider `FallbackChain`, simplified
//! because this core has exactly one upstream per collaborator rather than
//! an ordered list of providers to fall through.

use tracing::warn;

/// Tracks whether a transient failure has already been retried once for a
/// given upstream.
#[derive(Debug, Default)]
pub struct RetryOnce {
    retried: bool,
}

/// What the caller should do after reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reopen the upstream and try again.
    RetryOnce,
    /// Give up: degrade (speak an apology, fall back to a safe state).
    Degrade,
}

impl RetryOnce {
    /// Create a fresh tracker, armed for one retry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a transient failure from `context` (used only for logging)
    /// and get the decision: retry once, or degrade.
    pub fn report_failure(&mut self, context: &str) -> RetryDecision {
        if self.retried {
            warn!(context, "upstream failed twice, degrading");
            RetryDecision::Degrade
        } else {
            self.retried = true;
            warn!(context, "upstream failed once, retrying");
            RetryDecision::RetryOnce
        }
    }

    /// Reset the tracker after a successful recovery, re-arming the single
    /// retry for the next failure.
    pub fn reset(&mut self) {
        self.retried = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_retries_second_degrades() {
        let mut r = RetryOnce::new();
        assert_eq!(r.report_failure("stt"), RetryDecision::RetryOnce);
        assert_eq!(r.report_failure("stt"), RetryDecision::Degrade);
    }

    #[test]
    fn reset_rearms_the_retry() {
        let mut r = RetryOnce::new();
        assert_eq!(r.report_failure("stt"), RetryDecision::RetryOnce);
        r.reset();
        assert_eq!(r.report_failure("stt"), RetryDecision::RetryOnce);
    }
}
