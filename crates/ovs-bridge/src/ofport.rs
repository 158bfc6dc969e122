//! Waiting for the switch to assign an OpenFlow port number
//!
//! Right after `add-port` the `ofport` column may still read `[]` (or
//! nothing at all). [`OfportWaiter`] polls it with exponential backoff until
//! an integer shows up or the deadline passes, in which case it settles on
//! [`INVALID_OFPORT`] instead of failing.

use ovs_agent_common::OvsResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::INVALID_OFPORT;

/// First wait between polls
pub const INITIAL_WAIT: Duration = Duration::from_millis(10);

/// Upper bound on a single wait between polls
pub const MAX_WAIT: Duration = Duration::from_millis(1000);

/// Parses a raw `ofport` column value. Anything that is not an integer
/// (`[]`, `["set", []]`, empty output) is still pending.
pub fn parse_ofport(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// True while the switch has not reported an integer ofport yet
pub fn ofport_result_pending(raw: Option<&str>) -> bool {
    parse_ofport(raw).is_none()
}

/// Bounded exponential-backoff poller for port numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfportWaiter {
    deadline: Duration,
    initial_wait: Duration,
    max_wait: Duration,
}

impl OfportWaiter {
    /// Creates a waiter that gives up after `deadline` has elapsed
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            initial_wait: INITIAL_WAIT,
            max_wait: MAX_WAIT,
        }
    }

    /// Overrides the backoff bounds (builder pattern)
    pub fn with_backoff(mut self, initial_wait: Duration, max_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self.max_wait = max_wait.max(initial_wait);
        self
    }

    /// Total time budget
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Polls `query` until it yields an integer ofport.
    ///
    /// Each wait doubles the previous one, capped at the max wait, and is
    /// clipped so the last poll happens at the deadline. Returns
    /// [`INVALID_OFPORT`] once the deadline has passed. Errors from `query`
    /// are returned as-is.
    pub async fn wait<F, Fut>(&self, mut query: F) -> OvsResult<i32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OvsResult<Option<String>>>,
    {
        let start = Instant::now();
        let mut wait = self.initial_wait;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let raw = query().await?;
            if let Some(ofport) = parse_ofport(raw.as_deref()) {
                debug!(ofport, attempt, "ofport assigned");
                return Ok(ofport);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.deadline {
                warn!(
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    last_value = ?raw,
                    "Timed out waiting for ofport assignment"
                );
                return Ok(INVALID_OFPORT);
            }

            let sleep_for = wait.min(self.deadline - elapsed);
            debug!(attempt, wait_ms = sleep_for.as_millis() as u64, "ofport pending, retrying");
            tokio::time::sleep(sleep_for).await;
            wait = wait.saturating_mul(2).min(self.max_wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs_agent_common::OvsError;
    use std::cell::Cell;

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(5),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    #[test]
    fn test_pending_classification() {
        assert!(ofport_result_pending(None));
        assert!(ofport_result_pending(Some("")));
        assert!(ofport_result_pending(Some("[]")));
        assert!(ofport_result_pending(Some("[\"set\", []]")));
        assert!(!ofport_result_pending(Some("5\n")));
        assert!(!ofport_result_pending(Some("-1")));
        assert_eq!(parse_ofport(Some(" 12 ")), Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_pending() {
        let calls = Cell::new(0u32);
        let waiter = OfportWaiter::new(Duration::from_secs(10));

        let ofport = waiter
            .wait(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    Ok(if n <= 3 {
                        Some("[]".to_string())
                    } else {
                        Some("7".to_string())
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(ofport, 7);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let start = Instant::now();
        let calls = Cell::new(0u32);
        let waiter = OfportWaiter::new(Duration::from_secs(10));

        waiter
            .wait(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Ok((n > 4).then(|| "3".to_string())) }
            })
            .await
            .unwrap();

        // 10 + 20 + 40 + 80 ms of sleeping before the fifth poll
        assert_elapsed(start, Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped() {
        let start = Instant::now();
        let calls = Cell::new(0u32);
        let waiter = OfportWaiter::new(Duration::from_secs(60));

        waiter
            .wait(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Ok((n > 10).then(|| "3".to_string())) }
            })
            .await
            .unwrap();

        // 10..640 doubling for seven waits, then capped at 1000 for three more
        assert_elapsed(start, Duration::from_millis(1270 + 3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_resolves_returns_invalid() {
        let start = Instant::now();
        let waiter = OfportWaiter::new(Duration::from_secs(2));

        let ofport = waiter
            .wait(|| async { Ok(Some("[]".to_string())) })
            .await
            .unwrap();

        assert_eq!(ofport, INVALID_OFPORT);
        assert_elapsed(start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_bounds_do_not_overflow() {
        let start = Instant::now();
        let calls = Cell::new(0u32);
        let waiter = OfportWaiter::new(Duration::from_secs(2))
            .with_backoff(Duration::from_secs(u64::MAX / 2 + 1), Duration::MAX);

        let ofport = waiter
            .wait(|| {
                calls.set(calls.get() + 1);
                async { Ok(Some("[]".to_string())) }
            })
            .await
            .unwrap();

        assert_eq!(ofport, INVALID_OFPORT);
        assert_eq!(calls.get(), 2);
        assert_elapsed(start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_polls_once() {
        let calls = Cell::new(0u32);
        let waiter = OfportWaiter::new(Duration::ZERO);

        let ofport = waiter
            .wait(|| {
                calls.set(calls.get() + 1);
                async { Ok(None) }
            })
            .await
            .unwrap();

        assert_eq!(ofport, INVALID_OFPORT);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_propagates() {
        let waiter = OfportWaiter::new(Duration::from_secs(1));
        let result = waiter
            .wait(|| async { Err(OvsError::invalid_flow("boom")) })
            .await;
        assert!(result.is_err());
    }
}
