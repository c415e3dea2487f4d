//! Fixed-delay polling
//!
//! Both waits in a coordinator run go through [`poll_until`]: the bounded
//! wait for a prior daemon instance to exit, and the unbounded wait for the
//! local daemon to become ready. The bound is part of the policy so the two
//! cannot be confused at the call site.

use crate::common::{Error, Result};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBound {
    /// Give up after this many probes (at least one probe is always made)
    Attempts(u32),
    /// Never give up
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub delay: Duration,
    pub bound: PollBound,
}

impl PollPolicy {
    pub fn bounded(delay: Duration, attempts: u32) -> Self {
        Self {
            delay,
            bound: PollBound::Attempts(attempts.max(1)),
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            bound: PollBound::Unbounded,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        match self.bound {
            PollBound::Attempts(max) => attempt >= max.max(1),
            PollBound::Unbounded => false,
        }
    }
}

/// Probe until it succeeds, sleeping `policy.delay` between failures.
///
/// `probe` receives the 1-based attempt number. A probe error means "not
/// yet"; unbounded polls log it as a warning, bounded polls at debug level
/// until the last attempt, which is logged as a warning with its cause.
/// Returns the number of attempts it took, or [`Error::PollExhausted`] once
/// a bounded policy runs out.
pub async fn poll_until<F, Fut, T, E>(
    policy: PollPolicy,
    what: &str,
    mut probe: F,
) -> Result<(T, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match probe(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(reason) => {
                if policy.exhausted(attempt) {
                    tracing::warn!(attempt, "giving up on {}: {}", what, reason);
                    return Err(Error::PollExhausted {
                        what: what.to_string(),
                        attempts: attempt,
                        last_error: reason.to_string(),
                    });
                }
                match policy.bound {
                    PollBound::Unbounded => tracing::warn!(
                        attempt,
                        retry_in = ?policy.delay,
                        "{} not ready: {}",
                        what,
                        reason
                    ),
                    PollBound::Attempts(max) => tracing::debug!(
                        attempt,
                        max,
                        "{} not yet: {}",
                        what,
                        reason
                    ),
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// In-memory sink for a scoped fmt subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn matching<'a>(lines: &'a [String], needle: &str) -> Vec<&'a String> {
        lines.iter().filter(|l| l.contains(needle)).collect()
    }

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_poll_exhausts() {
        let started = Instant::now();
        let policy = PollPolicy::bounded(Duration::from_secs(1), 3);
        let mut calls = 0;
        let res = poll_until(policy, "prior instance exit", |_| {
            calls += 1;
            async { Err::<(), _>("still running") }
        })
        .await;

        match res {
            Err(Error::PollExhausted {
                what,
                attempts,
                last_error,
            }) => {
                assert_eq!(what, "prior instance exit");
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "still running");
            }
            other => panic!("expected PollExhausted, got {:?}", other),
        }
        assert_eq!(calls, 3);
        // Two sleeps between three probes, none after the last.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_poll_outlasts_any_bound() {
        let policy = PollPolicy::unbounded(Duration::from_secs(1));
        let (value, attempts) = poll_until(policy, "readiness", |attempt| async move {
            if attempt < 500 {
                Err("connection refused")
            } else {
                Ok(attempt * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(attempts, 500);
        assert_eq!(value, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_does_not_sleep() {
        let started = Instant::now();
        let policy = PollPolicy::bounded(Duration::from_secs(10), 5);
        let (_, attempts) = poll_until(policy, "noop", |_| async { Ok::<_, String>(()) })
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_still_probes_once() {
        let policy = PollPolicy::bounded(Duration::from_millis(1), 0);
        assert_eq!(policy.bound, PollBound::Attempts(1));
        assert!(!policy.exhausted(0));
        assert!(policy.exhausted(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_failures_warn_and_bounded_failures_stay_at_debug() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let readiness = PollPolicy::unbounded(Duration::from_secs(1));
        poll_until(readiness, "local daemon", |attempt| async move {
            if attempt < 3 {
                Err("connection refused")
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        let stop = PollPolicy::bounded(Duration::from_secs(1), 3);
        let res = poll_until(stop, "prior instance exit", |_| async {
            Err::<(), _>("still running")
        })
        .await;
        assert!(res.is_err());

        let lines = captured.lines();

        let not_ready = matching(&lines, "local daemon not ready");
        assert_eq!(not_ready.len(), 2, "{:#?}", lines);
        assert!(not_ready.iter().all(|l| l.contains("WARN")));

        let not_yet = matching(&lines, "prior instance exit not yet");
        assert_eq!(not_yet.len(), 2, "{:#?}", lines);
        assert!(not_yet.iter().all(|l| l.contains("DEBUG")));

        let gave_up = matching(&lines, "giving up on prior instance exit: still running");
        assert_eq!(gave_up.len(), 1, "{:#?}", lines);
        assert!(gave_up[0].contains("WARN"));
    }
}
