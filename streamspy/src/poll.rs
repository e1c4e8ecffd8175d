//! The retry/polling engine.
//!
//! [`execute`] repeatedly invokes a caller-supplied fetch operation and
//! evaluates a list of [`Check`]s against each result, until every check
//! passes, one fails fatally, the timeout elapses, or the caller cancels.
//! The engine runs on the calling task and suspends only on the sleep
//! between attempts.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::{Check, Error, PollConfig, Result};

/// Selects between a single attempt and poll-with-backoff behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Exactly one attempt, no retry, regardless of outcome.
    Sync,
    /// Poll with backoff until success, a fatal failure, or timeout.
    #[default]
    Async,
}

/// Accumulated record of one engine execution, attached to the report
/// sink after the run and then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct PollingSummary {
    pub attempts: u32,
    pub elapsed: Duration,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_reason: Option<String>,
}

impl PollingSummary {
    /// One-line failure message summarizing attempts, elapsed time and
    /// the last failure reasons.
    pub fn failure_message(&self) -> String {
        let reasons = if self.failed_checks.is_empty() {
            self.last_error.clone().unwrap_or_else(|| "unknown".into())
        } else {
            self.failed_checks.join("; ")
        };
        format!(
            "failed after {} attempt(s) in {:?}: {}",
            self.attempts, self.elapsed, reasons
        )
    }
}

/// Execute `fetch` under the given mode and timing policy, evaluating
/// `checks` against each present result in declaration order.
///
/// The contract with `fetch`:
/// - `Err(e)` is converted into a synthetic check failure whose
///   retryability follows [`Error::is_retryable`], so a transient
///   transport blip does not abort polling early;
/// - `Ok(None)` means "not yet available": a retryable failure, never
///   success;
/// - `Ok(Some(value))` runs the checks; evaluation stops at the first
///   fatal failure, whose reason is reported even if later checks would
///   also fail.
///
/// Returns the last fetched value (even when checks failed, so callers
/// can report what they saw) together with the summary. The timeout is
/// wall-clock from the first attempt; an attempt in progress when it
/// fires completes, but no new attempt starts afterwards.
pub async fn execute<T, F, Fut>(
    mode: ExecutionMode,
    policy: &PollConfig,
    cancel: &CancellationToken,
    mut fetch: F,
    checks: &[Check<T>],
) -> (Option<T>, PollingSummary)
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout();
    let mut summary = PollingSummary::default();
    let mut delay = policy.interval();
    let mut last_value: Option<T> = None;

    loop {
        summary.attempts += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return finish_cancelled(summary, started, last_value);
            }
            outcome = fetch(cancel.clone()) => outcome,
        };

        summary.failed_checks.clear();
        let mut all_ok = true;
        let mut has_fatal = false;

        match outcome {
            Err(err) => {
                all_ok = false;
                has_fatal = !err.is_retryable();
                summary.last_error = Some(err.to_string());
                summary.failed_checks.push(err.to_string());
            }
            Ok(None) => {
                all_ok = false;
                summary
                    .failed_checks
                    .push("result not yet available".to_string());
            }
            Ok(Some(value)) => {
                for check in checks {
                    let result = check(&value);
                    if result.is_ok() {
                        continue;
                    }
                    all_ok = false;
                    summary.failed_checks.push(result.reason().to_string());
                    if !result.is_retryable() {
                        has_fatal = true;
                        break;
                    }
                }
                last_value = Some(value);
            }
        }

        summary.elapsed = started.elapsed();

        if all_ok {
            summary.success = true;
            return (last_value, summary);
        }

        if mode == ExecutionMode::Sync {
            return (last_value, summary);
        }

        if has_fatal {
            summary.timeout_reason = Some("non-retryable failure".to_string());
            return (last_value, summary);
        }

        if Instant::now() >= deadline {
            summary.timeout_reason = Some("timeout".to_string());
            return (last_value, summary);
        }

        let sleep_for = next_delay(&mut delay, summary.attempts, policy);
        if let Some(first) = summary.failed_checks.first() {
            tracing::debug!(
                attempt = summary.attempts,
                failed = summary.failed_checks.len(),
                delay_ms = sleep_for.as_millis() as u64,
                reason = %truncate_reason(first),
                "retrying"
            );
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return finish_cancelled(summary, started, last_value);
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn finish_cancelled<T>(
    mut summary: PollingSummary,
    started: Instant,
    last_value: Option<T>,
) -> (Option<T>, PollingSummary) {
    summary.elapsed = started.elapsed();
    summary.last_error = Some(Error::Cancelled.to_string());
    summary.timeout_reason = Some("cancelled".to_string());
    (last_value, summary)
}

/// Advance the inter-attempt delay: exponential backoff capped at the
/// configured maximum, then proportional jitter. A jitter draw that
/// would go non-positive falls back to the base interval.
fn next_delay(current: &mut Duration, attempt: u32, policy: &PollConfig) -> Duration {
    let mut delay = *current;
    let backoff = policy.backoff();

    if backoff.enabled && attempt > 1 {
        delay = delay.mul_f64(backoff.factor).min(backoff.max_interval);
        *current = delay;
    }

    if policy.jitter() > 0.0 {
        let amount = delay.as_secs_f64() * policy.jitter();
        let delta = (rand::random::<f64>() * 2.0 - 1.0) * amount;
        let jittered = delay.as_secs_f64() + delta;
        if jittered <= 0.0 {
            return policy.interval();
        }
        delay = Duration::from_secs_f64(jittered);
    }

    delay
}

/// Cap a failure reason for log output.
pub(crate) fn truncate_reason(reason: &str) -> String {
    const MAX_LEN: usize = 80;
    const KEEP: usize = 20;

    if reason.chars().count() <= MAX_LEN {
        return reason.to_string();
    }
    let kept: String = reason.chars().take(KEEP).collect();
    format!("{kept}... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckResult;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> PollConfig {
        PollConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_interval(Duration::from_millis(10))
            .without_backoff()
            .with_jitter(0.0)
    }

    fn no_checks() -> Vec<crate::Check<u32>> {
        Vec::new()
    }

    #[tokio::test]
    async fn sync_mode_performs_exactly_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (value, summary) = execute(
            ExecutionMode::Sync,
            &fast_policy(),
            &CancellationToken::new(),
            move |_| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None::<u32>)
                }
            },
            &no_checks(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.attempts, 1);
        assert!(!summary.success);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn async_mode_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (value, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &CancellationToken::new(),
            move |_| {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n >= 3 { Ok(Some(n)) } else { Ok(None) }
                }
            },
            &no_checks(),
        )
        .await;

        assert!(summary.success);
        assert_eq!(summary.attempts, 3);
        assert_eq!(value, Some(3));
    }

    #[tokio::test]
    async fn no_new_attempt_after_timeout() {
        let policy = fast_policy().with_timeout(Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (_, summary) = execute(
            ExecutionMode::Async,
            &policy,
            &CancellationToken::new(),
            move |_| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None::<u32>)
                }
            },
            &no_checks(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!summary.success);
        assert_eq!(summary.timeout_reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn timeout_budget_bounds_attempts() {
        let policy = fast_policy()
            .with_timeout(Duration::from_millis(50))
            .with_interval(Duration::from_millis(20));

        let (_, summary) = execute(
            ExecutionMode::Async,
            &policy,
            &CancellationToken::new(),
            |_| async { Ok(None::<u32>) },
            &no_checks(),
        )
        .await;

        assert!(!summary.success);
        assert_eq!(summary.timeout_reason.as_deref(), Some("timeout"));
        // ~50ms budget at 20ms intervals: a handful of attempts, not
        // hundreds, and at least the first two.
        assert!(summary.attempts >= 2, "attempts: {}", summary.attempts);
        assert!(summary.attempts <= 5, "attempts: {}", summary.attempts);
    }

    #[tokio::test]
    async fn fatal_check_halts_immediately_despite_remaining_budget() {
        let checks: Vec<crate::Check<u32>> =
            vec![Box::new(|_| CheckResult::fatal("shape mismatch"))];

        let started = Instant::now();
        let (_, summary) = execute(
            ExecutionMode::Async,
            &fast_policy().with_timeout(Duration::from_secs(30)),
            &CancellationToken::new(),
            |_| async { Ok(Some(7u32)) },
            &checks,
        )
        .await;

        assert_eq!(summary.attempts, 1);
        assert!(!summary.success);
        assert_eq!(
            summary.timeout_reason.as_deref(),
            Some("non-retryable failure")
        );
        assert_eq!(summary.failed_checks, vec!["shape mismatch"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn first_fatal_wins_over_later_checks() {
        let later_ran = Arc::new(AtomicU32::new(0));
        let later_ran2 = later_ran.clone();
        let checks: Vec<crate::Check<u32>> = vec![
            Box::new(|_| CheckResult::retryable("still waiting")),
            Box::new(|_| CheckResult::fatal("broken shape")),
            Box::new(move |_| {
                later_ran2.fetch_add(1, Ordering::SeqCst);
                CheckResult::fatal("should never be evaluated")
            }),
        ];

        let (_, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &CancellationToken::new(),
            |_| async { Ok(Some(1u32)) },
            &checks,
        )
        .await;

        assert_eq!(summary.attempts, 1);
        assert_eq!(
            summary.failed_checks,
            vec!["still waiting", "broken shape"]
        );
        assert_eq!(later_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (value, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &CancellationToken::new(),
            move |_| {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(Error::external(std::io::Error::other("connection reset")))
                    } else {
                        Ok(Some(n))
                    }
                }
            },
            &no_checks(),
        )
        .await;

        assert!(summary.success);
        assert_eq!(summary.attempts, 3);
        assert_eq!(value, Some(3));
    }

    #[tokio::test]
    async fn fatal_fetch_error_stops_polling() {
        let (_, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &CancellationToken::new(),
            |_| async {
                Err::<Option<u32>, _>(Error::TopicNotConfigured {
                    topic: "typo".into(),
                    configured: vec!["orders".into()],
                })
            },
            &no_checks(),
        )
        .await;

        assert_eq!(summary.attempts, 1);
        assert!(!summary.success);
        assert_eq!(
            summary.timeout_reason.as_deref(),
            Some("non-retryable failure")
        );
        assert!(summary.last_error.unwrap().contains("typo"));
    }

    #[tokio::test]
    async fn empty_result_is_not_success() {
        let (value, summary) = execute(
            ExecutionMode::Sync,
            &fast_policy(),
            &CancellationToken::new(),
            |_| async { Ok(None::<u32>) },
            &no_checks(),
        )
        .await;

        assert!(!summary.success);
        assert!(value.is_none());
        assert_eq!(summary.failed_checks, vec!["result not yet available"]);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_fetching() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (_, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &cancel,
            move |_| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(1u32))
                }
            },
            &no_checks(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!summary.success);
        assert_eq!(summary.timeout_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn cancellation_during_sleep_stops_polling() {
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel2.cancel();
        });

        let policy = fast_policy()
            .with_timeout(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let (_, summary) = execute(
            ExecutionMode::Async,
            &policy,
            &cancel,
            |_| async { Ok(None::<u32>) },
            &no_checks(),
        )
        .await;

        assert!(!summary.success);
        assert_eq!(summary.timeout_reason.as_deref(), Some("cancelled"));
        assert!(summary.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn checks_pass_on_matching_result() {
        let checks: Vec<crate::Check<u32>> = vec![
            Box::new(|v| {
                if *v > 0 {
                    CheckResult::pass()
                } else {
                    CheckResult::retryable("not positive yet")
                }
            }),
            Box::new(|v| {
                if *v == 42 {
                    CheckResult::pass()
                } else {
                    CheckResult::retryable(format!("value is {v}, want 42"))
                }
            }),
        ];

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let (value, summary) = execute(
            ExecutionMode::Async,
            &fast_policy(),
            &CancellationToken::new(),
            move |_| {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(if n >= 1 { 42u32 } else { 7u32 }))
                }
            },
            &checks,
        )
        .await;

        assert!(summary.success);
        assert_eq!(summary.attempts, 2);
        assert_eq!(value, Some(42));
        assert!(summary.failed_checks.is_empty());
    }

    #[test]
    fn backoff_sequence_grows_and_caps() {
        let policy = PollConfig::default().with_jitter(0.0);
        let mut delay = policy.interval();

        // Attempt 1 keeps the base interval
        assert_eq!(
            next_delay(&mut delay, 1, &policy),
            Duration::from_millis(200)
        );
        assert_eq!(
            next_delay(&mut delay, 2, &policy),
            Duration::from_millis(300)
        );
        assert_eq!(
            next_delay(&mut delay, 3, &policy),
            Duration::from_millis(450)
        );
        assert_eq!(
            next_delay(&mut delay, 4, &policy),
            Duration::from_millis(675)
        );
        // 1012.5ms caps at 1s
        assert_eq!(next_delay(&mut delay, 5, &policy), Duration::from_secs(1));
        assert_eq!(next_delay(&mut delay, 6, &policy), Duration::from_secs(1));
    }

    #[test]
    fn disabled_backoff_keeps_fixed_interval() {
        let policy = PollConfig::default().without_backoff().with_jitter(0.0);
        let mut delay = policy.interval();
        for attempt in 1..6 {
            assert_eq!(
                next_delay(&mut delay, attempt, &policy),
                Duration::from_millis(200)
            );
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = PollConfig::default().without_backoff().with_jitter(0.2);
        let mut delay = policy.interval();
        for _ in 0..100 {
            let d = next_delay(&mut delay, 1, &policy);
            assert!(d >= Duration::from_millis(160), "{d:?}");
            assert!(d <= Duration::from_millis(240), "{d:?}");
        }
    }

    #[test]
    fn truncate_reason_caps_long_strings() {
        let short = "short reason";
        assert_eq!(truncate_reason(short), short);

        let long = "x".repeat(200);
        let truncated = truncate_reason(&long);
        assert!(truncated.len() < 60);
        assert!(truncated.ends_with("[truncated]"));
    }

    #[test]
    fn failure_message_includes_attempts_and_reasons() {
        let summary = PollingSummary {
            attempts: 4,
            elapsed: Duration::from_millis(812),
            success: false,
            last_error: None,
            failed_checks: vec!["message not found".into()],
            timeout_reason: Some("timeout".into()),
        };
        let msg = summary.failure_message();
        assert!(msg.contains("4 attempt(s)"));
        assert!(msg.contains("message not found"));
    }
}
