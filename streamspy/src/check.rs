use std::fmt;

/// Outcome of one predicate evaluated against a fetch result.
///
/// `retryable` is only meaningful when the check failed: a retryable
/// failure lets the [polling engine](crate::poll) try again while time
/// remains, a fatal one stops it immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    ok: bool,
    retryable: bool,
    reason: String,
}

impl CheckResult {
    /// A passing check.
    pub fn pass() -> Self {
        Self {
            ok: true,
            retryable: false,
            reason: String::new(),
        }
    }

    /// A failure worth retrying while time remains.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            retryable: true,
            reason: reason.into(),
        }
    }

    /// A failure that retrying cannot fix; polling stops immediately.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            retryable: false,
            reason: reason.into(),
        }
    }

    /// True if the check passed.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// True if this failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Human-readable failure reason; empty for passing checks.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            write!(f, "ok")
        } else if self.retryable {
            write!(f, "retryable: {}", self.reason)
        } else {
            write!(f, "fatal: {}", self.reason)
        }
    }
}

/// A predicate evaluated against each successful fetch result, in
/// declaration order.
///
/// Fetch errors and absent results never reach the checks: the engine
/// converts those into synthetic retryable failures first (so declare
/// cheap structural checks before expensive value checks: the first
/// fatal reason encountered wins).
pub type Check<T> = Box<dyn Fn(&T) -> CheckResult + Send + Sync>;
