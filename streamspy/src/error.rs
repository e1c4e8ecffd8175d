use std::sync::Arc;
use std::time::Duration;

/// The single error type for all streamspy operations.
///
/// Every fallible streamspy API returns `streamspy::Result<T>` (alias for
/// `Result<T, streamspy::Error>`). Errors from lower layers (the broker
/// source, JSON deserialization, task joins) are mapped into variants of
/// this enum so callers only need to handle one error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("No topics configured. Specify at least one topic to listen to.")]
    NoTopicsConfigured,

    #[error("No broker addresses configured.")]
    NoBrokersConfigured,

    #[error("Consumer has already started.")]
    AlreadyStarted,

    #[error("Consumer not ready after {0:?}")]
    NotReady(Duration),

    #[error("Topic '{topic}' is not configured to be listened to. Configured topics: {configured:?}")]
    TopicNotConfigured {
        topic: String,
        configured: Vec<String>,
    },

    #[error("Failed to deserialize message from '{topic}' at offset {offset} into {target}: {reason}")]
    Deserialization {
        topic: String,
        offset: i64,
        target: &'static str,
        reason: String,
    },

    #[error(
        "Message in '{topic}' expected once but found {count} within {window_ms}ms window. Filters: {filters}"
    )]
    DuplicateMessage {
        topic: String,
        count: usize,
        window_ms: i64,
        filters: String,
    },

    #[error("Expected {expected} matching messages in '{topic}', found {actual}")]
    CountMismatch {
        topic: String,
        expected: usize,
        actual: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Broker source error: {0}")]
    External(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary broker-client error.
    pub fn external(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::External(Arc::new(e))
    }

    /// True if retrying the operation could change the outcome.
    ///
    /// Shape mismatches, uniqueness violations and misconfigured topics
    /// stay wrong no matter how long the caller polls; everything else is
    /// worth another attempt while time remains. A count shortfall is
    /// retryable (more messages may still arrive), a surplus is not:
    /// waiting longer can only widen the gap.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::CountMismatch {
                expected, actual, ..
            } => actual < expected,
            Error::TopicNotConfigured { .. }
            | Error::Deserialization { .. }
            | Error::DuplicateMessage { .. }
            | Error::Cancelled
            | Error::AlreadyStarted
            | Error::NoTopicsConfigured
            | Error::NoBrokersConfigured => false,
            _ => true,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NoTopicsConfigured, Self::NoTopicsConfigured) => true,
            (Self::NoBrokersConfigured, Self::NoBrokersConfigured) => true,
            (Self::AlreadyStarted, Self::AlreadyStarted) => true,
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::NotReady(a), Self::NotReady(b)) => a == b,
            (
                Self::TopicNotConfigured {
                    topic: a,
                    configured: ac,
                },
                Self::TopicNotConfigured {
                    topic: b,
                    configured: bc,
                },
            ) => a == b && ac == bc,
            (
                Self::CountMismatch {
                    topic: a,
                    expected: ae,
                    actual: aa,
                },
                Self::CountMismatch {
                    topic: b,
                    expected: be,
                    actual: ba,
                },
            ) => a == b && ae == be && aa == ba,
            (Self::External(a), Self::External(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(!Error::TopicNotConfigured {
            topic: "t".into(),
            configured: vec![]
        }
        .is_retryable());
        assert!(!Error::Deserialization {
            topic: "t".into(),
            offset: 0,
            target: "T",
            reason: "bad".into()
        }
        .is_retryable());
        assert!(!Error::DuplicateMessage {
            topic: "t".into(),
            count: 2,
            window_ms: 5000,
            filters: "{}".into()
        }
        .is_retryable());
        assert!(!Error::Cancelled.is_retryable());

        assert!(Error::external(std::io::Error::other("boom")).is_retryable());
        assert!(Error::CountMismatch {
            topic: "t".into(),
            expected: 3,
            actual: 1
        }
        .is_retryable());
        assert!(!Error::CountMismatch {
            topic: "t".into(),
            expected: 3,
            actual: 5
        }
        .is_retryable());
    }

    #[test]
    fn topic_not_configured_lists_topics() {
        let err = Error::TopicNotConfigured {
            topic: "orders".into(),
            configured: vec!["payments".into(), "refunds".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("payments"));
        assert!(msg.contains("refunds"));
    }
}
