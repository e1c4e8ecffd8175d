use std::sync::Mutex;

use crate::PollingSummary;

/// Receives the [`PollingSummary`] of each query execution.
///
/// The core only produces summaries; how they are rendered (test report
/// attachments, log lines, nothing at all) is the sink's business.
pub trait ReportSink: Send + Sync {
    fn attach(&self, operation: &str, summary: &PollingSummary);
}

/// Default sink: logs each summary through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn attach(&self, operation: &str, summary: &PollingSummary) {
        if summary.success {
            tracing::debug!(
                operation,
                attempts = summary.attempts,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "polling succeeded"
            );
        } else {
            tracing::info!(
                operation,
                attempts = summary.attempts,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                reason = summary.timeout_reason.as_deref().unwrap_or(""),
                "polling failed"
            );
        }
    }
}

/// Sink that keeps every summary in memory, for asserting on polling
/// behavior in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(String, PollingSummary)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded (operation, summary) pairs, in attachment order.
    pub fn records(&self) -> Vec<(String, PollingSummary)> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ReportSink for RecordingSink {
    fn attach(&self, operation: &str, summary: &PollingSummary) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((operation.to_string(), summary.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary(success: bool) -> PollingSummary {
        PollingSummary {
            attempts: 2,
            elapsed: Duration::from_millis(410),
            success,
            ..PollingSummary::default()
        }
    }

    #[test]
    fn recording_sink_keeps_summaries_in_order() {
        let sink = RecordingSink::new();
        sink.attach("consume orders", &summary(true));
        sink.attach("consume payments", &summary(false));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "consume orders");
        assert!(records[0].1.success);
        assert!(!records[1].1.success);
    }

    #[test]
    fn tracing_sink_accepts_both_outcomes() {
        let sink = TracingSink;
        sink.attach("op", &summary(true));
        sink.attach("op", &summary(false));
    }
}
