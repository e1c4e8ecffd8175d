use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::poll::{self, ExecutionMode, PollingSummary};
use crate::{Check, CheckResult, Client, Error, FilterSet, Result, filter, finder};

/// Raw outcome of one buffer search attempt: the selected (most recent)
/// matching payload, every matching payload newest-first, the match
/// count, and the selected event's offset.
///
/// Custom [`Query::check`] predicates receive this per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub raw: Vec<u8>,
    pub all: Vec<Vec<u8>>,
    pub count: usize,
    pub offset: i64,
}

/// Outcome of a [`Query`] execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// Whether a matching message satisfied every expectation in time.
    pub found: bool,
    /// The selected message deserialized into the target shape.
    pub message: Option<T>,
    /// Raw payload of the selected message.
    pub raw: Option<Vec<u8>>,
    /// Raw payloads of every match, newest first.
    pub all_matches: Vec<Vec<u8>>,
    /// Number of matches the final attempt saw.
    pub match_count: usize,
    /// Record of the polling run, also attached to the report sink.
    pub summary: PollingSummary,
}

/// Per-invocation fluent query over a client's buffered events.
///
/// Assembles filters and expectations, then drives one polling engine
/// execution when awaited:
///
/// ```ignore
/// let result = client
///     .query::<OrderCreated>("orders")
///     .filter("payload.type", "ORDER_CREATED")
///     .filter("payload.order_id", order_id)
///     .unique()
///     .await?;
/// assert!(result.found);
/// ```
///
/// In async mode (the default) the query retries with backoff until a
/// matching message satisfies every expectation, a fatal failure occurs,
/// or the timeout elapses. [`ExecutionMode::Sync`] performs exactly one
/// attempt.
pub struct Query<'a, T> {
    client: &'a Client,
    topic: String,
    filters: FilterSet,
    unique: bool,
    window: Duration,
    expected_count: Option<usize>,
    checks: Vec<Check<SearchHit>>,
    mode: ExecutionMode,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    _target: PhantomData<fn() -> T>,
}

impl<'a, T> Query<'a, T> {
    pub(crate) fn new(client: &'a Client, topic: String) -> Self {
        let window = client.config().duplicate_window();
        Self {
            client,
            topic,
            filters: FilterSet::new(),
            unique: false,
            window,
            expected_count: None,
            checks: Vec::new(),
            mode: ExecutionMode::Async,
            timeout: None,
            cancel: None,
            _target: PhantomData,
        }
    }

    /// Require the payload field at `path` to equal `value`. Multiple
    /// filters combine with AND semantics.
    pub fn filter(mut self, path: impl Into<String>, value: impl ToString) -> Self {
        self.filters = self.filters.equals(path, value);
        self
    }

    /// Require the payload array at `path` to contain `value`.
    pub fn filter_contains(mut self, path: impl Into<String>, value: impl ToString) -> Self {
        self.filters = self.filters.contains(path, value);
        self
    }

    /// Require the match to be unique within the client's configured
    /// duplicate window. Finding more than one match inside the window
    /// is a fatal [`Error::DuplicateMessage`].
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Like [`unique`](Self::unique) with an explicit window.
    pub fn unique_within(mut self, window: Duration) -> Self {
        self.unique = true;
        self.window = window;
        self
    }

    /// Require exactly `count` matching messages. Fewer is retried while
    /// time remains; more is a fatal [`Error::CountMismatch`].
    pub fn expect_count(mut self, count: usize) -> Self {
        self.expected_count = Some(count);
        self
    }

    /// Expect the selected message's field at `path` to equal `expected`.
    /// A mismatch is retried: a later message may satisfy the filters
    /// with the expected value.
    pub fn expect_field(mut self, path: impl Into<String>, expected: impl ToString) -> Self {
        let path = path.into();
        let expected = expected.to_string();
        self.checks.push(Box::new(move |hit| {
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&hit.raw) else {
                return CheckResult::fatal("selected payload is not valid JSON");
            };
            match filter::lookup_string(&value, &path) {
                None => CheckResult::retryable(format!("field '{path}' not present")),
                Some(actual) if actual == expected => CheckResult::pass(),
                Some(actual) => CheckResult::retryable(format!(
                    "field '{path}' is '{actual}', expected '{expected}'"
                )),
            }
        }));
        self
    }

    /// Expect the selected message to have a field at `path`.
    pub fn expect_field_exists(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.checks.push(Box::new(move |hit| {
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&hit.raw) else {
                return CheckResult::fatal("selected payload is not valid JSON");
            };
            match filter::lookup_string(&value, &path) {
                Some(_) => CheckResult::pass(),
                None => CheckResult::retryable(format!("field '{path}' not present")),
            }
        }));
        self
    }

    /// Add a custom check evaluated against each attempt's [`SearchHit`].
    /// Checks run in declaration order; the first fatal failure stops
    /// polling immediately.
    pub fn check(
        mut self,
        check: impl Fn(&SearchHit) -> CheckResult + Send + Sync + 'static,
    ) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Select sync (single attempt) or async (poll with backoff)
    /// execution. Defaults to async.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the client's default search timeout for this query.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token; cancelling it stops polling with
    /// [`Error::Cancelled`].
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl<'a, T: DeserializeOwned> Query<'a, T> {
    async fn run(self) -> Result<QueryResult<T>> {
        let Self {
            client,
            topic,
            filters,
            unique,
            window,
            expected_count,
            checks,
            mode,
            timeout,
            cancel,
            ..
        } = self;

        let mut policy = client.poll_config().clone();
        if let Some(timeout) = timeout {
            policy = policy.with_timeout(timeout);
        }
        let cancel = cancel.unwrap_or_default();
        let window_ms = window.as_millis() as i64;

        // The engine only sees stringly reasons; keep the last typed
        // error so fatal classes surface as real Error values.
        let last_error: Mutex<Option<Error>> = Mutex::new(None);

        let fetch = |_cancel: CancellationToken| {
            let topic = &topic;
            let filters = &filters;
            let last_error = &last_error;
            async move {
                let result = search::<T>(
                    client,
                    topic,
                    filters,
                    unique,
                    window_ms,
                    expected_count,
                );
                if let Err(err) = &result {
                    if let Ok(mut slot) = last_error.lock() {
                        *slot = Some(err.clone());
                    }
                }
                result
            }
        };

        let (hit, summary) = poll::execute(mode, &policy, &cancel, fetch, &checks).await;
        client
            .report_sink()
            .attach(&format!("consume '{topic}'"), &summary);

        if summary.success {
            let Some(hit) = hit else {
                // Success implies a present result; treat anything else
                // as not found.
                return Ok(QueryResult {
                    found: false,
                    message: None,
                    raw: None,
                    all_matches: Vec::new(),
                    match_count: 0,
                    summary,
                });
            };
            let message: T =
                serde_json::from_slice(&hit.raw).map_err(|e| Error::Deserialization {
                    topic: topic.clone(),
                    offset: hit.offset,
                    target: std::any::type_name::<T>(),
                    reason: e.to_string(),
                })?;
            return Ok(QueryResult {
                found: true,
                message: Some(message),
                raw: Some(hit.raw.clone()),
                match_count: hit.count,
                all_matches: hit.all,
                summary,
            });
        }

        if summary.timeout_reason.as_deref() == Some("cancelled") {
            return Err(Error::Cancelled);
        }

        if let Ok(mut slot) = last_error.lock() {
            if let Some(err) = slot.take() {
                if !err.is_retryable() {
                    return Err(err);
                }
            }
        }

        // Retryable failure until the budget ran out: not found, not an
        // error.
        Ok(QueryResult {
            found: false,
            message: None,
            raw: hit.as_ref().map(|h| h.raw.clone()),
            all_matches: hit.as_ref().map(|h| h.all.clone()).unwrap_or_default(),
            match_count: hit.as_ref().map(|h| h.count).unwrap_or(0),
            summary,
        })
    }
}

/// One search attempt over the buffer snapshot.
fn search<T: DeserializeOwned>(
    client: &Client,
    topic: &str,
    filters: &FilterSet,
    unique: bool,
    window_ms: i64,
    expected_count: Option<usize>,
) -> Result<Option<SearchHit>> {
    let buffer = client.buffer();
    if !buffer.is_topic_configured(topic) {
        return Err(Error::TopicNotConfigured {
            topic: topic.to_string(),
            configured: buffer.configured_topics().to_vec(),
        });
    }

    let events = buffer.messages(topic);

    let matches = if unique {
        finder::find_events_within_window(&events, filters, window_ms)
    } else {
        finder::find_events(&events, filters)
    };

    if matches.is_empty() {
        return Ok(None);
    }

    if unique && matches.len() > 1 {
        return Err(Error::DuplicateMessage {
            topic: topic.to_string(),
            count: matches.len(),
            window_ms,
            filters: filters.to_string(),
        });
    }

    if let Some(expected) = expected_count {
        if matches.len() != expected {
            return Err(Error::CountMismatch {
                topic: topic.to_string(),
                expected,
                actual: matches.len(),
            });
        }
    }

    let selected = &matches[0];
    let hit = SearchHit {
        raw: selected.payload().to_vec(),
        all: matches.iter().map(|e| e.payload().to_vec()).collect(),
        count: matches.len(),
        offset: selected.offset(),
    };

    // Surface a shape mismatch on the attempt that selected the message,
    // so the engine can stop immediately instead of burning the budget.
    serde_json::from_slice::<T>(&hit.raw).map_err(|e| Error::Deserialization {
        topic: topic.to_string(),
        offset: hit.offset,
        target: std::any::type_name::<T>(),
        reason: e.to_string(),
    })?;

    Ok(Some(hit))
}

impl<'a, T: DeserializeOwned + 'a> IntoFuture for Query<'a, T> {
    type Output = Result<QueryResult<T>>;
    type IntoFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Self::Output> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

impl<T> std::fmt::Debug for Query<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("topic", &self.topic)
            .field("filters", &self.filters)
            .field("unique", &self.unique)
            .field("expected_count", &self.expected_count)
            .field("checks", &self.checks.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
