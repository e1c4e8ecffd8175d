use std::time::Duration;

use crate::{Error, Result};

/// Configuration for a [`Client`](crate::Client) and its background
/// consumer.
///
/// Built once, validated at construction, never mutated afterwards. Use
/// the `with_*` builders to override defaults:
///
/// ```rust
/// use streamspy::ConsumerConfig;
/// use std::time::Duration;
///
/// let config = ConsumerConfig::new(["broker-1:9092"], ["orders", "payments"])
///     .with_group_id("it-tests")
///     .with_buffer_capacity(500)
///     .with_search_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    brokers: Vec<String>,
    group_id: String,
    topics: Vec<String>,
    topic_prefix: String,
    buffer_capacity: usize,
    search_timeout: Duration,
    poll_interval: Duration,
    duplicate_window: Duration,
    warmup_timeout: Duration,
}

impl ConsumerConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
    pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
    pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_millis(5000);
    pub const DEFAULT_WARMUP_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a configuration for the given broker addresses and topic
    /// list. The consumer group identity defaults to a generated
    /// `streamspy-<uuid>` so parallel test runs never share offsets.
    pub fn new<B, T>(brokers: B, topics: T) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            group_id: format!("streamspy-{}", uuid::Uuid::new_v4()),
            topics: topics.into_iter().map(Into::into).collect(),
            topic_prefix: String::new(),
            buffer_capacity: Self::DEFAULT_BUFFER_CAPACITY,
            search_timeout: Self::DEFAULT_SEARCH_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            duplicate_window: Self::DEFAULT_DUPLICATE_WINDOW,
            warmup_timeout: Self::DEFAULT_WARMUP_TIMEOUT,
        }
    }

    /// Set an explicit consumer group identity.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Set a prefix applied to every configured and queried topic name.
    /// Useful when an environment namespaces its topics.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Set the per-topic ring buffer capacity. Zero falls back to the
    /// default of 1000.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = if capacity == 0 {
            Self::DEFAULT_BUFFER_CAPACITY
        } else {
            capacity
        };
        self
    }

    /// Set the default timeout for message searches in async mode.
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Set the default sleep interval between search attempts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default duplicate-detection window for unique queries.
    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Set how long [`Client::connect`](crate::Client::connect) waits for
    /// the consumer to join the stream. Zero disables the warmup barrier.
    pub fn with_warmup_timeout(mut self, timeout: Duration) -> Self {
        self.warmup_timeout = timeout;
        self
    }

    /// Broker addresses.
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Consumer group identity.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Configured topic names, without the prefix applied.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Topic name prefix.
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Per-topic ring buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Default search timeout.
    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    /// Default interval between search attempts.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Default duplicate-detection window.
    pub fn duplicate_window(&self) -> Duration {
        self.duplicate_window
    }

    /// Warmup barrier timeout.
    pub fn warmup_timeout(&self) -> Duration {
        self.warmup_timeout
    }

    /// Full topic names with the prefix applied.
    pub fn full_topic_names(&self) -> Vec<String> {
        self.topics
            .iter()
            .map(|t| format!("{}{}", self.topic_prefix, t))
            .collect()
    }

    /// Apply the prefix to a single topic name.
    pub(crate) fn full_topic_name(&self, topic: &str) -> String {
        format!("{}{}", self.topic_prefix, topic)
    }

    /// Reject configurations that could never consume anything.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(Error::NoBrokersConfigured);
        }
        if self.topics.is_empty() {
            return Err(Error::NoTopicsConfigured);
        }
        Ok(())
    }
}

/// Exponential backoff settings for the polling engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub enabled: bool,
    pub factor: f64,
    pub max_interval: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: 1.5,
            max_interval: Duration::from_secs(1),
        }
    }
}

/// Timing policy for one polling execution: overall timeout, base
/// interval between attempts, optional exponential backoff and
/// proportional jitter.
///
/// Defaults: 10 s timeout, 200 ms interval, backoff x1.5 capped at 1 s,
/// jitter 0.2.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    timeout: Duration,
    interval: Duration,
    backoff: Backoff,
    jitter: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(200),
            backoff: Backoff::default(),
            jitter: 0.2,
        }
    }
}

impl PollConfig {
    /// Set the overall polling timeout, measured from the first attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the base interval between attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the backoff settings.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Disable exponential backoff, keeping a fixed interval.
    pub fn without_backoff(mut self) -> Self {
        self.backoff.enabled = false;
        self
    }

    /// Set the jitter fraction (0.0 disables jitter).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}
