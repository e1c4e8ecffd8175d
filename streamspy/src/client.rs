use std::sync::Arc;
use std::time::Duration;

use crate::consumer::{ConsumerState, StreamConsumer};
use crate::report::{ReportSink, TracingSink};
use crate::{BrokerSource, ConsumerConfig, MessageBuffer, PollConfig, Query, Result};

/// Owns the message buffer and the background consumer for one test
/// process.
///
/// Constructed once, passed explicitly to whatever needs it; there is
/// no process-wide instance. [`connect`](Self::connect) validates the
/// configuration, builds the buffer, starts the consumer and waits for
/// it to join the stream (the warmup barrier); [`close`](Self::close)
/// stops the consumer and blocks until its task has exited.
///
/// ```ignore
/// let (source, handle) = ChannelSource::new(64);
/// let mut client = Client::connect(
///     ConsumerConfig::new(["broker:9092"], ["orders"]),
///     source,
/// ).await?;
///
/// let result = client.query::<OrderCreated>("orders")
///     .filter("type", "ORDER_CREATED")
///     .await?;
///
/// client.close().await?;
/// ```
pub struct Client {
    config: ConsumerConfig,
    poll: PollConfig,
    buffer: Arc<MessageBuffer>,
    consumer: StreamConsumer<Box<dyn BrokerSource>>,
    sink: Arc<dyn ReportSink>,
}

impl Client {
    /// Connect with a polling policy derived from the configuration's
    /// search timeout and poll interval.
    pub async fn connect(config: ConsumerConfig, source: impl BrokerSource) -> Result<Self> {
        let poll = PollConfig::default()
            .with_timeout(config.search_timeout())
            .with_interval(config.poll_interval());
        Self::connect_with(config, poll, source).await
    }

    /// Connect with an explicit polling policy, which wins over the
    /// configuration's timeout and interval.
    pub async fn connect_with(
        config: ConsumerConfig,
        poll: PollConfig,
        source: impl BrokerSource,
    ) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(MessageBuffer::new(
            config.full_topic_names(),
            config.buffer_capacity(),
        ));
        let mut consumer =
            StreamConsumer::new(Box::new(source) as Box<dyn BrokerSource>, buffer.clone());
        consumer.start()?;

        if config.warmup_timeout() > Duration::ZERO {
            tracing::debug!(timeout = ?config.warmup_timeout(), "waiting for consumer to join the stream");
            match consumer.wait_ready(config.warmup_timeout()).await {
                Ok(()) => tracing::debug!("consumer ready"),
                // Warmup failure is not fatal: the consumer keeps
                // reconnecting and queries simply poll until timeout.
                Err(e) => tracing::warn!(error = %e, "consumer warmup failed"),
            }
        }

        Ok(Self {
            config,
            poll,
            buffer,
            consumer,
            sink: Arc::new(TracingSink),
        })
    }

    /// Replace the report sink summaries are attached to.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start a query against a topic. The configured topic prefix is
    /// applied to `topic`.
    pub fn query<T>(&self, topic: &str) -> Query<'_, T> {
        Query::new(self, self.config.full_topic_name(topic))
    }

    /// Block until the consumer has joined the stream.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.consumer.wait_ready(timeout).await
    }

    /// Stop the consumer and wait for its task to exit. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        self.consumer.stop().await
    }

    /// Drop buffered events for one topic (prefix applied), keeping the
    /// topic registered. Used between test cases.
    pub fn clear_topic(&self, topic: &str) {
        self.buffer.clear_topic(&self.config.full_topic_name(topic));
    }

    /// Drop buffered events for every topic.
    pub fn clear_all(&self) {
        self.buffer.clear_all();
    }

    /// The shared message buffer.
    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }

    /// The validated configuration.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// The polling policy queries run under.
    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Current consumer lifecycle state.
    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer.state()
    }

    pub(crate) fn report_sink(&self) -> &Arc<dyn ReportSink> {
        &self.sink
    }
}
