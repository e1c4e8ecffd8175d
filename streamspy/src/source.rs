use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc::{Receiver, Sender, channel};

use crate::{Error, Result, StreamEvent};

/// One raw message as delivered by a broker client, before conversion
/// into a [`StreamEvent`].
///
/// Headers keep their protocol form (byte values); the consumer flattens
/// them to strings and converts the timestamp to epoch milliseconds when
/// it builds the event.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub timestamp: SystemTime,
}

impl SourceMessage {
    /// Convert to the library's immutable event form: headers flattened
    /// to a string map (lossy UTF-8), timestamp as epoch milliseconds.
    pub(crate) fn to_event(&self) -> StreamEvent {
        let mut headers = HashMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            headers.insert(key.clone(), String::from_utf8_lossy(value).into_owned());
        }

        let timestamp_ms = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut event = StreamEvent::new(
            self.topic.clone(),
            self.partition,
            self.offset,
            self.value.clone(),
        )
        .with_timestamp_ms(timestamp_ms);
        if let Some(key) = &self.key {
            event = event.with_key(key.clone());
        }
        for (k, v) in headers {
            event = event.with_header(k, v);
        }
        event
    }
}

/// Contract the [`StreamConsumer`](crate::StreamConsumer) needs from a
/// broker client: join the configured topics, deliver messages with
/// header/timestamp metadata, acknowledge on demand.
///
/// The consumer depends only on this trait, not on a specific broker
/// implementation. Implementations wrap a real client (e.g. a Kafka
/// consumer group session); tests use [`ChannelSource`].
#[async_trait]
pub trait BrokerSource: Send + Sync + 'static {
    /// Join the configured topics. Called before the first `recv`, and
    /// again after a transient delivery failure.
    async fn connect(&mut self) -> Result<()>;

    /// Receive the next message. `Ok(None)` signals a cleanly ended
    /// stream; transient failures are returned as errors and retried by
    /// the consumer.
    async fn recv(&mut self) -> Result<Option<SourceMessage>>;

    /// Acknowledge a message back to the broker. Called only after the
    /// message has been placed in the buffer.
    async fn ack(&mut self, message: &SourceMessage) -> Result<()>;
}

#[async_trait]
impl BrokerSource for Box<dyn BrokerSource> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn recv(&mut self) -> Result<Option<SourceMessage>> {
        (**self).recv().await
    }

    async fn ack(&mut self, message: &SourceMessage) -> Result<()> {
        (**self).ack(message).await
    }
}

/// In-memory [`BrokerSource`] backed by a bounded channel.
///
/// Produce messages through the [`SourceHandle`]; the consumer receives
/// them in send order. Dropping the handle ends the stream. Intended for
/// tests and local wiring, not as a broker replacement.
pub struct ChannelSource {
    receiver: Receiver<SourceMessage>,
    acked: Arc<AtomicU64>,
}

/// Producer side of a [`ChannelSource`].
#[derive(Clone)]
pub struct SourceHandle {
    sender: Sender<SourceMessage>,
    acked: Arc<AtomicU64>,
}

impl ChannelSource {
    /// Create a source and its producer handle with the given channel
    /// capacity.
    pub fn new(capacity: usize) -> (Self, SourceHandle) {
        let (sender, receiver) = channel(capacity);
        let acked = Arc::new(AtomicU64::new(0));
        (
            Self {
                receiver,
                acked: acked.clone(),
            },
            SourceHandle { sender, acked },
        )
    }

    /// Number of messages acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}

impl SourceHandle {
    /// Send a message into the stream. Errors if the consumer side has
    /// been dropped.
    pub async fn send(&self, message: SourceMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::external(std::io::Error::other("channel source closed")))
    }

    /// Number of messages the source side has acknowledged so far.
    /// Observable after the source has been handed to a consumer.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    /// Convenience: send a JSON payload to a topic at the given offset,
    /// stamped with the current wall-clock time.
    pub async fn send_json(&self, topic: &str, offset: i64, payload: &str) -> Result<()> {
        self.send(SourceMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: None,
            value: payload.as_bytes().to_vec(),
            headers: Vec::new(),
            timestamp: SystemTime::now(),
        })
        .await
    }
}

#[async_trait]
impl BrokerSource for ChannelSource {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<SourceMessage>> {
        Ok(self.receiver.recv().await)
    }

    async fn ack(&mut self, _message: &SourceMessage) -> Result<()> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
