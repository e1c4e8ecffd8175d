use std::collections::HashMap;
use std::fmt;

/// One immutable message captured from the stream.
///
/// Created by the [`StreamConsumer`](crate::StreamConsumer) when a broker
/// message arrives, then shared by reference between the buffer and any
/// number of concurrent readers. Never mutated after construction; dropped
/// only when evicted from its [topic buffer](crate::MessageBuffer).
///
/// - `topic`: the source topic this event was read from.
/// - `partition` / `offset`: position markers, opaque to the library but
///   monotonically informative for ordering within a topic.
/// - `payload`: the raw serialized value as delivered.
/// - `key`: optional raw message key.
/// - `headers`: protocol headers flattened to a string map.
/// - `timestamp_ms`: capture time in milliseconds since the Unix epoch,
///   assigned by the source. Used for duplicate-window calculations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
    timestamp_ms: i64,
}

impl StreamEvent {
    /// Construct an event at a given position with a raw payload.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            headers: HashMap::new(),
            timestamp_ms: 0,
        }
    }

    /// Attach a raw message key.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach a header entry.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the capture timestamp in milliseconds since the Unix epoch.
    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// The topic this event was read from.
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition the event was read from.
    #[inline]
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset within the partition.
    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The raw message key, if any.
    #[inline]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// The raw serialized payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Protocol headers flattened to strings.
    #[inline]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Capture timestamp in milliseconds since the Unix epoch.
    #[inline]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamEvent {{ topic: {}, partition: {}, offset: {}, payload: {} bytes, timestamp_ms: {} }}",
            self.topic,
            self.partition,
            self.offset,
            self.payload.len(),
            self.timestamp_ms,
        )
    }
}
