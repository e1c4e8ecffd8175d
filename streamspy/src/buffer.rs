use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::StreamEvent;

/// Fixed-capacity ring of events for exactly one topic.
///
/// Size never exceeds capacity; once full, each insert evicts the oldest
/// event. A single writer (the consumer task) is serialized against any
/// number of snapshot readers by the inner lock; readers hold it only
/// long enough to copy `Arc` references out.
#[derive(Debug)]
pub struct TopicBuffer {
    events: Mutex<VecDeque<Arc<StreamEvent>>>,
    capacity: usize,
}

impl TopicBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<StreamEvent>>> {
        // A poisoned lock only means a reader panicked mid-copy; the
        // deque itself is still structurally sound.
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, event: Arc<StreamEvent>) {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn snapshot(&self) -> Vec<Arc<StreamEvent>> {
        self.lock().iter().cloned().collect()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of events this buffer retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Registry of [`TopicBuffer`]s, one per configured topic.
///
/// The topic set is fixed at construction; the map itself is never
/// mutated afterwards, so lookups need no locking beyond each topic's
/// own ring lock. Events for unconfigured topics are silently dropped;
/// callers are expected to check [`is_topic_configured`](Self::is_topic_configured)
/// before reading, and fail with a clear diagnostic instead of polling a
/// topic that can never fill.
#[derive(Debug)]
pub struct MessageBuffer {
    buffers: HashMap<String, TopicBuffer>,
    topics: Vec<String>,
}

impl MessageBuffer {
    /// Create one ring per topic with the given capacity. A zero
    /// capacity falls back to 1000.
    pub fn new<T>(topics: T, capacity: usize) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let capacity = if capacity == 0 { 1000 } else { capacity };
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        let buffers = topics
            .iter()
            .map(|t| (t.clone(), TopicBuffer::new(capacity)))
            .collect();
        Self { buffers, topics }
    }

    /// Append an event to its topic's ring. Events for unconfigured
    /// topics are dropped without error.
    pub fn push(&self, event: StreamEvent) {
        if let Some(buffer) = self.buffers.get(event.topic()) {
            buffer.push(Arc::new(event));
        }
    }

    /// Point-in-time snapshot of a topic's events, oldest first. Unknown
    /// or empty topics yield an empty vec, never an error. The snapshot
    /// is detached: later writes do not mutate it.
    pub fn messages(&self, topic: &str) -> Vec<Arc<StreamEvent>> {
        self.buffers
            .get(topic)
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }

    /// True if the topic was registered at construction.
    pub fn is_topic_configured(&self, topic: &str) -> bool {
        self.buffers.contains_key(topic)
    }

    /// Topic names registered at construction, in configuration order.
    pub fn configured_topics(&self) -> &[String] {
        &self.topics
    }

    /// Drop all buffered events for one topic, keeping capacity and
    /// registration. Unknown topics are a no-op.
    pub fn clear_topic(&self, topic: &str) {
        if let Some(buffer) = self.buffers.get(topic) {
            buffer.clear();
        }
    }

    /// Drop all buffered events for every topic. Used between test cases
    /// to avoid cross-test leakage.
    pub fn clear_all(&self) {
        for buffer in self.buffers.values() {
            buffer.clear();
        }
    }

    /// The ring for one topic, if configured.
    pub fn topic_buffer(&self, topic: &str) -> Option<&TopicBuffer> {
        self.buffers.get(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str, offset: i64) -> StreamEvent {
        StreamEvent::new(topic, 0, offset, format!("{{\"n\":{offset}}}").into_bytes())
    }

    fn buffer(capacity: usize) -> MessageBuffer {
        MessageBuffer::new(["orders", "payments"], capacity)
    }

    #[test]
    fn retains_most_recent_when_full() {
        let buf = buffer(2);
        buf.push(event("orders", 1)); // A
        buf.push(event("orders", 2)); // B
        buf.push(event("orders", 3)); // C evicts A

        let snapshot = buf.messages("orders");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].offset(), 2);
        assert_eq!(snapshot[1].offset(), 3);
    }

    #[test]
    fn preserves_insertion_order() {
        let buf = buffer(10);
        for offset in 0..5 {
            buf.push(event("orders", offset));
        }
        let offsets: Vec<i64> = buf.messages("orders").iter().map(|e| e.offset()).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unknown_topic_yields_empty_not_error() {
        let buf = buffer(10);
        assert!(buf.messages("typo-topic").is_empty());
    }

    #[test]
    fn empty_topic_yields_empty() {
        let buf = buffer(10);
        assert!(buf.messages("orders").is_empty());
    }

    #[test]
    fn drops_events_for_unconfigured_topics() {
        let buf = buffer(10);
        buf.push(event("unknown", 1));
        assert!(buf.messages("unknown").is_empty());
        assert!(buf.messages("orders").is_empty());
    }

    #[test]
    fn topics_are_isolated() {
        let buf = buffer(10);
        buf.push(event("orders", 1));
        buf.push(event("payments", 2));
        assert_eq!(buf.messages("orders").len(), 1);
        assert_eq!(buf.messages("payments").len(), 1);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let buf = buffer(10);
        buf.push(event("orders", 1));
        let snapshot = buf.messages("orders");
        buf.push(event("orders", 2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buf.messages("orders").len(), 2);
    }

    #[test]
    fn clear_topic_keeps_registration_and_capacity() {
        let buf = buffer(2);
        buf.push(event("orders", 1));
        buf.push(event("payments", 2));
        buf.clear_topic("orders");

        assert!(buf.messages("orders").is_empty());
        assert_eq!(buf.messages("payments").len(), 1);
        assert!(buf.is_topic_configured("orders"));
        assert_eq!(buf.topic_buffer("orders").unwrap().capacity(), 2);

        // Ring still works after a clear
        buf.push(event("orders", 3));
        assert_eq!(buf.messages("orders").len(), 1);
    }

    #[test]
    fn clear_all_empties_every_topic() {
        let buf = buffer(10);
        buf.push(event("orders", 1));
        buf.push(event("payments", 2));
        buf.clear_all();
        assert!(buf.messages("orders").is_empty());
        assert!(buf.messages("payments").is_empty());
        assert_eq!(buf.configured_topics(), &["orders", "payments"]);
    }

    #[test]
    fn configured_topics_in_configuration_order() {
        let buf = buffer(10);
        assert_eq!(buf.configured_topics(), &["orders", "payments"]);
        assert!(buf.is_topic_configured("orders"));
        assert!(!buf.is_topic_configured("refunds"));
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let buf = MessageBuffer::new(["orders"], 0);
        assert_eq!(buf.topic_buffer("orders").unwrap().capacity(), 1000);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let buf = StdArc::new(MessageBuffer::new(["orders"], 100));

        let writer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for offset in 0..1000 {
                    buf.push(event("orders", offset));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buf = buf.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = buf.messages("orders");
                        assert!(snapshot.len() <= 100);
                        // Insertion order must hold in every snapshot
                        for pair in snapshot.windows(2) {
                            assert!(pair[0].offset() < pair[1].offset());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(buf.messages("orders").len(), 100);
    }
}
