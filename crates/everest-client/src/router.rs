//! Inbound message routing and buffering.
//!
//! Each inbound message is checked against the fixed topic set. Messages
//! on unrecognized topics are dropped silently: no log line, no buffer
//! entry. Recognized payloads are parsed into their semantic records and
//! appended, in arrival order, to the bounded ring buffer for their
//! category.

use everest_protocol::{StatusReport, TopicKind, TopicSet, VendEvent};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// A buffered message with its arrival order index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferEntry<T> {
    /// Topic the message arrived on (or was dispatched to).
    pub topic: String,
    /// Order index, monotonically increasing per session.
    pub seq: u64,
    /// Parsed record.
    pub body: T,
}

/// Bounded append-only ring buffer for one topic category.
///
/// Insertion order is the only invariant: no deduplication, no reordering.
/// When the capacity is reached the oldest entry is evicted.
#[derive(Debug)]
pub struct TopicBuffer<T> {
    entries: VecDeque<BufferEntry<T>>,
    capacity: usize,
}

impl<T> TopicBuffer<T> {
    /// Create a buffer retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: BufferEntry<T>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the retained entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry<T>> {
        self.entries.iter()
    }

    /// Clone the retained entries in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BufferEntry<T>>
    where
        T: Clone,
    {
        self.entries.iter().cloned().collect()
    }
}

/// Classifies inbound messages and feeds the per-category buffers.
pub struct MessageRouter {
    topics: TopicSet,
    arrival_seq: u64,
    status: TopicBuffer<StatusReport>,
    events: TopicBuffer<VendEvent>,
}

impl MessageRouter {
    /// Create a router over the fixed topic set.
    #[must_use]
    pub fn new(topics: TopicSet, buffer_capacity: usize) -> Self {
        Self {
            topics,
            arrival_seq: 0,
            status: TopicBuffer::new(buffer_capacity),
            events: TopicBuffer::new(buffer_capacity),
        }
    }

    /// The topic set this router recognizes.
    #[must_use]
    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Buffered status reports.
    #[must_use]
    pub fn status_buffer(&self) -> &TopicBuffer<StatusReport> {
        &self.status
    }

    /// Buffered vend events.
    #[must_use]
    pub fn event_buffer(&self) -> &TopicBuffer<VendEvent> {
        &self.events
    }

    /// Route one inbound message.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let Some(kind) = self.topics.classify(topic) else {
            // Outside the configured set: dropped without a trace.
            return;
        };

        match kind {
            TopicKind::Status => match StatusReport::from_payload(payload) {
                Ok(report) => {
                    let seq = self.next_seq();
                    self.status.push(BufferEntry {
                        topic: topic.to_string(),
                        seq,
                        body: report,
                    });
                }
                Err(e) => warn!(topic = %topic, error = %e, "Undecodable status payload"),
            },

            TopicKind::Event => match VendEvent::from_payload(payload) {
                Ok(event) => {
                    let seq = self.next_seq();
                    self.events.push(BufferEntry {
                        topic: topic.to_string(),
                        seq,
                        body: event,
                    });
                }
                Err(e) => warn!(topic = %topic, error = %e, "Undecodable event payload"),
            },

            TopicKind::Command => {
                // The echoed-command buffer mirrors the outbound path; a
                // command observed inbound is not buffered.
                trace!(topic = %topic, "Inbound command-topic message not buffered");
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.arrival_seq;
        self.arrival_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> MessageRouter {
        MessageRouter::new(
            TopicSet::new("vending/status", "vending/freeVend", "vending/vendEvents"),
            4,
        )
    }

    #[test]
    fn test_status_routed_in_arrival_order() {
        let mut r = router();
        r.on_message("vending/status", br#"{"time":1,"DC":11.9}"#);
        r.on_message("vending/status", br#"{"time":2,"DC":12.1}"#);

        let entries = r.status_buffer().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert_eq!(entries[0].body.time, 1);
        assert_eq!(entries[1].body.dc, Some(12.1));
        assert_eq!(entries[0].topic, "vending/status");
    }

    #[test]
    fn test_events_routed_to_event_buffer() {
        let mut r = router();
        r.on_message("vending/vendEvents", br#"{"time":5,"product":"COLA"}"#);

        assert!(r.status_buffer().is_empty());
        let entries = r.event_buffer().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].body.product.as_deref(), Some("COLA"));
    }

    #[test]
    fn test_unknown_topic_never_buffered() {
        let mut r = router();
        r.on_message("vending/unknown", br#"{"time":1}"#);
        assert!(r.status_buffer().is_empty());
        assert!(r.event_buffer().is_empty());
    }

    #[test]
    fn test_command_topic_not_buffered() {
        let mut r = router();
        r.on_message("vending/freeVend", br#"{"product":"WATER"}"#);
        assert!(r.status_buffer().is_empty());
        assert!(r.event_buffer().is_empty());
    }

    #[test]
    fn test_malformed_payload_dropped() {
        let mut r = router();
        r.on_message("vending/status", b"not json");
        assert!(r.status_buffer().is_empty());
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut r = router();
        for time in 0..6 {
            let payload = format!("{{\"time\":{}}}", time);
            r.on_message("vending/status", payload.as_bytes());
        }

        // Capacity 4: times 0 and 1 were evicted.
        let entries = r.status_buffer().snapshot();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].body.time, 2);
        assert_eq!(entries[3].body.time, 5);
    }

    #[test]
    fn test_buffer_minimum_capacity() {
        let mut buffer: TopicBuffer<u32> = TopicBuffer::new(0);
        buffer.push(BufferEntry {
            topic: "t".to_string(),
            seq: 0,
            body: 1,
        });
        buffer.push(BufferEntry {
            topic: "t".to_string(),
            seq: 1,
            body: 2,
        });
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.iter().next().unwrap().body, 2);
    }
}
