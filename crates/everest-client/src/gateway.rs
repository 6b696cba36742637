//! Prerequisite-gated outbound publishing.
//!
//! Commands ride a two-channel protocol: they are only meaningful when
//! this side is subscribed to both the command topic (delivery) and the
//! event topic (acknowledgment). The gate is enforced at the send
//! boundary, not just surfaced for UI use.

use crate::router::{BufferEntry, TopicBuffer};
use crate::subscriptions::SubscriptionRegistry;
use bytes::Bytes;
use everest_protocol::TopicSet;
use everest_transport::BrokerTransport;
use thiserror::Error;
use tracing::debug;

/// Reasons a publish is refused before reaching the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The transport is not connected.
    #[error("Not connected to the broker")]
    NotConnected,

    /// The prerequisite topic pair is not fully subscribed.
    #[error("Command channels are not subscribed")]
    GateClosed,
}

/// Gates and mirrors outbound sends.
pub struct PublishGateway {
    /// Acknowledgment channel prerequisite.
    ack_topic: String,
    /// Command delivery prerequisite.
    command_topic: String,
    sent: TopicBuffer<String>,
    dispatch_seq: u64,
}

impl PublishGateway {
    /// Create a gateway with the deployment's prerequisite pair.
    #[must_use]
    pub fn new(topics: &TopicSet, buffer_capacity: usize) -> Self {
        Self {
            ack_topic: topics.event.clone(),
            command_topic: topics.command.clone(),
            sent: TopicBuffer::new(buffer_capacity),
            dispatch_seq: 0,
        }
    }

    /// Whether publishing is currently permitted.
    ///
    /// True if and only if both prerequisite topics report `Subscribed`.
    #[must_use]
    pub fn publish_enabled(&self, registry: &SubscriptionRegistry) -> bool {
        registry.is_subscribed(&self.ack_topic) && registry.is_subscribed(&self.command_topic)
    }

    /// Send a payload and mirror it into the outbound buffer.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport is not connected or the gate is
    /// closed; nothing reaches the wire in either case.
    pub fn publish(
        &mut self,
        registry: &SubscriptionRegistry,
        connected: bool,
        transport: &dyn BrokerTransport,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        if !connected {
            return Err(PublishError::NotConnected);
        }
        if !self.publish_enabled(registry) {
            return Err(PublishError::GateClosed);
        }

        debug!(topic = %topic, bytes = payload.len(), "Publishing");
        transport.publish(topic, payload.clone());

        let seq = self.dispatch_seq;
        self.dispatch_seq += 1;
        self.sent.push(BufferEntry {
            topic: topic.to_string(),
            seq,
            body: String::from_utf8_lossy(&payload).into_owned(),
        });

        Ok(())
    }

    /// Mirror of every dispatched payload, in dispatch order.
    #[must_use]
    pub fn sent_buffer(&self) -> &TopicBuffer<String> {
        &self.sent
    }
}
