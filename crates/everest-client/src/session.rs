//! Session facade over the connectivity components.
//!
//! One `Session` owns the four components and the transport handle. All
//! public operations return immediately; outcomes arrive later as
//! `BrokerEvent`s that the embedding process feeds through
//! [`Session::handle_event`] one at a time. Because both paths require
//! `&mut Session`, no callback ever runs concurrently with another or
//! with caller code.

use crate::connection::{ConnectSettings, ConnectionManager, ConnectionState};
use crate::gateway::{PublishError, PublishGateway};
use crate::router::{MessageRouter, TopicBuffer};
use crate::subscriptions::{SubscriptionRegistry, TopicState};
use bytes::Bytes;
use everest_protocol::{StatusReport, TopicSet, VendCommand, VendEvent};
use everest_transport::{BrokerEvent, BrokerTransport};
use std::collections::HashMap;
use std::sync::Arc;

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker connection settings.
    pub connect: ConnectSettings,
    /// The fixed deployment topic set.
    pub topics: TopicSet,
    /// Retention capacity per buffer category.
    pub buffer_capacity: usize,
}

/// The connectivity session: one broker connection and its derived state.
pub struct Session {
    connection: ConnectionManager,
    subscriptions: SubscriptionRegistry,
    router: MessageRouter,
    gateway: PublishGateway,
    topics: TopicSet,
}

impl Session {
    /// Create a disconnected session over a transport.
    #[must_use]
    pub fn new(config: SessionConfig, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            connection: ConnectionManager::new(config.connect, transport),
            subscriptions: SubscriptionRegistry::new(&config.topics),
            router: MessageRouter::new(config.topics.clone(), config.buffer_capacity),
            gateway: PublishGateway::new(&config.topics, config.buffer_capacity),
            topics: config.topics,
        }
    }

    /// Initiate a connect attempt with a freshly signed URL.
    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Close the connection and reset all subscription state.
    pub fn disconnect(&mut self) {
        if self.connection.disconnect() {
            self.subscriptions.reset();
        }
    }

    /// Request a subscription on a topic of the configured set.
    pub fn subscribe(&mut self, topic: &str) {
        if self
            .subscriptions
            .begin_subscribe(topic, self.connection.is_connected())
        {
            self.connection.transport().subscribe(topic);
        }
    }

    /// Request removal of a subscription.
    pub fn unsubscribe(&mut self, topic: &str) {
        if self
            .subscriptions
            .begin_unsubscribe(topic, self.connection.is_connected())
        {
            self.connection.transport().unsubscribe(topic);
        }
    }

    /// Publish a raw payload through the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error when disconnected or when the prerequisite topics
    /// are not subscribed.
    pub fn publish(&mut self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.gateway.publish(
            &self.subscriptions,
            self.connection.is_connected(),
            self.connection.transport(),
            topic,
            payload,
        )
    }

    /// Publish a vend command on the command topic.
    ///
    /// # Errors
    ///
    /// Returns an error when disconnected or when the gate is closed.
    pub fn publish_command(&mut self, command: &VendCommand) -> Result<(), PublishError> {
        let topic = self.topics.command.clone();
        self.publish(&topic, Bytes::from(command.to_payload()))
    }

    /// Apply one transport callback.
    pub fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => self.connection.on_connect_success(),
            BrokerEvent::ConnectFailed(reason) => self.connection.on_connect_failure(&reason),
            BrokerEvent::SubscribeResult { topic, success } => {
                self.subscriptions.complete_subscribe(&topic, success);
            }
            BrokerEvent::UnsubscribeResult { topic, success } => {
                self.subscriptions.complete_unsubscribe(&topic, success);
            }
            BrokerEvent::MessageArrived { topic, payload } => {
                self.router.on_message(&topic, &payload);
            }
            BrokerEvent::ConnectionLost(reason) => {
                if self.connection.on_connection_lost(&reason) {
                    self.subscriptions.reset();
                }
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether any operation is awaiting its outcome.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.connection.state() == ConnectionState::Connecting || self.subscriptions.has_pending()
    }

    /// Whether the publish gate is open.
    #[must_use]
    pub fn publish_enabled(&self) -> bool {
        self.gateway.publish_enabled(&self.subscriptions)
    }

    /// The configured topic set.
    #[must_use]
    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Per-topic subscription states.
    #[must_use]
    pub fn subscription_states(&self) -> &HashMap<String, TopicState> {
        self.subscriptions.snapshot()
    }

    /// Buffered status reports.
    #[must_use]
    pub fn status_buffer(&self) -> &TopicBuffer<StatusReport> {
        self.router.status_buffer()
    }

    /// Buffered vend events.
    #[must_use]
    pub fn event_buffer(&self) -> &TopicBuffer<VendEvent> {
        self.router.event_buffer()
    }

    /// Mirror of dispatched payloads.
    #[must_use]
    pub fn sent_buffer(&self) -> &TopicBuffer<String> {
        self.gateway.sent_buffer()
    }
}
