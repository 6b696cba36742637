//! Per-topic subscription state.
//!
//! Each topic of the fixed deployment set carries an explicit state enum
//! with an at-most-one-in-flight-operation-per-topic discipline: a request
//! is admitted only from a settled state, and a duplicate request while an
//! ack is outstanding is rejected rather than raced. Acks that arrive for
//! operations no longer pending (for instance after a disconnect reset)
//! are stale and ignored.

use everest_protocol::TopicSet;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Subscription state of a single topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicState {
    Unsubscribed,
    SubscribePending,
    Subscribed,
    UnsubscribePending,
}

/// Tracks subscription state for the fixed topic set.
pub struct SubscriptionRegistry {
    states: HashMap<String, TopicState>,
}

impl SubscriptionRegistry {
    /// Create a registry with every topic of the set unsubscribed.
    #[must_use]
    pub fn new(topics: &TopicSet) -> Self {
        let states = topics
            .all()
            .iter()
            .map(|name| ((*name).to_string(), TopicState::Unsubscribed))
            .collect();
        Self { states }
    }

    /// State of a topic, or `None` for topics outside the set.
    #[must_use]
    pub fn state(&self, topic: &str) -> Option<TopicState> {
        self.states.get(topic).copied()
    }

    /// Whether a topic is currently subscribed.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state(topic) == Some(TopicState::Subscribed)
    }

    /// Whether any topic has an operation in flight.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.states.values().any(|state| {
            matches!(
                state,
                TopicState::SubscribePending | TopicState::UnsubscribePending
            )
        })
    }

    /// Names of the currently subscribed topics.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, state)| **state == TopicState::Subscribed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Snapshot of every topic's state.
    #[must_use]
    pub fn snapshot(&self) -> &HashMap<String, TopicState> {
        &self.states
    }

    /// Admit a subscribe request.
    ///
    /// Returns `true` when the topic moved to `SubscribePending` and the
    /// request should be dispatched. No-op unless the connection is up and
    /// the topic is settled `Unsubscribed`.
    pub fn begin_subscribe(&mut self, topic: &str, connected: bool) -> bool {
        if !connected {
            debug!(topic = %topic, "Subscribe ignored: not connected");
            return false;
        }
        match self.states.get_mut(topic) {
            None => {
                warn!(topic = %topic, "Subscribe ignored: topic outside the configured set");
                false
            }
            Some(state @ TopicState::Unsubscribed) => {
                *state = TopicState::SubscribePending;
                debug!(topic = %topic, "Subscribe dispatched");
                true
            }
            Some(TopicState::Subscribed) => {
                debug!(topic = %topic, "Subscribe ignored: already subscribed");
                false
            }
            Some(state) => {
                debug!(topic = %topic, state = ?state, "Subscribe rejected: operation in flight");
                false
            }
        }
    }

    /// Admit an unsubscribe request.
    ///
    /// Returns `true` when the topic moved to `UnsubscribePending` and the
    /// request should be dispatched. No-op unless the topic is settled
    /// `Subscribed`.
    pub fn begin_unsubscribe(&mut self, topic: &str, connected: bool) -> bool {
        if !connected {
            debug!(topic = %topic, "Unsubscribe ignored: not connected");
            return false;
        }
        match self.states.get_mut(topic) {
            None => {
                warn!(topic = %topic, "Unsubscribe ignored: topic outside the configured set");
                false
            }
            Some(state @ TopicState::Subscribed) => {
                *state = TopicState::UnsubscribePending;
                debug!(topic = %topic, "Unsubscribe dispatched");
                true
            }
            Some(TopicState::Unsubscribed) => {
                debug!(topic = %topic, "Unsubscribe ignored: not subscribed");
                false
            }
            Some(state) => {
                debug!(topic = %topic, state = ?state, "Unsubscribe rejected: operation in flight");
                false
            }
        }
    }

    /// Apply the terminal outcome of a subscribe request.
    ///
    /// Failure returns the topic to `Unsubscribed`; no retry is scheduled.
    pub fn complete_subscribe(&mut self, topic: &str, success: bool) {
        match self.states.get_mut(topic) {
            Some(state @ TopicState::SubscribePending) => {
                if success {
                    debug!(topic = %topic, "Subscribed");
                    *state = TopicState::Subscribed;
                } else {
                    warn!(topic = %topic, "Subscribe failed");
                    *state = TopicState::Unsubscribed;
                }
            }
            _ => debug!(topic = %topic, "Stale subscribe ack ignored"),
        }
    }

    /// Apply the terminal outcome of an unsubscribe request.
    ///
    /// Failure leaves the topic `Subscribed`; no retry is scheduled.
    pub fn complete_unsubscribe(&mut self, topic: &str, success: bool) {
        match self.states.get_mut(topic) {
            Some(state @ TopicState::UnsubscribePending) => {
                if success {
                    debug!(topic = %topic, "Unsubscribed");
                    *state = TopicState::Unsubscribed;
                } else {
                    warn!(topic = %topic, "Unsubscribe failed");
                    *state = TopicState::Subscribed;
                }
            }
            _ => debug!(topic = %topic, "Stale unsubscribe ack ignored"),
        }
    }

    /// Force every topic back to `Unsubscribed`.
    ///
    /// Applied whenever the connection leaves the Connected state, whether
    /// by explicit disconnect or unsolicited loss.
    pub fn reset(&mut self) {
        for state in self.states.values_mut() {
            *state = TopicState::Unsubscribed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(&TopicSet::new(
            "vending/status",
            "vending/freeVend",
            "vending/vendEvents",
        ))
    }

    #[test]
    fn test_subscribe_lifecycle() {
        let mut reg = registry();

        assert!(reg.begin_subscribe("vending/status", true));
        assert_eq!(
            reg.state("vending/status"),
            Some(TopicState::SubscribePending)
        );
        assert!(reg.has_pending());

        reg.complete_subscribe("vending/status", true);
        assert!(reg.is_subscribed("vending/status"));
        assert!(!reg.has_pending());
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let mut reg = registry();
        assert!(!reg.begin_subscribe("vending/status", false));
        assert_eq!(reg.state("vending/status"), Some(TopicState::Unsubscribed));
    }

    #[test]
    fn test_subscribe_idempotent_when_subscribed() {
        let mut reg = registry();
        reg.begin_subscribe("vending/status", true);
        reg.complete_subscribe("vending/status", true);

        assert!(!reg.begin_subscribe("vending/status", true));
        assert!(reg.is_subscribed("vending/status"));
    }

    #[test]
    fn test_duplicate_request_rejected_while_in_flight() {
        let mut reg = registry();
        assert!(reg.begin_subscribe("vending/status", true));
        // The ack has not landed yet; the second request must not race.
        assert!(!reg.begin_subscribe("vending/status", true));
    }

    #[test]
    fn test_subscribe_failure_restores_state() {
        let mut reg = registry();
        reg.begin_subscribe("vending/status", true);
        reg.complete_subscribe("vending/status", false);
        assert_eq!(reg.state("vending/status"), Some(TopicState::Unsubscribed));
    }

    #[test]
    fn test_unsubscribe_requires_subscribed() {
        let mut reg = registry();
        assert!(!reg.begin_unsubscribe("vending/status", true));
        assert_eq!(reg.state("vending/status"), Some(TopicState::Unsubscribed));
    }

    #[test]
    fn test_unsubscribe_failure_leaves_subscribed() {
        let mut reg = registry();
        reg.begin_subscribe("vending/vendEvents", true);
        reg.complete_subscribe("vending/vendEvents", true);

        assert!(reg.begin_unsubscribe("vending/vendEvents", true));
        reg.complete_unsubscribe("vending/vendEvents", false);
        assert!(reg.is_subscribed("vending/vendEvents"));
    }

    #[test]
    fn test_unknown_topic_ignored() {
        let mut reg = registry();
        assert!(!reg.begin_subscribe("vending/other", true));
        assert_eq!(reg.state("vending/other"), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut reg = registry();
        reg.begin_subscribe("vending/status", true);
        reg.complete_subscribe("vending/status", true);
        reg.begin_subscribe("vending/vendEvents", true);

        reg.reset();
        assert!(reg.subscribed_topics().is_empty());
        assert!(!reg.has_pending());
    }

    #[test]
    fn test_stale_ack_after_reset_ignored() {
        let mut reg = registry();
        reg.begin_subscribe("vending/status", true);
        reg.reset();

        // The ack for the pre-reset request lands late.
        reg.complete_subscribe("vending/status", true);
        assert_eq!(reg.state("vending/status"), Some(TopicState::Unsubscribed));
    }
}
