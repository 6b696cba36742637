//! Telemetry payload records and topic classification.
//!
//! Payloads are UTF-8 JSON. Field names mirror what the machines emit,
//! including the upper-case `DC` reading; unknown fields are ignored so
//! firmware can add readings without breaking the dashboard.

use serde::{Deserialize, Serialize};

/// Category of a deployment topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    /// Periodic machine status reports.
    Status,
    /// Outbound command channel.
    Command,
    /// Per-sale vend events.
    Event,
}

/// The fixed three-topic set of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSet {
    /// Status-report topic name.
    pub status: String,
    /// Command topic name.
    pub command: String,
    /// Vend-event topic name.
    pub event: String,
}

impl TopicSet {
    /// Create a topic set.
    #[must_use]
    pub fn new(
        status: impl Into<String>,
        command: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            status: status.into(),
            command: command.into(),
            event: event.into(),
        }
    }

    /// Classify a topic name, or `None` when it is outside the set.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.status {
            Some(TopicKind::Status)
        } else if topic == self.command {
            Some(TopicKind::Command)
        } else if topic == self.event {
            Some(TopicKind::Event)
        } else {
            None
        }
    }

    /// Get the topic name for a category.
    #[must_use]
    pub fn name(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Status => &self.status,
            TopicKind::Command => &self.command,
            TopicKind::Event => &self.event,
        }
    }

    /// All topic names, in status/command/event order.
    #[must_use]
    pub fn all(&self) -> [&str; 3] {
        [&self.status, &self.command, &self.event]
    }

    /// Check whether a topic belongs to the set.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.classify(topic).is_some()
    }
}

/// A periodic machine status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Report time, epoch milliseconds.
    pub time: i64,
    /// Reporting machine hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Ambient temperature reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient: Option<f64>,
    /// Exhaust temperature reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhaust: Option<f64>,
    /// DC rail reading.
    #[serde(rename = "DC", skip_serializing_if = "Option::is_none")]
    pub dc: Option<f64>,
}

impl StatusReport {
    /// Parse a status report from its wire payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for this shape.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// A machine sale price, which the fleet reports either as a number or a
/// preformatted string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    /// Numeric price.
    Amount(f64),
    /// Preformatted price text.
    Text(String),
}

/// A per-sale vend event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendEvent {
    /// Event time, epoch milliseconds.
    pub time: i64,
    /// Vended product identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Payment type used for the sale.
    #[serde(rename = "paymentType", skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    /// Sale price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

impl VendEvent {
    /// Parse a vend event from its wire payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for this shape.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// An outbound command published on the command topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendCommand {
    /// Product to dispense.
    pub product: String,
}

impl VendCommand {
    /// Create a command for a product.
    #[must_use]
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
        }
    }

    /// Serialize to the wire payload.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("command serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> TopicSet {
        TopicSet::new("vending/status", "vending/freeVend", "vending/vendEvents")
    }

    #[test]
    fn test_classify() {
        let set = topics();
        assert_eq!(set.classify("vending/status"), Some(TopicKind::Status));
        assert_eq!(set.classify("vending/freeVend"), Some(TopicKind::Command));
        assert_eq!(set.classify("vending/vendEvents"), Some(TopicKind::Event));
        assert_eq!(set.classify("vending/other"), None);
        assert!(!set.contains("vending/status/extra"));
    }

    #[test]
    fn test_status_report_parsing() {
        let report = StatusReport::from_payload(br#"{"time":1700000000000,"DC":0}"#).unwrap();
        assert_eq!(report.time, 1_700_000_000_000);
        assert_eq!(report.dc, Some(0.0));
        assert!(report.hostname.is_none());
        assert!(report.ambient.is_none());
    }

    #[test]
    fn test_status_report_ignores_unknown_fields() {
        let report = StatusReport::from_payload(
            br#"{"time":1,"hostname":"vm-12","ambient":21.5,"firmware":"2.4.1"}"#,
        )
        .unwrap();
        assert_eq!(report.hostname.as_deref(), Some("vm-12"));
        assert_eq!(report.ambient, Some(21.5));
    }

    #[test]
    fn test_vend_event_numeric_price() {
        let event =
            VendEvent::from_payload(br#"{"time":1,"product":"WATER","price":1.75}"#).unwrap();
        assert_eq!(event.price, Some(Price::Amount(1.75)));
    }

    #[test]
    fn test_vend_event_string_price() {
        let event = VendEvent::from_payload(
            br#"{"time":1,"product":"COLA","paymentType":"card","price":"1.75"}"#,
        )
        .unwrap();
        assert_eq!(event.payment_type.as_deref(), Some("card"));
        assert_eq!(event.price, Some(Price::Text("1.75".to_string())));
    }

    #[test]
    fn test_command_payload() {
        let command = VendCommand::new("WATER");
        assert_eq!(command.to_payload(), br#"{"product":"WATER"}"#.to_vec());
    }
}
