//! MQTT 3.1.1 packet types.
//!
//! Only the subset a QoS 0/1 client needs is modeled; the QoS 2 exchange
//! (PUBREC/PUBREL/PUBCOMP) is rejected at the codec layer.

use bytes::Bytes;

/// SUBACK return code indicating a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Packet type identifiers from the fixed-header high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

/// Delivery quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl TryFrom<u8> for QoS {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            _ => Err("Unsupported QoS level"),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Human-readable refusal description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        }
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err("Reserved CONNACK return code"),
        }
    }
}

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Open a session. Authentication rides on the presigned URL, so no
    /// username/password/will fields are carried.
    Connect {
        /// Client identifier.
        client_id: String,
        /// Keepalive interval in seconds.
        keep_alive: u16,
        /// Discard any previous session state.
        clean_session: bool,
    },

    /// Session acknowledgment.
    Connack {
        /// Whether the broker resumed stored session state.
        session_present: bool,
        /// Accept/refuse code.
        return_code: ConnectReturnCode,
    },

    /// Application message, inbound or outbound.
    Publish {
        /// Re-delivery flag.
        dup: bool,
        /// Delivery quality of service.
        qos: QoS,
        /// Retain flag.
        retain: bool,
        /// Destination topic.
        topic: String,
        /// Present when qos > 0.
        packet_id: Option<u16>,
        /// Raw payload bytes.
        payload: Bytes,
    },

    /// QoS 1 publish acknowledgment.
    Puback {
        /// Acknowledged packet identifier.
        packet_id: u16,
    },

    /// Subscription request.
    Subscribe {
        /// Packet identifier for SUBACK correlation.
        packet_id: u16,
        /// Topic filters with requested QoS.
        filters: Vec<(String, QoS)>,
    },

    /// Subscription acknowledgment.
    Suback {
        /// Correlated packet identifier.
        packet_id: u16,
        /// One granted-QoS or failure code per filter.
        return_codes: Vec<u8>,
    },

    /// Unsubscription request.
    Unsubscribe {
        /// Packet identifier for UNSUBACK correlation.
        packet_id: u16,
        /// Topic filters to drop.
        topics: Vec<String>,
    },

    /// Unsubscription acknowledgment.
    Unsuback {
        /// Correlated packet identifier.
        packet_id: u16,
    },

    /// Keepalive probe.
    Pingreq,

    /// Keepalive response.
    Pingresp,

    /// Clean connection teardown.
    Disconnect,
}

impl Packet {
    /// Get the packet type.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect { .. } => PacketType::Connect,
            Packet::Connack { .. } => PacketType::Connack,
            Packet::Publish { .. } => PacketType::Publish,
            Packet::Puback { .. } => PacketType::Puback,
            Packet::Subscribe { .. } => PacketType::Subscribe,
            Packet::Suback { .. } => PacketType::Suback,
            Packet::Unsubscribe { .. } => PacketType::Unsubscribe,
            Packet::Unsuback { .. } => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Create a clean-session Connect packet.
    #[must_use]
    pub fn connect(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Packet::Connect {
            client_id: client_id.into(),
            keep_alive,
            clean_session: true,
        }
    }

    /// Create a QoS 0 Publish packet.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Packet::Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
        }
    }

    /// Create a single-filter Subscribe packet.
    #[must_use]
    pub fn subscribe(packet_id: u16, topic: impl Into<String>, qos: QoS) -> Self {
        Packet::Subscribe {
            packet_id,
            filters: vec![(topic.into(), qos)],
        }
    }

    /// Create a single-filter Unsubscribe packet.
    #[must_use]
    pub fn unsubscribe(packet_id: u16, topic: impl Into<String>) -> Self {
        Packet::Unsubscribe {
            packet_id,
            topics: vec![topic.into()],
        }
    }

    /// Create a Puback packet.
    #[must_use]
    pub fn puback(packet_id: u16) -> Self {
        Packet::Puback { packet_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type() {
        let connect = Packet::connect("client-1", 300);
        assert_eq!(connect.packet_type(), PacketType::Connect);

        let publish = Packet::publish("vending/status", b"{}".to_vec());
        assert_eq!(publish.packet_type(), PacketType::Publish);
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(1), Ok(QoS::AtLeastOnce));
        assert!(QoS::try_from(2).is_err());
    }

    #[test]
    fn test_connect_return_code_conversion() {
        assert_eq!(ConnectReturnCode::try_from(0), Ok(ConnectReturnCode::Accepted));
        assert_eq!(
            ConnectReturnCode::try_from(5),
            Ok(ConnectReturnCode::NotAuthorized)
        );
        assert!(ConnectReturnCode::try_from(6).is_err());
    }
}
