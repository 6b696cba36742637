//! # everest-protocol
//!
//! Wire protocol and telemetry data model for the Everest dashboard.
//!
//! This crate defines the MQTT 3.1.1 subset spoken over the broker's
//! WebSocket endpoint, and the JSON payload records carried on the three
//! deployment topics:
//!
//! - `Packet` / `codec` - MQTT packet types and buffer codec
//! - `StatusReport` - periodic machine status telemetry
//! - `VendEvent` - per-sale event records
//! - `VendCommand` - outbound command payload
//! - `TopicSet` - the fixed topic triple and its classification
//!
//! ## Example
//!
//! ```rust
//! use everest_protocol::{codec, Packet, QoS};
//!
//! let packet = Packet::subscribe(1, "vending/status", QoS::AtMostOnce);
//! let encoded = codec::encode(&packet).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(packet, decoded);
//! ```

pub mod codec;
pub mod packet;
pub mod telemetry;

pub use codec::{decode, decode_from, encode, ProtocolError};
pub use packet::{ConnectReturnCode, Packet, PacketType, QoS, SUBACK_FAILURE};
pub use telemetry::{Price, StatusReport, TopicKind, TopicSet, VendCommand, VendEvent};
