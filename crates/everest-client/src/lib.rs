//! # everest-client
//!
//! The broker connectivity kernel for the Everest dashboard.
//!
//! This crate owns the stateful side of the broker relationship:
//!
//! - **ConnectionManager** - the connect/disconnect lifecycle state machine
//! - **SubscriptionRegistry** - per-topic subscription state
//! - **MessageRouter** - classification and buffering of inbound telemetry
//! - **PublishGateway** - prerequisite-gated outbound sends
//! - **Session** - the facade tying them to one transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────┐     ┌──────────────────────┐
//! │   caller    │────▶│      Session      │────▶│   BrokerTransport    │
//! └─────────────┘     └───────────────────┘     └──────────────────────┘
//!                       │     │      │                     │
//!                       ▼     ▼      ▼                     │
//!                 Connection Registry Router/Gateway ◀─────┘
//!                                           (BrokerEvent)
//! ```
//!
//! All transport callbacks are applied through [`Session::handle_event`],
//! one at a time, so no callback ever executes concurrently with another
//! or with synchronous caller code.

pub mod connection;
pub mod gateway;
pub mod router;
pub mod session;
pub mod subscriptions;

pub use connection::{ConnectSettings, ConnectionManager, ConnectionState};
pub use gateway::{PublishError, PublishGateway};
pub use router::{BufferEntry, MessageRouter, TopicBuffer};
pub use session::{Session, SessionConfig};
pub use subscriptions::{SubscriptionRegistry, TopicState};
