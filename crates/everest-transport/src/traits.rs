//! Transport abstraction for the broker connection.
//!
//! The trait models the callback-driven contract of the connectivity
//! kernel: a call initiates a network operation and returns immediately;
//! its outcome is observed later as a [`BrokerEvent`], never as a return
//! value.

use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake did not complete within the configured window.
    #[error("Connection timed out")]
    Timeout,

    /// The broker refused the session.
    #[error("Connection refused: {0}")]
    Refused(&'static str),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Wire protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] everest_protocol::ProtocolError),

    /// WebSocket-layer error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Events delivered by a broker transport.
///
/// Events for a single connection are serialized: no two are delivered
/// concurrently, and for each dispatched operation exactly one terminal
/// event fires.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A connect attempt succeeded.
    Connected,

    /// A connect attempt failed.
    ConnectFailed(String),

    /// Terminal outcome of a subscribe request.
    SubscribeResult {
        /// Requested topic.
        topic: String,
        /// Whether the broker granted the subscription.
        success: bool,
    },

    /// Terminal outcome of an unsubscribe request.
    UnsubscribeResult {
        /// Requested topic.
        topic: String,
        /// Whether the broker acknowledged the removal.
        success: bool,
    },

    /// An application message arrived.
    MessageArrived {
        /// Source topic.
        topic: String,
        /// Raw payload bytes.
        payload: Bytes,
    },

    /// The connection dropped without a caller-requested disconnect.
    ConnectionLost(String),
}

/// Command side of a broker transport.
///
/// Implementations own the live connection exclusively; callers hold this
/// handle and the event stream, nothing else. All methods are
/// fire-and-forget: dispatched operations cannot be cancelled.
pub trait BrokerTransport: Send + Sync {
    /// Dispatch a connect attempt against a presigned URL.
    ///
    /// Terminates in `Connected` or `ConnectFailed`.
    fn connect(&self, url: String, client_id: String);

    /// Close the current connection, if any.
    ///
    /// A caller-requested close emits no `ConnectionLost`.
    fn disconnect(&self);

    /// Dispatch a subscribe request. Terminates in `SubscribeResult`.
    fn subscribe(&self, topic: &str);

    /// Dispatch an unsubscribe request. Terminates in `UnsubscribeResult`.
    fn unsubscribe(&self, topic: &str);

    /// Send an application message. Fire-and-forget at QoS 0; send
    /// failures surface only as connection loss.
    fn publish(&self, topic: &str, payload: Bytes);
}
