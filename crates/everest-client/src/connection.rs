//! Connection lifecycle state machine.
//!
//! The manager is the exclusive owner of the transport handle; every other
//! component observes derived, read-only state. A fresh signed URL is
//! produced for every connect attempt, never cached, since each signature
//! captures the wall clock at the moment of the call.

use chrono::Utc;
use everest_auth::{presigned_url, Credentials, SigningContext};
use everest_transport::BrokerTransport;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Parameters for establishing a broker session.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Signing credentials, immutable for the process lifetime.
    pub credentials: Credentials,
    /// Signing region.
    pub region: String,
    /// Broker endpoint host.
    pub host: String,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Presigned-URL validity window in seconds.
    pub expires_in: u64,
}

/// Owner of the single live broker connection.
pub struct ConnectionManager {
    state: ConnectionState,
    settings: ConnectSettings,
    transport: Arc<dyn BrokerTransport>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(settings: ConnectSettings, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            settings,
            transport,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Command-dispatch view of the transport, for components that send
    /// over the established connection.
    pub(crate) fn transport(&self) -> &dyn BrokerTransport {
        self.transport.as_ref()
    }

    /// Initiate a connect attempt.
    ///
    /// Signs a fresh URL and dispatches the attempt. Acts only from
    /// `Disconnected`; a connect while Connecting or Connected is ignored
    /// with a warning.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!(state = ?self.state, "Connect ignored: connection attempt already active");
            return;
        }

        let ctx = SigningContext::iot_gateway(&self.settings.region, &self.settings.host)
            .with_expires_in(self.settings.expires_in);
        let url = presigned_url(&self.settings.credentials, &ctx, Utc::now());

        debug!(host = %self.settings.host, client_id = %self.settings.client_id, "Connecting to broker");
        self.state = ConnectionState::Connecting;
        self.transport.connect(url, self.settings.client_id.clone());
    }

    /// Close the connection.
    ///
    /// Meaningful only when Connected. Returns `true` when a live
    /// connection was closed, in which case the caller must reset all
    /// subscription state.
    pub fn disconnect(&mut self) -> bool {
        if self.state != ConnectionState::Connected {
            debug!(state = ?self.state, "Disconnect ignored: not connected");
            return false;
        }

        debug!("Disconnecting from broker");
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Apply a successful connect outcome.
    pub(crate) fn on_connect_success(&mut self) {
        if self.state == ConnectionState::Connecting {
            debug!("Broker connection established");
            self.state = ConnectionState::Connected;
        } else {
            // An outcome for an attempt this state no longer tracks.
            warn!(state = ?self.state, "Stale connect success ignored");
        }
    }

    /// Apply a failed connect outcome.
    pub(crate) fn on_connect_failure(&mut self, reason: &str) {
        if self.state == ConnectionState::Connecting {
            warn!(reason = %reason, "Broker connection failed");
            self.state = ConnectionState::Disconnected;
        } else {
            warn!(state = ?self.state, reason = %reason, "Stale connect failure ignored");
        }
    }

    /// Apply an unsolicited connection loss.
    ///
    /// Returns `true` when state was reset, in which case the caller must
    /// reset all subscription state.
    pub(crate) fn on_connection_lost(&mut self, reason: &str) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        warn!(reason = %reason, "Broker connection lost");
        self.state = ConnectionState::Disconnected;
        true
    }
}
