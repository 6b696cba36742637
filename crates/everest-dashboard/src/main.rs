//! # Everest dashboard
//!
//! Telemetry dashboard service for a vending-machine fleet.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! everest
//!
//! # Run with a config file at ./everest.toml
//! everest
//!
//! # Run with environment variables
//! EVEREST_BROKER_ENDPOINT=a1example-ats.iot.us-east-1.amazonaws.com \
//! EVEREST_ACCESS_KEY_ID=... EVEREST_SECRET_ACCESS_KEY=... everest
//! ```

mod config;
mod handlers;
mod metrics;
mod timeseries;

use anyhow::Result;
use everest_client::{ConnectSettings, Session, SessionConfig};
use everest_transport::{MqttWebSocketTransport, WebSocketTransportConfig};
use handlers::{AppState, MachineDirectory};
use std::sync::Arc;
use std::time::Duration;
use timeseries::{TimeseriesClient, UnconfiguredTimeseries};
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "everest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Everest dashboard on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    // Transport driver plus its event stream
    let (transport, events) = MqttWebSocketTransport::spawn(WebSocketTransportConfig {
        keep_alive_secs: config.broker.keep_alive_secs,
        connect_timeout: Duration::from_secs(config.broker.connect_timeout_secs),
    });

    let session = Session::new(
        SessionConfig {
            connect: ConnectSettings {
                credentials: config.signing_credentials(),
                region: config.broker.region.clone(),
                host: config.broker.endpoint.clone(),
                client_id: config::generate_client_id(),
                expires_in: config.broker.expires_in,
            },
            topics: config.topic_set(),
            buffer_capacity: config.buffers.capacity,
        },
        Arc::new(transport),
    );

    // Time-series collaborator: constructed here, torn down on exit
    let timeseries_client: Arc<dyn TimeseriesClient> = Arc::new(UnconfiguredTimeseries);

    let state = Arc::new(AppState {
        session: Mutex::new(session),
        machines: MachineDirectory::default(),
        timeseries: timeseries_client,
        config,
    });

    // First connect attempt; later ones go through POST /api/connect
    {
        metrics::record_connect_attempt();
        state.session.lock().await.connect();
    }

    tokio::spawn(handlers::run_event_loop(state.clone(), events));

    let served = handlers::run_server(state.clone()).await;

    if let Err(e) = state.timeseries.close().await {
        tracing::warn!("Time-series client teardown failed: {}", e);
    }

    served
}
