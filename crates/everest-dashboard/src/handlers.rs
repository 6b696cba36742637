//! HTTP surface and broker event loop for the dashboard.
//!
//! The event loop is the single place transport callbacks are applied:
//! it drains the `BrokerEvent` stream and feeds each event through the
//! session while holding its lock, so no callback runs concurrently with
//! another or with an HTTP handler.

use crate::config::Config;
use crate::metrics;
use crate::timeseries::{TimeseriesClient, TimeseriesError};
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use everest_client::{ConnectionState, PublishError, Session, TopicState};
use everest_protocol::{StatusReport, TopicKind, TopicSet, VendCommand};
use everest_transport::BrokerEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The broker session; locked for every event and every handler call.
    pub session: Mutex<Session>,
    /// Latest status report per machine hostname.
    pub machines: MachineDirectory,
    /// Time-series collaborator.
    pub timeseries: Arc<dyn TimeseriesClient>,
    /// Dashboard configuration.
    pub config: Config,
}

/// Latest-status directory keyed by machine hostname.
///
/// Written by the event loop, read concurrently by HTTP handlers.
#[derive(Default)]
pub struct MachineDirectory {
    latest: DashMap<String, StatusReport>,
}

impl MachineDirectory {
    /// Record a status report; reports without a hostname are skipped.
    pub fn observe(&self, report: &StatusReport) {
        if let Some(hostname) = &report.hostname {
            self.latest.insert(hostname.clone(), report.clone());
        }
    }

    /// Snapshot of the directory, sorted by hostname.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StatusReport> {
        self.latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Drain the broker event stream into the session.
///
/// After a successful connect, every topic of the deployment set is
/// re-subscribed: a disconnect or loss always clears subscription state,
/// so each new connection starts from scratch.
pub async fn run_event_loop(
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<BrokerEvent>,
) {
    let topics = state.config.topic_set();

    while let Some(event) = events.recv().await {
        observe_event(&state, &topics, &event);

        let just_connected = matches!(event, BrokerEvent::Connected);
        let mut session = state.session.lock().await;
        session.handle_event(event);

        if just_connected {
            for topic in topics.all() {
                session.subscribe(topic);
            }
        }
    }

    debug!("Broker event stream ended");
}

/// Record metrics and the machine directory for one event.
fn observe_event(state: &AppState, topics: &TopicSet, event: &BrokerEvent) {
    match event {
        BrokerEvent::Connected => metrics::set_connection_up(true),
        BrokerEvent::ConnectFailed(_) => metrics::record_error("connect"),
        BrokerEvent::ConnectionLost(_) => {
            metrics::set_connection_up(false);
            metrics::record_error("connection_lost");
        }
        BrokerEvent::SubscribeResult { success, .. } => {
            metrics::record_subscription_op("subscribe", *success);
        }
        BrokerEvent::UnsubscribeResult { success, .. } => {
            metrics::record_subscription_op("unsubscribe", *success);
        }
        BrokerEvent::MessageArrived { topic, payload } => {
            if let Some(kind) = topics.classify(topic) {
                metrics::record_message(category_name(kind));
                if kind == TopicKind::Status {
                    if let Ok(report) = StatusReport::from_payload(payload) {
                        state.machines.observe(&report);
                    }
                }
            }
        }
    }
}

fn category_name(kind: TopicKind) -> &'static str {
    match kind {
        TopicKind::Status => "status",
        TopicKind::Command => "command",
        TopicKind::Event => "event",
    }
}

/// Run the HTTP API server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_addr()?;

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/connection", get(connection_handler))
        .route("/api/connect", post(connect_handler))
        .route("/api/disconnect", post(disconnect_handler))
        .route("/api/status", get(status_buffer_handler))
        .route("/api/events", get(event_buffer_handler))
        .route("/api/sent", get(sent_buffer_handler))
        .route("/api/machines", get(machines_handler))
        .route("/api/vend", post(vend_handler))
        .route("/api/history/:table", get(history_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Dashboard API listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connection and subscription state view.
#[derive(Debug, Serialize)]
struct ConnectionView {
    state: ConnectionState,
    loading: bool,
    publish_enabled: bool,
    topics: HashMap<String, TopicState>,
}

async fn connection_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().await;
    Json(ConnectionView {
        state: session.state(),
        loading: session.is_loading(),
        publish_enabled: session.publish_enabled(),
        topics: session.subscription_states().clone(),
    })
}

async fn connect_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::record_connect_attempt();
    state.session.lock().await.connect();
    StatusCode::ACCEPTED
}

async fn disconnect_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.session.lock().await.disconnect();
    StatusCode::ACCEPTED
}

async fn status_buffer_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    Json(session.status_buffer().snapshot()).into_response()
}

async fn event_buffer_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    Json(session.event_buffer().snapshot()).into_response()
}

async fn sent_buffer_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    Json(session.sent_buffer().snapshot()).into_response()
}

async fn machines_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.machines.snapshot())
}

/// Vend request body.
#[derive(Debug, Deserialize)]
struct VendRequest {
    product: String,
}

async fn vend_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VendRequest>,
) -> Response {
    let command = VendCommand::new(request.product);
    let result = state.session.lock().await.publish_command(&command);

    match result {
        Ok(()) => {
            metrics::record_publish();
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "dispatched" })),
            )
                .into_response()
        }
        Err(PublishError::GateClosed) => {
            metrics::record_error("gate_closed");
            error_response(StatusCode::CONFLICT, "command channels are not subscribed")
        }
        Err(PublishError::NotConnected) => {
            metrics::record_error("not_connected");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "not connected to the broker")
        }
    }
}

/// History query parameters.
#[derive(Debug, Deserialize)]
struct HistoryParams {
    /// Lookback window in hours; defaults to the configured window.
    hours: Option<u64>,
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let ts_config = &state.config.timeseries;
    if table != ts_config.status_table && table != ts_config.events_table {
        return error_response(StatusCode::NOT_FOUND, "unknown table");
    }

    let hours = params.hours.unwrap_or(ts_config.lookback_hours);
    let lookback = Duration::from_secs(hours * 3600);

    match state
        .timeseries
        .query(&ts_config.database, &table, lookback)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(TimeseriesError::Unconfigured) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "history backend not configured")
        }
        Err(TimeseriesError::Query(reason)) => {
            warn!(table = %table, reason = %reason, "History query failed");
            metrics::record_error("timeseries");
            error_response(StatusCode::BAD_GATEWAY, "history query failed")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(hostname: Option<&str>, time: i64) -> StatusReport {
        StatusReport {
            time,
            hostname: hostname.map(ToString::to_string),
            ambient: None,
            exhaust: None,
            dc: None,
        }
    }

    #[test]
    fn test_machine_directory_keeps_latest_per_host() {
        let directory = MachineDirectory::default();
        directory.observe(&report(Some("vm-02"), 1));
        directory.observe(&report(Some("vm-01"), 2));
        directory.observe(&report(Some("vm-02"), 3));

        let snapshot = directory.snapshot();
        let hosts: Vec<&String> = snapshot.keys().collect();
        assert_eq!(hosts, ["vm-01", "vm-02"]);
        assert_eq!(snapshot["vm-02"].time, 3);
    }

    #[test]
    fn test_machine_directory_skips_anonymous_reports() {
        let directory = MachineDirectory::default();
        directory.observe(&report(None, 1));
        assert!(directory.snapshot().is_empty());
    }
}
