//! Time-series collaborator boundary.
//!
//! Historical data lives in an external time-series service; the core
//! neither constructs nor executes that query logic. This module defines
//! the interface the dashboard calls across: a client queried by
//! (database, table, lookback window) returning rows already shaped for
//! numeric extraction. The client is an explicitly constructed value with
//! a defined teardown, passed through initialization rather than held in
//! process-wide mutable state.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Collaborator errors.
#[derive(Debug, Error)]
pub enum TimeseriesError {
    /// No backend has been configured for this deployment.
    #[error("Time-series backend not configured")]
    Unconfigured,

    /// The backend rejected or failed the query.
    #[error("Query failed: {0}")]
    Query(String),
}

/// One result row: a timestamp plus named column values.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    /// Row time, epoch milliseconds.
    pub time: i64,
    /// Column values keyed by name.
    pub values: BTreeMap<String, serde_json::Value>,
}

/// Query interface of the time-series service.
#[async_trait]
pub trait TimeseriesClient: Send + Sync {
    /// Fetch rows from `database.table` over the trailing window.
    async fn query(
        &self,
        database: &str,
        table: &str,
        lookback: Duration,
    ) -> Result<Vec<Row>, TimeseriesError>;

    /// Release backend resources.
    async fn close(&self) -> Result<(), TimeseriesError> {
        Ok(())
    }
}

/// Placeholder client for deployments without a query backend.
pub struct UnconfiguredTimeseries;

#[async_trait]
impl TimeseriesClient for UnconfiguredTimeseries {
    async fn query(
        &self,
        database: &str,
        table: &str,
        _lookback: Duration,
    ) -> Result<Vec<Row>, TimeseriesError> {
        debug!(database = %database, table = %table, "History query without a configured backend");
        Err(TimeseriesError::Unconfigured)
    }
}

/// Extract a numeric series from result rows.
///
/// Rows lacking the column, or carrying a value that is neither a number
/// nor a numeric string, are skipped.
#[must_use]
pub fn numeric_series(rows: &[Row], column: &str) -> Vec<(i64, f64)> {
    rows.iter()
        .filter_map(|row| {
            row.values
                .get(column)
                .and_then(value_as_f64)
                .map(|value| (row.time, value))
        })
        .collect()
}

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(time: i64, column: &str, value: serde_json::Value) -> Row {
        let mut values = BTreeMap::new();
        values.insert(column.to_string(), value);
        Row { time, values }
    }

    #[test]
    fn test_numeric_series_extraction() {
        let rows = vec![
            row(1, "ambient", json!(21.5)),
            row(2, "ambient", json!("22.0")),
            row(3, "ambient", json!(null)),
            row(4, "exhaust", json!(30.0)),
        ];

        let series = numeric_series(&rows, "ambient");
        assert_eq!(series, vec![(1, 21.5), (2, 22.0)]);
    }

    #[tokio::test]
    async fn test_unconfigured_client_errors() {
        let client = UnconfiguredTimeseries;
        let result = client
            .query("everest", "machineStatus", Duration::from_secs(3600))
            .await;
        assert!(matches!(result, Err(TimeseriesError::Unconfigured)));
        assert!(client.close().await.is_ok());
    }
}
