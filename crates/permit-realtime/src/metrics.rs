//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered clients (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Clients dropped for a full outbound queue (counter).
pub const WS_CLIENTS_SHED_TOTAL: &str = "ws_clients_shed_total";
/// Inbound envelopes (counter, labels: kind).
pub const WS_ENVELOPES_RECEIVED_TOTAL: &str = "ws_envelopes_received_total";
/// Message ids reconciled from read receipts (counter).
pub const READ_RECEIPTS_PROCESSED_TOTAL: &str = "read_receipts_processed_total";
