//! Prometheus exporter setup

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use voice_bridge_config::ObservabilityConfig;

use crate::ServerError;

/// Install the Prometheus exporter when enabled
///
/// Returns whether an exporter is listening. Must run inside the tokio
/// runtime, which hosts the scrape endpoint.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<bool, ServerError> {
    if !config.metrics_enabled {
        return Ok(false);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    register_default_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(true)
}

/// Zero the series so they are scrapeable before the first call
fn register_default_metrics() {
    for direction in ["inbound", "outbound", "stream"] {
        counter!("voice_bridge_queue_overruns_total", "direction" => direction).absolute(0);
    }
    for outcome in ["completed", "abandoned", "discarded"] {
        counter!("voice_bridge_turns_total", "outcome" => outcome).absolute(0);
    }
    for stage in ["transcribe", "reason", "synthesize"] {
        histogram!("voice_bridge_remote_call_seconds", "stage" => stage).record(0.0);
    }
    counter!("voice_bridge_barge_ins_total").absolute(0);
    for outcome in ["restored", "failed"] {
        counter!("voice_bridge_session_reconnects_total", "outcome" => outcome).absolute(0);
    }
}
