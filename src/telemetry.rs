//! Thin telemetry sink.
//!
//! The core reports failures and notable events here; presentation and
//! shipping are host concerns. The default sink forwards everything to
//! `tracing` so a bare host still gets structured logs.

use std::sync::Arc;

use tracing::{error, info};

/// Context tags attached to telemetry records.
#[derive(Debug, Clone, Default)]
pub struct TelemetryTags {
    pub agent_id: Option<String>,
    pub server_name: Option<String>,
    pub tool_name: Option<String>,
}

impl TelemetryTags {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn tool(
        agent_id: impl Into<String>,
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            server_name: Some(server_name.into()),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// Sink for error reports and subprocess diagnostics.
pub trait TelemetrySink: Send + Sync {
    fn record_error(&self, message: &str, tags: &TelemetryTags);

    fn record_event(&self, name: &str, tags: &TelemetryTags);

    /// One line of subprocess stderr.
    fn record_stderr(&self, agent_id: &str, line: &str);
}

/// Default sink backed by `tracing`.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_error(&self, message: &str, tags: &TelemetryTags) {
        error!(
            agent_id = tags.agent_id.as_deref().unwrap_or("-"),
            server = tags.server_name.as_deref().unwrap_or("-"),
            tool = tags.tool_name.as_deref().unwrap_or("-"),
            "{}",
            message
        );
    }

    fn record_event(&self, name: &str, tags: &TelemetryTags) {
        info!(
            agent_id = tags.agent_id.as_deref().unwrap_or("-"),
            "{}",
            name
        );
    }

    fn record_stderr(&self, agent_id: &str, line: &str) {
        tracing::debug!(target: "starling::subprocess", agent_id = %agent_id, "{}", line);
    }
}

pub type SharedTelemetry = Arc<dyn TelemetrySink>;

pub fn default_telemetry() -> SharedTelemetry {
    Arc::new(TracingTelemetry)
}
