//! Row-free run telemetry.
//!
//! Events carry identifiers, counts, durations and categories only. A sink
//! without a listener drops events; a listener that panics is logged and
//! otherwise ignored, so telemetry can never fail a run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use querypilot_sql::QueryArchetype;
use serde::Serialize;

use crate::result::StopReason;
use crate::router::ClassificationMethod;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    RunStart {
        run_id: String,
        started_at: DateTime<Utc>,
        input_chars: usize,
        attachments: usize,
    },
    SchemaReady {
        run_id: String,
        tables: usize,
        digest_chars: usize,
    },
    Classified {
        run_id: String,
        query_type: QueryArchetype,
        confidence: f64,
        method: ClassificationMethod,
    },
    ToolCall {
        run_id: String,
        tool: String,
    },
    ToolResult {
        run_id: String,
        tool: String,
        rows: usize,
        duration_ms: u64,
    },
    RepairAttempt {
        run_id: String,
        error_kind: String,
        succeeded: bool,
    },
    Error {
        run_id: String,
        category: String,
    },
    RunEnd {
        run_id: String,
        stop_reason: StopReason,
        elapsed_ms: u64,
    },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::RunStart { .. } => "run_start",
            TelemetryEvent::SchemaReady { .. } => "schema_ready",
            TelemetryEvent::Classified { .. } => "classified",
            TelemetryEvent::ToolCall { .. } => "tool_call",
            TelemetryEvent::ToolResult { .. } => "tool_result",
            TelemetryEvent::RepairAttempt { .. } => "repair_attempt",
            TelemetryEvent::Error { .. } => "error",
            TelemetryEvent::RunEnd { .. } => "run_end",
        }
    }
}

pub type TelemetryListener = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct TelemetrySink {
    listener: Option<TelemetryListener>,
}

impl TelemetrySink {
    pub fn none() -> Self {
        Self { listener: None }
    }

    pub fn new(listener: impl Fn(&TelemetryEvent) + Send + Sync + 'static) -> Self {
        Self {
            listener: Some(Arc::new(listener)),
        }
    }

    pub fn emit(&self, event: TelemetryEvent) {
        tracing::trace!(event = event.kind(), "telemetry");
        let Some(listener) = &self.listener else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
            tracing::warn!(event = event.kind(), "telemetry listener panicked; event dropped");
        }
    }
}

impl fmt::Debug for TelemetrySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetrySink")
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
