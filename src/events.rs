//! In-memory run event log.
//!
//! The log is an append-only sequence of tagged events owned by the
//! orchestrator; insertion order is the only order. It is the sole source of
//! `traces.jsonl`, and an optional sink streams each event as it is recorded
//! (JSONL progress output under `--json`). Heartbeat timestamps come from
//! the time provider and never enter a digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FindingType, TruthState};

/// Pipeline phase names as they appear in traces and progress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Discovery,
    Learn,
    Preflight,
    Observe,
    Detect,
    Finalize,
}

impl PhaseName {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Learn => "learn",
            Self::Preflight => "preflight",
            Self::Observe => "observe",
            Self::Detect => "detect",
            Self::Finalize => "finalize",
        }
    }
}

/// Closed event kind set; one JSONL line per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        scan_id: String,
        run_id: String,
        url: String,
    },
    PhaseStarted {
        phase: PhaseName,
    },
    PhaseCompleted {
        phase: PhaseName,
    },
    PhaseTimedOut {
        phase: PhaseName,
    },
    Heartbeat {
        elapsed_ms: u64,
    },
    ObservationRecorded {
        id: String,
        attempted: bool,
        observed: bool,
    },
    FindingEmitted {
        id: String,
        #[serde(rename = "type")]
        finding_type: FindingType,
    },
    RunFinalized {
        truth: TruthState,
        exit_code: i32,
    },
}

/// One recorded event with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Sink invoked synchronously for each recorded event.
pub type EventSink = Box<dyn FnMut(&TracedEvent) + Send>;

/// Append-only event log.
pub struct EventLog {
    events: Vec<TracedEvent>,
    started_at: DateTime<Utc>,
    sink: Option<EventSink>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            started_at: crate::clock::now(),
            sink: None,
        }
    }

    /// Attach a streaming sink (used for `--json` progress output).
    #[must_use]
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn record(&mut self, event: RunEvent) {
        let traced = TracedEvent {
            at: crate::clock::now(),
            event,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink(&traced);
        }
        self.events.push(traced);
    }

    /// Record a heartbeat tick; elapsed time derives from the time provider.
    pub fn heartbeat(&mut self) {
        let elapsed = crate::clock::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0);
        #[allow(clippy::cast_sign_loss)]
        self.record(RunEvent::Heartbeat {
            elapsed_ms: elapsed as u64,
        });
    }

    #[must_use]
    pub fn events(&self) -> &[TracedEvent] {
        &self.events
    }

    /// Serialize the log to JSONL, one event per line, insertion order.
    pub fn to_jsonl(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
