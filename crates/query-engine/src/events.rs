//! Progress events for runs
//!
//! Events are sent from the supervisor, the orchestrator and the team
//! pipelines to any consumer (a UI socket, a log, a test buffer). Delivery is
//! best-effort: a failed send never fails the run.

use serde::{Deserialize, Serialize};

use crate::state::{RunStatus, StepStatus, TeamStatus};

/// Trait for sending run progress events
pub trait ProgressSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., socket closed)
    fn send(&self, event: ProgressEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted {
        run_id: String,
        session_id: String,
        query: String,
    },

    /// Planner produced a plan (possibly empty)
    #[serde(rename_all = "camelCase")]
    PlanReady {
        run_id: String,
        intent: String,
        confidence: f64,
        teams: Vec<String>,
    },

    /// Orchestrator recorded a strategy, tool selection or adjustment
    #[serde(rename_all = "camelCase")]
    Orchestration {
        run_id: String,
        phase: String,
        kind: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    TeamStarted { run_id: String, team: String },

    /// A team pipeline stage changed status
    #[serde(rename_all = "camelCase")]
    StepProgress {
        run_id: String,
        team: String,
        step_index: usize,
        step_name: String,
        status: StepStatus,
        percent: u8,
    },

    #[serde(rename_all = "camelCase")]
    TeamFinished {
        run_id: String,
        team: String,
        status: TeamStatus,
        error: Option<String>,
    },

    /// A team was skipped by the error policy
    #[serde(rename_all = "camelCase")]
    TeamSkipped {
        run_id: String,
        team: String,
        reason: String,
    },

    /// Run parked waiting for a human decision
    #[serde(rename_all = "camelCase")]
    Interrupted {
        run_id: String,
        session_id: String,
        team: String,
        node_name: String,
    },

    #[serde(rename_all = "camelCase")]
    Resumed {
        run_id: String,
        session_id: String,
        action: String,
    },

    #[serde(rename_all = "camelCase")]
    RunFinished {
        run_id: String,
        status: RunStatus,
        error: Option<String>,
    },
}

impl ProgressEvent {
    /// Stable event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::RunStarted { .. } => "run_started",
            ProgressEvent::PlanReady { .. } => "plan_ready",
            ProgressEvent::Orchestration { .. } => "orchestration",
            ProgressEvent::TeamStarted { .. } => "team_started",
            ProgressEvent::StepProgress { .. } => "step_progress",
            ProgressEvent::TeamFinished { .. } => "team_finished",
            ProgressEvent::TeamSkipped { .. } => "team_skipped",
            ProgressEvent::Interrupted { .. } => "interrupted",
            ProgressEvent::Resumed { .. } => "resumed",
            ProgressEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// Create a step progress event
    pub fn step_progress(
        run_id: &str,
        team: &str,
        step_index: usize,
        step_name: &str,
        status: StepStatus,
        percent: u8,
    ) -> Self {
        Self::StepProgress {
            run_id: run_id.to_string(),
            team: team.to_string(),
            step_index,
            step_name: step_name.to_string(),
            status,
            percent,
        }
    }

    /// Create an orchestration event
    pub fn orchestration(run_id: &str, phase: &str, kind: &str, message: impl Into<String>) -> Self {
        Self::Orchestration {
            run_id: run_id.to_string(),
            phase: phase.to_string(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Send an event, logging and ignoring delivery failures
pub fn emit(sink: &dyn ProgressSink, event: ProgressEvent) {
    let event_type = event.event_type();
    if let Err(e) = sink.send(event) {
        log::warn!("ProgressSink: dropped '{}' event: {}", event_type, e);
    }
}

/// A no-op sink that discards all events
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn send(&self, _event: ProgressEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecProgressSink {
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
}

impl VecProgressSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Collected events of one type
    pub fn of_type(&self, event_type: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for VecProgressSink {
    fn send(&self, event: ProgressEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
