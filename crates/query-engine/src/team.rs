//! Seam between the supervisor and the team implementations
//!
//! The supervisor knows plans and checkpoints; the team crate knows stages
//! and tools. `TeamExecutor` is the only contract between them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::events::ProgressSink;
use crate::interrupt::{InterruptPayload, ResumeCommand};
use crate::pipeline::TeamContinuation;
use crate::plan::ExecutionStep;
use crate::state::{SharedState, TeamState};

/// Resume data for a parked team
#[derive(Debug, Clone)]
pub struct TeamResume {
    pub continuation: TeamContinuation,
    pub command: ResumeCommand,
}

/// One team invocation
#[derive(Debug, Clone)]
pub struct TeamRequest {
    pub run_id: String,
    pub step: ExecutionStep,
    /// Snapshot of the run at dispatch time
    pub state: SharedState,
    /// Progress carried over from before a suspension
    pub previous: Option<TeamState>,
    pub resume: Option<TeamResume>,
}

impl TeamRequest {
    pub fn team(&self) -> &str {
        &self.step.team
    }

    /// Orchestrator adjustments for this team
    pub fn adjustments(&self) -> Map<String, Value> {
        self.state
            .orchestration
            .adjustments
            .get(&self.step.team)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve the step's `${step.output}` input mapping against finished teams
    pub fn resolved_inputs(&self) -> Map<String, Value> {
        let mut inputs = Map::new();
        for (name, reference) in &self.step.input_mapping {
            let source = reference
                .strip_prefix("${")
                .and_then(|r| r.strip_suffix(".output}"));
            let Some(source) = source else {
                continue;
            };
            if let Some(envelope) = self.state.team_results.get(source) {
                if let Ok(value) = serde_json::to_value(&envelope.data) {
                    inputs.insert(name.clone(), value);
                }
            }
        }
        inputs
    }
}

/// How a team invocation ended
#[derive(Debug, Clone)]
pub enum TeamOutcome {
    /// Completed or failed; the team state carries the status
    Finished(TeamState),
    /// Parked at an approval gate
    Suspended {
        progress: TeamState,
        interrupt: InterruptPayload,
        continuation: TeamContinuation,
    },
}

/// Runs one team's pipeline
#[async_trait]
pub trait TeamExecutor: Send + Sync {
    /// Execute a team step, or continue it when `request.resume` is set
    async fn execute(&self, request: TeamRequest, sink: Arc<dyn ProgressSink>) -> Result<TeamOutcome>;

    /// Teams this executor can run
    fn teams(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SearchOutcome, TeamResult, TeamStatus};

    #[test]
    fn test_resolved_inputs_follow_mapping() {
        let mut state = SharedState::new("s", "q");
        let mut search = TeamState::new("search");
        search.status = TeamStatus::Completed;
        search.result = Some(TeamResult::Search(SearchOutcome {
            total_results: 4,
            ..Default::default()
        }));
        state.merge_team_result("search", search.into_envelope());

        let mut step = ExecutionStep::new("analysis", 2, 60).depends_on("search");
        step.input_mapping.insert("market".into(), "${search.output}".into());
        step.input_mapping.insert("missing".into(), "${document.output}".into());
        let request = TeamRequest {
            run_id: "r".into(),
            step,
            state,
            previous: None,
            resume: None,
        };

        let inputs = request.resolved_inputs();
        assert_eq!(inputs["market"]["payload"]["total_results"], 4);
        assert!(!inputs.contains_key("missing"));
    }
}
