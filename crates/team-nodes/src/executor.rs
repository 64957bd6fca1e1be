//! `TeamExecutor` backed by the stage pipelines in this crate

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use query_engine::constants::teams;
use query_engine::pipeline::{error_key, resume_key};
use query_engine::state::{now_rfc3339, AnalysisReport, ApprovalDecision, DocumentOutcome, SearchOutcome};
use query_engine::{
    ContextKeys, EngineError, InterruptPayload, PipelineOutcome, ProgressSink, Result, StagePipeline, TeamExecutor,
    TeamOutcome, TeamRequest, TeamResult, TeamState, TeamStatus,
};

use crate::document::DocumentPlan;
use crate::services::{team_input, TeamServices};
use crate::{analysis, document, search};

/// Runs Search, Analysis and Document pipelines
///
/// Pipelines are rebuilt for every call; a parked team continues from the
/// `TeamContinuation` alone, so resume works in a fresh process.
pub struct TeamNodeExecutor {
    services: TeamServices,
}

impl TeamNodeExecutor {
    pub fn new(services: TeamServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &TeamServices {
        &self.services
    }

    fn pipeline(&self, team: &str) -> Result<StagePipeline> {
        match team {
            teams::SEARCH => Ok(search::pipeline(&self.services)),
            teams::ANALYSIS => Ok(analysis::pipeline(&self.services)),
            teams::DOCUMENT => Ok(document::pipeline(&self.services)),
            other => Err(EngineError::UnknownTeam(other.to_string())),
        }
    }

    /// Initial context for a fresh team run
    fn seed(request: &TeamRequest) -> BTreeMap<String, Value> {
        let mut seed = BTreeMap::new();
        seed.insert(team_input("query"), json!(request.state.query));
        seed.insert(team_input("adjustments"), Value::Object(request.adjustments()));
        seed.insert(team_input("entities"), Value::Object(request.state.entities.clone()));
        seed.insert(team_input("inputs"), Value::Object(request.resolved_inputs()));
        if let Some(tools) = request.step.selected_tools() {
            seed.insert(team_input("tools"), json!(tools));
        }
        if let Some(outcome) = request.state.search_outcome() {
            seed.insert(team_input("search"), json!(outcome));
        }
        seed
    }

    /// Typed team result from the pipeline's published outputs
    fn result(team: &str, memory: &BTreeMap<String, Value>) -> Option<TeamResult> {
        let read = |key: String| memory.get(&key).cloned();
        match team {
            teams::SEARCH => {
                let outcome = read(ContextKeys::output(search::FINALIZE, "outcome"))
                    .or_else(|| read(ContextKeys::output(search::AGGREGATE, "outcome")))
                    .and_then(|v| serde_json::from_value::<SearchOutcome>(v).ok())?;
                Some(TeamResult::Search(outcome))
            }
            teams::ANALYSIS => {
                let report = read(ContextKeys::output(analysis::REPORT, "report"))
                    .and_then(|v| serde_json::from_value::<AnalysisReport>(v).ok())?;
                Some(TeamResult::Analysis(report))
            }
            teams::DOCUMENT => {
                let plan = read(ContextKeys::output(document::PLANNING, "plan"))
                    .and_then(|v| serde_json::from_value::<DocumentPlan>(v).ok())?;
                let decision = read(ContextKeys::output(document::AGGREGATE, "decision"))
                    .and_then(|v| serde_json::from_value::<ApprovalDecision>(v).ok())?;
                let content = read(ContextKeys::output(document::GENERATE, "content"))
                    .and_then(|v| v.as_str().map(str::to_string));
                Some(TeamResult::Document(DocumentOutcome {
                    document_type: plan.document_type,
                    title: plan.title,
                    sections: read(ContextKeys::output(document::AGGREGATE, "sections"))
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default(),
                    content,
                    decision,
                    modifications: read(ContextKeys::output(document::AGGREGATE, "modifications"))
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default(),
                    supporting_results: read(ContextKeys::output(document::AGGREGATE, "supporting_results"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as usize,
                }))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl TeamExecutor for TeamNodeExecutor {
    async fn execute(&self, request: TeamRequest, sink: Arc<dyn ProgressSink>) -> Result<TeamOutcome> {
        let team = request.team().to_string();
        let pipeline = self.pipeline(&team)?;
        let mut progress = request.previous.clone().unwrap_or_else(|| TeamState::new(&team));

        let (seed, start) = match &request.resume {
            Some(resume) => {
                let mut memory = resume.continuation.memory.clone();
                memory.insert(
                    resume_key(&resume.continuation.stage_id),
                    serde_json::to_value(&resume.command)?,
                );
                log::info!(
                    "TeamNodeExecutor: resuming '{}' at stage '{}'",
                    team,
                    resume.continuation.stage_id
                );
                (memory, resume.continuation.stage_index)
            }
            None => (Self::seed(&request), 0),
        };

        match pipeline
            .run(seed, start, &mut progress, &request.run_id, sink.as_ref())
            .await
        {
            PipelineOutcome::Finished { memory } => {
                progress.result = Self::result(&team, &memory);
                match memory.get(&error_key(&team)).and_then(Value::as_str) {
                    Some(error) => {
                        progress.status = TeamStatus::Failed;
                        progress.error = Some(error.to_string());
                    }
                    None if progress.result.is_none() => {
                        progress.status = TeamStatus::Failed;
                        progress.error = Some(format!("team '{}' produced no result", team));
                    }
                    None => progress.status = TeamStatus::Completed,
                }
                progress.finished_at = Some(now_rfc3339());
                Ok(TeamOutcome::Finished(progress))
            }
            PipelineOutcome::Failed { memory, stage_id, error } => {
                progress.result = Self::result(&team, &memory);
                progress.status = TeamStatus::Failed;
                progress.error = Some(format!("stage '{}' failed: {}", stage_id, error));
                progress.finished_at = Some(now_rfc3339());
                Ok(TeamOutcome::Finished(progress))
            }
            PipelineOutcome::Suspended { continuation, interrupt } => Ok(TeamOutcome::Suspended {
                progress,
                interrupt: InterruptPayload::new(&team, continuation.stage_id.clone(), interrupt),
                continuation,
            }),
        }
    }

    fn teams(&self) -> Vec<String> {
        teams::PRECEDENCE.iter().map(|t| t.to_string()).collect()
    }
}
