//! Run state shared between the supervisor, the orchestrator and the teams
//!
//! `SharedState` is the root record of one run. Teams never mutate it
//! directly: they return a `TeamEnvelope` which the supervisor folds back
//! into `team_results` after each step.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::intent::IntentResult;
use crate::orchestrator::OrchestrationMetadata;
use crate::plan::ExecutionPlan;

/// Entity key that asks the planner to reuse search data from an earlier turn
pub const REUSE_PREVIOUS_DATA: &str = "reuse_previous_data";

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Suspended,
    Completed,
    Failed,
}

/// Lifecycle of one team inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Status of one stage inside a team pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
    Suspended,
}

/// Progress of one stage, keyed by its stable step index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub name: String,
    pub status: StepStatus,
    pub percent: u8,
}

/// One turn of the conversation preceding the current query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Outcome status reported by a retrieval tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    /// The call raised or timed out
    Error,
    /// The tool answered but reported it could not serve the request
    Failed,
}

/// Uniform response of the retrieval-tool contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub status: ToolStatus,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub result_count: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResponse {
    /// Successful response; `result_count` follows the data length
    pub fn success(data: Vec<Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            result_count: data.len(),
            data,
            metadata: Map::new(),
        }
    }

    /// Response describing a tool that could not serve the request
    pub fn failed(message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(message.into()));
        Self {
            status: ToolStatus::Failed,
            data: Vec::new(),
            result_count: 0,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Record of one tool invocation inside the Search team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub status: ToolStatus,
    pub result_count: usize,
    #[serde(default)]
    pub data: Vec<Value>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of the Search team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchOutcome {
    pub keywords: Vec<String>,
    pub scope: Vec<String>,
    pub execution_mode: String,
    pub tool_runs: BTreeMap<String, ToolRun>,
    pub total_results: usize,
    pub sources: Vec<String>,
    pub failed_tools: Vec<String>,
}

/// Result of the Analysis team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisReport {
    pub summary: String,
    #[serde(default)]
    pub statistics: Map<String, Value>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub caveats: Vec<String>,
}

/// How the human (or configuration) settled the document approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Modified,
    Rejected,
    AutoApproved,
}

/// One rendered section of a generated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: String,
    pub body: String,
}

/// Result of the Document team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_type: String,
    pub title: String,
    pub sections: Vec<DocumentSection>,
    /// Rendered document; absent when the draft was rejected
    pub content: Option<String>,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub modifications: Vec<String>,
    pub supporting_results: usize,
}

/// Per-kind team result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TeamResult {
    Search(SearchOutcome),
    Analysis(AnalysisReport),
    Document(DocumentOutcome),
    /// Team failed before producing a typed result
    Empty,
}

impl TeamResult {
    pub fn kind(&self) -> &'static str {
        match self {
            TeamResult::Search(_) => "search",
            TeamResult::Analysis(_) => "analysis",
            TeamResult::Document(_) => "document",
            TeamResult::Empty => "empty",
        }
    }
}

/// Common envelope wrapping every team result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamEnvelope {
    pub status: TeamStatus,
    pub data: TeamResult,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TeamEnvelope {
    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }
}

/// Per-team working memory while a team runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub team: String,
    pub status: TeamStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<TeamResult>,
    pub step_progress: BTreeMap<usize, StepProgress>,
    pub error: Option<String>,
}

impl TeamState {
    pub fn new(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            status: TeamStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            step_progress: BTreeMap::new(),
            error: None,
        }
    }

    /// Fold this working memory into the envelope stored on `SharedState`
    pub fn into_envelope(self) -> TeamEnvelope {
        let mut metadata = Map::new();
        if let Some(started) = self.started_at {
            metadata.insert("started_at".to_string(), Value::String(started));
        }
        if let Some(finished) = self.finished_at {
            metadata.insert("finished_at".to_string(), Value::String(finished));
        }
        if let Some(error) = self.error {
            metadata.insert("error".to_string(), Value::String(error));
        }
        metadata.insert(
            "step_progress".to_string(),
            serde_json::to_value(&self.step_progress).unwrap_or(Value::Null),
        );
        TeamEnvelope {
            status: self.status,
            data: self.result.unwrap_or(TeamResult::Empty),
            metadata,
        }
    }
}

/// Answer synthesized by the aggregation node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    /// `answer`, `guidance` or `error`
    pub answer_type: String,
    pub content: String,
    pub teams_used: Vec<String>,
    pub sources: Vec<String>,
    pub degraded: bool,
}

/// Root record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub run_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub intent: Option<IntentResult>,
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub team_results: BTreeMap<String, TeamEnvelope>,
    #[serde(default)]
    pub active_teams: BTreeSet<String>,
    #[serde(default)]
    pub completed_teams: BTreeSet<String>,
    #[serde(default)]
    pub failed_teams: BTreeSet<String>,
    #[serde(default)]
    pub skipped_teams: BTreeSet<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub orchestration: OrchestrationMetadata,
    pub final_response: Option<FinalResponse>,
    #[serde(default)]
    pub status: RunStatus,
    pub started_at: String,
    pub updated_at: String,
}

impl SharedState {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            user_id: None,
            query: query.into(),
            history: Vec::new(),
            intent: None,
            plan: None,
            team_results: BTreeMap::new(),
            active_teams: BTreeSet::new(),
            completed_teams: BTreeSet::new(),
            failed_teams: BTreeSet::new(),
            skipped_teams: BTreeSet::new(),
            error: None,
            entities: Map::new(),
            orchestration: OrchestrationMetadata::default(),
            final_response: None,
            status: RunStatus::Running,
            started_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entities.insert(key.into(), value);
        self
    }

    pub fn reuse_previous_data(&self) -> bool {
        self.entities
            .get(REUSE_PREVIOUS_DATA)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Mark a team as running
    pub fn begin_team(&mut self, team: &str) {
        self.active_teams.insert(team.to_string());
        self.touch();
    }

    /// Merge a finished team's envelope back into the run
    pub fn merge_team_result(&mut self, team: &str, envelope: TeamEnvelope) {
        self.active_teams.remove(team);
        match envelope.status {
            TeamStatus::Failed => {
                self.failed_teams.insert(team.to_string());
                self.completed_teams.remove(team);
                let message = envelope.error().unwrap_or("unknown error").to_string();
                self.error = Some(format!("{} team failed: {}", team, message));
            }
            _ => {
                self.completed_teams.insert(team.to_string());
                self.failed_teams.remove(team);
            }
        }
        self.team_results.insert(team.to_string(), envelope);
        self.touch();
    }

    /// Whether the team has finished, successfully or not
    pub fn is_team_done(&self, team: &str) -> bool {
        self.completed_teams.contains(team)
            || self.failed_teams.contains(team)
            || self.skipped_teams.contains(team)
    }

    pub fn search_outcome(&self) -> Option<&SearchOutcome> {
        match self.team_results.get("search").map(|e| &e.data) {
            Some(TeamResult::Search(outcome)) => Some(outcome),
            _ => None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_envelope(status: TeamStatus, error: Option<&str>) -> TeamEnvelope {
        let mut team = TeamState::new("search");
        team.status = status;
        team.error = error.map(str::to_string);
        team.result = Some(TeamResult::Search(SearchOutcome::default()));
        team.into_envelope()
    }

    #[test]
    fn test_merge_completed_team() {
        let mut state = SharedState::new("s1", "강남구 시세");
        state.begin_team("search");
        state.merge_team_result("search", search_envelope(TeamStatus::Completed, None));

        assert!(state.active_teams.is_empty());
        assert!(state.completed_teams.contains("search"));
        assert!(state.error.is_none());
        assert!(state.search_outcome().is_some());
    }

    #[test]
    fn test_merge_failed_team_surfaces_error() {
        let mut state = SharedState::new("s1", "q");
        state.merge_team_result(
            "search",
            search_envelope(TeamStatus::Failed, Some("no tools registered")),
        );

        assert!(state.failed_teams.contains("search"));
        assert_eq!(
            state.error.as_deref(),
            Some("search team failed: no tools registered")
        );
    }

    #[test]
    fn test_team_result_serialization_is_tagged() {
        let json = serde_json::to_value(TeamResult::Analysis(AnalysisReport::default())).unwrap();
        assert_eq!(json["kind"], "analysis");
        assert!(json["payload"].is_object());
    }

    #[test]
    fn test_reuse_flag() {
        let state = SharedState::new("s", "q").with_entity(REUSE_PREVIOUS_DATA, Value::Bool(true));
        assert!(state.reuse_previous_data());
        assert!(!SharedState::new("s", "q").reuse_previous_data());
    }
}
