//! Orchestrator
//!
//! Runs twice around team execution:
//!
//! - before: picks a strategy and a per-team tool subset (`orchestrate`)
//! - after each team: scores the result, learns tool statistics and writes
//!   adjustments for teams that have not run yet (`analyze_team_result`)
//!
//! Every decision is appended to `SharedState.orchestration.decisions`.

mod quality;
mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::OrchestratorConfig;
use crate::constants::{model, prompts};
use crate::error::{EngineError, Result};
use crate::events::{emit, ProgressEvent, ProgressSink};
use crate::llm::LanguageModel;
use crate::registry::CapabilityRegistry;
use crate::state::{now_rfc3339, SharedState, TeamEnvelope, TeamResult, ToolStatus};

pub use quality::{adjustment_for, assess_quality};
pub use stats::{
    FileStatisticsStore, InMemoryStatisticsStore, StatisticsStore, ToolStatistics, UserToolStats,
};
pub(crate) use stats::file_key;

/// User key for runs without a user id
const ANONYMOUS_USER: &str = "anonymous";

/// One logged orchestration decision. The log is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationDecision {
    /// `pre_execution` or `post_<team>`
    pub phase: String,
    /// `strategy`, `tool_selection`, `quality` or `adjustment`
    pub kind: String,
    pub payload: Value,
    pub reasoning: String,
    pub confidence: f64,
    pub timestamp: String,
}

/// Orchestration state carried on `SharedState`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OrchestrationMetadata {
    pub strategy: Option<String>,
    #[serde(default)]
    pub tool_selections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub decisions: Vec<OrchestrationDecision>,
    /// Accumulated adjustment parameters per pending team
    #[serde(default)]
    pub adjustments: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub quality_scores: BTreeMap<String, f64>,
}

impl OrchestrationMetadata {
    fn log(
        &mut self,
        phase: &str,
        kind: &str,
        payload: Value,
        reasoning: impl Into<String>,
        confidence: f64,
    ) {
        self.decisions.push(OrchestrationDecision {
            phase: phase.to_string(),
            kind: kind.to_string(),
            payload,
            reasoning: reasoning.into(),
            confidence,
            timestamp: now_rfc3339(),
        });
    }
}

#[derive(Debug, Deserialize)]
struct ModelStrategy {
    strategy: String,
    tool_selection: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Strategy and tool selection before execution, quality analysis after
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    registry: Arc<CapabilityRegistry>,
    statistics: Arc<dyn StatisticsStore>,
    sink: Arc<dyn ProgressSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<CapabilityRegistry>,
        statistics: Arc<dyn StatisticsStore>,
        sink: Arc<dyn ProgressSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            registry,
            statistics,
            sink,
            config,
        }
    }

    fn user_key(state: &SharedState) -> String {
        state
            .user_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_USER.to_string())
    }

    /// Choose a strategy and tool subsets for the plan's teams
    pub async fn orchestrate(&self, mut state: SharedState) -> SharedState {
        let Some(plan) = state.plan.clone() else {
            return state;
        };
        if plan.is_empty() {
            return state;
        }

        let user = Self::user_key(&state);
        let stats = match self.statistics.load(&user).await {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("Orchestrator: statistics unavailable for {}: {}", user, e);
                UserToolStats::new()
            }
        };

        let (strategy, selection) = match self.model_strategy(&state, &stats).await {
            Ok(parsed) => {
                let confidence = parsed.confidence.unwrap_or(0.7);
                state.orchestration.log(
                    "pre_execution",
                    "strategy",
                    json!({"strategy": parsed.strategy, "tool_selection": parsed.tool_selection}),
                    parsed.reasoning.clone(),
                    confidence,
                );
                log::info!("Orchestrator: model strategy '{}': {}", parsed.strategy, parsed.reasoning);
                (parsed.strategy, parsed.tool_selection)
            }
            Err(e) => {
                log::warn!("Orchestrator: strategy model failed, using deterministic selection: {}", e);
                let selection = self.deterministic_selection(&plan.teams(), &stats);
                let strategy = serde_json::to_value(plan.strategy)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "sequential".to_string());
                state.orchestration.log(
                    "pre_execution",
                    "tool_selection",
                    json!({"strategy": strategy, "tool_selection": selection}),
                    format!("deterministic fallback: {}", e),
                    0.5,
                );
                (strategy, selection)
            }
        };

        if let Some(plan) = state.plan.as_mut() {
            for step in &mut plan.steps {
                let tools = selection.get(&step.team).cloned().unwrap_or_default();
                step.metadata.insert("tools".to_string(), json!(tools));
            }
        }
        state.orchestration.strategy = Some(strategy.clone());
        state.orchestration.tool_selections = selection.clone();
        state.touch();

        emit(
            self.sink.as_ref(),
            ProgressEvent::orchestration(
                &state.run_id,
                "pre_execution",
                "tool_selection",
                format!("strategy {} with tools {:?}", strategy, selection),
            ),
        );
        state
    }

    async fn model_strategy(&self, state: &SharedState, stats: &UserToolStats) -> Result<ModelStrategy> {
        let plan_teams = state.plan.as_ref().map(|p| p.teams()).unwrap_or_default();
        let team_tools: BTreeMap<String, Vec<String>> = plan_teams
            .iter()
            .filter_map(|t| self.registry.get_capabilities(t))
            .map(|c| (c.name.clone(), c.tools.clone()))
            .collect();
        let variables = json!({
            "query": state.query,
            "intent": state.intent.as_ref().map(|i| i.intent_type),
            "teams": plan_teams,
            "team_tools": team_tools,
            "tool_statistics": stats,
        });
        let raw = self
            .model
            .complete_json(prompts::ORCHESTRATION_STRATEGY, &variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await?;
        let parsed: ModelStrategy = serde_json::from_value(raw)
            .map_err(|e| EngineError::model(format!("orchestration_strategy shape: {}", e)))?;

        for (team, tools) in &parsed.tool_selection {
            let Some(declared) = team_tools.get(team) else {
                return Err(EngineError::model(format!("strategy names team '{}' outside the plan", team)));
            };
            if let Some(unknown) = tools.iter().find(|t| !declared.contains(t)) {
                return Err(EngineError::model(format!(
                    "strategy gives '{}' undeclared tool '{}'",
                    team, unknown
                )));
            }
        }
        Ok(parsed)
    }

    /// Give each tool to the first plan team that declares it and drop
    /// tools with a poor learned success rate, never emptying a team's list
    pub fn deterministic_selection(
        &self,
        plan_teams: &[String],
        stats: &UserToolStats,
    ) -> BTreeMap<String, Vec<String>> {
        let mut assigned: BTreeSet<String> = BTreeSet::new();
        let mut selection = BTreeMap::new();
        for team in plan_teams {
            let Some(caps) = self.registry.get_capabilities(team) else {
                continue;
            };
            let owned: Vec<String> = caps
                .tools
                .iter()
                .filter(|tool| assigned.insert((*tool).clone()))
                .cloned()
                .collect();
            let reliable: Vec<String> = owned
                .iter()
                .filter(|tool| self.is_reliable(tool, stats))
                .cloned()
                .collect();
            let tools = if reliable.is_empty() { owned } else { reliable };
            selection.insert(team.clone(), tools);
        }
        selection
    }

    fn is_reliable(&self, tool: &str, stats: &UserToolStats) -> bool {
        match stats.get(tool) {
            Some(s) if s.samples >= self.config.min_samples => {
                s.success_rate >= self.config.min_success_rate
            }
            _ => true,
        }
    }

    /// Score a finished team, learn tool outcomes and adjust pending teams
    pub async fn analyze_team_result(
        &self,
        mut state: SharedState,
        team: &str,
        envelope: &TeamEnvelope,
    ) -> SharedState {
        let quality = assess_quality(envelope);
        let phase = format!("post_{}", team);
        state.orchestration.quality_scores.insert(team.to_string(), quality);
        state.orchestration.log(
            &phase,
            "quality",
            json!({"team": team, "quality": quality}),
            format!("{} result scored {:.2}", envelope.data.kind(), quality),
            1.0,
        );

        if let TeamResult::Search(outcome) = &envelope.data {
            let user = Self::user_key(&state);
            for (tool, run) in &outcome.tool_runs {
                let success = run.status == ToolStatus::Success;
                if let Err(e) = self.statistics.record(&user, tool, success).await {
                    log::warn!("Orchestrator: could not record {} outcome: {}", tool, e);
                }
            }
        }

        if quality < self.config.quality_threshold {
            let pending: Vec<String> = state
                .plan
                .as_ref()
                .map(|p| p.teams())
                .unwrap_or_default()
                .into_iter()
                .filter(|t| t != team && !state.is_team_done(t) && !state.active_teams.contains(t))
                .collect();

            for target in pending {
                let Some(parameters) = adjustment_for(&target) else {
                    continue;
                };
                log::info!(
                    "Orchestrator: {} quality {:.2} below {:.2}, adjusting {}",
                    team,
                    quality,
                    self.config.quality_threshold,
                    target
                );
                state
                    .orchestration
                    .adjustments
                    .entry(target.clone())
                    .or_default()
                    .extend(parameters.clone());
                if let Some(step) = state.plan.as_mut().and_then(|p| p.step_mut(&target)) {
                    let adjustments = step
                        .metadata
                        .entry("adjustments".to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(existing) = adjustments {
                        existing.extend(parameters.clone());
                    }
                }
                state.orchestration.log(
                    &phase,
                    "adjustment",
                    json!({"team": target, "parameters": parameters}),
                    format!("{} quality {:.2} below threshold", team, quality),
                    0.8,
                );
                emit(
                    self.sink.as_ref(),
                    ProgressEvent::orchestration(
                        &state.run_id,
                        &phase,
                        "adjustment",
                        format!("adjusted {}", target),
                    ),
                );
            }
        }

        state.touch();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecProgressSink;
    use crate::intent::IntentType;
    use crate::llm::{ScriptedModel, UnavailableModel};
    use crate::plan::{ExecutionPlan, ExecutionStep};
    use crate::state::{SearchOutcome, TeamState, TeamStatus, ToolRun};

    fn orchestrator(
        model: Arc<dyn LanguageModel>,
        stats: Arc<dyn StatisticsStore>,
        sink: Arc<VecProgressSink>,
    ) -> Orchestrator {
        Orchestrator::new(
            model,
            Arc::new(CapabilityRegistry::with_default_teams()),
            stats,
            sink,
            OrchestratorConfig::default(),
        )
    }

    fn state_with_plan(teams: &[&str]) -> SharedState {
        let mut previous: Option<&str> = None;
        let mut steps = Vec::new();
        for (i, team) in teams.iter().enumerate() {
            let mut step = ExecutionStep::new(*team, i as u32 + 1, 30);
            if let Some(prev) = previous {
                step = step.depends_on(prev);
            }
            steps.push(step);
            previous = Some(team);
        }
        let mut state = SharedState::new("s1", "강남구 시세 분석").with_user("u1");
        state.plan = Some(ExecutionPlan::new(IntentType::ComprehensiveAnalysis, steps));
        state
    }

    fn search_envelope(total: usize, runs: &[(&str, ToolStatus)]) -> TeamEnvelope {
        let mut outcome = SearchOutcome {
            total_results: total,
            ..Default::default()
        };
        for (tool, status) in runs {
            outcome.tool_runs.insert(
                tool.to_string(),
                ToolRun {
                    tool: tool.to_string(),
                    status: *status,
                    result_count: 0,
                    data: vec![],
                    elapsed_ms: 1,
                    error: None,
                },
            );
        }
        let mut team = TeamState::new("search");
        team.status = TeamStatus::Completed;
        team.result = Some(TeamResult::Search(outcome));
        team.into_envelope()
    }

    #[tokio::test]
    async fn test_fallback_gives_each_tool_to_first_team() {
        let sink = Arc::new(VecProgressSink::new());
        let orch = orchestrator(
            Arc::new(UnavailableModel),
            Arc::new(InMemoryStatisticsStore::new()),
            sink.clone(),
        );
        let state = orch.orchestrate(state_with_plan(&["search", "analysis"])).await;

        let selection = &state.orchestration.tool_selections;
        assert_eq!(selection["search"], vec!["legal_search", "market_data", "loan_data"]);
        assert!(selection["analysis"].is_empty());
        let plan = state.plan.as_ref().unwrap();
        assert_eq!(
            plan.step("search").unwrap().selected_tools().unwrap(),
            vec!["legal_search", "market_data", "loan_data"]
        );
        assert_eq!(state.orchestration.decisions.len(), 1);
        assert_eq!(sink.of_type("orchestration").len(), 1);
    }

    #[tokio::test]
    async fn test_unreliable_tools_dropped_but_never_emptied() {
        let stats = Arc::new(InMemoryStatisticsStore::new());
        for _ in 0..3 {
            stats.record("u1", "market_data", false).await.unwrap();
        }
        let orch = orchestrator(
            Arc::new(UnavailableModel),
            stats.clone(),
            Arc::new(VecProgressSink::new()),
        );
        let learned = stats.load("u1").await.unwrap();

        let selection = orch.deterministic_selection(&["search".to_string()], &learned);
        assert_eq!(selection["search"], vec!["legal_search", "loan_data"]);

        for tool in ["legal_search", "loan_data"] {
            for _ in 0..3 {
                stats.record("u1", tool, false).await.unwrap();
            }
        }
        let learned = stats.load("u1").await.unwrap();
        let selection = orch.deterministic_selection(&["search".to_string()], &learned);
        assert_eq!(selection["search"].len(), 3);
    }

    #[tokio::test]
    async fn test_model_strategy_is_validated() {
        let model = Arc::new(
            ScriptedModel::new().with_json(
                "orchestration_strategy",
                json!({"strategy": "parallel", "tool_selection": {"search": ["weather_api"]}}),
            ),
        );
        let orch = orchestrator(
            model,
            Arc::new(InMemoryStatisticsStore::new()),
            Arc::new(VecProgressSink::new()),
        );
        let state = orch.orchestrate(state_with_plan(&["search"])).await;
        assert_eq!(state.orchestration.decisions[0].kind, "tool_selection");
        assert_eq!(state.orchestration.strategy.as_deref(), Some("sequential"));
    }

    #[tokio::test]
    async fn test_model_strategy_accepted() {
        let model = Arc::new(ScriptedModel::new().with_json(
            "orchestration_strategy",
            json!({
                "strategy": "pipeline",
                "tool_selection": {"search": ["legal_search"]},
                "reasoning": "legal question",
                "confidence": 0.9
            }),
        ));
        let orch = orchestrator(
            model,
            Arc::new(InMemoryStatisticsStore::new()),
            Arc::new(VecProgressSink::new()),
        );
        let state = orch.orchestrate(state_with_plan(&["search"])).await;

        assert_eq!(state.orchestration.strategy.as_deref(), Some("pipeline"));
        assert_eq!(state.orchestration.decisions[0].reasoning, "legal question");
        assert_eq!(
            state.plan.unwrap().step("search").unwrap().selected_tools().unwrap(),
            vec!["legal_search"]
        );
    }

    #[tokio::test]
    async fn test_poor_search_adjusts_pending_analysis() {
        let sink = Arc::new(VecProgressSink::new());
        let stats = Arc::new(InMemoryStatisticsStore::new());
        let orch = orchestrator(Arc::new(UnavailableModel), stats.clone(), sink.clone());
        let mut state = state_with_plan(&["search", "analysis"]);
        let envelope = search_envelope(
            2,
            &[("legal_search", ToolStatus::Success), ("market_data", ToolStatus::Error)],
        );
        state.merge_team_result("search", envelope.clone());

        let state = orch.analyze_team_result(state, "search", &envelope).await;

        assert_eq!(state.orchestration.quality_scores["search"], 0.4);
        assert_eq!(state.orchestration.adjustments["analysis"]["mode"], "conservative");
        let step = state.plan.as_ref().unwrap().step("analysis").unwrap();
        assert_eq!(step.metadata["adjustments"]["mode"], "conservative");
        assert_eq!(sink.of_type("orchestration").len(), 1);

        let learned = stats.load("u1").await.unwrap();
        assert_eq!(learned["legal_search"].success_rate, 1.0);
        assert_eq!(learned["market_data"].success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_good_result_adds_no_adjustment() {
        let orch = orchestrator(
            Arc::new(UnavailableModel),
            Arc::new(InMemoryStatisticsStore::new()),
            Arc::new(VecProgressSink::new()),
        );
        let state = state_with_plan(&["search", "analysis"]);
        let envelope = search_envelope(12, &[]);
        let state = orch.analyze_team_result(state, "search", &envelope).await;
        assert!(state.orchestration.adjustments.is_empty());
    }
}
