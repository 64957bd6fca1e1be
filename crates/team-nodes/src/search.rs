//! Search team
//!
//! ```text
//! prepare -> route -> search -> aggregate -> finalize
//!              \________________________________/  (empty scope)
//! ```
//!
//! # Inputs (seeded by the executor)
//! - `team.input.query` (required) - The user request
//! - `team.input.tools` (optional) - Orchestrator tool selection
//! - `team.input.adjustments` (optional) - `broaden_query`, `use_all_tools`
//! - `team.input.entities` (optional) - Extracted entities (`regions`)
//!
//! # Outputs
//! - `finalize.output.outcome` - `SearchOutcome`
//! - `finalize.output.status` - `completed` or `failed`

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde_json::{json, Map, Value};

use query_engine::constants::{prompts, teams};
use query_engine::intent::{extract_entities, matched_keywords, IntentType};
use query_engine::pipeline::error_key;
use query_engine::state::{SearchOutcome, ToolRun, ToolStatus};
use query_engine::{ContextKeys, Stage, StagePipeline};

use crate::services::{adjustments, flag, require, string_list, team_input, TeamServices};
use crate::tools::run_tool;

pub const PREPARE: &str = "prepare";
pub const ROUTE: &str = "route";
pub const SEARCH: &str = "search";
pub const AGGREGATE: &str = "aggregate";
pub const FINALIZE: &str = "finalize";

/// Tool each keyword family is served by
const SCOPE_RULES: [(IntentType, &str); 3] = [
    (IntentType::LegalConsult, "legal_search"),
    (IntentType::MarketInquiry, "market_data"),
    (IntentType::LoanConsult, "loan_data"),
];

/// Build the Search team pipeline
pub fn pipeline(services: &TeamServices) -> StagePipeline {
    StagePipeline::new(
        teams::SEARCH,
        vec![
            Stage::new(
                Arc::new(PrepareStage::new(services.clone())),
                vec![
                    ContextKeys::output(PREPARE, "keywords"),
                    ContextKeys::output(PREPARE, "scope"),
                    ContextKeys::output(PREPARE, "broaden"),
                ],
            ),
            Stage::new(Arc::new(RouteStage), vec![ContextKeys::output(ROUTE, "mode")]),
            Stage::new(
                Arc::new(SearchStage::new(services.clone())),
                vec![ContextKeys::output(SEARCH, "tool_runs"), error_key(teams::SEARCH)],
            ),
            Stage::new(Arc::new(AggregateStage), vec![ContextKeys::output(AGGREGATE, "outcome")]),
            Stage::new(
                Arc::new(FinalizeStage),
                vec![
                    ContextKeys::output(FINALIZE, "outcome"),
                    ContextKeys::output(FINALIZE, "status"),
                ],
            ),
        ],
    )
}

/// Keywords from the domain dictionaries, falling back to plain tokens
pub fn fallback_keywords(query: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for intent in IntentType::SCORED {
        for keyword in matched_keywords(query, intent) {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }
    for region in string_list(extract_entities(query).get("regions")) {
        if !keywords.contains(&region) {
            keywords.push(region);
        }
    }
    if keywords.is_empty() {
        keywords = query
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .map(str::to_string)
            .collect();
    }
    keywords
}

/// Tools whose keyword family appears in the query; all candidates when none does
pub fn fallback_scope(query: &str, candidates: &[String]) -> Vec<String> {
    let scope: Vec<String> = SCOPE_RULES
        .iter()
        .filter(|(intent, _)| !matched_keywords(query, *intent).is_empty())
        .map(|(_, tool)| tool.to_string())
        .filter(|tool| candidates.contains(tool))
        .collect();
    if scope.is_empty() {
        candidates.to_vec()
    } else {
        scope
    }
}

/// Keyword extraction and scope selection
pub struct PrepareStage {
    services: TeamServices,
}

impl PrepareStage {
    pub fn new(services: TeamServices) -> Self {
        Self { services }
    }

    /// Registered tools the orchestrator allows this team to use
    fn candidates(&self, selected: Option<Vec<String>>, use_all: bool) -> Vec<String> {
        let registered = self.services.tools.names();
        match selected {
            Some(selected) if !selected.is_empty() && !use_all => selected
                .into_iter()
                .filter(|t| registered.contains(t))
                .collect(),
            _ => registered,
        }
    }
}

#[async_trait]
impl Task for PrepareStage {
    fn id(&self) -> &str {
        PREPARE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = require(&context, &team_input("query")).await?;
        let adjustments = adjustments(&context).await;
        let use_all = flag(&adjustments, "use_all_tools");
        let broaden = flag(&adjustments, "broaden_query");
        let candidates = self.candidates(context.get(&team_input("tools")).await, use_all);

        let variables = json!({"query": query, "candidates": candidates});
        let extracted = self
            .services
            .ask_json(prompts::KEYWORD_EXTRACTION, &variables)
            .await
            .filter(|v| v.get("keywords").is_some_and(Value::is_array));

        let (mut keywords, mut scope) = match extracted {
            Some(value) => {
                let scope: Vec<String> = string_list(value.get("scope"))
                    .into_iter()
                    .filter(|t| candidates.contains(t))
                    .collect();
                (string_list(value.get("keywords")), scope)
            }
            None => (fallback_keywords(&query), fallback_scope(&query, &candidates)),
        };
        if keywords.is_empty() {
            keywords = fallback_keywords(&query);
        }
        if use_all {
            scope = candidates.clone();
        }

        log::debug!("SearchTeam prepare: keywords {:?}, scope {:?}", keywords, scope);
        context.set(&ContextKeys::output(PREPARE, "keywords"), json!(keywords)).await;
        context.set(&ContextKeys::output(PREPARE, "scope"), json!(scope)).await;
        context.set(&ContextKeys::output(PREPARE, "broaden"), json!(broaden)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Parallel or sequential dispatch; jumps to finalize on an empty scope
pub struct RouteStage;

#[async_trait]
impl Task for RouteStage {
    fn id(&self) -> &str {
        ROUTE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let scope: Vec<String> = context
            .get(&ContextKeys::output(PREPARE, "scope"))
            .await
            .unwrap_or_default();
        let mode_key = ContextKeys::output(ROUTE, "mode");

        if scope.is_empty() {
            log::info!("SearchTeam route: empty scope, skipping to finalize");
            context.set(&mode_key, json!("skipped")).await;
            return Ok(TaskResult::new(None, NextAction::GoTo(FINALIZE.to_string())));
        }
        let mode = if scope.len() > 1 { "parallel" } else { "sequential" };
        context.set(&mode_key, json!(mode)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Tool selection and invocation
pub struct SearchStage {
    services: TeamServices,
}

impl SearchStage {
    pub fn new(services: TeamServices) -> Self {
        Self { services }
    }

    async fn select_tools(&self, query: &str, keywords: &[String], scope: &[String]) -> Vec<String> {
        let variables = json!({"query": query, "keywords": keywords, "candidates": scope});
        let chosen: Vec<String> = self
            .services
            .ask_json(prompts::TOOL_SELECTION, &variables)
            .await
            .map(|v| string_list(v.get("tools")))
            .unwrap_or_default()
            .into_iter()
            .filter(|t| scope.contains(t))
            .collect();
        if chosen.is_empty() {
            scope.to_vec()
        } else {
            chosen
        }
    }
}

#[async_trait]
impl Task for SearchStage {
    fn id(&self) -> &str {
        SEARCH
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = require(&context, &team_input("query")).await?;
        let keywords: Vec<String> = context
            .get(&ContextKeys::output(PREPARE, "keywords"))
            .await
            .unwrap_or_default();
        let scope: Vec<String> = require(&context, &ContextKeys::output(PREPARE, "scope")).await?;
        let broaden: bool = context
            .get(&ContextKeys::output(PREPARE, "broaden"))
            .await
            .unwrap_or(false);
        let mode: String = context
            .get(&ContextKeys::output(ROUTE, "mode"))
            .await
            .unwrap_or_else(|| "sequential".to_string());
        let entities: Map<String, Value> = context.get(&team_input("entities")).await.unwrap_or_default();

        let tools = self.select_tools(&query, &keywords, &scope).await;
        let mut params = json!({
            "keywords": keywords,
            "broaden": broaden,
            "limit": self.services.config.tool_result_limit,
        });
        if let Some(region) = string_list(entities.get("regions")).into_iter().next() {
            params["region"] = json!(region);
        }

        let timeout = self.services.tool_timeout();
        let registry = self.services.tools.as_ref();
        let runs: Vec<ToolRun> = if mode == "parallel" {
            join_all(tools.iter().map(|tool| run_tool(registry, tool, &query, &params, timeout))).await
        } else {
            let mut runs = Vec::new();
            for tool in &tools {
                runs.push(run_tool(registry, tool, &query, &params, timeout).await);
            }
            runs
        };

        let tool_runs: BTreeMap<String, ToolRun> = runs.into_iter().map(|r| (r.tool.clone(), r)).collect();
        if !tool_runs.is_empty() && tool_runs.values().all(|r| r.status == ToolStatus::Failed) {
            let failed: Vec<&str> = tool_runs.keys().map(String::as_str).collect();
            let message = format!("all retrieval tools failed: {}", failed.join(", "));
            log::warn!("SearchTeam search: {}", message);
            context.set(&error_key(teams::SEARCH), json!(message)).await;
        }
        context.set(&ContextKeys::output(SEARCH, "tool_runs"), json!(tool_runs)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Merge per-tool counts and sources
pub struct AggregateStage;

#[async_trait]
impl Task for AggregateStage {
    fn id(&self) -> &str {
        AGGREGATE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let tool_runs: BTreeMap<String, ToolRun> = context
            .get(&ContextKeys::output(SEARCH, "tool_runs"))
            .await
            .unwrap_or_default();
        let mut outcome = base_outcome(&context).await;

        outcome.total_results = tool_runs.values().map(|r| r.result_count).sum();
        outcome.sources = tool_runs
            .values()
            .filter(|r| r.result_count > 0)
            .map(|r| r.tool.clone())
            .collect();
        outcome.failed_tools = tool_runs
            .values()
            .filter(|r| r.status != ToolStatus::Success)
            .map(|r| r.tool.clone())
            .collect();
        outcome.tool_runs = tool_runs;

        log::info!(
            "SearchTeam aggregate: {} results from {:?}, failed {:?}",
            outcome.total_results,
            outcome.sources,
            outcome.failed_tools
        );
        context.set(&ContextKeys::output(AGGREGATE, "outcome"), json!(outcome)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Terminal status: failed only on a recorded team error
pub struct FinalizeStage;

#[async_trait]
impl Task for FinalizeStage {
    fn id(&self) -> &str {
        FINALIZE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let outcome = match context.get::<SearchOutcome>(&ContextKeys::output(AGGREGATE, "outcome")).await {
            Some(outcome) => outcome,
            None => base_outcome(&context).await,
        };
        let error: Option<String> = context.get(&error_key(teams::SEARCH)).await;
        let status = if error.is_some() { "failed" } else { "completed" };

        context.set(&ContextKeys::output(FINALIZE, "outcome"), json!(outcome)).await;
        context.set(&ContextKeys::output(FINALIZE, "status"), json!(status)).await;
        Ok(TaskResult::new(Some(status.to_string()), NextAction::End))
    }
}

async fn base_outcome(context: &Context) -> SearchOutcome {
    SearchOutcome {
        keywords: context
            .get(&ContextKeys::output(PREPARE, "keywords"))
            .await
            .unwrap_or_default(),
        scope: context
            .get(&ContextKeys::output(PREPARE, "scope"))
            .await
            .unwrap_or_default(),
        execution_mode: context
            .get(&ContextKeys::output(ROUTE, "mode"))
            .await
            .unwrap_or_else(|| "skipped".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{RecordSearchTool, RetrievalTool, ToolRegistry};
    use query_engine::config::TeamsConfig;
    use query_engine::state::{TeamState, ToolResponse};
    use query_engine::{NullProgressSink, PipelineOutcome, ScriptedModel, UnavailableModel};

    struct BrokenTool;

    #[async_trait]
    impl RetrievalTool for BrokenTool {
        fn name(&self) -> &str {
            "legal_search"
        }

        async fn search(&self, _query: &str, _params: &Value) -> ToolResponse {
            ToolResponse::failed("index offline")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_tool(Arc::new(RecordSearchTool::market_data(vec![
                json!({"region": "강남구", "type": "아파트", "price": 2_400_000_000u64}),
            ])))
            .with_tool(Arc::new(RecordSearchTool::loan_data(vec![
                json!({"product": "주택담보대출", "type": "대출", "rate": 4.1}),
            ])))
            .with_tool(Arc::new(BrokenTool))
    }

    fn services(model: Arc<dyn query_engine::LanguageModel>, tools: ToolRegistry) -> TeamServices {
        TeamServices::new(model, Arc::new(tools), TeamsConfig::default())
    }

    async fn run(services: &TeamServices, seed: Vec<(&str, Value)>) -> (BTreeMap<String, Value>, TeamState) {
        let seed = seed.into_iter().map(|(k, v)| (team_input(k), v)).collect();
        let mut progress = TeamState::new("search");
        match pipeline(services).run(seed, 0, &mut progress, "run-1", &NullProgressSink).await {
            PipelineOutcome::Finished { memory } => (memory, progress),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_fallback_scope_follows_keyword_families() {
        let candidates = vec!["legal_search".to_string(), "market_data".to_string(), "loan_data".to_string()];
        assert_eq!(fallback_scope("강남구 아파트 시세", &candidates), vec!["market_data"]);
        assert_eq!(
            fallback_scope("아파트 시세와 대출 한도", &candidates),
            vec!["market_data", "loan_data"]
        );
        assert_eq!(fallback_scope("hello", &candidates), candidates);
        assert!(fallback_keywords("강남구 아파트 시세").contains(&"강남구".to_string()));
    }

    #[tokio::test]
    async fn test_failed_tool_does_not_abort_siblings() {
        let services = services(Arc::new(UnavailableModel), registry());
        let (memory, _) = run(
            &services,
            vec![("query", json!("아파트 시세와 대출 한도 법률 확인"))],
        )
        .await;

        let outcome: SearchOutcome =
            serde_json::from_value(memory[&ContextKeys::output(FINALIZE, "outcome")].clone()).unwrap();
        assert_eq!(memory[&ContextKeys::output(FINALIZE, "status")], "completed");
        assert_eq!(outcome.execution_mode, "parallel");
        assert_eq!(outcome.tool_runs.len(), 3);
        assert_eq!(outcome.failed_tools, vec!["legal_search"]);
        assert_eq!(outcome.total_results, 2);
    }

    #[tokio::test]
    async fn test_empty_scope_skips_to_finalize() {
        let model = ScriptedModel::new().with_json(
            prompts::KEYWORD_EXTRACTION,
            json!({"keywords": ["날씨"], "scope": []}),
        );
        let services = services(Arc::new(model), registry());
        let (memory, progress) = run(&services, vec![("query", json!("오늘 날씨"))]).await;

        assert_eq!(memory[&ContextKeys::output(FINALIZE, "status")], "completed");
        assert_eq!(memory[&ContextKeys::output(ROUTE, "mode")], "skipped");
        assert_eq!(
            progress.step_progress[&2].status,
            query_engine::state::StepStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_all_tools_failing_marks_team_failed() {
        let services = services(
            Arc::new(UnavailableModel),
            ToolRegistry::new().with_tool(Arc::new(BrokenTool)),
        );
        let (memory, _) = run(&services, vec![("query", json!("임대차 법률"))]).await;
        assert_eq!(memory[&ContextKeys::output(FINALIZE, "status")], "failed");
        assert!(memory.contains_key(&error_key(teams::SEARCH)));
    }

    #[tokio::test]
    async fn test_orchestrator_selection_and_broadening() {
        let services = services(Arc::new(UnavailableModel), registry());
        let (memory, _) = run(
            &services,
            vec![
                ("query", json!("강남구 아파트 시세")),
                ("tools", json!(["loan_data"])),
                ("adjustments", json!({"use_all_tools": true, "broaden_query": true})),
            ],
        )
        .await;
        let scope: Vec<String> =
            serde_json::from_value(memory[&ContextKeys::output(PREPARE, "scope")].clone()).unwrap();
        assert_eq!(scope.len(), 3);
        assert_eq!(memory[&ContextKeys::output(PREPARE, "broaden")], true);
    }
}
