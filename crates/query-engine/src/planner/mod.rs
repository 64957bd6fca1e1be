//! Planner
//!
//! Turns a request into an `ExecutionPlan`:
//!
//! 1. `analyze_intent` classifies the request and selects teams
//! 2. `decompose` splits compound requests into team-bound sub-tasks
//! 3. `create_plan_with` folds sub-tasks into one step per team
//! 4. `optimize` dedupes steps and pads low-confidence plans
//! 5. `validate` reports structural problems
//!
//! Every model call has a deterministic fallback, so planning never fails.

mod classify;
mod decompose;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::PlannerConfig;
use crate::constants::{planner, teams};
use crate::intent::{IntentResult, IntentType};
use crate::llm::LanguageModel;
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::registry::CapabilityRegistry;
use crate::state::{ChatTurn, SharedState, TeamStatus};
use crate::validation::validate_plan;

pub use decompose::{split_compound, Decomposition, ExecutionMode, SubTask};

/// Conversation facts the planner may consult
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub history: Vec<ChatTurn>,
    pub entities: Map<String, Value>,
    /// A completed Search result from an earlier turn may be reused
    pub reuse_search: bool,
}

impl PlanningContext {
    pub fn from_state(state: &SharedState) -> Self {
        let search_done = state
            .team_results
            .get(teams::SEARCH)
            .is_some_and(|e| e.status == TeamStatus::Completed);
        Self {
            history: state.history.clone(),
            entities: state.entities.clone(),
            reuse_search: state.reuse_previous_data() && search_done,
        }
    }
}

/// Everything the planning node produces for one request
#[derive(Debug, Clone)]
pub struct PlanningOutcome {
    pub intent: IntentResult,
    pub decomposition: Decomposition,
    pub plan: ExecutionPlan,
    pub validation_errors: Vec<String>,
}

/// Estimated seconds for one team step
pub fn estimate_secs(team: &str) -> u64 {
    match team {
        teams::ANALYSIS => planner::ANALYSIS_ESTIMATE_SECS,
        teams::DOCUMENT => planner::DOCUMENT_ESTIMATE_SECS,
        _ => planner::SEARCH_ESTIMATE_SECS,
    }
}

/// Intent classification, decomposition and plan construction
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    registry: Arc<CapabilityRegistry>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<CapabilityRegistry>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    /// Run the whole planning pipeline for one request
    pub async fn plan(&self, query: &str, context: &PlanningContext) -> PlanningOutcome {
        let intent = self.analyze_intent(query, context).await;
        let decomposition = self.decompose(query, context, &intent).await;
        let plan = self.optimize(self.create_plan_with(&intent, &decomposition, context));
        let (valid, validation_errors) = self.validate(&plan);
        if !valid {
            log::warn!("Planner: plan has validation errors: {}", validation_errors.join("; "));
        }
        log::info!(
            "Planner: {} plan with {} steps for intent {} ({:.2})",
            if decomposition.is_compound { "compound" } else { "simple" },
            plan.steps.len(),
            intent.intent_type,
            intent.confidence
        );
        PlanningOutcome {
            intent,
            decomposition,
            plan,
            validation_errors,
        }
    }

    /// Whether an intent produces an empty plan
    pub fn is_empty_intent(&self, intent: &IntentResult) -> bool {
        match intent.intent_type {
            IntentType::Irrelevant => true,
            IntentType::Unclear => intent.confidence < self.config.unclear_floor,
            _ => false,
        }
    }

    /// Plan for a simple request from the intent's suggested teams
    pub fn create_plan(&self, intent: &IntentResult) -> ExecutionPlan {
        if self.is_empty_intent(intent) {
            return ExecutionPlan::empty(intent.intent_type).with_confidence(intent.confidence);
        }
        let decomposition = self.decompose_simple(&intent.reasoning, intent);
        self.create_plan_with(intent, &decomposition, &PlanningContext::default())
    }

    /// Plan built from a decomposition, one step per team
    pub fn create_plan_with(
        &self,
        intent: &IntentResult,
        decomposition: &Decomposition,
        context: &PlanningContext,
    ) -> ExecutionPlan {
        if self.is_empty_intent(intent) || decomposition.sub_tasks.is_empty() {
            log::info!("Planner: empty plan for intent {}", intent.intent_type);
            return ExecutionPlan::empty(intent.intent_type).with_confidence(intent.confidence);
        }

        let team_of: BTreeMap<&str, &str> = decomposition
            .sub_tasks
            .iter()
            .map(|t| (t.id.as_str(), t.team.as_str()))
            .collect();
        let rewrite = |reference: &str| -> String {
            let mut rewritten = reference.to_string();
            for (id, team) in &team_of {
                rewritten = rewritten.replace(&format!("${{{}.", id), &format!("${{{}.", team));
            }
            rewritten
        };

        // A team is ordered by its earliest sub-task; folded edges only point to earlier teams
        let group_of: BTreeMap<&str, usize> = decomposition
            .parallel_groups
            .iter()
            .enumerate()
            .flat_map(|(group, ids)| ids.iter().map(move |id| (id.as_str(), group)))
            .collect();
        let mut rank: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (index, task) in decomposition.sub_tasks.iter().enumerate() {
            let position = (group_of.get(task.id.as_str()).copied().unwrap_or(usize::MAX), index);
            rank.entry(task.team.as_str())
                .and_modify(|r| *r = (*r).min(position))
                .or_insert(position);
        }

        let mut steps: Vec<ExecutionStep> = Vec::new();
        for task in &decomposition.sub_tasks {
            let own_rank = rank.get(task.team.as_str());
            let dependencies: Vec<String> = task
                .depends_on
                .iter()
                .filter_map(|id| team_of.get(id.as_str()))
                .filter(|team| {
                    let earlier = rank.get(**team) < own_rank;
                    if !earlier && **team != task.team {
                        log::debug!("Planner: dropping back edge {} -> {}", task.team, team);
                    }
                    earlier
                })
                .map(|team| team.to_string())
                .collect();
            let input_mapping: BTreeMap<String, String> = task
                .input_mapping
                .iter()
                .map(|(name, reference)| (name.clone(), rewrite(reference)))
                .filter(|(_, reference)| !reference.contains(&format!("${{{}.", task.team)))
                .collect();

            if let Some(existing) = steps.iter_mut().find(|s| s.team == task.team) {
                existing.description = format!("{}; {}", existing.description, task.description);
                for dependency in dependencies {
                    if !existing.dependencies.contains(&dependency) {
                        existing.dependencies.push(dependency);
                    }
                }
                existing.input_mapping.extend(input_mapping);
                continue;
            }

            let mut step = ExecutionStep::new(
                task.team.clone(),
                task.priority,
                self.config.timeout_for(&task.team),
            );
            step.description = task.description.clone();
            step.dependencies = dependencies;
            step.input_mapping = input_mapping;
            steps.push(step);
        }

        let step_teams: Vec<String> = steps.iter().map(|s| s.team.clone()).collect();
        for step in &mut steps {
            let dependencies = &step.dependencies;
            step.input_mapping.retain(|_, reference| {
                step_teams
                    .iter()
                    .filter(|team| !dependencies.contains(team))
                    .all(|team| !reference.contains(&format!("${{{}.", team)))
            });
        }

        let mut plan = ExecutionPlan::new(intent.intent_type, steps).with_confidence(intent.confidence);
        if context.reuse_search && plan.step(teams::SEARCH).is_some() {
            log::info!("Planner: reusing previous search results, dropping search step");
            plan.remove_step(teams::SEARCH);
        }
        plan.estimated_time_secs = estimate_plan_secs(&plan);
        debug_assert!(plan.layers().1.is_empty(), "folded plan has unplaceable steps");
        plan
    }

    /// Remove duplicate steps and pad low-confidence plans
    pub fn optimize(&self, mut plan: ExecutionPlan) -> ExecutionPlan {
        let mut kept: Vec<ExecutionStep> = Vec::with_capacity(plan.steps.len());
        for step in plan.steps.drain(..) {
            let duplicate = kept.iter().any(|k| {
                k.team == step.team
                    && k.dependencies == step.dependencies
                    && k.input_mapping == step.input_mapping
            });
            if duplicate {
                log::debug!("Planner: dropping duplicate step {}", step.step_id);
            } else {
                kept.push(step);
            }
        }
        plan.steps = kept;

        if plan.intent_confidence < self.config.low_confidence {
            for step in &mut plan.steps {
                if step.metadata.contains_key("timeout_inflated") {
                    continue;
                }
                step.timeout_secs = (step.timeout_secs as f64 * self.config.timeout_factor).ceil() as u64;
                step.retries += 1;
                step.metadata
                    .insert("timeout_inflated".to_string(), Value::Bool(true));
            }
        }

        plan.refresh_layout();
        plan.estimated_time_secs = estimate_plan_secs(&plan);
        plan
    }

    /// Structural validation; the result is advisory unless enforced upstream
    pub fn validate(&self, plan: &ExecutionPlan) -> (bool, Vec<String>) {
        let errors: Vec<String> = validate_plan(plan, &self.registry)
            .iter()
            .map(|e| e.to_string())
            .collect();
        (errors.is_empty(), errors)
    }
}

/// Sum over layers of the slowest step in each layer
fn estimate_plan_secs(plan: &ExecutionPlan) -> u64 {
    let (layers, leftover) = plan.layers();
    let layered: u64 = layers
        .iter()
        .map(|layer| layer.iter().map(|id| estimate_secs(id_team(plan, id))).max().unwrap_or(0))
        .sum();
    layered
        + leftover
            .iter()
            .map(|id| estimate_secs(id_team(plan, id)))
            .sum::<u64>()
}

fn id_team<'a>(plan: &'a ExecutionPlan, step_id: &'a str) -> &'a str {
    plan.step(step_id).map(|s| s.team.as_str()).unwrap_or(step_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::classify_by_keywords;
    use crate::llm::{ScriptedModel, UnavailableModel};
    use crate::plan::ExecutionStrategy;
    use serde_json::json;
    use crate::state::{TeamResult, TeamState, REUSE_PREVIOUS_DATA};

    fn planner() -> Planner {
        Planner::new(
            Arc::new(UnavailableModel),
            Arc::new(CapabilityRegistry::with_default_teams()),
            PlannerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_hello_yields_empty_plan() {
        let outcome = planner().plan("hello", &PlanningContext::default()).await;
        assert_eq!(outcome.intent.intent_type, IntentType::Unclear);
        assert!(outcome.plan.is_empty());
        assert!(outcome.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_compound_plan() {
        let outcome = planner()
            .plan(
                "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘",
                &PlanningContext::default(),
            )
            .await;
        let plan = &outcome.plan;

        assert_eq!(plan.teams(), vec!["search", "analysis"]);
        let analysis = plan.step("analysis").unwrap();
        assert_eq!(analysis.dependencies, vec!["search"]);
        assert!(analysis.input_mapping.values().any(|v| v == "${search.output}"));
        assert_eq!(plan.strategy, ExecutionStrategy::Sequential);
        assert!(plan.estimated_time_secs > 0);
        assert!(outcome.validation_errors.is_empty());
    }

    fn assert_runnable(query: &str, plan: &ExecutionPlan) {
        for step in &plan.steps {
            for dependency in &step.dependencies {
                assert!(
                    plan.step(dependency).is_some(),
                    "{}: {} depends on missing {}",
                    query,
                    step.step_id,
                    dependency
                );
            }
        }
        let (layers, leftover) = plan.layers();
        assert!(leftover.is_empty(), "{}: unplaceable steps {:?}", query, leftover);
        assert_eq!(layers.iter().map(Vec::len).sum::<usize>(), plan.steps.len(), "{}", query);
    }

    #[tokio::test]
    async fn test_planned_steps_always_layer() {
        let queries = [
            "강남구 시세 확인하고 위험 분석하고 그 결과로 대출 상품 찾아줘",
            "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘",
            "전세 법 알려줘 그 다음 계약서 작성해줘",
            "전세 위험 분석하고 그 결과로 계약서 작성하고 그 결과로 관련 법 찾아줘",
            "시세 알려줘 그리고 위험 분석해줘 그리고 그 결과로 시세 다시 알려줘",
        ];
        let p = planner();
        for query in queries {
            let outcome = p.plan(query, &PlanningContext::default()).await;
            assert!(!outcome.plan.is_empty(), "{}", query);
            assert_runnable(query, &outcome.plan);
            assert!(outcome.validation_errors.is_empty(), "{}: {:?}", query, outcome.validation_errors);
        }
    }

    #[tokio::test]
    async fn test_revisited_team_keeps_first_order() {
        let outcome = planner()
            .plan(
                "강남구 시세 확인하고 위험 분석하고 그 결과로 대출 상품 찾아줘",
                &PlanningContext::default(),
            )
            .await;
        let plan = &outcome.plan;

        assert_eq!(plan.teams(), vec!["search", "analysis"]);
        assert!(plan.step("search").unwrap().dependencies.is_empty());
        assert!(plan
            .step("search")
            .unwrap()
            .input_mapping
            .values()
            .all(|v| !v.contains("${analysis.")));
        assert_eq!(plan.step("analysis").unwrap().dependencies, vec!["search"]);
    }

    #[tokio::test]
    async fn test_model_decompositions_always_layer() {
        let replies = [
            json!({"sub_tasks": [
                {"id": "a", "description": "x", "team": "search", "depends_on": ["b"]},
                {"id": "b", "description": "y", "team": "analysis", "depends_on": ["a"]}
            ]}),
            json!({"sub_tasks": [
                {"id": "a", "description": "x", "team": "search"},
                {"id": "b", "description": "y", "team": "analysis", "depends_on": ["a"]},
                {"id": "c", "description": "z", "team": "search", "depends_on": ["b"]}
            ]}),
            json!({"sub_tasks": [
                {"id": "d", "description": "z", "team": "document", "depends_on": ["s"]},
                {"id": "s", "description": "x", "team": "search"}
            ]}),
        ];
        let query = "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘";
        for reply in replies {
            let p = Planner::new(
                Arc::new(ScriptedModel::new().with_json("task_decomposition", reply.clone())),
                Arc::new(CapabilityRegistry::with_default_teams()),
                PlannerConfig::default(),
            );
            let outcome = p.plan(query, &PlanningContext::default()).await;
            assert!(!outcome.plan.is_empty(), "{}", reply);
            assert_runnable(query, &outcome.plan);
        }
    }

    #[test]
    fn test_irrelevant_yields_empty_plan() {
        let mut intent = IntentResult::unclear("off topic");
        intent.intent_type = IntentType::Irrelevant;
        intent.confidence = 0.95;
        assert!(planner().create_plan(&intent).is_empty());
    }

    #[test]
    fn test_create_plan_precedence_edges() {
        let mut intent = classify_by_keywords("계약서 작성해줘");
        intent.suggested_teams = vec!["document".into(), "analysis".into(), "search".into()];
        let plan = planner().create_plan(&intent);

        assert_eq!(plan.step("analysis").unwrap().dependencies, vec!["search"]);
        assert_eq!(plan.step("document").unwrap().dependencies, vec!["analysis"]);
        assert_eq!(plan.parallel_groups.len(), 3);
    }

    #[test]
    fn test_optimize_pads_low_confidence_once() {
        let p = planner();
        let plan = ExecutionPlan::new(
            IntentType::LoanConsult,
            vec![ExecutionStep::new("search", 1, 30), ExecutionStep::new("search", 1, 30)],
        )
        .with_confidence(0.4);

        let optimized = p.optimize(plan);
        assert_eq!(optimized.steps.len(), 1);
        assert_eq!(optimized.steps[0].timeout_secs, 45);
        assert_eq!(optimized.steps[0].retries, planner::DEFAULT_RETRIES + 1);

        let again = p.optimize(optimized);
        assert_eq!(again.steps[0].timeout_secs, 45);
    }

    #[test]
    fn test_optimize_leaves_confident_plans() {
        let plan = ExecutionPlan::new(IntentType::LoanConsult, vec![ExecutionStep::new("search", 1, 30)])
            .with_confidence(0.9);
        assert_eq!(planner().optimize(plan).steps[0].timeout_secs, 30);
    }

    #[test]
    fn test_reuse_previous_search() {
        let mut state = SharedState::new("s", "대출 한도 분석")
            .with_entity(REUSE_PREVIOUS_DATA, Value::Bool(true));
        let mut search = TeamState::new("search");
        search.status = TeamStatus::Completed;
        search.result = Some(TeamResult::Search(Default::default()));
        state.merge_team_result("search", search.into_envelope());

        let context = PlanningContext::from_state(&state);
        assert!(context.reuse_search);

        let mut intent = classify_by_keywords("전세 위험 분석");
        intent.suggested_teams = vec!["search".into(), "analysis".into()];
        let p = planner();
        let decomposition = p.decompose_simple("전세 위험 분석", &intent);
        let plan = p.create_plan_with(&intent, &decomposition, &context);

        assert_eq!(plan.teams(), vec!["analysis"]);
        assert!(plan.step("analysis").unwrap().dependencies.is_empty());
    }
}
