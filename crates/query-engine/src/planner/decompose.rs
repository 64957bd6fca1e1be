//! Task decomposition
//!
//! Compound requests are split into sub-tasks, each bound to one team.
//! The model is tried first; the rule-based splitter handles the rest.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::constants::{model, prompts, teams};
use crate::error::{EngineError, Result};
use crate::intent::{classify_by_keywords, has_analytical_keyword, IntentResult, IntentType};

use super::{estimate_secs, PlanningContext, Planner};

/// Standalone connector tokens that end a segment
const CONNECTORS: &[&str] = &["그리고", "하고", "및", "후에", "다음에", "다음", "그다음", "이후", "그리고나서"];

/// Verb endings that join two clauses ("확인하고")
const JOINING_SUFFIXES: &[&str] = &["하고", "한후", "해서"];

/// Words that mark a segment as consuming an earlier result
const REFERENCE_MARKERS: &[&str] = &["그", "이를", "해당", "결과", "그걸", "이걸", "기반"];

/// Whole-decomposition execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// One unit of work bound to exactly one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub description: String,
    pub team: String,
    pub intent: IntentType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub priority: u32,
    /// Input name to `${<sub_task_id>.output}` reference
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    pub estimated_secs: u64,
}

/// Result of decomposing one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub sub_tasks: Vec<SubTask>,
    pub is_compound: bool,
    pub execution_mode: ExecutionMode,
    pub parallel_groups: Vec<Vec<String>>,
    pub total_estimated_secs: u64,
}

impl Decomposition {
    /// Derive mode, groups and estimate from the sub-tasks
    pub fn from_sub_tasks(sub_tasks: Vec<SubTask>, is_compound: bool) -> Self {
        let has_dependencies = sub_tasks.iter().any(|t| !t.depends_on.is_empty());
        let execution_mode = if has_dependencies || sub_tasks.len() <= 1 {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Parallel
        };
        let parallel_groups = group_sub_tasks(&sub_tasks);
        let total_estimated_secs = parallel_groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|id| sub_tasks.iter().find(|t| &t.id == id))
                    .map(|t| t.estimated_secs)
                    .max()
                    .unwrap_or(0)
            })
            .sum();
        Self {
            sub_tasks,
            is_compound,
            execution_mode,
            parallel_groups,
            total_estimated_secs,
        }
    }

    pub fn empty() -> Self {
        Self::from_sub_tasks(Vec::new(), false)
    }
}

#[derive(Debug, Deserialize)]
struct ModelSubTask {
    #[serde(default)]
    id: Option<String>,
    description: String,
    team: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelDecomposition {
    sub_tasks: Vec<ModelSubTask>,
}

impl Planner {
    /// Split a request into team-bound sub-tasks
    pub async fn decompose(
        &self,
        query: &str,
        context: &PlanningContext,
        intent: &IntentResult,
    ) -> Decomposition {
        if self.is_empty_intent(intent) {
            return Decomposition::empty();
        }

        let segments = split_compound(query);
        if segments.len() > 1 {
            match self.model_decomposition(query, context, intent).await {
                Ok(decomposition) => {
                    log::info!(
                        "Planner: model decomposed request into {} sub-tasks",
                        decomposition.sub_tasks.len()
                    );
                    return decomposition;
                }
                Err(e) => log::warn!("Planner: decomposition model failed, splitting on connectors: {}", e),
            }
            return self.decompose_segments(&segments);
        }

        self.decompose_simple(query, intent)
    }

    async fn model_decomposition(
        &self,
        query: &str,
        context: &PlanningContext,
        intent: &IntentResult,
    ) -> Result<Decomposition> {
        let variables = json!({
            "query": query,
            "intent": intent.intent_type,
            "history": context.history,
            "available_teams": self.registry.list(true),
        });
        let raw = self
            .model
            .complete_json(prompts::TASK_DECOMPOSITION, &variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await?;
        let parsed: ModelDecomposition = serde_json::from_value(raw)
            .map_err(|e| EngineError::model(format!("task_decomposition shape: {}", e)))?;
        if parsed.sub_tasks.is_empty() {
            return Err(EngineError::model("task_decomposition returned no sub-tasks"));
        }

        let mut sub_tasks = Vec::with_capacity(parsed.sub_tasks.len());
        for (index, task) in parsed.sub_tasks.into_iter().enumerate() {
            if !self.registry.is_available(&task.team) {
                return Err(EngineError::model(format!(
                    "task_decomposition bound a task to unknown team '{}'",
                    task.team
                )));
            }
            let id = task.id.unwrap_or_else(|| format!("task_{}", index + 1));
            let input_mapping = task
                .depends_on
                .iter()
                .map(|dep| (format!("{}_result", dep), format!("${{{}.output}}", dep)))
                .collect();
            sub_tasks.push(SubTask {
                intent: classify_by_keywords(&task.description).intent_type,
                estimated_secs: estimate_secs(&task.team),
                priority: task.priority.unwrap_or(index as u32 + 1),
                id,
                description: task.description,
                team: task.team,
                depends_on: task.depends_on,
                input_mapping,
            });
        }

        let known: HashSet<&str> = sub_tasks.iter().map(|t| t.id.as_str()).collect();
        if let Some(bad) = sub_tasks
            .iter()
            .flat_map(|t| t.depends_on.iter())
            .find(|d| !known.contains(d.as_str()))
        {
            return Err(EngineError::model(format!(
                "task_decomposition references unknown sub-task '{}'",
                bad
            )));
        }

        let placed: usize = group_sub_tasks(&sub_tasks).iter().map(Vec::len).sum();
        if placed < sub_tasks.len() {
            return Err(EngineError::model("task_decomposition has a dependency cycle"));
        }

        Ok(Decomposition::from_sub_tasks(sub_tasks, true))
    }

    /// Rule-based decomposition of connector-separated segments
    fn decompose_segments(&self, segments: &[String]) -> Decomposition {
        let mut sub_tasks: Vec<SubTask> = Vec::new();
        for segment in segments {
            let team = bind_team(segment);
            if !self.registry.is_available(team) {
                log::warn!("Planner: segment '{}' needs unavailable team {}", segment, team);
                continue;
            }
            let id = format!("task_{}", sub_tasks.len() + 1);
            let mut task = SubTask {
                id,
                description: segment.clone(),
                team: team.to_string(),
                intent: classify_by_keywords(segment).intent_type,
                depends_on: Vec::new(),
                priority: sub_tasks.len() as u32 + 1,
                input_mapping: BTreeMap::new(),
                estimated_secs: estimate_secs(team),
            };
            if let Some(previous) = sub_tasks.last() {
                if consumes_previous(segment, team) {
                    task.depends_on.push(previous.id.clone());
                    task.input_mapping.insert(
                        format!("{}_result", previous.team),
                        format!("${{{}.output}}", previous.id),
                    );
                }
            }
            sub_tasks.push(task);
        }
        let is_compound = sub_tasks.len() > 1;
        Decomposition::from_sub_tasks(sub_tasks, is_compound)
    }

    /// One sub-task per selected team, chained by precedence
    pub(super) fn decompose_simple(&self, query: &str, intent: &IntentResult) -> Decomposition {
        let selected = if intent.suggested_teams.is_empty() {
            self.available(intent.intent_type.default_teams())
        } else {
            self.available(intent.suggested_teams.clone())
        };

        let mut sub_tasks: Vec<SubTask> = Vec::new();
        for team in teams::PRECEDENCE {
            if !selected.iter().any(|t| t == team) {
                continue;
            }
            let id = format!("task_{}", sub_tasks.len() + 1);
            let mut task = SubTask {
                id,
                description: query.to_string(),
                team: team.to_string(),
                intent: intent.intent_type,
                depends_on: Vec::new(),
                priority: sub_tasks.len() as u32 + 1,
                input_mapping: BTreeMap::new(),
                estimated_secs: estimate_secs(team),
            };
            if let Some(previous) = sub_tasks.last() {
                task.depends_on.push(previous.id.clone());
                task.input_mapping.insert(
                    format!("{}_result", previous.team),
                    format!("${{{}.output}}", previous.id),
                );
            }
            sub_tasks.push(task);
        }
        // teams outside the precedence list run independently
        for team in selected.iter().filter(|t| !teams::PRECEDENCE.contains(&t.as_str())) {
            let id = format!("task_{}", sub_tasks.len() + 1);
            sub_tasks.push(SubTask {
                id,
                description: query.to_string(),
                team: team.clone(),
                intent: intent.intent_type,
                depends_on: Vec::new(),
                priority: sub_tasks.len() as u32 + 1,
                input_mapping: BTreeMap::new(),
                estimated_secs: estimate_secs(team),
            });
        }
        Decomposition::from_sub_tasks(sub_tasks, false)
    }
}

/// Split a request on Korean connectors
pub fn split_compound(query: &str) -> Vec<String> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let mut segments: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        let next_is_then = tokens.get(index + 1).is_some_and(|t| t.starts_with("다음"));
        if CONNECTORS.contains(&token) {
            flush(&mut current, &mut segments);
        } else if token == "그" && next_is_then {
            flush(&mut current, &mut segments);
            index += 1;
        } else if let Some(stem) = JOINING_SUFFIXES
            .iter()
            .find_map(|suffix| token.strip_suffix(suffix))
            .filter(|stem| !stem.is_empty())
        {
            current.push(stem.to_string());
            flush(&mut current, &mut segments);
        } else {
            current.push(token.to_string());
        }
        index += 1;
    }
    flush(&mut current, &mut segments);
    segments
}

fn flush(current: &mut Vec<String>, segments: &mut Vec<String>) {
    if !current.is_empty() {
        segments.push(current.join(" "));
        current.clear();
    }
}

/// Team a segment belongs to
fn bind_team(segment: &str) -> &'static str {
    let drafting = IntentType::ContractCreation
        .keywords()
        .iter()
        .any(|k| segment.contains(k));
    if drafting {
        teams::DOCUMENT
    } else if has_analytical_keyword(segment) {
        teams::ANALYSIS
    } else {
        teams::SEARCH
    }
}

/// Whether a segment builds on the segment before it
fn consumes_previous(segment: &str, team: &str) -> bool {
    team != teams::SEARCH
        || segment
            .split_whitespace()
            .any(|token| REFERENCE_MARKERS.iter().any(|m| token.starts_with(m)))
}

/// Topological groups over sub-task ids
fn group_sub_tasks(sub_tasks: &[SubTask]) -> Vec<Vec<String>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();
    loop {
        let ready: Vec<&SubTask> = sub_tasks
            .iter()
            .filter(|t| !placed.contains(t.id.as_str()))
            .filter(|t| t.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .collect();
        if ready.is_empty() {
            break;
        }
        for task in &ready {
            placed.insert(task.id.as_str());
        }
        groups.push(ready.iter().map(|t| t.id.clone()).collect());
    }
    groups
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PlannerConfig;
    use crate::llm::{ScriptedModel, UnavailableModel};
    use crate::registry::CapabilityRegistry;

    fn planner(model: Arc<dyn crate::llm::LanguageModel>) -> Planner {
        Planner::new(
            model,
            Arc::new(CapabilityRegistry::with_default_teams()),
            PlannerConfig::default(),
        )
    }

    #[test]
    fn test_split_on_connectors() {
        assert_eq!(
            split_compound("강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘"),
            vec!["강남구 아파트 시세 확인", "대출 가능 금액 계산해줘"]
        );
        assert_eq!(
            split_compound("전세 법 알려줘 그 다음 계약서 작성해줘"),
            vec!["전세 법 알려줘", "계약서 작성해줘"]
        );
        assert_eq!(split_compound("hello"), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_compound_request_rule_based() {
        let p = planner(Arc::new(UnavailableModel));
        let query = "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘";
        let intent = classify_by_keywords(query);
        let decomposition = p.decompose(query, &PlanningContext::default(), &intent).await;

        assert!(decomposition.is_compound);
        assert_eq!(decomposition.sub_tasks.len(), 2);
        let market = &decomposition.sub_tasks[0];
        let loan = &decomposition.sub_tasks[1];
        assert_eq!(market.team, "search");
        assert_eq!(loan.team, "analysis");
        assert_eq!(loan.depends_on, vec![market.id.clone()]);
        assert!(loan.input_mapping.values().any(|v| v == "${task_1.output}"));
        assert_eq!(decomposition.execution_mode, ExecutionMode::Sequential);
        assert!(decomposition.total_estimated_secs > 0);
    }

    #[tokio::test]
    async fn test_model_decomposition_is_validated() {
        let model = Arc::new(ScriptedModel::new().with_json(
            "task_decomposition",
            json!({"sub_tasks": [
                {"id": "a", "description": "x", "team": "search"},
                {"id": "b", "description": "y", "team": "analysis", "depends_on": ["ghost"]}
            ]}),
        ));
        let p = planner(model);
        let query = "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘";
        let decomposition = p
            .decompose(query, &PlanningContext::default(), &classify_by_keywords(query))
            .await;

        // unknown dependency rejects the model output
        assert_eq!(decomposition.sub_tasks[0].id, "task_1");
    }

    #[tokio::test]
    async fn test_cyclic_model_decomposition_falls_back() {
        let model = Arc::new(ScriptedModel::new().with_json(
            "task_decomposition",
            json!({"sub_tasks": [
                {"id": "a", "description": "x", "team": "search", "depends_on": ["b"]},
                {"id": "b", "description": "y", "team": "analysis", "depends_on": ["a"]}
            ]}),
        ));
        let p = planner(model);
        let query = "강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘";
        let decomposition = p
            .decompose(query, &PlanningContext::default(), &classify_by_keywords(query))
            .await;

        assert_eq!(decomposition.sub_tasks[0].id, "task_1");
        let placed: usize = decomposition.parallel_groups.iter().map(Vec::len).sum();
        assert_eq!(placed, decomposition.sub_tasks.len());
    }

    #[tokio::test]
    async fn test_simple_request_uses_precedence() {
        let p = planner(Arc::new(UnavailableModel));
        let mut intent = classify_by_keywords("계약서 작성해줘");
        intent.suggested_teams = vec!["document".into(), "search".into()];
        let decomposition = p
            .decompose("계약서 작성해줘", &PlanningContext::default(), &intent)
            .await;

        assert!(!decomposition.is_compound);
        assert_eq!(decomposition.sub_tasks[0].team, "search");
        assert_eq!(decomposition.sub_tasks[1].team, "document");
        assert_eq!(decomposition.sub_tasks[1].depends_on, vec!["task_1"]);
    }

    #[tokio::test]
    async fn test_independent_searches_run_in_parallel() {
        let p = planner(Arc::new(UnavailableModel));
        let query = "전세 법 알려줘 그리고 강남구 시세 알려줘";
        let decomposition = p
            .decompose(query, &PlanningContext::default(), &classify_by_keywords(query))
            .await;

        // both segments bind to search; neither references the other
        assert_eq!(decomposition.execution_mode, ExecutionMode::Parallel);
        assert_eq!(decomposition.parallel_groups.len(), 1);
    }
}
