//! Execution plans
//!
//! A plan is a set of team steps with explicit dependencies. Plans built by
//! the planner hold at most one step per team and use the team name as the
//! step id. Zero-step plans are valid and mean "answer directly".

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::intent::IntentType;

/// How the plan's steps relate in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
    Pipeline,
    Conditional,
}

/// What happens to remaining steps when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Keep running every remaining step
    #[default]
    Continue,
    /// Skip remaining steps that depend on the failed step
    Stop,
    /// Discard results produced in this run and stop
    Rollback,
}

/// One team invocation inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub team: String,
    #[serde(default)]
    pub description: String,
    /// Lower runs first among ready steps
    pub priority: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Input name to `${<step_id>.output}` reference
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub retries: u32,
    #[serde(default)]
    pub optional: bool,
    /// Orchestrator annotations (tool selection, adjustments)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionStep {
    pub fn new(team: impl Into<String>, priority: u32, timeout_secs: u64) -> Self {
        let team = team.into();
        Self {
            step_id: team.clone(),
            team,
            description: String::new(),
            priority,
            dependencies: Vec::new(),
            input_mapping: BTreeMap::new(),
            timeout_secs,
            retries: crate::constants::planner::DEFAULT_RETRIES,
            optional: false,
            metadata: Map::new(),
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    /// Tools the orchestrator selected for this step
    pub fn selected_tools(&self) -> Option<Vec<String>> {
        self.metadata.get("tools").and_then(Value::as_array).map(|tools| {
            tools
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }
}

/// Ordered set of team steps with a strategy and error policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
    pub strategy: ExecutionStrategy,
    pub intent: IntentType,
    #[serde(default)]
    pub intent_confidence: f64,
    pub estimated_time_secs: u64,
    /// Steps that may run together, in execution order
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    pub created_at: String,
}

impl ExecutionPlan {
    pub fn new(intent: IntentType, steps: Vec<ExecutionStep>) -> Self {
        let mut plan = Self {
            steps,
            strategy: ExecutionStrategy::Sequential,
            intent,
            intent_confidence: 1.0,
            estimated_time_secs: 0,
            parallel_groups: Vec::new(),
            error_policy: ErrorPolicy::default(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        plan.refresh_layout();
        plan
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.intent_confidence = confidence;
        self
    }

    /// Plan with no steps
    pub fn empty(intent: IntentType) -> Self {
        Self::new(intent, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut ExecutionStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn teams(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.team.clone()).collect()
    }

    /// Recompute strategy and parallel groups after the steps changed
    pub fn refresh_layout(&mut self) {
        let (layers, _) = self.layers();
        let has_dependencies = self.steps.iter().any(|s| !s.dependencies.is_empty());
        self.strategy = if self.steps.len() > 1 && !has_dependencies {
            ExecutionStrategy::Parallel
        } else {
            ExecutionStrategy::Sequential
        };
        self.parallel_groups = layers;
    }

    /// Topological layers of step ids
    ///
    /// Each layer holds steps whose dependencies all sit in earlier layers,
    /// ordered by priority. Returns the layers and the step ids that could
    /// not be placed (unknown dependencies or cycles).
    pub fn layers(&self) -> (Vec<Vec<String>>, Vec<String>) {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut unresolvable: BTreeSet<&str> = BTreeSet::new();

        for step in &self.steps {
            in_degree.insert(step.step_id.as_str(), step.dependencies.len());
            if step.dependencies.iter().any(|d| !ids.contains(d.as_str())) {
                unresolvable.insert(step.step_id.as_str());
            }
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut layers = Vec::new();
        loop {
            let mut ready: Vec<&ExecutionStep> = self
                .steps
                .iter()
                .filter(|s| !placed.contains(s.step_id.as_str()))
                .filter(|s| !unresolvable.contains(s.step_id.as_str()))
                .filter(|s| in_degree.get(s.step_id.as_str()) == Some(&0))
                .collect();
            if ready.is_empty() {
                break;
            }
            ready.sort_by_key(|s| s.priority);

            let layer: Vec<String> = ready.iter().map(|s| s.step_id.clone()).collect();
            for step in &ready {
                placed.insert(step.step_id.as_str());
            }
            for step in &self.steps {
                let satisfied = step
                    .dependencies
                    .iter()
                    .filter(|d| layer.iter().any(|l| l == *d))
                    .count();
                if let Some(degree) = in_degree.get_mut(step.step_id.as_str()) {
                    *degree = degree.saturating_sub(satisfied);
                }
            }
            layers.push(layer);
        }

        let leftover = self
            .steps
            .iter()
            .filter(|s| !placed.contains(s.step_id.as_str()))
            .map(|s| s.step_id.clone())
            .collect();
        (layers, leftover)
    }

    /// Every step that depends on `step_id`, directly or transitively
    pub fn dependents_of(&self, step_id: &str) -> BTreeSet<String> {
        let mut found: BTreeSet<String> = BTreeSet::new();
        let mut frontier = vec![step_id.to_string()];
        while let Some(current) = frontier.pop() {
            for step in &self.steps {
                if step.dependencies.contains(&current) && found.insert(step.step_id.clone()) {
                    frontier.push(step.step_id.clone());
                }
            }
        }
        found
    }

    /// Remove a step and rewire its dependents to its own dependencies
    pub fn remove_step(&mut self, step_id: &str) -> Option<ExecutionStep> {
        let index = self.steps.iter().position(|s| s.step_id == step_id)?;
        let removed = self.steps.remove(index);
        for step in &mut self.steps {
            if let Some(pos) = step.dependencies.iter().position(|d| d == step_id) {
                step.dependencies.remove(pos);
                for inherited in &removed.dependencies {
                    if !step.dependencies.contains(inherited) {
                        step.dependencies.push(inherited.clone());
                    }
                }
                step.input_mapping
                    .retain(|_, reference| !reference.contains(&format!("${{{}.", step_id)));
            }
        }
        self.refresh_layout();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        ExecutionPlan::new(IntentType::ComprehensiveAnalysis, steps)
    }

    #[test]
    fn test_independent_steps_share_a_layer() {
        let p = plan(vec![ExecutionStep::new("search", 1, 30), ExecutionStep::new("analysis", 2, 60)]);
        assert_eq!(p.strategy, ExecutionStrategy::Parallel);
        assert_eq!(p.parallel_groups, vec![vec!["search".to_string(), "analysis".to_string()]]);
    }

    #[test]
    fn test_chain_layers() {
        let p = plan(vec![
            ExecutionStep::new("document", 3, 90).depends_on("analysis"),
            ExecutionStep::new("search", 1, 30),
            ExecutionStep::new("analysis", 2, 60).depends_on("search"),
        ]);
        let (layers, leftover) = p.layers();
        assert_eq!(layers, vec![vec!["search"], vec!["analysis"], vec!["document"]]);
        assert!(leftover.is_empty());
        assert_eq!(p.strategy, ExecutionStrategy::Sequential);
    }

    #[test]
    fn test_cycle_and_unknown_dependency_are_left_over() {
        let p = plan(vec![
            ExecutionStep::new("a", 1, 1).depends_on("b"),
            ExecutionStep::new("b", 1, 1).depends_on("a"),
            ExecutionStep::new("c", 1, 1).depends_on("ghost"),
            ExecutionStep::new("d", 1, 1),
        ]);
        let (layers, leftover) = p.layers();
        assert_eq!(layers, vec![vec!["d"]]);
        assert_eq!(leftover, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependents_are_transitive() {
        let p = plan(vec![
            ExecutionStep::new("search", 1, 30),
            ExecutionStep::new("analysis", 2, 60).depends_on("search"),
            ExecutionStep::new("document", 3, 90).depends_on("analysis"),
        ]);
        let deps = p.dependents_of("search");
        assert!(deps.contains("analysis") && deps.contains("document"));
    }

    #[test]
    fn test_remove_step_rewires_dependents() {
        let mut analysis = ExecutionStep::new("analysis", 2, 60).depends_on("search");
        analysis
            .input_mapping
            .insert("market_data".into(), "${search.output}".into());
        let mut p = plan(vec![ExecutionStep::new("search", 1, 30), analysis]);

        assert!(p.remove_step("search").is_some());
        let analysis = p.step("analysis").unwrap();
        assert!(analysis.dependencies.is_empty());
        assert!(analysis.input_mapping.is_empty());
        assert_eq!(p.parallel_groups, vec![vec!["analysis".to_string()]]);
    }
}
