//! Plan validation
//!
//! Checks dependency resolution, team registration and acyclicity. Returns
//! every error found, not just the first.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::plan::ExecutionPlan;
use crate::registry::CapabilityRegistry;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum PlanValidationError {
    /// A step depends on a step id that is not in the plan
    UnknownDependency { step_id: String, dependency: String },
    /// A step names a team that is not registered or is disabled
    UnregisteredTeam { step_id: String, team: String },
    /// Two steps share an id
    DuplicateStep { step_id: String },
    /// A step depends on itself
    SelfDependency { step_id: String },
    /// Dependencies form a cycle
    CycleDetected,
}

impl std::fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDependency { step_id, dependency } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step_id, dependency)
            }
            Self::UnregisteredTeam { step_id, team } => {
                write!(f, "Step '{}' uses unregistered team '{}'", step_id, team)
            }
            Self::DuplicateStep { step_id } => write!(f, "Duplicate step id '{}'", step_id),
            Self::SelfDependency { step_id } => write!(f, "Step '{}' depends on itself", step_id),
            Self::CycleDetected => write!(f, "Cycle detected in plan dependencies"),
        }
    }
}

impl std::error::Error for PlanValidationError {}

/// Validate a plan against the registry
pub fn validate_plan(plan: &ExecutionPlan, registry: &CapabilityRegistry) -> Vec<PlanValidationError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.step_id.as_str()) {
            errors.push(PlanValidationError::DuplicateStep {
                step_id: step.step_id.clone(),
            });
        }
        if !registry.is_available(&step.team) {
            errors.push(PlanValidationError::UnregisteredTeam {
                step_id: step.step_id.clone(),
                team: step.team.clone(),
            });
        }
        for dependency in &step.dependencies {
            if dependency == &step.step_id {
                errors.push(PlanValidationError::SelfDependency {
                    step_id: step.step_id.clone(),
                });
            } else if !plan.steps.iter().any(|s| &s.step_id == dependency) {
                errors.push(PlanValidationError::UnknownDependency {
                    step_id: step.step_id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    if has_cycle(plan) {
        errors.push(PlanValidationError::CycleDetected);
    }

    errors
}

/// Kahn's algorithm over known dependency edges
fn has_cycle(plan: &ExecutionPlan) -> bool {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.step_id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &plan.steps {
        for dependency in &step.dependencies {
            if !ids.contains(dependency.as_str()) {
                continue;
            }
            adjacency
                .entry(dependency.as_str())
                .or_default()
                .push(step.step_id.as_str());
            *in_degree.entry(step.step_id.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(next) = adjacency.get(id) {
            for target in next {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*target);
                    }
                }
            }
        }
    }

    visited != in_degree.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentType;
    use crate::plan::ExecutionStep;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::with_default_teams()
    }

    #[test]
    fn test_valid_chain() {
        let plan = ExecutionPlan::new(
            IntentType::ContractCreation,
            vec![
                ExecutionStep::new("search", 1, 30),
                ExecutionStep::new("document", 2, 90).depends_on("search"),
            ],
        );
        assert!(validate_plan(&plan, &registry()).is_empty());
    }

    #[test]
    fn test_empty_plan_is_valid() {
        assert!(validate_plan(&ExecutionPlan::empty(IntentType::Unclear), &registry()).is_empty());
    }

    #[test]
    fn test_reports_all_errors() {
        let plan = ExecutionPlan::new(
            IntentType::Unclear,
            vec![
                ExecutionStep::new("search", 1, 30).depends_on("analysis"),
                ExecutionStep::new("analysis", 2, 60).depends_on("search"),
                ExecutionStep::new("weather", 3, 10).depends_on("ghost"),
            ],
        );
        let errors = validate_plan(&plan, &registry());

        assert!(errors.contains(&PlanValidationError::CycleDetected));
        assert!(errors.contains(&PlanValidationError::UnregisteredTeam {
            step_id: "weather".into(),
            team: "weather".into(),
        }));
        assert!(errors.contains(&PlanValidationError::UnknownDependency {
            step_id: "weather".into(),
            dependency: "ghost".into(),
        }));
    }

    #[test]
    fn test_self_dependency() {
        let plan = ExecutionPlan::new(
            IntentType::Unclear,
            vec![ExecutionStep::new("search", 1, 30).depends_on("search")],
        );
        let errors = validate_plan(&plan, &registry());
        assert!(errors.contains(&PlanValidationError::SelfDependency {
            step_id: "search".into()
        }));
        assert!(errors.contains(&PlanValidationError::CycleDetected));
    }
}
