//! Conditional routing between supervisor nodes

use crate::checkpoint::GraphPosition;
use crate::config::PlannerConfig;
use crate::constants::teams;
use crate::intent::{IntentResult, IntentType};
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::registry::CapabilityRegistry;

/// Node that follows planning
pub fn after_planning(plan: &ExecutionPlan) -> GraphPosition {
    if plan.is_empty() {
        GraphPosition::Aggregating
    } else {
        GraphPosition::Orchestrating
    }
}

/// Node that follows a finished plan layer
pub fn after_layer(layer: usize, layer_count: usize) -> GraphPosition {
    if layer + 1 < layer_count {
        GraphPosition::Teams { layer: layer + 1 }
    } else {
        GraphPosition::Aggregating
    }
}

/// Single team a keyword-classified intent goes to
pub fn keyword_team(intent: IntentType) -> Option<&'static str> {
    match intent {
        IntentType::LegalConsult | IntentType::MarketInquiry | IntentType::LoanConsult => {
            Some(teams::SEARCH)
        }
        IntentType::ContractCreation => Some(teams::DOCUMENT),
        IntentType::ContractReview | IntentType::ComprehensiveAnalysis | IntentType::RiskAnalysis => {
            Some(teams::ANALYSIS)
        }
        IntentType::Unclear | IntentType::Irrelevant => None,
    }
}

/// One-step plan for keyword routing; empty when no team fits
pub fn keyword_plan(
    intent: &IntentResult,
    registry: &CapabilityRegistry,
    config: &PlannerConfig,
) -> ExecutionPlan {
    let steps = keyword_team(intent.intent_type)
        .filter(|team| registry.is_available(team))
        .map(|team| {
            let mut step = ExecutionStep::new(team, 1, config.timeout_for(team));
            step.description = format!("keyword route for {}", intent.intent_type);
            vec![step]
        })
        .unwrap_or_default();
    let mut plan = ExecutionPlan::new(intent.intent_type, steps).with_confidence(intent.confidence);
    plan.estimated_time_secs = plan
        .steps
        .iter()
        .map(|s| crate::planner::estimate_secs(&s.team))
        .sum();
    plan
}
