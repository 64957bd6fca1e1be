//! Heuristic result quality and the adjustments it triggers

use serde_json::{json, Map, Value};

use crate::constants::teams;
use crate::state::{ApprovalDecision, TeamEnvelope, TeamResult, TeamStatus};

/// Quality of a team result in [0, 1]
pub fn assess_quality(envelope: &TeamEnvelope) -> f64 {
    if envelope.status == TeamStatus::Failed {
        return 0.0;
    }
    match &envelope.data {
        TeamResult::Search(outcome) => match outcome.total_results {
            0 => 0.0,
            1..=2 => 0.4,
            3..=9 => 0.7,
            _ => 0.9,
        },
        TeamResult::Analysis(report) => report.confidence.clamp(0.0, 1.0),
        TeamResult::Document(document) => match document.decision {
            ApprovalDecision::Approved | ApprovalDecision::AutoApproved => 0.9,
            ApprovalDecision::Modified => 0.7,
            ApprovalDecision::Rejected => 0.3,
        },
        TeamResult::Empty => 0.0,
    }
}

/// Parameters applied to a pending team after a poor upstream result
pub fn adjustment_for(team: &str) -> Option<Map<String, Value>> {
    let parameters = match team {
        teams::ANALYSIS => json!({"mode": "conservative"}),
        teams::DOCUMENT => json!({"include_disclaimer": true}),
        teams::SEARCH => json!({"broaden_query": true, "use_all_tools": true}),
        _ => return None,
    };
    match parameters {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AnalysisReport, DocumentOutcome, SearchOutcome};

    fn envelope(status: TeamStatus, data: TeamResult) -> TeamEnvelope {
        TeamEnvelope {
            status,
            data,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_search_thresholds() {
        let score = |count| {
            assess_quality(&envelope(
                TeamStatus::Completed,
                TeamResult::Search(SearchOutcome {
                    total_results: count,
                    ..Default::default()
                }),
            ))
        };
        assert_eq!(score(0), 0.0);
        assert_eq!(score(2), 0.4);
        assert_eq!(score(5), 0.7);
        assert_eq!(score(12), 0.9);
    }

    #[test]
    fn test_failed_is_zero() {
        let report = AnalysisReport {
            confidence: 0.95,
            ..Default::default()
        };
        assert_eq!(assess_quality(&envelope(TeamStatus::Failed, TeamResult::Analysis(report))), 0.0);
    }

    #[test]
    fn test_document_decision() {
        let doc = DocumentOutcome {
            document_type: "lease_contract".into(),
            title: "t".into(),
            sections: vec![],
            content: None,
            decision: ApprovalDecision::Rejected,
            modifications: vec![],
            supporting_results: 0,
        };
        assert_eq!(assess_quality(&envelope(TeamStatus::Completed, TeamResult::Document(doc))), 0.3);
    }

    #[test]
    fn test_adjustments() {
        assert_eq!(adjustment_for("analysis").unwrap()["mode"], "conservative");
        assert_eq!(adjustment_for("search").unwrap()["use_all_tools"], true);
        assert!(adjustment_for("weather").is_none());
    }
}
