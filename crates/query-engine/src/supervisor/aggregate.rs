//! Final response synthesis

use serde_json::{json, Value};

use crate::constants::{model, prompts};
use crate::intent::IntentType;
use crate::llm::LanguageModel;
use crate::state::{FinalResponse, RunStatus, SharedState, TeamResult, TeamStatus};

/// Answer for runs whose plan had no steps
pub fn guidance_response(state: &SharedState) -> FinalResponse {
    let content = match state.intent.as_ref().map(|i| i.intent_type) {
        Some(IntentType::Irrelevant) => {
            "부동산 관련 질문에 답변할 수 있습니다. 전세·월세 법률, 시세, 대출, 계약서 작성에 대해 물어봐 주세요."
        }
        _ => {
            "질문을 조금 더 구체적으로 말씀해 주세요. 예: \"강남구 아파트 전세 시세 알려줘\", \"전세 계약서 작성해줘\"."
        }
    };
    FinalResponse {
        answer_type: "guidance".to_string(),
        content: content.to_string(),
        teams_used: Vec::new(),
        sources: Vec::new(),
        degraded: false,
    }
}

/// Model-written answer with a templated fallback
pub async fn synthesize(model_client: &dyn LanguageModel, state: &SharedState) -> FinalResponse {
    let teams_used: Vec<String> = state
        .plan
        .as_ref()
        .map(|p| p.teams())
        .unwrap_or_default()
        .into_iter()
        .filter(|t| state.team_results.contains_key(t))
        .collect();
    let sources = collect_sources(state);
    let answer_type = if state.status == RunStatus::Failed {
        "error"
    } else {
        "answer"
    };

    if state.status != RunStatus::Failed {
        let variables = json!({
            "query": state.query,
            "intent": state.intent.as_ref().map(|i| i.intent_type),
            "results": state.team_results,
            "failed_teams": state.failed_teams,
        });
        match model_client
            .complete_text(prompts::RESPONSE_SYNTHESIS, &variables, 0.3, model::MAX_TOKENS * 2)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                return FinalResponse {
                    answer_type: answer_type.to_string(),
                    content: text,
                    teams_used,
                    sources,
                    degraded: !state.failed_teams.is_empty(),
                };
            }
            Ok(_) => log::warn!("Aggregator: response_synthesis returned empty text"),
            Err(e) => log::warn!("Aggregator: response_synthesis failed, using template: {}", e),
        }
    }

    FinalResponse {
        answer_type: answer_type.to_string(),
        content: template_response(state, &teams_used),
        teams_used,
        sources,
        degraded: true,
    }
}

/// One paragraph per team result
pub fn template_response(state: &SharedState, teams_used: &[String]) -> String {
    let mut lines = Vec::new();
    if let Some(error) = &state.error {
        if state.status == RunStatus::Failed {
            lines.push(format!("요청을 완료하지 못했습니다: {}", error));
        }
    }

    for team in teams_used {
        let Some(envelope) = state.team_results.get(team) else {
            continue;
        };
        if envelope.status == TeamStatus::Failed {
            lines.push(format!(
                "[{}] 처리 중 오류가 발생했습니다: {}",
                team,
                envelope.error().unwrap_or("unknown error")
            ));
            continue;
        }
        match &envelope.data {
            TeamResult::Search(outcome) => {
                let mut line = format!("[검색] 관련 자료 {}건을 찾았습니다", outcome.total_results);
                if !outcome.sources.is_empty() {
                    line.push_str(&format!(" (출처: {})", outcome.sources.join(", ")));
                }
                if !outcome.failed_tools.is_empty() {
                    line.push_str(&format!(". 일부 도구 실패: {}", outcome.failed_tools.join(", ")));
                }
                lines.push(line);
            }
            TeamResult::Analysis(report) => {
                lines.push(format!("[분석] {} (신뢰도 {:.0}%)", report.summary, report.confidence * 100.0));
                for insight in &report.insights {
                    lines.push(format!("  - {}", insight));
                }
                for caveat in &report.caveats {
                    lines.push(format!("  ※ {}", caveat));
                }
            }
            TeamResult::Document(document) => {
                let status = match document.content {
                    Some(_) => "작성 완료",
                    None => "작성 취소",
                };
                lines.push(format!("[문서] {} - {}", document.title, status));
            }
            TeamResult::Empty => {}
        }
    }

    if lines.is_empty() {
        lines.push("요청을 처리했지만 제공할 결과가 없습니다.".to_string());
    }
    lines.join("\n")
}

fn collect_sources(state: &SharedState) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for envelope in state.team_results.values() {
        if let TeamResult::Search(outcome) = &envelope.data {
            for source in &outcome.sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
    }
    sources
}

/// Compact JSON view of a run for logs and the command line
pub fn summary_value(state: &SharedState) -> Value {
    json!({
        "run_id": state.run_id,
        "session_id": state.session_id,
        "status": state.status,
        "completed_teams": state.completed_teams,
        "failed_teams": state.failed_teams,
        "skipped_teams": state.skipped_teams,
        "error": state.error,
        "final_response": state.final_response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentResult;
    use crate::llm::{ScriptedModel, UnavailableModel};
    use crate::plan::{ExecutionPlan, ExecutionStep};
    use crate::state::{AnalysisReport, SearchOutcome, TeamState};

    fn finished_state() -> SharedState {
        let mut state = SharedState::new("s", "강남구 시세 분석");
        state.plan = Some(ExecutionPlan::new(
            IntentType::ComprehensiveAnalysis,
            vec![
                ExecutionStep::new("search", 1, 30),
                ExecutionStep::new("analysis", 2, 60).depends_on("search"),
            ],
        ));
        let mut search = TeamState::new("search");
        search.status = TeamStatus::Completed;
        search.result = Some(TeamResult::Search(SearchOutcome {
            total_results: 3,
            sources: vec!["market_data".into()],
            ..Default::default()
        }));
        state.merge_team_result("search", search.into_envelope());
        let mut analysis = TeamState::new("analysis");
        analysis.status = TeamStatus::Failed;
        analysis.error = Some("no data".into());
        analysis.result = Some(TeamResult::Analysis(AnalysisReport::default()));
        state.merge_team_result("analysis", analysis.into_envelope());
        state
    }

    #[test]
    fn test_guidance_for_unclear() {
        let mut state = SharedState::new("s", "hello");
        state.intent = Some(IntentResult::unclear("none"));
        let response = guidance_response(&state);
        assert_eq!(response.answer_type, "guidance");
        assert!(response.teams_used.is_empty());
    }

    #[tokio::test]
    async fn test_template_fallback_covers_every_team() {
        let state = finished_state();
        let response = synthesize(&UnavailableModel, &state).await;

        assert_eq!(response.answer_type, "answer");
        assert!(response.degraded);
        assert!(response.content.contains("3건"));
        assert!(response.content.contains("no data"));
        assert_eq!(response.sources, vec!["market_data"]);
        assert_eq!(response.teams_used, vec!["search", "analysis"]);
    }

    #[tokio::test]
    async fn test_model_answer_used() {
        let model = ScriptedModel::new().with_text("response_synthesis", "강남구 평균 시세는 ...");
        let response = synthesize(&model, &finished_state()).await;
        assert_eq!(response.content, "강남구 평균 시세는 ...");
        assert!(response.degraded);
    }
}
