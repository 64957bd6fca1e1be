//! Intent classification and team selection

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::constants::{model, prompts, teams};
use crate::error::{EngineError, Result};
use crate::intent::{classify_by_keywords, extract_entities, has_analytical_keyword, IntentResult, IntentType};

use super::{PlanningContext, Planner};

#[derive(Debug, Deserialize)]
struct ModelIntent {
    intent: IntentType,
    confidence: f64,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    entities: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ModelTeams {
    teams: Vec<String>,
}

impl Planner {
    /// Classify a request, preferring the model and falling back to keywords
    pub async fn analyze_intent(&self, query: &str, context: &PlanningContext) -> IntentResult {
        match self.model_intent(query, context).await {
            Ok(mut intent) => {
                intent.suggested_teams = self.select_teams(query, &intent).await;
                log::info!(
                    "Planner: model classified intent {} ({:.2})",
                    intent.intent_type,
                    intent.confidence
                );
                intent
            }
            Err(e) => {
                log::warn!("Planner: intent model failed, using keyword scoring: {}", e);
                let mut intent = classify_by_keywords(query);
                if intent.intent_type != IntentType::Unclear {
                    intent.suggested_teams = self.select_teams(query, &intent).await;
                }
                intent
            }
        }
    }

    async fn model_intent(&self, query: &str, context: &PlanningContext) -> Result<IntentResult> {
        let variables = json!({
            "query": query,
            "history": context.history,
            "entities": context.entities,
        });
        let raw = self
            .model
            .complete_json(prompts::INTENT_ANALYSIS, &variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await?;
        let parsed: ModelIntent = serde_json::from_value(raw)
            .map_err(|e| EngineError::model(format!("intent_analysis shape: {}", e)))?;
        if !(0.0..=1.0).contains(&parsed.confidence) {
            return Err(EngineError::model(format!(
                "intent_analysis confidence out of range: {}",
                parsed.confidence
            )));
        }

        let mut entities = extract_entities(query);
        entities.extend(parsed.entities);
        Ok(IntentResult {
            intent_type: parsed.intent,
            confidence: parsed.confidence,
            keywords: parsed.keywords,
            reasoning: parsed.reasoning,
            entities,
            suggested_teams: Vec::new(),
            fallback: false,
        })
    }

    /// Two-tier team selection
    ///
    /// Information lookups without analytical wording go straight to Search.
    /// Otherwise the model is asked twice (full then simple prompt) before
    /// the intent's safe default mapping is used.
    pub async fn select_teams(&self, query: &str, intent: &IntentResult) -> Vec<String> {
        if intent.intent_type == IntentType::Irrelevant {
            return Vec::new();
        }
        if intent.intent_type.is_information_seeking() && !has_analytical_keyword(query) {
            log::debug!("Planner: fast filter routed '{}' to search", intent.intent_type);
            return self.available(vec![teams::SEARCH.to_string()]);
        }

        let variables = json!({
            "query": query,
            "intent": intent.intent_type,
            "available_teams": self.registry.list(true),
        });
        for prompt in [prompts::AGENT_SELECTION, prompts::AGENT_SELECTION_SIMPLE] {
            match self.model_teams(prompt, &variables).await {
                Ok(selected) if !selected.is_empty() => {
                    log::info!("Planner: {} selected {:?}", prompt, selected);
                    return selected;
                }
                Ok(_) => log::warn!("Planner: {} selected no registered team", prompt),
                Err(e) => log::warn!("Planner: {} failed: {}", prompt, e),
            }
        }

        let defaults = self.available(intent.intent_type.default_teams());
        log::info!("Planner: using default teams {:?} for {}", defaults, intent.intent_type);
        defaults
    }

    async fn model_teams(&self, prompt: &str, variables: &Value) -> Result<Vec<String>> {
        let raw = self
            .model
            .complete_json(prompt, variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await?;
        let parsed: ModelTeams = serde_json::from_value(raw)
            .map_err(|e| EngineError::model(format!("{} shape: {}", prompt, e)))?;
        Ok(self.available(parsed.teams))
    }

    /// Keep registered, enabled teams, dropping duplicates
    pub(crate) fn available(&self, names: Vec<String>) -> Vec<String> {
        let mut kept: Vec<String> = Vec::new();
        for name in names {
            if self.registry.is_available(&name) && !kept.contains(&name) {
                kept.push(name);
            }
        }
        kept
    }
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

    #[tokio::test]
    async fn test_model_intent_is_used() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_json(
                    "intent_analysis",
                    json!({"intent": "risk_analysis", "confidence": 0.85, "reasoning": "fraud"}),
                )
                .with_json("agent_selection", json!({"teams": ["search", "analysis", "weather"]})),
        );
        let intent = planner(model.clone())
            .analyze_intent("전세 사기 위험 분석", &PlanningContext::default())
            .await;

        assert_eq!(intent.intent_type, IntentType::RiskAnalysis);
        assert!(!intent.fallback);
        assert_eq!(intent.suggested_teams, vec!["search", "analysis"]);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_falls_back() {
        let model = Arc::new(
            ScriptedModel::new().with_json("intent_analysis", json!({"intent": "loan_consult", "confidence": 7.0})),
        );
        let intent = planner(model)
            .analyze_intent("주택담보대출 금리", &PlanningContext::default())
            .await;
        assert!(intent.fallback);
        assert_eq!(intent.intent_type, IntentType::LoanConsult);
    }

    #[tokio::test]
    async fn test_fast_filter_skips_model() {
        let model = Arc::new(ScriptedModel::new());
        let p = planner(model.clone());
        let intent = classify_by_keywords("전세 보증금 반환 법");

        assert_eq!(p.select_teams("전세 보증금 반환 법", &intent).await, vec!["search"]);
        assert_eq!(model.call_count("agent_selection"), 0);
    }

    #[tokio::test]
    async fn test_second_model_attempt() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_failure("agent_selection", "timeout")
                .with_json("agent_selection_simple", json!({"teams": ["analysis"]})),
        );
        let p = planner(model.clone());
        let intent = classify_by_keywords("전세 위험 분석");

        assert_eq!(p.select_teams("전세 위험 분석", &intent).await, vec!["analysis"]);
        assert_eq!(model.call_count("agent_selection_simple"), 1);
    }

    #[tokio::test]
    async fn test_defaults_when_model_unavailable() {
        let p = planner(Arc::new(UnavailableModel));
        let intent = classify_by_keywords("계약서 작성해줘");
        assert_eq!(intent.intent_type, IntentType::ContractCreation);
        assert_eq!(p.select_teams("계약서 작성해줘", &intent).await, vec!["search", "document"]);
    }
}
