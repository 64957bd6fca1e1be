//! Analysis team
//!
//! preprocess -> statistics -> patterns -> insights -> report
//!
//! Every stage degrades to a minimal result when the model or the data is
//! unavailable, so the team always produces a report.
//!
//! # Inputs (seeded by the executor)
//! - `team.input.query` (required)
//! - `team.input.inputs` (optional) - Resolved `${step.output}` mappings
//! - `team.input.search` (optional) - Search outcome already on the run
//! - `team.input.adjustments` (optional) - `mode: conservative`

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde_json::{json, Map, Value};

use query_engine::constants::{prompts, teams};
use query_engine::state::{AnalysisReport, SearchOutcome};
use query_engine::{ContextKeys, Stage, StagePipeline};

use crate::services::{adjustments, require, string_list, team_input, TeamServices};

pub const PREPROCESS: &str = "preprocess";
pub const STATISTICS: &str = "statistics";
pub const PATTERNS: &str = "patterns";
pub const INSIGHTS: &str = "insights";
pub const REPORT: &str = "report";

/// Confidence multiplier under the conservative adjustment
const CONSERVATIVE_FACTOR: f64 = 0.7;
/// max/min ratio above which a field counts as widely spread
const SPREAD_RATIO: f64 = 1.5;

pub fn pipeline(services: &TeamServices) -> StagePipeline {
    StagePipeline::new(
        teams::ANALYSIS,
        vec![
            Stage::new(
                Arc::new(PreprocessStage),
                vec![
                    ContextKeys::output(PREPROCESS, "records"),
                    ContextKeys::output(PREPROCESS, "sources"),
                ],
            ),
            Stage::new(Arc::new(StatisticsStage), vec![ContextKeys::output(STATISTICS, "stats")]),
            Stage::new(Arc::new(PatternStage), vec![ContextKeys::output(PATTERNS, "patterns")]),
            Stage::new(
                Arc::new(InsightStage::new(services.clone())),
                vec![
                    ContextKeys::output(INSIGHTS, "summary"),
                    ContextKeys::output(INSIGHTS, "insights"),
                    ContextKeys::output(INSIGHTS, "confidence"),
                ],
            ),
            Stage::new(Arc::new(ReportStage), vec![ContextKeys::output(REPORT, "report")]),
        ],
    )
}

/// Summary statistics of one numeric field
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count: values.len(),
            mean: values.iter().sum::<f64>() / values.len() as f64,
            min,
            max,
        })
    }
}

/// Per-field statistics over every numeric field of the records
pub fn field_statistics(records: &[Value]) -> BTreeMap<String, FieldStats> {
    let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in records {
        let Some(map) = record.as_object() else {
            continue;
        };
        for (field, value) in map {
            if let Some(number) = value.as_f64() {
                values.entry(field.clone()).or_default().push(number);
            }
        }
    }
    values
        .into_iter()
        .filter_map(|(field, values)| FieldStats::from_values(&values).map(|s| (field, s)))
        .collect()
}

/// Rule-based observations about the statistics
pub fn detect_patterns(stats: &BTreeMap<String, FieldStats>) -> Vec<String> {
    let mut patterns = Vec::new();
    for (field, s) in stats {
        if s.count >= 2 && s.min > 0.0 && s.max / s.min > SPREAD_RATIO {
            patterns.push(format!(
                "{} 편차가 큽니다 (최저 {} / 최고 {})",
                field,
                format_number(s.min),
                format_number(s.max)
            ));
        } else if s.count >= 2 {
            patterns.push(format!("{} 값이 비교적 고르게 분포합니다", field));
        }
    }
    patterns
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// Collect records from resolved inputs and the run's search outcome
pub struct PreprocessStage;

impl PreprocessStage {
    fn records_from_search(outcome: &SearchOutcome, records: &mut Vec<Value>, sources: &mut Vec<String>) {
        for (tool, run) in &outcome.tool_runs {
            if run.data.is_empty() {
                continue;
            }
            records.extend(run.data.iter().cloned());
            if !sources.contains(tool) {
                sources.push(tool.clone());
            }
        }
    }
}

#[async_trait]
impl Task for PreprocessStage {
    fn id(&self) -> &str {
        PREPROCESS
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let inputs: Map<String, Value> = context.get(&team_input("inputs")).await.unwrap_or_default();
        let mut records = Vec::new();
        let mut sources = Vec::new();
        let mut used_search = false;

        for value in inputs.values() {
            if value.get("kind").and_then(Value::as_str) != Some("search") {
                continue;
            }
            if let Some(outcome) = value
                .get("payload")
                .and_then(|p| serde_json::from_value::<SearchOutcome>(p.clone()).ok())
            {
                Self::records_from_search(&outcome, &mut records, &mut sources);
                used_search = true;
            }
        }
        if !used_search {
            if let Some(outcome) = context.get::<SearchOutcome>(&team_input("search")).await {
                Self::records_from_search(&outcome, &mut records, &mut sources);
            }
        }

        log::debug!("AnalysisTeam preprocess: {} records from {:?}", records.len(), sources);
        context.set(&ContextKeys::output(PREPROCESS, "records"), json!(records)).await;
        context.set(&ContextKeys::output(PREPROCESS, "sources"), json!(sources)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct StatisticsStage;

#[async_trait]
impl Task for StatisticsStage {
    fn id(&self) -> &str {
        STATISTICS
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let records: Vec<Value> = context
            .get(&ContextKeys::output(PREPROCESS, "records"))
            .await
            .unwrap_or_default();
        let stats = field_statistics(&records);
        context.set(&ContextKeys::output(STATISTICS, "stats"), json!(stats)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct PatternStage;

#[async_trait]
impl Task for PatternStage {
    fn id(&self) -> &str {
        PATTERNS
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let stats: BTreeMap<String, FieldStats> = context
            .get(&ContextKeys::output(STATISTICS, "stats"))
            .await
            .unwrap_or_default();
        let patterns = detect_patterns(&stats);
        context.set(&ContextKeys::output(PATTERNS, "patterns"), json!(patterns)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Model-written insights with a deterministic fallback
pub struct InsightStage {
    services: TeamServices,
}

impl InsightStage {
    pub fn new(services: TeamServices) -> Self {
        Self { services }
    }

    fn fallback(record_count: usize, stats: &BTreeMap<String, FieldStats>, patterns: &[String]) -> (String, Vec<String>, f64) {
        if record_count == 0 {
            return ("분석할 데이터가 없습니다".to_string(), Vec::new(), 0.2);
        }
        let mut insights: Vec<String> = stats
            .iter()
            .map(|(field, s)| format!("{} 평균 {} ({}건)", field, format_number(s.mean), s.count))
            .collect();
        insights.extend(patterns.iter().cloned());
        let confidence = (0.3 + 0.1 * record_count as f64).min(0.8);
        (format!("자료 {}건을 분석했습니다", record_count), insights, confidence)
    }
}

#[async_trait]
impl Task for InsightStage {
    fn id(&self) -> &str {
        INSIGHTS
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = require(&context, &team_input("query")).await?;
        let records: Vec<Value> = context
            .get(&ContextKeys::output(PREPROCESS, "records"))
            .await
            .unwrap_or_default();
        let stats: BTreeMap<String, FieldStats> = context
            .get(&ContextKeys::output(STATISTICS, "stats"))
            .await
            .unwrap_or_default();
        let patterns: Vec<String> = context
            .get(&ContextKeys::output(PATTERNS, "patterns"))
            .await
            .unwrap_or_default();

        let variables = json!({
            "query": query,
            "record_count": records.len(),
            "statistics": stats,
            "patterns": patterns,
        });
        let answer = if records.is_empty() {
            None
        } else {
            self.services.ask_json(prompts::ANALYSIS_INSIGHTS, &variables).await
        };
        let parsed = answer.and_then(|v| {
            let summary = v.get("summary").and_then(Value::as_str)?.to_string();
            let confidence = v.get("confidence").and_then(Value::as_f64).unwrap_or(0.6).clamp(0.0, 1.0);
            Some((summary, string_list(v.get("insights")), confidence))
        });
        let (summary, insights, confidence) =
            parsed.unwrap_or_else(|| Self::fallback(records.len(), &stats, &patterns));

        context.set(&ContextKeys::output(INSIGHTS, "summary"), json!(summary)).await;
        context.set(&ContextKeys::output(INSIGHTS, "insights"), json!(insights)).await;
        context.set(&ContextKeys::output(INSIGHTS, "confidence"), json!(confidence)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Assemble the `AnalysisReport`
pub struct ReportStage;

#[async_trait]
impl Task for ReportStage {
    fn id(&self) -> &str {
        REPORT
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let adjustments = adjustments(&context).await;
        let records: Vec<Value> = context
            .get(&ContextKeys::output(PREPROCESS, "records"))
            .await
            .unwrap_or_default();
        let stats: Map<String, Value> = context
            .get(&ContextKeys::output(STATISTICS, "stats"))
            .await
            .unwrap_or_default();

        let mut report = AnalysisReport {
            summary: context
                .get(&ContextKeys::output(INSIGHTS, "summary"))
                .await
                .unwrap_or_default(),
            statistics: stats,
            patterns: context
                .get(&ContextKeys::output(PATTERNS, "patterns"))
                .await
                .unwrap_or_default(),
            insights: context
                .get(&ContextKeys::output(INSIGHTS, "insights"))
                .await
                .unwrap_or_default(),
            confidence: context
                .get(&ContextKeys::output(INSIGHTS, "confidence"))
                .await
                .unwrap_or(0.0),
            caveats: Vec::new(),
        };

        if records.is_empty() {
            report.caveats.push("분석에 사용할 데이터가 부족합니다".to_string());
        }
        if adjustments.get("mode").and_then(Value::as_str) == Some("conservative") {
            report.confidence *= CONSERVATIVE_FACTOR;
            report
                .caveats
                .push("이전 단계 결과의 품질이 낮아 보수적으로 분석했습니다".to_string());
        }

        log::info!(
            "AnalysisTeam report: {} insights, confidence {:.2}",
            report.insights.len(),
            report.confidence
        );
        context.set(&ContextKeys::output(REPORT, "report"), json!(report)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use query_engine::config::TeamsConfig;
    use query_engine::state::{TeamState, ToolRun, ToolStatus};
    use query_engine::{NullProgressSink, PipelineOutcome, ScriptedModel, UnavailableModel};

    fn search_outcome() -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        outcome.tool_runs.insert(
            "market_data".into(),
            ToolRun {
                tool: "market_data".into(),
                status: ToolStatus::Success,
                result_count: 3,
                data: vec![
                    json!({"region": "강남구", "price": 2_400_000_000u64}),
                    json!({"region": "송파구", "price": 2_100_000_000u64}),
                    json!({"region": "노원구", "price": 900_000_000u64}),
                ],
                elapsed_ms: 3,
                error: None,
            },
        );
        outcome.total_results = 3;
        outcome
    }

    async fn report(model: Arc<dyn query_engine::LanguageModel>, seed: Vec<(&str, Value)>) -> AnalysisReport {
        let services = TeamServices::new(model, Arc::new(ToolRegistry::new()), TeamsConfig::default());
        let seed = seed.into_iter().map(|(k, v)| (team_input(k), v)).collect();
        let mut progress = TeamState::new("analysis");
        let PipelineOutcome::Finished { memory } =
            pipeline(&services).run(seed, 0, &mut progress, "run-1", &NullProgressSink).await
        else {
            panic!("analysis pipeline did not finish");
        };
        serde_json::from_value(memory[&ContextKeys::output(REPORT, "report")].clone()).unwrap()
    }

    #[test]
    fn test_statistics_and_spread() {
        let records = search_outcome().tool_runs["market_data"].data.clone();
        let stats = field_statistics(&records);
        assert_eq!(stats["price"].count, 3);
        assert_eq!(stats["price"].min, 900_000_000.0);
        assert!(detect_patterns(&stats)[0].contains("편차"));
    }

    #[tokio::test]
    async fn test_fallback_report_from_mapped_search() {
        let inputs = json!({"market": {"kind": "search", "payload": search_outcome()}});
        let report = report(
            Arc::new(UnavailableModel),
            vec![("query", json!("강남구 시세 분석")), ("inputs", inputs)],
        )
        .await;

        assert_eq!(report.summary, "자료 3건을 분석했습니다");
        assert!((report.confidence - 0.6).abs() < 1e-9);
        assert!(report.insights.iter().any(|i| i.starts_with("price 평균")));
        assert!(report.caveats.is_empty());
    }

    #[tokio::test]
    async fn test_model_insights_and_conservative_mode() {
        let model = ScriptedModel::new().with_json(
            prompts::ANALYSIS_INSIGHTS,
            json!({"summary": "강남 고가", "insights": ["강남구가 가장 높음"], "confidence": 0.9}),
        );
        let report = report(
            Arc::new(model),
            vec![
                ("query", json!("시세 분석")),
                ("search", json!(search_outcome())),
                ("adjustments", json!({"mode": "conservative"})),
            ],
        )
        .await;

        assert_eq!(report.summary, "강남 고가");
        assert!((report.confidence - 0.63).abs() < 1e-9);
        assert_eq!(report.caveats.len(), 1);
    }

    #[tokio::test]
    async fn test_no_data_still_reports() {
        let report = report(Arc::new(UnavailableModel), vec![("query", json!("분석"))]).await;
        assert_eq!(report.confidence, 0.2);
        assert!(!report.caveats.is_empty());
    }
}
