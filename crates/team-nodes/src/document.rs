//! Document team
//!
//! planning -> aggregate -> generate
//!
//! `aggregate` is the approval gate. It drafts the document, publishes the
//! draft and parks the pipeline with `WaitForInput`. When the pipeline is
//! rebuilt with a resume command under `resume_key("aggregate")` the same
//! stage runs again, applies the decision and either continues to
//! `generate` or ends the team on `reject`.

use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use query_engine::constants::{prompts, teams};
use query_engine::pipeline::{interrupt_key, resume_key};
use query_engine::state::{ApprovalDecision, DocumentSection, ToolStatus};
use query_engine::{ContextKeys, ResumeAction, ResumeCommand, Stage, StagePipeline};

use crate::services::{adjustments, flag, require, team_input, TeamServices};
use crate::tools::{run_tool, LegalSearchTool};

pub const PLANNING: &str = "planning";
pub const AGGREGATE: &str = "aggregate";
pub const GENERATE: &str = "generate";

const DISCLAIMER_HEADING: &str = "유의사항";

pub fn pipeline(services: &TeamServices) -> StagePipeline {
    StagePipeline::new(
        teams::DOCUMENT,
        vec![
            Stage::new(Arc::new(PlanningStage), vec![ContextKeys::output(PLANNING, "plan")]),
            Stage::new(
                Arc::new(AggregateStage::new(services.clone())),
                vec![
                    ContextKeys::output(AGGREGATE, "draft"),
                    ContextKeys::output(AGGREGATE, "sections"),
                    ContextKeys::output(AGGREGATE, "supporting_results"),
                    ContextKeys::output(AGGREGATE, "decision"),
                    ContextKeys::output(AGGREGATE, "modifications"),
                    interrupt_key(AGGREGATE),
                ],
            ),
            Stage::new(Arc::new(GenerateStage), vec![ContextKeys::output(GENERATE, "content")]),
        ],
    )
}

/// Document type and outline chosen by `planning`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub document_type: String,
    pub title: String,
    pub sections: Vec<String>,
}

/// Document families recognised in the query, most specific first
const DOCUMENT_TYPES: &[(&str, &[&str], &str, &[&str])] = &[
    (
        "lease_contract",
        &["전세", "월세", "임대차"],
        "주택임대차 계약서",
        &["계약 당사자", "임대 목적물", "보증금 및 차임", "계약 기간", "특약사항"],
    ),
    (
        "sales_contract",
        &["매매"],
        "부동산 매매 계약서",
        &["계약 당사자", "매매 목적물", "매매 대금 및 지급 방법", "소유권 이전", "특약사항"],
    ),
    (
        "certified_letter",
        &["내용증명"],
        "내용증명",
        &["발신인", "수신인", "청구 내용", "이행 기한"],
    ),
];

/// Pick the document type from the query; contracts default to a lease
pub fn plan_document(query: &str) -> DocumentPlan {
    let found = DOCUMENT_TYPES
        .iter()
        .find(|(_, keywords, _, _)| keywords.iter().any(|k| query.contains(k)));
    let (document_type, _, title, sections) = match found {
        Some(entry) => *entry,
        None if query.contains("계약") => DOCUMENT_TYPES[0],
        None => ("general", &[][..], "부동산 관련 문서", &["개요", "주요 내용", "참고 법령"][..]),
    };
    DocumentPlan {
        document_type: document_type.to_string(),
        title: title.to_string(),
        sections: sections.iter().map(|s| s.to_string()).collect(),
    }
}

/// Render sections as plain text under a title
pub fn render(title: &str, sections: &[DocumentSection]) -> String {
    let mut out = format!("# {}\n", title);
    for section in sections {
        out.push_str(&format!("\n## {}\n{}\n", section.heading, section.body));
    }
    out
}

pub struct PlanningStage;

#[async_trait]
impl Task for PlanningStage {
    fn id(&self) -> &str {
        PLANNING
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = require(&context, &team_input("query")).await?;
        let mut plan = plan_document(&query);
        if flag(&adjustments(&context).await, "include_disclaimer") {
            plan.sections.push(DISCLAIMER_HEADING.to_string());
        }
        log::debug!("DocumentTeam planning: {} with {} sections", plan.document_type, plan.sections.len());
        context.set(&ContextKeys::output(PLANNING, "plan"), json!(plan)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Draft the document and hold it for approval
pub struct AggregateStage {
    services: TeamServices,
}

impl AggregateStage {
    pub fn new(services: TeamServices) -> Self {
        Self { services }
    }

    async fn supporting(&self, query: &str) -> Vec<Value> {
        if !self.services.tools.contains(LegalSearchTool::NAME) {
            return Vec::new();
        }
        let run = run_tool(
            &self.services.tools,
            LegalSearchTool::NAME,
            query,
            &json!({"limit": 3}),
            self.services.tool_timeout(),
        )
        .await;
        if run.status == ToolStatus::Success {
            run.data
        } else {
            Vec::new()
        }
    }

    fn template(query: &str, plan: &DocumentPlan, supporting: &[Value]) -> Vec<DocumentSection> {
        let citations: Vec<&str> = supporting
            .iter()
            .filter_map(|r| r.get("citation").and_then(Value::as_str))
            .collect();
        plan.sections
            .iter()
            .map(|heading| {
                let body = if heading == DISCLAIMER_HEADING {
                    "본 문서는 참고용 초안이며 법률 자문을 대신하지 않습니다.".to_string()
                } else if heading == "참고 법령" || heading == "특약사항" {
                    if citations.is_empty() {
                        "(관련 법령 확인 필요)".to_string()
                    } else {
                        format!("관련 법령: {}", citations.join(", "))
                    }
                } else {
                    format!("[{}] 요청 내용: {}", heading, query)
                };
                DocumentSection {
                    heading: heading.clone(),
                    body,
                }
            })
            .collect()
    }

    async fn draft(&self, query: &str, plan: &DocumentPlan, supporting: &[Value]) -> Vec<DocumentSection> {
        let variables = json!({
            "query": query,
            "document_type": plan.document_type,
            "title": plan.title,
            "sections": plan.sections,
            "supporting": supporting,
        });
        let drafted = self
            .services
            .ask_json(prompts::DOCUMENT_DRAFT, &variables)
            .await
            .and_then(|v| v.get("sections").cloned())
            .and_then(|v| serde_json::from_value::<Vec<DocumentSection>>(v).ok())
            .filter(|sections| !sections.is_empty());
        drafted.unwrap_or_else(|| Self::template(query, plan, supporting))
    }

    async fn apply(&self, context: &Context, command: ResumeCommand) -> graph_flow::Result<TaskResult> {
        let decision = match command.action {
            ResumeAction::Approve => ApprovalDecision::Approved,
            ResumeAction::Modify => ApprovalDecision::Modified,
            ResumeAction::Reject => ApprovalDecision::Rejected,
        };
        log::info!("DocumentTeam approval: {:?} ({} modifications)", decision, command.modifications.len());
        context.set(&ContextKeys::output(AGGREGATE, "decision"), json!(decision)).await;
        context
            .set(&ContextKeys::output(AGGREGATE, "modifications"), json!(command.modifications))
            .await;
        let next = if decision == ApprovalDecision::Rejected {
            NextAction::End
        } else {
            NextAction::Continue
        };
        Ok(TaskResult::new(None, next))
    }
}

#[async_trait]
impl Task for AggregateStage {
    fn id(&self) -> &str {
        AGGREGATE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        if let Some(resume) = context.get::<Value>(&resume_key(AGGREGATE)).await {
            let command = ResumeCommand::parse(&resume)
                .map_err(|e| graph_flow::GraphError::TaskExecutionFailed(e.to_string()))?;
            return self.apply(&context, command).await;
        }

        let query: String = require(&context, &team_input("query")).await?;
        let plan: DocumentPlan = require(&context, &ContextKeys::output(PLANNING, "plan")).await?;
        let supporting = self.supporting(&query).await;
        let sections = self.draft(&query, &plan, &supporting).await;
        let draft = render(&plan.title, &sections);

        context.set(&ContextKeys::output(AGGREGATE, "draft"), json!(draft)).await;
        context.set(&ContextKeys::output(AGGREGATE, "sections"), json!(sections)).await;
        context
            .set(&ContextKeys::output(AGGREGATE, "supporting_results"), json!(supporting.len()))
            .await;

        if self.services.config.auto_approve_documents {
            log::info!("DocumentTeam approval gate bypassed (auto-approve)");
            context
                .set(&ContextKeys::output(AGGREGATE, "decision"), json!(ApprovalDecision::AutoApproved))
                .await;
            return Ok(TaskResult::new(None, NextAction::Continue));
        }

        let payload = json!({
            "document_type": plan.document_type,
            "title": plan.title,
            "draft": draft,
            "sections": sections,
            "supporting_results": supporting.len(),
            "actions": ResumeAction::ALL,
        });
        context.set(&interrupt_key(AGGREGATE), payload).await;
        Ok(TaskResult::new(
            Some("Document draft awaiting approval".to_string()),
            NextAction::WaitForInput,
        ))
    }
}

/// Render the approved draft with any requested corrections
pub struct GenerateStage;

#[async_trait]
impl Task for GenerateStage {
    fn id(&self) -> &str {
        GENERATE
    }

    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let plan: DocumentPlan = require(&context, &ContextKeys::output(PLANNING, "plan")).await?;
        let mut sections: Vec<DocumentSection> = require(&context, &ContextKeys::output(AGGREGATE, "sections")).await?;
        let modifications: Vec<String> = context
            .get(&ContextKeys::output(AGGREGATE, "modifications"))
            .await
            .unwrap_or_default();
        if !modifications.is_empty() {
            sections.push(DocumentSection {
                heading: "수정 반영 사항".to_string(),
                body: modifications
                    .iter()
                    .map(|m| format!("- {}", m))
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        }
        let content = render(&plan.title, &sections);
        context.set(&ContextKeys::output(GENERATE, "content"), json!(content)).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}
