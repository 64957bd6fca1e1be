//! Linear stage pipelines built from graph-flow tasks
//!
//! A team is a list of stages. Each stage is a `graph_flow::Task` that reads
//! and writes the shared `Context` and declares which keys it publishes.
//! The runner walks the stages in order, honouring the task's `NextAction`:
//!
//! - `Continue` moves to the next stage
//! - `GoTo(id)` jumps forward to the named stage, skipping those between
//! - `End` finishes the pipeline, skipping the rest
//! - `WaitForInput` parks the pipeline and returns a `TeamContinuation`
//!
//! Only declared outputs survive a suspension; the continuation carries them
//! so the pipeline can be rebuilt in a different process.

use std::collections::BTreeMap;
use std::sync::Arc;

use graph_flow::{Context, NextAction, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{emit, ProgressEvent, ProgressSink};
use crate::state::{now_rfc3339, StepProgress, StepStatus, TeamState, TeamStatus};

/// Helper to build context keys following the naming convention
pub struct ContextKeys;

impl ContextKeys {
    /// Build an input key: `{task_id}.input.{port}`
    pub fn input(task_id: &str, port: &str) -> String {
        format!("{}.input.{}", task_id, port)
    }

    /// Build an output key: `{task_id}.output.{port}`
    pub fn output(task_id: &str, port: &str) -> String {
        format!("{}.output.{}", task_id, port)
    }

    /// Build a metadata key: `{task_id}.meta.{field}`
    pub fn meta(task_id: &str, field: &str) -> String {
        format!("{}.meta.{}", task_id, field)
    }
}

/// Context key carrying the resume command for a parked stage
pub fn resume_key(stage_id: &str) -> String {
    ContextKeys::input(stage_id, "resume")
}

/// Context key a suspending stage writes its interrupt payload to
pub fn interrupt_key(stage_id: &str) -> String {
    ContextKeys::meta(stage_id, "interrupt")
}

/// Context key a stage writes a team-fatal error to
pub fn error_key(team: &str) -> String {
    ContextKeys::meta(team, "error")
}

/// One pipeline stage
#[derive(Clone)]
pub struct Stage {
    pub task: Arc<dyn Task>,
    /// Context keys this stage publishes
    pub outputs: Vec<String>,
}

impl Stage {
    pub fn new(task: Arc<dyn Task>, outputs: Vec<String>) -> Self {
        Self { task, outputs }
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }
}

/// Where a parked pipeline picks up again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamContinuation {
    pub stage_index: usize,
    pub stage_id: String,
    /// Declared outputs published before the suspension
    pub memory: BTreeMap<String, Value>,
}

/// Result of walking a pipeline
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Every stage ran or was skipped; `memory` holds all declared outputs
    Finished { memory: BTreeMap<String, Value> },
    /// A stage asked for human input
    Suspended {
        continuation: TeamContinuation,
        interrupt: Value,
    },
    /// A stage returned an error
    Failed {
        memory: BTreeMap<String, Value>,
        stage_id: String,
        error: String,
    },
}

/// Ordered stages of one team
pub struct StagePipeline {
    team: String,
    stages: Vec<Stage>,
}

impl StagePipeline {
    pub fn new(team: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            team: team.into(),
            stages,
        }
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn stage_index(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id() == stage_id)
    }

    /// Walk the stages from `start`, seeding the context with `seed`
    ///
    /// `progress` receives per-stage status keyed by stage index; every
    /// change is also emitted to `sink`.
    pub async fn run(
        &self,
        seed: BTreeMap<String, Value>,
        start: usize,
        progress: &mut TeamState,
        run_id: &str,
        sink: &dyn ProgressSink,
    ) -> PipelineOutcome {
        let context = Context::new();
        for (key, value) in &seed {
            context.set(key, value.clone()).await;
        }
        let mut memory = seed;

        for (index, stage) in self.stages.iter().enumerate() {
            progress.step_progress.entry(index).or_insert_with(|| StepProgress {
                name: stage.id().to_string(),
                status: StepStatus::Pending,
                percent: 0,
            });
        }
        if progress.started_at.is_none() {
            progress.started_at = Some(now_rfc3339());
        }
        progress.status = TeamStatus::InProgress;

        let mut index = start;
        while index < self.stages.len() {
            let stage = &self.stages[index];
            self.mark(progress, index, StepStatus::InProgress, 0, run_id, sink);

            let result = match stage.task.run(context.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("StagePipeline {}: stage '{}' failed: {}", self.team, stage.id(), e);
                    self.mark(progress, index, StepStatus::Failed, 0, run_id, sink);
                    self.collect(stage, &context, &mut memory).await;
                    return PipelineOutcome::Failed {
                        memory,
                        stage_id: stage.id().to_string(),
                        error: e.to_string(),
                    };
                }
            };
            self.collect(stage, &context, &mut memory).await;

            match result.next_action {
                NextAction::WaitForInput => {
                    self.mark(progress, index, StepStatus::Suspended, 50, run_id, sink);
                    let interrupt = context
                        .get::<Value>(&interrupt_key(stage.id()))
                        .await
                        .or_else(|| result.response.clone().map(Value::String))
                        .unwrap_or(Value::Null);
                    log::info!("StagePipeline {}: suspended at '{}'", self.team, stage.id());
                    return PipelineOutcome::Suspended {
                        continuation: TeamContinuation {
                            stage_index: index,
                            stage_id: stage.id().to_string(),
                            memory,
                        },
                        interrupt,
                    };
                }
                NextAction::GoTo(target) => {
                    self.mark(progress, index, StepStatus::Completed, 100, run_id, sink);
                    let Some(target_index) = self.stage_index(&target).filter(|t| *t > index) else {
                        return PipelineOutcome::Failed {
                            memory,
                            stage_id: stage.id().to_string(),
                            error: format!("cannot jump from '{}' to '{}'", stage.id(), target),
                        };
                    };
                    for skipped in index + 1..target_index {
                        self.mark(progress, skipped, StepStatus::Skipped, 100, run_id, sink);
                    }
                    index = target_index;
                }
                NextAction::End => {
                    self.mark(progress, index, StepStatus::Completed, 100, run_id, sink);
                    for skipped in index + 1..self.stages.len() {
                        self.mark(progress, skipped, StepStatus::Skipped, 100, run_id, sink);
                    }
                    break;
                }
                _ => {
                    self.mark(progress, index, StepStatus::Completed, 100, run_id, sink);
                    index += 1;
                }
            }
        }

        PipelineOutcome::Finished { memory }
    }

    async fn collect(&self, stage: &Stage, context: &Context, memory: &mut BTreeMap<String, Value>) {
        for key in &stage.outputs {
            if let Some(value) = context.get::<Value>(key).await {
                memory.insert(key.clone(), value);
            }
        }
    }

    fn mark(
        &self,
        progress: &mut TeamState,
        index: usize,
        status: StepStatus,
        percent: u8,
        run_id: &str,
        sink: &dyn ProgressSink,
    ) {
        let name = self
            .stages
            .get(index)
            .map(|s| s.id().to_string())
            .unwrap_or_default();
        progress.step_progress.insert(
            index,
            StepProgress {
                name: name.clone(),
                status,
                percent,
            },
        );
        emit(
            sink,
            ProgressEvent::step_progress(run_id, &self.team, index, &name, status, percent),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecProgressSink;
    use async_trait::async_trait;
    use graph_flow::{GraphError, TaskResult};

    /// Writes `{id}.output.value` and returns a fixed action
    struct FixedTask {
        id: String,
        action: fn() -> NextAction,
    }

    #[async_trait]
    impl Task for FixedTask {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
            context
                .set(&ContextKeys::output(&self.id, "value"), Value::from(self.id.clone()))
                .await;
            Ok(TaskResult::new(None, (self.action)()))
        }
    }

    /// Suspends until a resume command is present
    struct GateTask;

    #[async_trait]
    impl Task for GateTask {
        fn id(&self) -> &str {
            "gate"
        }

        async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
            if let Some(resume) = context.get::<Value>(&resume_key("gate")).await {
                context.set(&ContextKeys::output("gate", "value"), resume).await;
                return Ok(TaskResult::new(None, NextAction::Continue));
            }
            context
                .set(&interrupt_key("gate"), serde_json::json!({"draft": "d"}))
                .await;
            Ok(TaskResult::new(None, NextAction::WaitForInput))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        fn id(&self) -> &str {
            "broken"
        }

        async fn run(&self, _context: Context) -> graph_flow::Result<TaskResult> {
            Err(GraphError::TaskExecutionFailed("boom".to_string()))
        }
    }

    fn fixed(id: &str, action: fn() -> NextAction) -> Stage {
        Stage::new(
            Arc::new(FixedTask {
                id: id.to_string(),
                action,
            }),
            vec![ContextKeys::output(id, "value")],
        )
    }

    fn gate() -> Stage {
        Stage::new(Arc::new(GateTask), vec![ContextKeys::output("gate", "value")])
    }

    #[tokio::test]
    async fn test_linear_run_collects_outputs() {
        let pipeline = StagePipeline::new(
            "search",
            vec![fixed("a", || NextAction::Continue), fixed("b", || NextAction::Continue)],
        );
        let sink = VecProgressSink::new();
        let mut team = TeamState::new("search");

        let outcome = pipeline.run(BTreeMap::new(), 0, &mut team, "r", &sink).await;
        let PipelineOutcome::Finished { memory } = outcome else {
            panic!("expected finished");
        };
        assert_eq!(memory["a.output.value"], "a");
        assert_eq!(memory["b.output.value"], "b");
        assert_eq!(team.step_progress[&1].status, StepStatus::Completed);
        assert_eq!(sink.of_type("step_progress").len(), 4);
    }

    #[tokio::test]
    async fn test_goto_skips_and_end_stops() {
        let pipeline = StagePipeline::new(
            "search",
            vec![
                fixed("route", || NextAction::GoTo("finalize".to_string())),
                fixed("search", || NextAction::Continue),
                fixed("finalize", || NextAction::End),
                fixed("never", || NextAction::Continue),
            ],
        );
        let mut team = TeamState::new("search");
        let outcome = pipeline
            .run(BTreeMap::new(), 0, &mut team, "r", &VecProgressSink::new())
            .await;

        let PipelineOutcome::Finished { memory } = outcome else {
            panic!("expected finished");
        };
        assert!(!memory.contains_key("search.output.value"));
        assert_eq!(team.step_progress[&1].status, StepStatus::Skipped);
        assert_eq!(team.step_progress[&3].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_suspend_then_resume_from_continuation() {
        let build = || {
            StagePipeline::new(
                "document",
                vec![fixed("plan", || NextAction::Continue), gate(), fixed("render", || NextAction::Continue)],
            )
        };
        let mut team = TeamState::new("document");
        let outcome = build()
            .run(BTreeMap::new(), 0, &mut team, "r", &VecProgressSink::new())
            .await;
        let PipelineOutcome::Suspended { continuation, interrupt } = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(continuation.stage_index, 1);
        assert_eq!(interrupt["draft"], "d");
        assert_eq!(team.step_progress[&1].status, StepStatus::Suspended);

        // a fresh pipeline instance resumes from the persisted continuation
        let mut seed = continuation.memory.clone();
        seed.insert(resume_key("gate"), Value::from("approve"));
        let outcome = build()
            .run(seed, continuation.stage_index, &mut team, "r", &VecProgressSink::new())
            .await;
        let PipelineOutcome::Finished { memory } = outcome else {
            panic!("expected finished");
        };
        assert_eq!(memory["plan.output.value"], "plan");
        assert_eq!(memory["gate.output.value"], "approve");
        assert_eq!(memory["render.output.value"], "render");
    }

    #[tokio::test]
    async fn test_stage_error_fails_pipeline() {
        let pipeline = StagePipeline::new(
            "analysis",
            vec![fixed("a", || NextAction::Continue), Stage::new(Arc::new(FailingTask), vec![])],
        );
        let mut team = TeamState::new("analysis");
        let outcome = pipeline
            .run(BTreeMap::new(), 0, &mut team, "r", &VecProgressSink::new())
            .await;

        let PipelineOutcome::Failed { stage_id, error, memory } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(stage_id, "broken");
        assert!(error.contains("boom"));
        assert!(memory.contains_key("a.output.value"));
        assert_eq!(team.step_progress[&1].status, StepStatus::Failed);
    }
}
