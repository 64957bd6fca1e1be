//! Supervisor
//!
//! The top-level graph of a run:
//!
//! ```text
//! Planning -> Orchestrating -> Teams{0} -> Teams{1} -> ... -> Aggregating -> Finished
//!     \_______________________________________________________/  (empty plan)
//! ```
//!
//! The state and graph position are checkpointed after every transition.
//! A team may park the run at an approval gate; `resume` picks it up again
//! from the checkpoint, in this process or another one.

mod aggregate;
mod router;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Map, Value};

use crate::checkpoint::{CheckpointStore, GraphPosition, PersistedCheckpoint};
use crate::config::{EngineConfig, PlanValidationMode, RoutingMode, SupervisorConfig};
use crate::error::{EngineError, Result};
use crate::events::{emit, ProgressEvent, ProgressSink};
use crate::intent::classify_by_keywords;
use crate::interrupt::{InterruptPayload, ResumeCommand};
use crate::llm::LanguageModel;
use crate::orchestrator::{Orchestrator, StatisticsStore};
use crate::pipeline::TeamContinuation;
use crate::plan::ErrorPolicy;
use crate::planner::{Planner, PlanningContext};
use crate::registry::CapabilityRegistry;
use crate::state::{
    ChatTurn, RunStatus, SharedState, TeamState, TeamStatus, REUSE_PREVIOUS_DATA,
};
use crate::team::{TeamExecutor, TeamOutcome, TeamRequest, TeamResume};

pub use aggregate::{guidance_response, summary_value, template_response};
pub use router::{after_layer, after_planning, keyword_plan, keyword_team};

/// A new request
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Conversation key; a fresh one is generated when absent
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub query: String,
    pub history: Vec<ChatTurn>,
    pub entities: Map<String, Value>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn reuse_previous_data(mut self) -> Self {
        self.entities
            .insert(REUSE_PREVIOUS_DATA.to_string(), Value::Bool(true));
        self
    }
}

/// How a `run` or `resume` call ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Reached the end of the graph; `state.status` is Completed or Failed
    Finished(SharedState),
    /// Parked at an approval gate; call `resume` with the session id
    Suspended {
        interrupt: Value,
        state: SharedState,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &SharedState {
        match self {
            RunOutcome::Finished(state) => state,
            RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// Result of running one plan layer
enum LayerResult {
    Next,
    Suspended(GraphPosition, InterruptPayload),
    RolledBack,
}

/// Runs the planning, orchestration, team and aggregation nodes
pub struct Supervisor {
    planner: Planner,
    orchestrator: Orchestrator,
    model: Arc<dyn LanguageModel>,
    registry: Arc<CapabilityRegistry>,
    executor: Arc<dyn TeamExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ProgressSink>,
    config: EngineConfig,
}

impl Supervisor {
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn LanguageModel>,
        registry: Arc<CapabilityRegistry>,
        executor: Arc<dyn TeamExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        statistics: Arc<dyn StatisticsStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let planner = Planner::new(model.clone(), registry.clone(), config.planner.clone());
        let orchestrator = Orchestrator::new(
            model.clone(),
            registry.clone(),
            statistics,
            sink.clone(),
            config.orchestrator.clone(),
        );
        Self {
            planner,
            orchestrator,
            model,
            registry,
            executor,
            checkpoints,
            sink,
            config,
        }
    }

    fn supervisor_config(&self) -> &SupervisorConfig {
        &self.config.supervisor
    }

    /// Start a new run
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
        let mut state = SharedState::new(session_id.clone(), request.query.clone());
        state.user_id = request.user_id.clone();
        state.history = request.history.clone();
        state.entities = request.entities.clone();

        if let Some(previous) = self.checkpoints.get(&session_id).await? {
            self.carry_over(&mut state, previous);
        }

        log::info!("Supervisor: run {} started for session {}", state.run_id, session_id);
        emit(
            self.sink.as_ref(),
            ProgressEvent::RunStarted {
                run_id: state.run_id.clone(),
                session_id: session_id.clone(),
                query: state.query.clone(),
            },
        );
        self.checkpoint(&state, &GraphPosition::Planning, None).await?;
        self.drive(state, GraphPosition::Planning, None).await
    }

    /// Continue a suspended run with `{action, modifications?}`
    ///
    /// Unknown sessions, runs with no outstanding suspension and malformed
    /// values are rejected without touching the checkpoint.
    pub async fn resume(&self, session_id: &str, value: Value) -> Result<RunOutcome> {
        let checkpoint = self
            .checkpoints
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        let (team, layer, continuation, progress) = match (&checkpoint.position, &checkpoint.pending_interrupt) {
            (
                GraphPosition::Suspended {
                    team,
                    layer,
                    continuation,
                    progress,
                },
                Some(_),
            ) => (team.clone(), *layer, continuation.clone(), progress.clone()),
            _ => return Err(EngineError::NoPendingInterrupt(session_id.to_string())),
        };
        let command = ResumeCommand::parse(&value)?;

        let mut state = checkpoint.state;
        state.status = RunStatus::Running;
        state.touch();
        log::info!(
            "Supervisor: resuming session {} at {}/{} with {}",
            session_id,
            team,
            continuation.stage_id,
            command.action.as_str()
        );
        emit(
            self.sink.as_ref(),
            ProgressEvent::Resumed {
                run_id: state.run_id.clone(),
                session_id: session_id.to_string(),
                action: command.action.as_str().to_string(),
            },
        );

        let resume = PendingResume {
            team,
            progress,
            resume: TeamResume {
                continuation,
                command,
            },
        };
        self.drive(state, GraphPosition::Teams { layer }, Some(resume)).await
    }

    /// Bring conversation facts from the session's previous run
    fn carry_over(&self, state: &mut SharedState, previous: PersistedCheckpoint) {
        if previous.position.is_suspended() {
            log::warn!(
                "Supervisor: session {} had an outstanding suspension; starting over",
                state.session_id
            );
        }
        let mut history = previous.state.history;
        history.push(ChatTurn {
            role: "user".to_string(),
            content: previous.state.query,
        });
        if let Some(response) = previous.state.final_response {
            history.push(ChatTurn {
                role: "assistant".to_string(),
                content: response.content,
            });
        }
        history.extend(std::mem::take(&mut state.history));
        state.history = history;

        if state.reuse_previous_data() {
            if let Some(search) = previous.state.team_results.get(crate::constants::teams::SEARCH) {
                state.team_results.insert(crate::constants::teams::SEARCH.to_string(), search.clone());
            }
        }
    }

    /// Walk the graph from `position` until the run finishes or parks
    async fn drive(
        &self,
        mut state: SharedState,
        mut position: GraphPosition,
        mut resume: Option<PendingResume>,
    ) -> Result<RunOutcome> {
        loop {
            position = match position {
                GraphPosition::Planning => self.planning_node(&mut state).await?,
                GraphPosition::Orchestrating => {
                    state = self.orchestrator.orchestrate(state).await;
                    GraphPosition::Teams { layer: 0 }
                }
                GraphPosition::Teams { layer } => {
                    match self.teams_node(&mut state, layer, resume.take()).await {
                        LayerResult::Next => {
                            let layer_count = state
                                .plan
                                .as_ref()
                                .map(|p| p.layers().0.len())
                                .unwrap_or(0);
                            after_layer(layer, layer_count)
                        }
                        LayerResult::RolledBack => GraphPosition::Aggregating,
                        LayerResult::Suspended(parked, interrupt) => {
                            state.status = RunStatus::Suspended;
                            state.touch();
                            self.checkpoint(&state, &parked, Some(interrupt.clone())).await?;
                            emit(
                                self.sink.as_ref(),
                                ProgressEvent::Interrupted {
                                    run_id: state.run_id.clone(),
                                    session_id: state.session_id.clone(),
                                    team: interrupt.team.clone(),
                                    node_name: interrupt.node_name.clone(),
                                },
                            );
                            log::info!(
                                "Supervisor: session {} suspended at {}/{}",
                                state.session_id,
                                interrupt.team,
                                interrupt.node_name
                            );
                            return Ok(RunOutcome::Suspended {
                                interrupt: interrupt.to_value(),
                                state,
                            });
                        }
                    }
                }
                GraphPosition::Aggregating => {
                    self.aggregation_node(&mut state).await;
                    GraphPosition::Finished
                }
                GraphPosition::Finished => {
                    emit(
                        self.sink.as_ref(),
                        ProgressEvent::RunFinished {
                            run_id: state.run_id.clone(),
                            status: state.status,
                            error: state.error.clone(),
                        },
                    );
                    log::info!("Supervisor: run {} finished ({:?})", state.run_id, state.status);
                    return Ok(RunOutcome::Finished(state));
                }
                GraphPosition::Suspended { .. } => {
                    return Err(EngineError::Checkpoint(
                        "cannot drive a suspended position without a resume".to_string(),
                    ))
                }
            };
            self.checkpoint(&state, &position, None).await?;
        }
    }

    async fn planning_node(&self, state: &mut SharedState) -> Result<GraphPosition> {
        let context = PlanningContext::from_state(state);
        let (intent, mut plan, errors) = match self.supervisor_config().routing_mode {
            RoutingMode::Keyword => {
                let intent = classify_by_keywords(&state.query);
                let plan = keyword_plan(&intent, &self.registry, &self.config.planner);
                let (_, errors) = self.planner.validate(&plan);
                (intent, plan, errors)
            }
            RoutingMode::PlanDriven => {
                let outcome = self.planner.plan(&state.query, &context).await;
                (outcome.intent, outcome.plan, outcome.validation_errors)
            }
        };
        plan.error_policy = self.supervisor_config().error_policy;

        emit(
            self.sink.as_ref(),
            ProgressEvent::PlanReady {
                run_id: state.run_id.clone(),
                intent: intent.intent_type.to_string(),
                confidence: intent.confidence,
                teams: plan.teams(),
            },
        );
        let next = after_planning(&plan);
        for (key, value) in &intent.entities {
            state.entities.entry(key.clone()).or_insert_with(|| value.clone());
        }
        state.intent = Some(intent);
        state.plan = Some(plan);
        state.touch();

        if !errors.is_empty() {
            match self.supervisor_config().validation_mode {
                PlanValidationMode::Enforce => {
                    state.status = RunStatus::Failed;
                    state.error = Some(format!("Plan validation failed: {}", errors.join("; ")));
                    self.checkpoint(state, &GraphPosition::Finished, None).await?;
                    return Err(EngineError::PlanValidation(errors));
                }
                PlanValidationMode::Advisory => {
                    log::warn!("Supervisor: running plan despite validation errors: {}", errors.join("; "));
                }
            }
        }
        Ok(next)
    }

    async fn teams_node(
        &self,
        state: &mut SharedState,
        layer: usize,
        resume: Option<PendingResume>,
    ) -> LayerResult {
        let Some(plan) = state.plan.clone() else {
            return LayerResult::Next;
        };
        let (layers, leftover) = plan.layers();

        if layer == 0 && resume.is_none() {
            for step_id in leftover {
                self.skip(state, &step_id, "unresolvable dependencies");
            }
        }
        let Some(step_ids) = layers.get(layer) else {
            return LayerResult::Next;
        };

        let mut requests = Vec::new();
        for step_id in step_ids {
            let Some(step) = plan.step(step_id) else {
                continue;
            };
            let resuming = resume.as_ref().filter(|r| r.team == step.team);
            if state.is_team_done(&step.team) && resuming.is_none() {
                continue;
            }
            if resume.is_some() && resuming.is_none() {
                // teams of a parked layer already finished before the suspension
                continue;
            }
            if plan.error_policy == ErrorPolicy::Stop {
                let blocked = step
                    .dependencies
                    .iter()
                    .find(|d| state.failed_teams.contains(*d) || state.skipped_teams.contains(*d));
                if let Some(blocked) = blocked {
                    let reason = format!("dependency {} did not complete", blocked);
                    self.skip(state, &step.team, &reason);
                    continue;
                }
            }

            state.begin_team(&step.team);
            emit(
                self.sink.as_ref(),
                ProgressEvent::TeamStarted {
                    run_id: state.run_id.clone(),
                    team: step.team.clone(),
                },
            );
            requests.push(TeamRequest {
                run_id: state.run_id.clone(),
                step: step.clone(),
                state: state.clone(),
                previous: resuming.map(|r| r.progress.clone()),
                resume: resuming.map(|r| r.resume.clone()),
            });
        }

        let outcomes = join_all(requests.into_iter().map(|request| self.dispatch(request))).await;

        let mut parked: Option<(GraphPosition, InterruptPayload)> = None;
        for (team, outcome) in outcomes {
            let team_state = match outcome {
                Ok(TeamOutcome::Finished(team_state)) => team_state,
                Ok(TeamOutcome::Suspended {
                    progress,
                    interrupt,
                    continuation,
                }) => {
                    if parked.is_none() {
                        parked = Some(self.park(&team, layer, progress, continuation, interrupt));
                        continue;
                    }
                    log::warn!("Supervisor: {} suspended while another suspension is outstanding", team);
                    failed_team_state(progress, "only one suspension may be outstanding")
                }
                Err(e) => {
                    log::warn!("Supervisor: team {} failed: {}", team, e);
                    failed_team_state(TeamState::new(team.clone()), &e.to_string())
                }
            };

            let envelope = team_state.into_envelope();
            let failed = envelope.status == TeamStatus::Failed;
            emit(
                self.sink.as_ref(),
                ProgressEvent::TeamFinished {
                    run_id: state.run_id.clone(),
                    team: team.clone(),
                    status: envelope.status,
                    error: envelope.error().map(str::to_string),
                },
            );
            state.merge_team_result(&team, envelope.clone());
            *state = self.orchestrator.analyze_team_result(state.clone(), &team, &envelope).await;

            if failed && plan.error_policy == ErrorPolicy::Rollback {
                self.rollback(state, &team);
                return LayerResult::RolledBack;
            }
        }

        match parked {
            Some((position, interrupt)) => LayerResult::Suspended(position, interrupt),
            None => LayerResult::Next,
        }
    }

    fn park(
        &self,
        team: &str,
        layer: usize,
        progress: TeamState,
        continuation: TeamContinuation,
        interrupt: InterruptPayload,
    ) -> (GraphPosition, InterruptPayload) {
        (
            GraphPosition::Suspended {
                team: team.to_string(),
                layer,
                continuation,
                progress,
            },
            interrupt,
        )
    }

    /// Run one team with its step timeout, retrying transient errors
    async fn dispatch(&self, request: TeamRequest) -> (String, Result<TeamOutcome>) {
        let team = request.team().to_string();
        let timeout_secs = request.step.timeout_secs.max(1);
        let attempts = if request.resume.is_some() {
            1
        } else {
            request.step.retries + 1
        };

        let mut last_error = EngineError::team_failed(&team, "not attempted");
        for attempt in 1..=attempts {
            let call = self.executor.execute(request.clone(), self.sink.clone());
            match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
                Ok(Ok(outcome)) => return (team, Ok(outcome)),
                Ok(Err(e)) => {
                    log::warn!("Supervisor: {} attempt {}/{} failed: {}", team, attempt, attempts, e);
                    last_error = e;
                }
                Err(_) => {
                    log::warn!(
                        "Supervisor: {} attempt {}/{} timed out after {}s",
                        team,
                        attempt,
                        attempts,
                        timeout_secs
                    );
                    last_error = EngineError::team_failed(&team, format!("timed out after {}s", timeout_secs));
                }
            }
        }
        (team, Err(last_error))
    }

    fn skip(&self, state: &mut SharedState, team: &str, reason: &str) {
        log::info!("Supervisor: skipping {}: {}", team, reason);
        state.skipped_teams.insert(team.to_string());
        state.touch();
        emit(
            self.sink.as_ref(),
            ProgressEvent::TeamSkipped {
                run_id: state.run_id.clone(),
                team: team.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    /// Discard this run's results after a failure and skip the rest
    fn rollback(&self, state: &mut SharedState, failed_team: &str) {
        log::warn!("Supervisor: rolling back run {} after {} failed", state.run_id, failed_team);
        let remaining: BTreeSet<String> = state
            .plan
            .as_ref()
            .map(|p| p.teams())
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !state.is_team_done(t))
            .collect();
        for team in remaining {
            self.skip(state, &team, "rolled back");
        }
        state.team_results.retain(|team, _| team == failed_team);
        state.completed_teams.clear();
        state.status = RunStatus::Failed;
        state.error = Some(format!(
            "{}; run rolled back",
            state.error.clone().unwrap_or_else(|| format!("{} team failed", failed_team))
        ));
    }

    async fn aggregation_node(&self, state: &mut SharedState) {
        let empty_plan = state.plan.as_ref().map_or(true, |p| p.is_empty());
        let response = if empty_plan {
            guidance_response(state)
        } else {
            aggregate::synthesize(self.model.as_ref(), state).await
        };
        state.final_response = Some(response);
        if state.status != RunStatus::Failed {
            state.status = RunStatus::Completed;
        }
        state.touch();
    }

    async fn checkpoint(
        &self,
        state: &SharedState,
        position: &GraphPosition,
        interrupt: Option<InterruptPayload>,
    ) -> Result<()> {
        let checkpoint = PersistedCheckpoint::new(state.clone(), position.clone(), interrupt);
        self.checkpoints.put(&checkpoint).await?;
        log::debug!("Supervisor: checkpoint {} at {:?}", state.session_id, node_name(position));
        Ok(())
    }

    /// Latest checkpoint for a session
    pub async fn checkpoint_for(&self, session_id: &str) -> Result<Option<PersistedCheckpoint>> {
        self.checkpoints.get(session_id).await
    }
}

/// Resume data for the team parked in the checkpoint
struct PendingResume {
    team: String,
    progress: TeamState,
    resume: TeamResume,
}

fn failed_team_state(mut team_state: TeamState, error: &str) -> TeamState {
    team_state.status = TeamStatus::Failed;
    team_state.error = Some(error.to_string());
    team_state.finished_at = Some(crate::state::now_rfc3339());
    team_state
}

fn node_name(position: &GraphPosition) -> &'static str {
    match position {
        GraphPosition::Planning => "planning",
        GraphPosition::Orchestrating => "orchestrating",
        GraphPosition::Teams { .. } => "teams",
        GraphPosition::Aggregating => "aggregating",
        GraphPosition::Finished => "finished",
        GraphPosition::Suspended { .. } => "suspended",
    }
}
