//! Query Engine - Planning and supervised team execution for Concierge
//!
//! This crate turns a natural-language real-estate request into a plan of
//! team steps and drives it to a final answer. It supports:
//!
//! - Intent classification and compound-request decomposition
//! - Dependency-aware execution plans with parallel layers
//! - Strategy and tool selection from learned per-user statistics
//! - Mid-run adjustment of pending teams from observed result quality
//! - Durable checkpoints with a human-in-the-loop approval gate
//!
//! # Architecture
//!
//! Team stages are graph-flow `Task`s run by a `StagePipeline`; the
//! supervisor is a state machine over `GraphPosition`:
//!
//! - `Planner`: intent, decomposition, plan building and validation
//! - `Orchestrator`: tool selection and quality-driven adjustment
//! - `Supervisor`: the top-level graph, checkpoints and `resume`
//! - `TeamExecutor`: seam to the team implementations
//!
//! # Example
//!
//! ```ignore
//! use query_engine::{RunRequest, Supervisor};
//!
//! let outcome = supervisor.run(RunRequest::new("강남구 전세 시세 알려줘")).await?;
//! if let RunOutcome::Suspended { interrupt, state } = outcome {
//!     supervisor.resume(&state.session_id, json!({"action": "approve"})).await?;
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod intent;
pub mod interrupt;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod team;
pub mod validation;

// Re-export key types
pub use checkpoint::{CheckpointStore, FileCheckpointStore, GraphPosition, InMemoryCheckpointStore, PersistedCheckpoint};
pub use config::{EngineConfig, PlanValidationMode, RoutingMode};
pub use error::{EngineError, Result};
pub use events::{NullProgressSink, ProgressEvent, ProgressSink, VecProgressSink};
pub use intent::{IntentResult, IntentType};
pub use interrupt::{InterruptPayload, ResumeAction, ResumeCommand};
pub use llm::{LanguageModel, ScriptedModel, UnavailableModel};
pub use orchestrator::{FileStatisticsStore, InMemoryStatisticsStore, Orchestrator, StatisticsStore};
pub use pipeline::{ContextKeys, PipelineOutcome, Stage, StagePipeline, TeamContinuation};
pub use plan::{ErrorPolicy, ExecutionPlan, ExecutionStep, ExecutionStrategy};
pub use planner::Planner;
pub use registry::{CapabilityRegistry, TeamCapabilities};
pub use state::{SharedState, TeamEnvelope, TeamResult, TeamState, TeamStatus};
pub use supervisor::{RunOutcome, RunRequest, Supervisor};
pub use team::{TeamExecutor, TeamOutcome, TeamRequest, TeamResume};

// Re-export graph-flow types that team stages need
pub use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
