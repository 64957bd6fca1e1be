//! Collaborators shared by every team stage

use std::sync::Arc;
use std::time::Duration;

use graph_flow::{Context, GraphError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use query_engine::config::TeamsConfig;
use query_engine::constants::model;
use query_engine::{ContextKeys, LanguageModel};

use crate::tools::ToolRegistry;

/// Prefix of the keys the executor seeds before a pipeline starts
pub const TEAM: &str = "team";

/// Seed key `team.input.{port}`
pub fn team_input(port: &str) -> String {
    ContextKeys::input(TEAM, port)
}

/// Model, tools and settings handed to every stage
#[derive(Clone)]
pub struct TeamServices {
    pub model: Arc<dyn LanguageModel>,
    pub tools: Arc<ToolRegistry>,
    pub config: TeamsConfig,
}

impl TeamServices {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>, config: TeamsConfig) -> Self {
        Self { model, tools, config }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.tool_timeout_secs.max(1))
    }

    /// Structured model call; `None` when the call fails
    pub async fn ask_json(&self, prompt: &str, variables: &Value) -> Option<Value> {
        match self
            .model
            .complete_json(prompt, variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Model call '{}' failed, using fallback: {}", prompt, e);
                None
            }
        }
    }

    /// Free-text model call; `None` when the call fails or returns nothing
    pub async fn ask_text(&self, prompt: &str, variables: &Value) -> Option<String> {
        match self
            .model
            .complete_text(prompt, variables, model::TEMPERATURE, model::MAX_TOKENS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                log::warn!("Model call '{}' returned empty text, using fallback", prompt);
                None
            }
            Err(e) => {
                log::warn!("Model call '{}' failed, using fallback: {}", prompt, e);
                None
            }
        }
    }
}

/// Read a required context value
pub async fn require<T: DeserializeOwned>(context: &Context, key: &str) -> graph_flow::Result<T> {
    context
        .get::<T>(key)
        .await
        .ok_or_else(|| GraphError::TaskExecutionFailed(format!("Missing required input at key '{}'", key)))
}

/// Team adjustments written by the orchestrator
pub async fn adjustments(context: &Context) -> Map<String, Value> {
    context.get::<Map<String, Value>>(&team_input("adjustments")).await.unwrap_or_default()
}

/// Whether an adjustment flag is set
pub fn flag(adjustments: &Map<String, Value>, name: &str) -> bool {
    adjustments.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// String list from a JSON value, ignoring non-strings
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}
