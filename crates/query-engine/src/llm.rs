//! Language-model seam
//!
//! Every model call in the engine goes through `LanguageModel` by prompt
//! name. Callers always hold a deterministic fallback, so a model that
//! fails every call still yields a complete run.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Structured and free-text completion by prompt name
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt and parse the answer as JSON
    async fn complete_json(
        &self,
        prompt_name: &str,
        variables: &Value,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Value>;

    /// Complete a prompt and return the raw text
    async fn complete_text(
        &self,
        prompt_name: &str,
        variables: &Value,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Model that fails every call; runs use the deterministic fallbacks
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableModel;

#[async_trait]
impl LanguageModel for UnavailableModel {
    async fn complete_json(&self, prompt_name: &str, _: &Value, _: f32, _: u32) -> Result<Value> {
        Err(EngineError::model(format!("no model available for '{}'", prompt_name)))
    }

    async fn complete_text(&self, prompt_name: &str, _: &Value, _: f32, _: u32) -> Result<String> {
        Err(EngineError::model(format!("no model available for '{}'", prompt_name)))
    }
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Json(Value),
    Text(String),
    Fail(String),
}

/// Model answering from canned replies keyed by prompt name
///
/// Replies for one prompt are consumed in order; the last reply repeats.
/// Prompts with no scripted reply fail like `UnavailableModel`.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, prompt_name: &str, value: Value) -> Self {
        self.push(prompt_name, ScriptedReply::Json(value));
        self
    }

    pub fn with_text(self, prompt_name: &str, text: impl Into<String>) -> Self {
        self.push(prompt_name, ScriptedReply::Text(text.into()));
        self
    }

    pub fn with_failure(self, prompt_name: &str, message: impl Into<String>) -> Self {
        self.push(prompt_name, ScriptedReply::Fail(message.into()));
        self
    }

    /// Prompt names called so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, prompt_name: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == prompt_name).count()
    }

    fn push(&self, prompt_name: &str, reply: ScriptedReply) {
        self.replies
            .lock()
            .entry(prompt_name.to_string())
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, prompt_name: &str) -> Option<ScriptedReply> {
        self.calls.lock().push(prompt_name.to_string());
        let mut replies = self.replies.lock();
        let queue = replies.get_mut(prompt_name)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_json(&self, prompt_name: &str, _: &Value, _: f32, _: u32) -> Result<Value> {
        match self.next_reply(prompt_name) {
            Some(ScriptedReply::Json(value)) => Ok(value),
            Some(ScriptedReply::Text(text)) => serde_json::from_str(&text)
                .map_err(|e| EngineError::model(format!("'{}' returned non-JSON: {}", prompt_name, e))),
            Some(ScriptedReply::Fail(message)) => Err(EngineError::model(message)),
            None => Err(EngineError::model(format!("no scripted reply for '{}'", prompt_name))),
        }
    }

    async fn complete_text(&self, prompt_name: &str, _: &Value, _: f32, _: u32) -> Result<String> {
        match self.next_reply(prompt_name) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Json(value)) => Ok(value.to_string()),
            Some(ScriptedReply::Fail(message)) => Err(EngineError::model(message)),
            None => Err(EngineError::model(format!("no scripted reply for '{}'", prompt_name))),
        }
    }
}
