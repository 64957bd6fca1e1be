//! Interrupt payloads and resume commands for the approval gate

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, Result};

/// Payload handed to the caller while a run is suspended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub team: String,
    /// Stage that suspended
    pub node_name: String,
    /// Stage-provided data (draft, counts, allowed actions)
    pub data: Value,
}

impl InterruptPayload {
    pub fn new(team: impl Into<String>, node_name: impl Into<String>, data: Value) -> Self {
        Self {
            team: team.into(),
            node_name: node_name.into(),
            data,
        }
    }

    /// Wire form: the stage data plus `_metadata.node_name`
    pub fn to_value(&self) -> Value {
        let mut value = match &self.data {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => json!({}),
            other => json!({ "data": other }),
        };
        if let Value::Object(map) = &mut value {
            map.insert(
                "_metadata".to_string(),
                json!({"node_name": self.node_name, "team": self.team}),
            );
        }
        value
    }
}

/// Decision a human returns for a suspended draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    Approve,
    Modify,
    Reject,
}

impl ResumeAction {
    pub const ALL: [&'static str; 3] = ["approve", "modify", "reject"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeAction::Approve => "approve",
            ResumeAction::Modify => "modify",
            ResumeAction::Reject => "reject",
        }
    }
}

/// Validated resume value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub action: ResumeAction,
    #[serde(default)]
    pub modifications: Vec<String>,
}

impl ResumeCommand {
    pub fn approve() -> Self {
        Self {
            action: ResumeAction::Approve,
            modifications: Vec::new(),
        }
    }

    /// Parse and validate `{action, modifications?}`
    ///
    /// `modifications` may be a string or a list of strings and is required
    /// for `modify`.
    pub fn parse(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(EngineError::InvalidResumePayload("expected an object".to_string()));
        };
        let action = match map.get("action").and_then(Value::as_str) {
            Some("approve") => ResumeAction::Approve,
            Some("modify") => ResumeAction::Modify,
            Some("reject") => ResumeAction::Reject,
            Some(other) => {
                return Err(EngineError::InvalidResumePayload(format!(
                    "unknown action '{}', expected one of {:?}",
                    other,
                    ResumeAction::ALL
                )))
            }
            None => {
                return Err(EngineError::InvalidResumePayload(
                    "missing string field 'action'".to_string(),
                ))
            }
        };

        let modifications = match map.get("modifications") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(text)) => vec![text.clone()],
            Some(Value::Array(items)) => {
                let mut texts = Vec::with_capacity(items.len());
                for item in items {
                    let Some(text) = item.as_str() else {
                        return Err(EngineError::InvalidResumePayload(
                            "modifications must be strings".to_string(),
                        ));
                    };
                    texts.push(text.to_string());
                }
                texts
            }
            Some(_) => {
                return Err(EngineError::InvalidResumePayload(
                    "modifications must be a string or a list of strings".to_string(),
                ))
            }
        };

        let modifications: Vec<String> = modifications
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if action == ResumeAction::Modify && modifications.is_empty() {
            return Err(EngineError::InvalidResumePayload(
                "modify requires non-empty modifications".to_string(),
            ));
        }

        Ok(Self {
            action,
            modifications,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_node_name() {
        let payload = InterruptPayload::new("document", "aggregate", json!({"draft": "..."}));
        let value = payload.to_value();
        assert_eq!(value["draft"], "...");
        assert_eq!(value["_metadata"]["node_name"], "aggregate");
    }

    #[test]
    fn test_parse_valid_commands() {
        assert_eq!(
            ResumeCommand::parse(&json!({"action": "approve"})).unwrap(),
            ResumeCommand::approve()
        );
        let modify = ResumeCommand::parse(&json!({"action": "modify", "modifications": "보증금 5천만원"})).unwrap();
        assert_eq!(modify.modifications, vec!["보증금 5천만원"]);
        let list = ResumeCommand::parse(&json!({"action": "modify", "modifications": ["a", " b "]})).unwrap();
        assert_eq!(list.modifications, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            json!("approve"),
            json!({}),
            json!({"action": "delete"}),
            json!({"action": "modify"}),
            json!({"action": "modify", "modifications": [1, 2]}),
            json!({"action": "approve", "modifications": 3}),
        ] {
            let err = ResumeCommand::parse(&bad).unwrap_err();
            assert!(err.is_resume_rejection(), "accepted {}", bad);
        }
    }
}
