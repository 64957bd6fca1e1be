//! In-memory record tools for market prices and loan products

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use query_engine::state::ToolResponse;
use query_engine::{EngineError, Result};

use super::RetrievalTool;

/// Keyword search over a fixed list of JSON records
///
/// A record matches when any of its string fields contains a query term.
/// `params.region` narrows records that carry a `region` field.
pub struct RecordSearchTool {
    name: String,
    description: String,
    records: Vec<Value>,
    limit: usize,
}

impl RecordSearchTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            records,
            limit: query_engine::constants::defaults::TOOL_RESULT_LIMIT,
        }
    }

    /// `market_data`: transaction and lease prices by region
    pub fn market_data(records: Vec<Value>) -> Self {
        Self::new("market_data", "지역별 매매·전세 시세", records)
    }

    /// `loan_data`: loan products and rates
    pub fn loan_data(records: Vec<Value>) -> Self {
        Self::new("loan_data", "주택담보·전세자금 대출 상품", records)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Load records from a JSON array file
    pub async fn from_json_file(
        name: impl Into<String>,
        description: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let records = match serde_json::from_str::<Value>(&content)? {
            Value::Array(records) => records,
            _ => {
                return Err(EngineError::Config(format!(
                    "{}: expected a JSON array of records",
                    path.display()
                )))
            }
        };
        log::info!("Loaded {} records from {:?}", records.len(), path);
        Ok(Self::new(name, description, records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn terms(query: &str, params: &Value) -> Vec<String> {
        let mut terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.trim_end_matches(['?', '.', ',', '!']).to_string())
            .filter(|t| t.chars().count() >= 2)
            .collect();
        if let Some(keywords) = params.get("keywords").and_then(Value::as_array) {
            terms.extend(keywords.iter().filter_map(Value::as_str).map(str::to_string));
        }
        terms.sort();
        terms.dedup();
        terms
    }
}

fn record_text(record: &Value) -> String {
    match record {
        Value::Object(map) => map
            .values()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        Value::String(text) => text.clone(),
        _ => String::new(),
    }
}

#[async_trait]
impl RetrievalTool for RecordSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn search(&self, query: &str, params: &Value) -> ToolResponse {
        let terms = Self::terms(query, params);
        let region = params.get("region").and_then(Value::as_str);
        let broaden = params.get("broaden").and_then(Value::as_bool).unwrap_or(false);

        let data: Vec<Value> = self
            .records
            .iter()
            .filter(|record| {
                match (region, record.get("region").and_then(Value::as_str)) {
                    (Some(r), Some(value)) => value.contains(r) || r.contains(value),
                    _ => true,
                }
            })
            .filter(|record| {
                let text = record_text(record);
                broaden || terms.iter().any(|t| text.contains(t.as_str()))
            })
            .take(self.limit)
            .cloned()
            .collect();

        ToolResponse::success(data).with_metadata("terms", json!(terms))
    }
}
