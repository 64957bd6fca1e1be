//! Retrieval tools
//!
//! Every data source the teams read from sits behind `RetrievalTool`, which
//! answers `search(query, params)` with a uniform `ToolResponse`.

mod legal;
mod records;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use query_engine::state::{ToolResponse, ToolRun, ToolStatus};

pub use legal::LegalSearchTool;
pub use records::RecordSearchTool;

/// Uniform retrieval contract
#[async_trait]
pub trait RetrievalTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Search with free text plus tool-specific `params`
    ///
    /// Implementations report problems in the response status instead of
    /// returning errors.
    async fn search(&self, query: &str, params: &Value) -> ToolResponse;
}

/// Tools by name; immutable once shared
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn RetrievalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn RetrievalTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn RetrievalTool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RetrievalTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

/// Call one tool with a timeout and record the outcome
pub async fn run_tool(registry: &ToolRegistry, name: &str, query: &str, params: &Value, timeout: Duration) -> ToolRun {
    let started = Instant::now();
    let Some(tool) = registry.get(name) else {
        return ToolRun {
            tool: name.to_string(),
            status: ToolStatus::Failed,
            result_count: 0,
            data: Vec::new(),
            elapsed_ms: 0,
            error: Some(format!("tool '{}' is not registered", name)),
        };
    };

    let response = match tokio::time::timeout(timeout, tool.search(query, params)).await {
        Ok(response) => response,
        Err(_) => ToolResponse::failed(format!("timed out after {}ms", timeout.as_millis())),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let error = match response.status {
        ToolStatus::Success => None,
        _ => Some(
            response
                .metadata
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("tool reported an error")
                .to_string(),
        ),
    };
    log::info!(
        "Tool {}: {:?} with {} results in {}ms",
        name,
        response.status,
        response.result_count,
        elapsed_ms
    );
    ToolRun {
        tool: name.to_string(),
        status: response.status,
        result_count: response.result_count,
        data: response.data,
        elapsed_ms,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl RetrievalTool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        async fn search(&self, _query: &str, _params: &Value) -> ToolResponse {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResponse::success(vec![json!({})])
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_run() {
        let registry = ToolRegistry::new().with_tool(Arc::new(SlowTool));
        let run = run_tool(&registry, "slow", "q", &json!({}), Duration::from_millis(20)).await;
        assert_eq!(run.status, ToolStatus::Failed);
        assert!(run.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_run() {
        let run = run_tool(&ToolRegistry::new(), "ghost", "q", &json!({}), Duration::from_secs(1)).await;
        assert_eq!(run.status, ToolStatus::Failed);
        assert_eq!(run.result_count, 0);
    }
}
