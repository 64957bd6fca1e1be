//! Legal document search over the hybrid retriever

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use hybrid_retrieval::HybridRetriever;
use query_engine::state::{ToolResponse, ToolStatus};

use super::RetrievalTool;

/// `legal_search`: statutes, decrees and precedents
pub struct LegalSearchTool {
    retriever: Arc<HybridRetriever>,
    limit: usize,
}

impl LegalSearchTool {
    pub const NAME: &'static str = "legal_search";

    pub fn new(retriever: Arc<HybridRetriever>, limit: usize) -> Self {
        Self {
            retriever,
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl RetrievalTool for LegalSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "주택임대차보호법 등 부동산 관련 법령·판례 검색"
    }

    async fn search(&self, query: &str, params: &Value) -> ToolResponse {
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(self.limit);
        let mut text = query.trim().to_string();
        if let Some(keywords) = params.get("keywords").and_then(Value::as_array) {
            for keyword in keywords.iter().filter_map(Value::as_str) {
                if !text.contains(keyword) {
                    text.push(' ');
                    text.push_str(keyword);
                }
            }
        }
        if text.is_empty() {
            return ToolResponse {
                status: ToolStatus::Error,
                data: Vec::new(),
                result_count: 0,
                metadata: serde_json::Map::from_iter([("error".to_string(), json!("empty query"))]),
            };
        }

        let retriever = self.retriever.clone();
        let joined = tokio::task::spawn_blocking(move || retriever.search(&text, limit)).await;
        let hits = match joined {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => return ToolResponse::failed(e.to_string()),
            Err(e) => return ToolResponse::failed(format!("search task panicked: {}", e)),
        };

        let data = hits
            .iter()
            .map(|hit| {
                json!({
                    "doc_id": hit.document.doc_id,
                    "citation": hit.document.citation(),
                    "law_title": hit.document.law_title,
                    "article_title": hit.document.article_title,
                    "doc_type": hit.document.doc_type,
                    "content": hit.document.content,
                    "score": hit.score,
                })
            })
            .collect();
        let level = hits.first().map(|h| h.filter_level);
        ToolResponse::success(data).with_metadata("filter_level", json!(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_retrieval::LegalDocument;

    fn tool() -> LegalSearchTool {
        let retriever = HybridRetriever::in_memory().unwrap();
        retriever
            .add_document(
                &LegalDocument::new("lease-3", "주택임대차보호법", "임차인은 주택의 인도와 주민등록을 마친 때 대항력이 생긴다")
                    .with_article("3", "대항력 등"),
            )
            .unwrap();
        LegalSearchTool::new(Arc::new(retriever), 5)
    }

    #[tokio::test]
    async fn test_hits_become_records() {
        let response = tool().search("주택임대차보호법 제3조", &json!({})).await;
        assert_eq!(response.status, ToolStatus::Success);
        assert_eq!(response.result_count, 1);
        assert_eq!(response.data[0]["citation"], "주택임대차보호법 제3조");
        assert_eq!(response.metadata["filter_level"], "exact");
    }

    #[tokio::test]
    async fn test_empty_query_is_error_status() {
        let response = tool().search("  ", &json!({})).await;
        assert_eq!(response.status, ToolStatus::Error);
    }
}
