//! Built-in corpus so the runner works without external data

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use hybrid_retrieval::{DocType, HybridRetriever, LegalDocument};
use query_engine::constants::defaults;
use query_engine::{EngineError, Result};
use team_nodes::{LegalSearchTool, RecordSearchTool, ToolRegistry};

fn statutes() -> Vec<LegalDocument> {
    const LEASE_ACT: &str = "주택임대차보호법";
    vec![
        LegalDocument::new(
            "hlpa-3",
            LEASE_ACT,
            "임대차는 그 등기가 없는 경우에도 임차인이 주택의 인도와 주민등록을 마친 때에는 그 다음 날부터 제삼자에 대하여 효력이 생긴다.",
        )
        .with_article("3", "대항력 등")
        .with_category("임차인 보호"),
        LegalDocument::new(
            "hlpa-3-2",
            LEASE_ACT,
            "대항요건과 임대차계약증서상의 확정일자를 갖춘 임차인은 경매 또는 공매 시 후순위권리자보다 우선하여 보증금을 변제받을 권리가 있다.",
        )
        .with_article("3의2", "보증금의 회수")
        .with_category("임차인 보호"),
        LegalDocument::new(
            "hlpa-4",
            LEASE_ACT,
            "기간을 정하지 아니하거나 2년 미만으로 정한 임대차는 그 기간을 2년으로 본다.",
        )
        .with_article("4", "임대차기간 등")
        .with_category("계약 기간"),
        LegalDocument::new(
            "hlpa-6-3",
            LEASE_ACT,
            "임대인은 임차인이 임대차기간이 끝나기 6개월 전부터 2개월 전까지 계약갱신을 요구할 경우 정당한 사유 없이 거절하지 못한다.",
        )
        .with_article("6의3", "계약갱신 요구 등")
        .with_category("계약 기간"),
        LegalDocument::new(
            "hlpa-7",
            LEASE_ACT,
            "차임이나 보증금의 증액청구는 약정한 차임이나 보증금의 20분의 1의 금액을 초과하지 못한다.",
        )
        .with_article("7", "차임 등의 증감청구권")
        .with_category("보증금"),
        LegalDocument::new(
            "hlpa-decree-10",
            "주택임대차보호법 시행령",
            "우선변제를 받을 임차인은 보증금이 서울특별시의 경우 1억6천5백만원 이하인 임차인으로 한다.",
        )
        .with_article("10", "보증금 중 일정액의 범위 등")
        .with_doc_type(DocType::Decree)
        .with_category("보증금"),
        LegalDocument::new(
            "civil-618",
            "민법",
            "임대차는 당사자 일방이 상대방에게 목적물을 사용, 수익하게 할 것을 약정하고 상대방이 이에 대하여 차임을 지급할 것을 약정함으로써 그 효력이 생긴다.",
        )
        .with_article("618", "임대차의 의의")
        .with_category("계약 일반"),
        LegalDocument::new(
            "precedent-2016da248998",
            "대법원 판례",
            "임차인이 대항력을 갖춘 후 임차주택이 양도된 경우 양수인은 임대인의 지위를 승계하며 보증금반환채무도 함께 이전된다.",
        )
        .with_doc_type(DocType::Precedent)
        .with_category("임차인 보호"),
    ]
}

fn market_records() -> Vec<Value> {
    vec![
        json!({"region": "서울 강남구", "complex": "래미안대치팰리스", "type": "아파트", "deal": "매매", "price": 3_150_000_000u64, "area_m2": 84.9}),
        json!({"region": "서울 강남구", "complex": "래미안대치팰리스", "type": "아파트", "deal": "전세", "price": 1_350_000_000u64, "area_m2": 84.9}),
        json!({"region": "서울 송파구", "complex": "헬리오시티", "type": "아파트", "deal": "매매", "price": 2_050_000_000u64, "area_m2": 84.9}),
        json!({"region": "서울 송파구", "complex": "헬리오시티", "type": "아파트", "deal": "전세", "price": 900_000_000u64, "area_m2": 84.9}),
        json!({"region": "서울 노원구", "complex": "상계주공7단지", "type": "아파트", "deal": "매매", "price": 620_000_000u64, "area_m2": 59.4}),
        json!({"region": "경기 성남시 분당구", "complex": "파크뷰", "type": "아파트", "deal": "매매", "price": 1_800_000_000u64, "area_m2": 84.0}),
    ]
}

fn loan_records() -> Vec<Value> {
    vec![
        json!({"product": "주택담보대출 혼합형", "lender": "시중은행", "rate": 3.9, "max_ltv": 70, "limit": 600_000_000u64}),
        json!({"product": "디딤돌 대출", "lender": "주택도시기금", "rate": 2.65, "max_ltv": 70, "limit": 250_000_000u64}),
        json!({"product": "버팀목 전세자금대출", "lender": "주택도시기금", "rate": 2.3, "max_ltv": 80, "limit": 120_000_000u64}),
        json!({"product": "전세자금대출 일반형", "lender": "시중은행", "rate": 4.1, "max_ltv": 80, "limit": 500_000_000u64}),
    ]
}

/// Legal retriever seeded with the built-in statutes
pub fn retriever() -> Result<HybridRetriever> {
    let retriever = HybridRetriever::in_memory().map_err(|e| EngineError::tool(e.to_string()))?;
    let count = retriever
        .add_documents(&statutes())
        .map_err(|e| EngineError::tool(e.to_string()))?;
    log::info!("Indexed {} legal documents", count);
    Ok(retriever)
}

async fn records_tool(
    path: Option<&Path>,
    name: &str,
    description: &str,
    fallback: fn() -> Vec<Value>,
) -> Result<RecordSearchTool> {
    match path {
        Some(path) => RecordSearchTool::from_json_file(name, description, path).await,
        None => Ok(RecordSearchTool::new(name, description, fallback())),
    }
}

/// Registry with `legal_search`, `market_data` and `loan_data`
///
/// Record files replace the built-in records when given.
pub async fn tools(market: Option<&Path>, loans: Option<&Path>, result_limit: usize) -> Result<ToolRegistry> {
    let limit = if result_limit == 0 {
        defaults::TOOL_RESULT_LIMIT
    } else {
        result_limit
    };
    let market = records_tool(market, "market_data", "지역별 매매·전세 시세", market_records).await?;
    let loans = records_tool(loans, "loan_data", "주택담보·전세자금 대출 상품", loan_records).await?;
    Ok(ToolRegistry::new()
        .with_tool(Arc::new(LegalSearchTool::new(Arc::new(retriever()?), limit)))
        .with_tool(Arc::new(market.with_limit(limit)))
        .with_tool(Arc::new(loans.with_limit(limit))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use team_nodes::RetrievalTool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builtin_tools() {
        let tools = tools(None, None, 0).await.unwrap();
        assert_eq!(tools.names(), vec!["legal_search", "loan_data", "market_data"]);

        let hits = retriever().unwrap().search("주택임대차보호법 제4조", 3).unwrap();
        assert_eq!(hits[0].document.doc_id, "hlpa-4");
    }

    #[tokio::test]
    async fn test_record_file_overrides_builtin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");
        std::fs::write(&path, r#"[{"region": "대구 수성구", "type": "아파트", "price": 900000000}]"#).unwrap();

        let tools = tools(Some(&path), None, 5).await.unwrap();
        let response = tools
            .get("market_data")
            .unwrap()
            .search("수성구 아파트", &json!({}))
            .await;
        assert_eq!(response.result_count, 1);
    }
}
