//! Intent labels and deterministic keyword classification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::teams;

/// Fixed set of request intents
///
/// Variant order is significant: keyword-score ties go to the earlier variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    LegalConsult,
    MarketInquiry,
    LoanConsult,
    ContractCreation,
    ContractReview,
    ComprehensiveAnalysis,
    RiskAnalysis,
    Unclear,
    Irrelevant,
}

impl IntentType {
    /// Intents that take part in keyword scoring, in tie-break order
    pub const SCORED: [IntentType; 7] = [
        IntentType::LegalConsult,
        IntentType::MarketInquiry,
        IntentType::LoanConsult,
        IntentType::ContractCreation,
        IntentType::ContractReview,
        IntentType::ComprehensiveAnalysis,
        IntentType::RiskAnalysis,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            IntentType::LegalConsult => &[
                "법", "법률", "임대차", "전세", "월세", "보증금", "계약갱신", "대항력",
                "확정일자", "임차인", "임대인", "조항", "권리",
            ],
            IntentType::MarketInquiry => &[
                "시세", "매매가", "실거래", "가격", "전세가", "시장", "동향", "아파트", "평당",
            ],
            IntentType::LoanConsult => &[
                "대출", "금리", "ltv", "dti", "dsr", "한도", "담보", "상환", "대출금",
            ],
            IntentType::ContractCreation => &["계약서 작성", "작성", "초안", "만들어", "서식"],
            IntentType::ContractReview => &["계약서 검토", "검토", "특약", "독소조항", "점검"],
            IntentType::ComprehensiveAnalysis => &["종합", "전반", "비교", "분석", "전체적"],
            IntentType::RiskAnalysis => &["위험", "리스크", "사기", "깡통", "안전"],
            IntentType::Unclear | IntentType::Irrelevant => &[],
        }
    }

    /// Pure information lookups that the Search team answers alone
    pub fn is_information_seeking(&self) -> bool {
        matches!(
            self,
            IntentType::LegalConsult | IntentType::MarketInquiry | IntentType::LoanConsult
        )
    }

    /// Hard-coded safe team mapping used when every model attempt failed
    pub fn default_teams(&self) -> Vec<String> {
        let names: &[&str] = match self {
            IntentType::LegalConsult | IntentType::MarketInquiry | IntentType::LoanConsult => {
                &[teams::SEARCH]
            }
            IntentType::ContractCreation => &[teams::SEARCH, teams::DOCUMENT],
            IntentType::ContractReview
            | IntentType::ComprehensiveAnalysis
            | IntentType::RiskAnalysis => &[teams::SEARCH, teams::ANALYSIS],
            IntentType::Unclear => &[teams::SEARCH],
            IntentType::Irrelevant => &[],
        };
        names.iter().map(|n| n.to_string()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::LegalConsult => "legal_consult",
            IntentType::MarketInquiry => "market_inquiry",
            IntentType::LoanConsult => "loan_consult",
            IntentType::ContractCreation => "contract_creation",
            IntentType::ContractReview => "contract_review",
            IntentType::ComprehensiveAnalysis => "comprehensive_analysis",
            IntentType::RiskAnalysis => "risk_analysis",
            IntentType::Unclear => "unclear",
            IntentType::Irrelevant => "irrelevant",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords that call for the Analysis team
pub const ANALYTICAL_KEYWORDS: &[&str] = &[
    "분석", "비교", "계산", "평가", "추천", "검토", "위험", "리스크", "예측", "전망", "판단",
];

/// Suffixes that mark a token as a place name
const REGION_SUFFIXES: &[&str] = &["시", "구", "군", "동", "읍", "면"];

/// Classified intent of a request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent_type: IntentType,
    pub confidence: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub suggested_teams: Vec<String>,
    /// Produced by keyword scoring rather than the model
    #[serde(default)]
    pub fallback: bool,
}

impl IntentResult {
    pub fn unclear(reasoning: impl Into<String>) -> Self {
        Self {
            intent_type: IntentType::Unclear,
            confidence: 0.0,
            keywords: Vec::new(),
            reasoning: reasoning.into(),
            entities: Map::new(),
            suggested_teams: Vec::new(),
            fallback: true,
        }
    }
}

/// Whether the query contains any analytical keyword
pub fn has_analytical_keyword(query: &str) -> bool {
    let lowered = query.to_lowercase();
    ANALYTICAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Keywords of `intent` found in the query
pub fn matched_keywords(query: &str, intent: IntentType) -> Vec<String> {
    let lowered = query.to_lowercase();
    intent
        .keywords()
        .iter()
        .filter(|k| lowered.contains(*k))
        .map(|k| k.to_string())
        .collect()
}

/// Deterministic keyword classification
///
/// Highest keyword overlap wins; ties go to the earlier intent; no overlap
/// at all yields `Unclear` with confidence 0.
pub fn classify_by_keywords(query: &str) -> IntentResult {
    let mut best: Option<(IntentType, Vec<String>)> = None;
    for intent in IntentType::SCORED {
        let matched = matched_keywords(query, intent);
        if matched.is_empty() {
            continue;
        }
        let better = match &best {
            Some((_, current)) => matched.len() > current.len(),
            None => true,
        };
        if better {
            best = Some((intent, matched));
        }
    }

    let Some((intent_type, keywords)) = best else {
        return IntentResult::unclear("no domain keyword matched");
    };

    let confidence = (0.3 + 0.15 * keywords.len() as f64).min(0.9);
    IntentResult {
        intent_type,
        confidence,
        reasoning: format!("keyword match: {}", keywords.join(", ")),
        keywords,
        entities: extract_entities(query),
        suggested_teams: intent_type.default_teams(),
        fallback: true,
    }
}

/// Pull place names out of the query
pub fn extract_entities(query: &str) -> Map<String, Value> {
    let regions: Vec<Value> = query
        .split_whitespace()
        .filter(|token| token.chars().count() >= 2)
        .filter(|token| REGION_SUFFIXES.iter().any(|s| token.ends_with(s)))
        .map(|token| Value::String(token.to_string()))
        .collect();

    let mut entities = Map::new();
    if !regions.is_empty() {
        entities.insert("regions".to_string(), Value::Array(regions));
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_keyword_is_unclear_zero() {
        let result = classify_by_keywords("hello");
        assert_eq!(result.intent_type, IntentType::Unclear);
        assert_eq!(result.confidence, 0.0);
        assert!(result.fallback);
    }

    #[test]
    fn test_highest_overlap_wins() {
        let result = classify_by_keywords("강남구 아파트 시세 확인하고 대출 가능 금액 계산해줘");
        assert_eq!(result.intent_type, IntentType::MarketInquiry);
        assert!(result.keywords.contains(&"시세".to_string()));
        assert_eq!(result.entities["regions"][0], "강남구");
    }

    #[test]
    fn test_tie_goes_to_earlier_intent() {
        // one legal keyword and one loan keyword
        let result = classify_by_keywords("임차인 금리");
        assert_eq!(result.intent_type, IntentType::LegalConsult);
    }

    #[test]
    fn test_analytical_keywords() {
        assert!(has_analytical_keyword("전세 위험 분석"));
        assert!(!has_analytical_keyword("전세 보증금 반환 법"));
    }

    #[test]
    fn test_default_teams() {
        assert_eq!(IntentType::ContractCreation.default_teams(), vec!["search", "document"]);
        assert!(IntentType::Irrelevant.default_teams().is_empty());
    }
}
