//! Query analysis
//!
//! Pulls structured hints out of a free-text legal question: law names,
//! article numbers, a document-type preference and topic tags.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DocType, SearchFilter};

/// Topic tags that boost matching documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    TenantProtection,
    Tax,
}

impl Topic {
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Topic::TenantProtection => &[
                "임차인", "세입자", "대항력", "우선변제", "보증금", "계약갱신", "확정일자", "전세사기",
            ],
            Topic::Tax => &["세금", "양도세", "양도소득세", "취득세", "재산세", "종부세", "종합부동산세", "비과세"],
        }
    }

    const ALL: [Topic; 2] = [Topic::TenantProtection, Topic::Tax];
}

/// Common words ending in 법 that are not statute names
const NOT_LAW_NAMES: &[&str] = &["방법", "불법", "편법", "합법", "위법", "해법", "문법", "수법"];

/// Structured hints found in a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub law_names: Vec<String>,
    pub article_numbers: Vec<String>,
    pub doc_type: Option<DocType>,
    pub topics: Vec<Topic>,
}

impl QueryAnalysis {
    /// Strictest filter the hints support
    pub fn to_filter(&self) -> SearchFilter {
        SearchFilter {
            law_title: self.law_names.first().cloned(),
            article_number: self.article_numbers.first().cloned(),
            doc_type: self.doc_type,
            ..Default::default()
        }
    }

    pub fn is_structured(&self) -> bool {
        !self.law_names.is_empty() || !self.article_numbers.is_empty() || self.doc_type.is_some()
    }
}

/// Compiled query patterns
pub struct QueryAnalyzer {
    article: Regex,
    law_name: Regex,
}

impl QueryAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // 제7조, 제 3 조, 제6조의3
            article: Regex::new(r"제\s*(\d+)\s*조(?:의\s*(\d+))?")?,
            // 주택임대차보호법, 주택임대차보호법 시행령, 민법
            law_name: Regex::new(r"([가-힣]+법)(?:\s*(시행령|시행규칙))?")?,
        })
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let mut analysis = QueryAnalysis::default();

        for caps in self.article.captures_iter(query) {
            let number = match (caps.get(1), caps.get(2)) {
                (Some(main), Some(sub)) => format!("{}의{}", main.as_str(), sub.as_str()),
                (Some(main), None) => main.as_str().to_string(),
                _ => continue,
            };
            if !analysis.article_numbers.contains(&number) {
                analysis.article_numbers.push(number);
            }
        }

        for caps in self.law_name.captures_iter(query) {
            let Some(base) = caps.get(1).filter(|b| !NOT_LAW_NAMES.contains(&b.as_str())) else {
                continue;
            };
            let name = match caps.get(2) {
                Some(suffix) => format!("{} {}", base.as_str(), suffix.as_str()),
                None => base.as_str().to_string(),
            };
            if !analysis.law_names.contains(&name) {
                analysis.law_names.push(name);
            }
        }

        analysis.doc_type = doc_type_hint(query);
        analysis.topics = Topic::ALL
            .iter()
            .copied()
            .filter(|topic| topic.keywords().iter().any(|k| query.contains(k)))
            .collect();
        analysis
    }
}

fn doc_type_hint(query: &str) -> Option<DocType> {
    if query.contains("시행규칙") {
        Some(DocType::Rule)
    } else if query.contains("시행령") {
        Some(DocType::Decree)
    } else if query.contains("판례") || query.contains("판결") {
        Some(DocType::Precedent)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(query: &str) -> QueryAnalysis {
        QueryAnalyzer::new().unwrap().analyze(query)
    }

    #[test]
    fn test_law_and_article() {
        let analysis = analyze("주택임대차보호법 제7조 차임 증액 한도는?");
        assert_eq!(analysis.law_names, vec!["주택임대차보호법"]);
        assert_eq!(analysis.article_numbers, vec!["7"]);
        assert_eq!(analysis.doc_type, None);

        let filter = analysis.to_filter();
        assert_eq!(filter.law_title.as_deref(), Some("주택임대차보호법"));
        assert_eq!(filter.article_number.as_deref(), Some("7"));
    }

    #[test]
    fn test_decree_suffix_and_sub_article() {
        let analysis = analyze("주택임대차보호법 시행령 제 8 조의2 내용");
        assert_eq!(analysis.law_names, vec!["주택임대차보호법 시행령"]);
        assert_eq!(analysis.article_numbers, vec!["8의2"]);
        assert_eq!(analysis.doc_type, Some(DocType::Decree));
    }

    #[test]
    fn test_topics() {
        let analysis = analyze("세입자 보증금 돌려받을 때 양도세도 내나요");
        assert_eq!(analysis.topics, vec![Topic::TenantProtection, Topic::Tax]);
        assert!(!analysis.is_structured());
        assert!(analyze("날씨 어때").topics.is_empty());
        assert!(analyze("계산 방법 알려줘").law_names.is_empty());
    }
}
