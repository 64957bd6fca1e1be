//! Document and search result types

use serde::{Deserialize, Serialize};

/// Kind of legal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// 법률
    #[default]
    Law,
    /// 시행령
    Decree,
    /// 시행규칙
    Rule,
    /// 판례
    Precedent,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Law => "law",
            DocType::Decree => "decree",
            DocType::Rule => "rule",
            DocType::Precedent => "precedent",
            DocType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "law" => DocType::Law,
            "decree" => DocType::Decree,
            "rule" => DocType::Rule,
            "precedent" => DocType::Precedent,
            _ => DocType::Other,
        }
    }
}

/// One indexed article or precedent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalDocument {
    pub doc_id: String,
    /// e.g. `주택임대차보호법`
    pub law_title: String,
    /// Article number without the `제`/`조` markers, e.g. `7`
    #[serde(default)]
    pub article_number: Option<String>,
    #[serde(default)]
    pub article_title: Option<String>,
    #[serde(default)]
    pub doc_type: DocType,
    #[serde(default)]
    pub category: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub enforcement_date: Option<String>,
}

impl LegalDocument {
    pub fn new(doc_id: impl Into<String>, law_title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            law_title: law_title.into(),
            article_number: None,
            article_title: None,
            doc_type: DocType::Law,
            category: None,
            content: content.into(),
            is_deleted: false,
            enforcement_date: None,
        }
    }

    pub fn with_article(mut self, number: impl Into<String>, title: impl Into<String>) -> Self {
        self.article_number = Some(number.into());
        self.article_title = Some(title.into());
        self
    }

    pub fn with_doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_type = doc_type;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Text fed to the embedder
    pub fn embedding_text(&self) -> String {
        let mut text = self.law_title.clone();
        if let Some(number) = &self.article_number {
            text.push_str(&format!(" 제{}조", number));
        }
        if let Some(title) = &self.article_title {
            text.push(' ');
            text.push_str(title);
        }
        text.push(' ');
        text.push_str(&self.content);
        text
    }

    /// Human-readable citation, e.g. `주택임대차보호법 제7조`
    pub fn citation(&self) -> String {
        match &self.article_number {
            Some(number) => format!("{} 제{}조", self.law_title, number),
            None => self.law_title.clone(),
        }
    }
}

/// Structured filter applied in the metadata store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub law_title: Option<String>,
    pub article_number: Option<String>,
    pub doc_type: Option<DocType>,
    pub category: Option<String>,
    pub include_deleted: bool,
}

impl SearchFilter {
    /// Whether any structured constraint is set
    pub fn is_constrained(&self) -> bool {
        self.law_title.is_some()
            || self.article_number.is_some()
            || self.doc_type.is_some()
            || self.category.is_some()
    }
}

/// How far the structured filter had to be relaxed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLevel {
    /// Every extracted constraint applied
    Exact,
    /// Article constraint dropped
    LawOnly,
    /// Only the document-type hint applied
    Relaxed,
    /// No structured candidates; ranked by vector similarity alone
    VectorOnly,
}

impl FilterLevel {
    /// Metadata component of the hybrid score
    pub fn metadata_score(&self) -> f32 {
        match self {
            FilterLevel::Exact => 1.0,
            FilterLevel::LawOnly => 0.6,
            FilterLevel::Relaxed => 0.3,
            FilterLevel::VectorOnly => 0.0,
        }
    }
}

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: LegalDocument,
    pub score: f32,
    pub vector_score: f32,
    pub metadata_score: f32,
    pub filter_level: FilterLevel,
}
