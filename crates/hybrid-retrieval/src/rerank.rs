//! Domain-aware reranking

use crate::query::QueryAnalysis;
use crate::types::{DocType, LegalDocument, SearchHit};

const ARTICLE_BONUS: f32 = 0.3;
const LAW_BONUS: f32 = 0.2;
const TOPIC_BONUS: f32 = 0.1;
const DELETED_PENALTY: f32 = 1.0;

/// Authority bonus per document type; statutes outrank commentary
pub fn doc_type_bonus(doc_type: DocType) -> f32 {
    match doc_type {
        DocType::Law => 0.1,
        DocType::Decree => 0.07,
        DocType::Rule => 0.05,
        DocType::Precedent => 0.03,
        DocType::Other => 0.0,
    }
}

/// Score adjustment for one document
pub fn rerank_bonus(doc: &LegalDocument, analysis: &QueryAnalysis) -> f32 {
    let mut bonus = doc_type_bonus(doc.doc_type);

    if let Some(number) = &doc.article_number {
        if analysis.article_numbers.iter().any(|a| a == number) {
            bonus += ARTICLE_BONUS;
        }
    }
    if analysis.law_names.iter().any(|law| law == &doc.law_title) {
        bonus += LAW_BONUS;
    }
    let text = format!("{} {}", doc.article_title.as_deref().unwrap_or_default(), doc.content);
    let topical = analysis
        .topics
        .iter()
        .any(|topic| topic.keywords().iter().any(|k| text.contains(k)));
    if topical {
        bonus += TOPIC_BONUS;
    }
    if doc.is_deleted {
        bonus -= DELETED_PENALTY;
    }
    bonus
}

/// Apply bonuses and sort best-first
pub fn rerank(mut hits: Vec<SearchHit>, analysis: &QueryAnalysis) -> Vec<SearchHit> {
    for hit in &mut hits {
        hit.score += rerank_bonus(&hit.document, analysis);
    }
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document.doc_id.cmp(&b.document.doc_id))
    });
    hits
}
