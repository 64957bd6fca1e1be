//! Hybrid retriever
//!
//! Narrows candidates with the structured metadata filter, ranks them by
//! vector similarity, blends both signals and applies domain reranking.
//! When the strict filter matches nothing it is relaxed one constraint at a
//! time (article, then law); with no structured candidates at all the whole
//! index is ranked by similarity alone.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::query::{QueryAnalysis, QueryAnalyzer};
use crate::rerank::rerank;
use crate::types::{FilterLevel, LegalDocument, SearchFilter, SearchHit};
use crate::vector::{Embedder, HashingEmbedder, VectorIndex};

/// Blend weights and candidate limits
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub vector_weight: f32,
    pub metadata_weight: f32,
    /// Upper bound on structured candidates per query
    pub candidate_limit: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            metadata_weight: 0.3,
            candidate_limit: 200,
        }
    }
}

/// Metadata store + vector index + reranker
pub struct HybridRetriever {
    metadata: MetadataStore,
    index: RwLock<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    analyzer: QueryAnalyzer,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(metadata: MetadataStore, embedder: Arc<dyn Embedder>, config: RetrieverConfig) -> Result<Self> {
        Ok(Self {
            index: RwLock::new(VectorIndex::new(embedder.dimension())),
            metadata,
            embedder,
            analyzer: QueryAnalyzer::new()?,
            config,
        })
    }

    /// In-memory retriever with the hashing embedder
    pub fn in_memory() -> Result<Self> {
        Self::new(
            MetadataStore::in_memory()?,
            Arc::new(HashingEmbedder::default()),
            RetrieverConfig::default(),
        )
    }

    /// Store and embed one document
    pub fn add_document(&self, doc: &LegalDocument) -> Result<()> {
        let vector = self.embedder.embed(&doc.embedding_text())?;
        self.metadata.upsert(doc)?;
        self.index.write().upsert(doc.doc_id.clone(), vector)?;
        Ok(())
    }

    pub fn add_documents(&self, docs: &[LegalDocument]) -> Result<usize> {
        for doc in docs {
            self.add_document(doc)?;
        }
        log::info!("HybridRetriever: indexed {} documents", docs.len());
        Ok(docs.len())
    }

    pub fn document_count(&self) -> Result<usize> {
        self.metadata.count()
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        self.analyzer.analyze(query)
    }

    /// Best `limit` documents for `query`
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let analysis = self.analyzer.analyze(query);
        let (level, candidates) = self.candidates(&analysis)?;
        let query_vector = self.embedder.embed(query)?;

        let allowed: Option<HashSet<String>> = match level {
            FilterLevel::VectorOnly => None,
            _ => Some(candidates.iter().map(|d| d.doc_id.clone()).collect()),
        };
        let fetch = limit.saturating_mul(3);
        let ranked = self.index.read().search(&query_vector, fetch, allowed.as_ref())?;

        let metadata_score = level.metadata_score();
        let mut hits = Vec::with_capacity(ranked.len());
        for (doc_id, similarity) in ranked {
            let document = match candidates.iter().find(|d| d.doc_id == doc_id) {
                Some(doc) => doc.clone(),
                None => match self.metadata.get(&doc_id)? {
                    Some(doc) => doc,
                    None => continue,
                },
            };
            hits.push(SearchHit {
                score: self.config.vector_weight * similarity + self.config.metadata_weight * metadata_score,
                vector_score: similarity,
                metadata_score,
                filter_level: level,
                document,
            });
        }

        let mut hits = rerank(hits, &analysis);
        hits.truncate(limit);
        log::debug!(
            "HybridRetriever: '{}' -> {} hits at {:?}",
            query,
            hits.len(),
            level
        );
        Ok(hits)
    }

    /// Structured candidates, relaxing the filter until something matches
    fn candidates(&self, analysis: &QueryAnalysis) -> Result<(FilterLevel, Vec<LegalDocument>)> {
        let exact = analysis.to_filter();
        if !exact.is_constrained() {
            return Ok((FilterLevel::VectorOnly, Vec::new()));
        }

        let mut attempts = vec![(FilterLevel::Exact, exact.clone())];
        if exact.article_number.is_some() && exact.law_title.is_some() {
            attempts.push((
                FilterLevel::LawOnly,
                SearchFilter {
                    article_number: None,
                    ..exact.clone()
                },
            ));
        }
        if exact.doc_type.is_some() && (exact.law_title.is_some() || exact.article_number.is_some()) {
            attempts.push((
                FilterLevel::Relaxed,
                SearchFilter {
                    doc_type: exact.doc_type,
                    ..Default::default()
                },
            ));
        }

        for (level, filter) in attempts {
            let docs = self.metadata.filter(&filter, self.config.candidate_limit)?;
            if !docs.is_empty() {
                return Ok((level, docs));
            }
            log::debug!("HybridRetriever: no candidates at {:?}, relaxing", level);
        }
        Ok((FilterLevel::VectorOnly, Vec::new()))
    }

    /// Persist the vector index
    pub async fn save_index(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.index.read().clone();
        snapshot.save(path).await
    }

    /// Replace the vector index with a saved snapshot
    pub async fn load_index(&self, path: impl AsRef<Path>) -> Result<()> {
        let loaded = VectorIndex::load(path).await?;
        if loaded.dimension() != self.embedder.dimension() {
            return Err(crate::error::RetrievalError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: loaded.dimension(),
            });
        }
        *self.index.write() = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocType;
    use tempfile::TempDir;

    fn corpus() -> Vec<LegalDocument> {
        vec![
            LegalDocument::new("lease-3", "주택임대차보호법", "임차인은 주택의 인도와 주민등록을 마친 때 대항력이 생긴다")
                .with_article("3", "대항력 등"),
            LegalDocument::new("lease-7", "주택임대차보호법", "차임 또는 보증금의 증액청구는 약정한 차임이나 보증금의 20분의 1을 초과하지 못한다")
                .with_article("7", "차임 등의 증감청구권"),
            LegalDocument::new("decree-8", "주택임대차보호법 시행령", "우선변제를 받을 임차인의 보증금 범위")
                .with_article("10", "보증금 중 일정액의 범위")
                .with_doc_type(DocType::Decree),
            LegalDocument::new("tax-89", "소득세법", "1세대 1주택 양도소득세 비과세 요건")
                .with_article("89", "비과세 양도소득"),
            LegalDocument::new("lease-old", "주택임대차보호법", "보증금 증액 삭제 조항")
                .with_article("7", "삭제")
                .deleted(),
        ]
    }

    fn retriever() -> HybridRetriever {
        let retriever = HybridRetriever::in_memory().unwrap();
        retriever.add_documents(&corpus()).unwrap();
        retriever
    }

    #[test]
    fn test_exact_article_wins() {
        let hits = retriever().search("주택임대차보호법 제7조 보증금 증액 한도", 3).unwrap();
        assert_eq!(hits[0].document.doc_id, "lease-7");
        assert_eq!(hits[0].filter_level, FilterLevel::Exact);
        assert!(hits.iter().all(|h| !h.document.is_deleted));
    }

    #[test]
    fn test_missing_article_relaxes_to_law() {
        let hits = retriever().search("주택임대차보호법 제99조 대항력", 3).unwrap();
        assert_eq!(hits[0].filter_level, FilterLevel::LawOnly);
        assert_eq!(hits[0].document.doc_id, "lease-3");
    }

    #[test]
    fn test_unknown_law_falls_back_to_vectors() {
        let hits = retriever().search("없는법 양도소득세 비과세", 2).unwrap();
        assert_eq!(hits[0].filter_level, FilterLevel::VectorOnly);
        assert_eq!(hits[0].document.doc_id, "tax-89");
    }

    #[test]
    fn test_free_text_uses_vectors_and_sinks_deleted() {
        let hits = retriever().search("보증금 증액", 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits.last().unwrap().document.doc_id, "lease-old");
    }

    #[test]
    fn test_unbounded_limit_returns_whole_corpus() {
        let hits = retriever().search("보증금 증액", usize::MAX).unwrap();
        assert_eq!(hits.len(), corpus().len());
    }

    #[tokio::test]
    async fn test_index_snapshot_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.json");
        let source = retriever();
        source.save_index(&path).await.unwrap();

        let fresh = HybridRetriever::in_memory().unwrap();
        for doc in corpus() {
            fresh.metadata.upsert(&doc).unwrap();
        }
        fresh.load_index(&path).await.unwrap();
        let hits = fresh.search("주택임대차보호법 제3조", 1).unwrap();
        assert_eq!(hits[0].document.doc_id, "lease-3");
    }
}
