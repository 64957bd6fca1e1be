//! Hybrid Retrieval - legal document search for the Search team
//!
//! Combines an embedded SQLite metadata store with a vector similarity
//! index and domain-aware reranking:
//!
//! - `QueryAnalyzer`: law names, article numbers, document-type and topic hints
//! - `MetadataStore`: structured filtering with progressive relaxation
//! - `VectorIndex`: cosine similarity over `Embedder` output, JSON snapshots
//! - `rerank`: article, law, authority and topic bonuses
//!
//! # Example
//!
//! ```ignore
//! use hybrid_retrieval::{HybridRetriever, LegalDocument};
//!
//! let retriever = HybridRetriever::in_memory()?;
//! retriever.add_document(&LegalDocument::new("lease-7", "주택임대차보호법", "..."))?;
//! let hits = retriever.search("주택임대차보호법 제7조", 5)?;
//! ```

pub mod engine;
pub mod error;
pub mod metadata;
pub mod query;
pub mod rerank;
pub mod types;
pub mod vector;

pub use engine::{HybridRetriever, RetrieverConfig};
pub use error::{Result, RetrievalError};
pub use metadata::MetadataStore;
pub use query::{QueryAnalysis, QueryAnalyzer, Topic};
pub use types::{DocType, FilterLevel, LegalDocument, SearchFilter, SearchHit};
pub use vector::{cosine_similarity, Embedder, HashingEmbedder, VectorIndex};
