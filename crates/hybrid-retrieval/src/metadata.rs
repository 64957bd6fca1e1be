//! SQLite metadata store
//!
//! Holds the structured columns of every document (law, article, type,
//! category, deletion flag) so the engine can narrow candidates before
//! vector ranking.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::types::{DocType, LegalDocument, SearchFilter};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS legal_documents (
    doc_id TEXT PRIMARY KEY,
    law_title TEXT NOT NULL,
    article_number TEXT,
    article_title TEXT,
    doc_type TEXT NOT NULL,
    category TEXT,
    content TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    enforcement_date TEXT
);
CREATE INDEX IF NOT EXISTS idx_documents_law ON legal_documents(law_title);
CREATE INDEX IF NOT EXISTS idx_documents_article ON legal_documents(law_title, article_number);
CREATE INDEX IF NOT EXISTS idx_documents_type ON legal_documents(doc_type);
";

const COLUMNS: &str =
    "doc_id, law_title, article_number, article_title, doc_type, category, content, is_deleted, enforcement_date";

/// Structured document store
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a document
    pub fn upsert(&self, doc: &LegalDocument) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO legal_documents
             (doc_id, law_title, article_number, article_title, doc_type, category, content, is_deleted, enforcement_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doc.doc_id,
                doc.law_title,
                doc.article_number,
                doc.article_title,
                doc.doc_type.as_str(),
                doc.category,
                doc.content,
                doc.is_deleted,
                doc.enforcement_date,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<LegalDocument>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                &format!("SELECT {} FROM legal_documents WHERE doc_id = ?1", COLUMNS),
                params![doc_id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Documents matching every constraint of `filter`
    pub fn filter(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<LegalDocument>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(law) = &filter.law_title {
            clauses.push("law_title = ?");
            values.push(law.clone());
        }
        if let Some(article) = &filter.article_number {
            clauses.push("article_number = ?");
            values.push(article.clone());
        }
        if let Some(doc_type) = filter.doc_type {
            clauses.push("doc_type = ?");
            values.push(doc_type.as_str().to_string());
        }
        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            values.push(category.clone());
        }
        if !filter.include_deleted {
            clauses.push("is_deleted = 0");
        }

        let mut sql = format!("SELECT {} FROM legal_documents", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY doc_id LIMIT {}", limit));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(values.iter()), row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM legal_documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct law titles, used to recognize law names in queries
    pub fn law_titles(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT law_title FROM legal_documents ORDER BY law_title")?;
        let titles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(titles)
    }
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<LegalDocument> {
    let doc_type: String = row.get(4)?;
    Ok(LegalDocument {
        doc_id: row.get(0)?,
        law_title: row.get(1)?,
        article_number: row.get(2)?,
        article_title: row.get(3)?,
        doc_type: DocType::parse(&doc_type),
        category: row.get(5)?,
        content: row.get(6)?,
        is_deleted: row.get(7)?,
        enforcement_date: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> MetadataStore {
        let store = MetadataStore::in_memory().unwrap();
        store
            .upsert(&LegalDocument::new("a7", "주택임대차보호법", "차임 증감청구권").with_article("7", "차임 등의 증감청구권"))
            .unwrap();
        store
            .upsert(&LegalDocument::new("a3", "주택임대차보호법", "대항력").with_article("3", "대항력 등"))
            .unwrap();
        store
            .upsert(
                &LegalDocument::new("d1", "주택임대차보호법 시행령", "보증금 범위")
                    .with_doc_type(DocType::Decree),
            )
            .unwrap();
        store
            .upsert(&LegalDocument::new("old", "주택임대차보호법", "삭제").with_article("9", "삭제").deleted())
            .unwrap();
        store
    }

    #[test]
    fn test_filter_by_law_and_article() {
        let store = seeded();
        let filter = SearchFilter {
            law_title: Some("주택임대차보호법".into()),
            article_number: Some("7".into()),
            ..Default::default()
        };
        let docs = store.filter(&filter, 10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "a7");
    }

    #[test]
    fn test_deleted_documents_hidden_by_default() {
        let store = seeded();
        let filter = SearchFilter {
            law_title: Some("주택임대차보호법".into()),
            ..Default::default()
        };
        let ids: Vec<String> = store.filter(&filter, 10).unwrap().into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["a3", "a7"]);

        let with_deleted = SearchFilter {
            include_deleted: true,
            ..filter
        };
        assert_eq!(store.filter(&with_deleted, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_doc_type_round_trips_through_sql() {
        let store = seeded();
        let doc = store.get("d1").unwrap().unwrap();
        assert_eq!(doc.doc_type, DocType::Decree);
        assert!(store.get("missing").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(
            store.law_titles().unwrap(),
            vec!["주택임대차보호법", "주택임대차보호법 시행령"]
        );
    }

    #[test]
    fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("legal.sqlite");
        MetadataStore::open(&path)
            .unwrap()
            .upsert(&LegalDocument::new("x", "민법", "임대차"))
            .unwrap();
        assert_eq!(MetadataStore::open(&path).unwrap().count().unwrap(), 1);
    }
}
