//! Rule documents and token-overlap retrieval.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::text::content_terms;
use super::{RuleRetriever, SqliteStore};
use crate::error::{ParleyError, Result};

/// One question/answer passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
}

/// A retrieved passage with relevance in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPassage {
    pub document: RuleDocument,
    pub relevance: f32,
}

/// Share of the query's content terms that appear in the document.
pub fn relevance(document: &RuleDocument, query_terms: &[String]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms: HashSet<String> = content_terms(&format!(
        "{} {} {}",
        document.question, document.answer, document.category
    ))
    .into_iter()
    .collect();
    let overlap = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
    (overlap as f32 / query_terms.len() as f32).clamp(0.0, 1.0)
}

/// Score, filter and order `documents` against `query`.
pub fn rank(documents: Vec<RuleDocument>, query: &str, top_k: usize) -> Vec<RankedPassage> {
    let terms = content_terms(query);
    let mut ranked: Vec<RankedPassage> = documents
        .into_iter()
        .map(|document| {
            let relevance = relevance(&document, &terms);
            RankedPassage {
                document,
                relevance,
            }
        })
        .filter(|p| p.relevance > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
    ranked.truncate(top_k);
    ranked
}

impl SqliteStore {
    /// Insert or replace a rule document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_rule(&self, document: RuleDocument) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO rule_documents (id, question, answer, category)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    document.id,
                    document.question,
                    document.answer,
                    document.category
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Load one JSON document per line. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first malformed line, or if a write fails.
    pub async fn load_rules_jsonl(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut documents = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let document: RuleDocument = serde_json::from_str(line).map_err(|e| {
                ParleyError::Store(format!("{}:{}: {e}", path.display(), idx + 1))
            })?;
            documents.push(document);
        }
        let count = documents.len();
        for document in documents {
            self.upsert_rule(document).await?;
        }
        Ok(count)
    }

    /// Every stored rule document ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_rules(&self) -> Result<Vec<RuleDocument>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, question, answer, category FROM rule_documents ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(RuleDocument {
                    id: row.get(0)?,
                    question: row.get(1)?,
                    answer: row.get(2)?,
                    category: row.get(3)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl RuleRetriever for SqliteStore {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RankedPassage>> {
        let documents = self.list_rules().await?;
        Ok(rank(documents, query, top_k))
    }
}
