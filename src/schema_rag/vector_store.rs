//! Vector Store
//!
//! In-memory document store with linear cosine-similarity search. Documents
//! keep insertion order so equal scores rank deterministically.

use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub embedding: Embedding,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

pub struct InMemoryVectorStore {
    documents: Vec<Document>,
    dimension: usize,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            documents: Vec::new(),
            dimension,
        }
    }

    /// Add a document, replacing any earlier document with the same id.
    pub fn add_document(&mut self, document: Document) -> Result<()> {
        if document.embedding.len() != self.dimension {
            return Err(EngineError::Retrieval(format!(
                "Embedding dimension {} doesn't match store dimension {}",
                document.embedding.len(),
                self.dimension
            )));
        }
        match self.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => self.documents.push(document),
        }
        Ok(())
    }

    /// Top `top_k` documents accepted by `filter`, best first.
    pub fn search<F>(&self, query_embedding: &[f32], top_k: usize, filter: F) -> Result<Vec<SearchResult>>
    where
        F: Fn(&Document) -> bool,
    {
        if query_embedding.len() != self.dimension {
            return Err(EngineError::Retrieval(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        let mut results: Vec<SearchResult> = self
            .documents
            .iter()
            .filter(|doc| filter(doc))
            .map(|doc| SearchResult {
                document: doc.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding),
            })
            .collect();

        // Stable sort: ties keep insertion order.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    /// Documents accepted by `filter`, in insertion order.
    pub fn scan<F>(&self, limit: usize, filter: F) -> Vec<&Document>
    where
        F: Fn(&Document) -> bool,
    {
        self.documents.iter().filter(|d| filter(d)).take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>, kind: &str) -> Document {
        let mut metadata = HashMap::new();
        metadata.insert("kind".to_string(), kind.to_string());
        Document {
            id: id.to_string(),
            text: id.to_string(),
            metadata,
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 1.0);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_search_ranks_and_filters() {
        let mut store = InMemoryVectorStore::new(2);
        store.add_document(doc("x", vec![1.0, 0.0], "a")).unwrap();
        store.add_document(doc("y", vec![0.6, 0.8], "a")).unwrap();
        store.add_document(doc("z", vec![0.0, 1.0], "b")).unwrap();

        let all = store.search(&[0.0, 1.0], 3, |_| true).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);

        let only_a = store
            .search(&[0.0, 1.0], 3, |d| d.metadata.get("kind").map(|k| k == "a").unwrap_or(false))
            .unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].document.id, "y");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut store = InMemoryVectorStore::new(3);
        assert!(store.add_document(doc("x", vec![1.0], "a")).is_err());
        assert!(store.search(&[1.0], 1, |_| true).is_err());
    }
}
