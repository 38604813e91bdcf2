//! Schema RAG Retriever
//!
//! Ranks table descriptions and example question/query pairs against a
//! question, and assembles the per-question retrieval context.

use crate::config::EngineConfig;
use crate::error::{with_timeout, Result};
use crate::metadata::{ColumnMetadata, ExampleQuery, MetadataCatalog};
use crate::models::Question;
use crate::schema_rag::embedder::{Embedder, DEFAULT_DIMENSION};
use crate::schema_rag::vector_store::{Document, InMemoryVectorStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A table description ranked against a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMatch {
    pub table: String,
    pub description: String,
    /// Full text rendering of the table (name, description, columns).
    pub document: String,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
    pub score: f32,
}

/// An example question/query pair ranked against a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleMatch {
    #[serde(flatten)]
    pub example: ExampleQuery,
    pub main_table: String,
    pub score: f32,
}

/// Context search capability.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn search_tables(&self, text: &str, k: usize) -> Result<Vec<TableMatch>>;

    async fn search_examples(
        &self,
        text: &str,
        k: usize,
        datasource: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<ExampleMatch>>;
}

/// Ordered retrieval results for one (sub-)question. Built fresh per
/// question and never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub tables: Vec<TableMatch>,
    pub examples: Vec<ExampleMatch>,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.examples.is_empty()
    }
}

/// Retrieve tables and examples for `question`.
///
/// Either search failing or timing out leaves that half of the context empty;
/// generation still proceeds.
pub async fn retrieve_context(
    retriever: &dyn ContextRetriever,
    question: &Question,
    config: &EngineConfig,
) -> RetrievalContext {
    let text = question.text();
    let hint = question.hint();
    let datasource = hint.datasource.as_deref().or(config.datasource_filter.as_deref());
    let table = hint.table.as_deref().or(config.table_filter.as_deref());

    let (tables, examples) = tokio::join!(
        with_timeout(
            config.call_timeout,
            "table search",
            retriever.search_tables(text, config.tables_top_k)
        ),
        with_timeout(
            config.call_timeout,
            "example search",
            retriever.search_examples(text, config.examples_top_k, datasource, table)
        ),
    );

    let tables = tables.unwrap_or_else(|e| {
        warn!(error = %e, "Table search failed, continuing without table context");
        Vec::new()
    });
    let examples = examples.unwrap_or_else(|e| {
        warn!(error = %e, "Example search failed, continuing without examples");
        Vec::new()
    });

    debug!(tables = tables.len(), examples = examples.len(), "Retrieved context");
    RetrievalContext { tables, examples }
}

/// Retriever over a [`MetadataCatalog`], ranked by embedding similarity.
pub struct MetadataRetriever {
    catalog: MetadataCatalog,
    embedder: Embedder,
    tables: InMemoryVectorStore,
    examples: InMemoryVectorStore,
}

impl MetadataRetriever {
    /// Embed every table document and example question of `catalog`.
    pub async fn build(catalog: MetadataCatalog, embedder: Embedder) -> Result<Self> {
        let table_texts: Vec<String> = catalog.tables.iter().map(|t| t.document()).collect();
        // Examples are matched on their question text alone.
        let example_texts: Vec<String> = catalog
            .examples
            .iter()
            .map(|r| r.example.question.clone())
            .collect();

        let table_vectors = embedder.embed_many(&table_texts).await?;
        let example_vectors = embedder.embed_many(&example_texts).await?;
        let dimension = table_vectors
            .first()
            .or_else(|| example_vectors.first())
            .map(Vec::len)
            .unwrap_or(DEFAULT_DIMENSION);

        let mut tables = InMemoryVectorStore::new(dimension);
        for ((table, text), embedding) in catalog.tables.iter().zip(table_texts).zip(table_vectors) {
            let mut metadata = HashMap::new();
            metadata.insert("table".to_string(), table.table.clone());
            metadata.insert("datasource".to_string(), table.datasource.clone());
            tables.add_document(Document {
                id: format!("table_{}", table.table),
                text,
                embedding,
                metadata,
            })?;
        }

        let mut examples = InMemoryVectorStore::new(dimension);
        for (idx, (record, embedding)) in catalog.examples.iter().zip(example_vectors).enumerate() {
            let mut metadata = HashMap::new();
            metadata.insert("datasource".to_string(), record.datasource.clone());
            metadata.insert("main_table".to_string(), record.main_table.clone());
            metadata.insert("index".to_string(), idx.to_string());
            examples.add_document(Document {
                id: format!("query_{}", idx),
                text: record.example.question.clone(),
                embedding,
                metadata,
            })?;
        }

        info!(
            embedder = embedder.name(),
            dimension,
            tables = tables.len(),
            examples = examples.len(),
            "Indexed metadata"
        );
        Ok(Self {
            catalog,
            embedder,
            tables,
            examples,
        })
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    /// Examples whose main table is `table`, in catalog order.
    pub fn examples_by_table(&self, table: &str, k: usize) -> Vec<ExampleMatch> {
        self.examples
            .scan(k, |d| d.metadata.get("main_table").map(|t| t == table).unwrap_or(false))
            .into_iter()
            .filter_map(|doc| self.example_for(doc, 0.0))
            .collect()
    }

    fn example_for(&self, doc: &Document, score: f32) -> Option<ExampleMatch> {
        let idx: usize = doc.metadata.get("index")?.parse().ok()?;
        let record = self.catalog.examples.get(idx)?;
        Some(ExampleMatch {
            example: record.example.clone(),
            main_table: record.main_table.clone(),
            score,
        })
    }
}

#[async_trait]
impl ContextRetriever for MetadataRetriever {
    async fn search_tables(&self, text: &str, k: usize) -> Result<Vec<TableMatch>> {
        if self.tables.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_text(text).await?;
        let results = self.tables.search(&query, k, |_| true)?;
        Ok(results
            .into_iter()
            .filter_map(|result| {
                let name = result.document.metadata.get("table")?;
                let table = self.catalog.table(name)?;
                Some(TableMatch {
                    table: table.table.clone(),
                    description: table.description.clone(),
                    document: result.document.text.clone(),
                    columns: table.columns.clone(),
                    score: result.score,
                })
            })
            .collect())
    }

    async fn search_examples(
        &self,
        text: &str,
        k: usize,
        datasource: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<ExampleMatch>> {
        if self.examples.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_text(text).await?;
        let matches = |doc: &Document, key: &str, wanted: Option<&str>| match wanted {
            Some(wanted) => doc.metadata.get(key).map(|v| v == wanted).unwrap_or(false),
            None => true,
        };
        let results = self.examples.search(&query, k, |doc| {
            matches(doc, "datasource", datasource) && matches(doc, "main_table", table)
        })?;
        Ok(results
            .iter()
            .filter_map(|result| self.example_for(&result.document, result.score))
            .collect())
    }
}
