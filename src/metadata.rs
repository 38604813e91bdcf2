//! Metadata catalog
//!
//! Table descriptions and example question/query pairs authored for
//! retrieval. Layout of the metadata directory:
//!
//! ```text
//! metadata/
//!   datasources.json        {"datasources": [...]}            (optional)
//!   tables/<table>.json     one table description per file
//!   queries/<name>.json     one example, or {"queries": [...]} for several
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type", default = "unknown_type")]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<serde_json::Value>,
}

fn unknown_type() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: String,
    #[serde(default)]
    pub datasource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Rich text rendering used both for embedding and for prompts.
    pub fn document(&self) -> String {
        let mut parts = vec![
            format!("Table: {}", self.table),
            format!("Description: {}", self.description),
            "Columns:".to_string(),
        ];
        for column in &self.columns {
            let mut line = format!(
                "  - {} ({}): {}",
                column.name, column.data_type, column.description
            );
            if !column.examples.is_empty() {
                let examples: Vec<String> = column
                    .examples
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                line.push_str(&format!(" Examples: {}", examples.join(", ")));
            }
            parts.push(line);
        }
        parts.join("\n")
    }
}

/// A worked example: question, the query that answers it, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleQuery {
    pub question: String,
    pub query: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub datasource: String,
    pub main_table: String,
    #[serde(flatten)]
    pub example: ExampleQuery,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExampleFile {
    Many {
        #[serde(default)]
        datasource: Option<String>,
        #[serde(default)]
        main_table: Option<String>,
        queries: Vec<ExampleQuery>,
    },
    Single {
        #[serde(default)]
        datasource: Option<String>,
        #[serde(default)]
        main_table: Option<String>,
        #[serde(flatten)]
        example: ExampleQuery,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DatasourcesFile {
    #[serde(default)]
    datasources: Vec<Datasource>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    pub tables: Vec<TableMetadata>,
    pub examples: Vec<ExampleRecord>,
    pub datasources: Vec<Datasource>,
}

impl MetadataCatalog {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EngineError::Metadata(format!(
                "Metadata directory not found: {}",
                dir.display()
            )));
        }

        let mut tables = Vec::new();
        for path in json_files(&dir.join("tables"))? {
            let table: TableMetadata = Self::load_json(path)?;
            tables.push(table);
        }

        let mut examples = Vec::new();
        for path in json_files(&dir.join("queries"))? {
            let file: ExampleFile = Self::load_json(path)?;
            examples.extend(Self::flatten_examples(file));
        }

        let datasources_path = dir.join("datasources.json");
        let datasources = if datasources_path.is_file() {
            Self::load_json::<DatasourcesFile>(datasources_path)?.datasources
        } else {
            Vec::new()
        };

        info!(
            tables = tables.len(),
            examples = examples.len(),
            datasources = datasources.len(),
            "Loaded metadata catalog from {}",
            dir.display()
        );

        Ok(Self {
            tables,
            examples,
            datasources,
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.table == name)
    }

    fn flatten_examples(file: ExampleFile) -> Vec<ExampleRecord> {
        let unknown = || "unknown".to_string();
        match file {
            ExampleFile::Many {
                datasource,
                main_table,
                queries,
            } => {
                let datasource = datasource.unwrap_or_else(unknown);
                let main_table = main_table.unwrap_or_else(unknown);
                queries
                    .into_iter()
                    .map(|example| ExampleRecord {
                        datasource: datasource.clone(),
                        main_table: main_table.clone(),
                        example,
                    })
                    .collect()
            }
            ExampleFile::Single {
                datasource,
                main_table,
                example,
            } => vec![ExampleRecord {
                datasource: datasource.unwrap_or_else(unknown),
                main_table: main_table.unwrap_or_else(unknown),
                example,
            }],
        }
    }

    fn load_json<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<T> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Metadata(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Metadata(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// `*.json` files of a directory in name order; a missing directory is empty.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_load_both_example_layouts() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "tables/account.json",
            r#"{"table": "account", "datasource": "churn_db", "description": "Customer accounts",
                "columns": [{"name": "country", "type": "TEXT", "description": "Customer country", "examples": ["USA", "UK"]}]}"#,
        );
        write(
            dir.path(),
            "queries/a_single.json",
            r#"{"datasource": "churn_db", "question": "How many customers?", "query": "SELECT COUNT(*) FROM account", "reasoning": "count"}"#,
        );
        write(
            dir.path(),
            "queries/b_many.json",
            r#"{"datasource": "churn_db", "main_table": "subscription", "queries": [
                {"question": "Active subscriptions?", "query": "SELECT COUNT(*) FROM subscription WHERE end_date IS NULL"},
                {"question": "Churned subscriptions?", "query": "SELECT COUNT(*) FROM subscription WHERE end_date IS NOT NULL"}]}"#,
        );
        write(
            dir.path(),
            "datasources.json",
            r#"{"datasources": [{"name": "churn_db", "type": "sqlite", "connection_string": "data/churn.db", "tables": ["account"]}]}"#,
        );

        let catalog = MetadataCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.tables.len(), 1);
        assert_eq!(catalog.examples.len(), 3);
        assert_eq!(catalog.examples[0].main_table, "unknown");
        assert_eq!(catalog.examples[1].main_table, "subscription");
        assert_eq!(catalog.examples[2].example.reasoning, "");
        assert_eq!(catalog.datasources[0].kind, "sqlite");

        let doc = catalog.table("account").unwrap().document();
        assert!(doc.starts_with("Table: account\nDescription: Customer accounts\nColumns:"));
        assert!(doc.contains("  - country (TEXT): Customer country Examples: USA, UK"));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let err = MetadataCatalog::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, EngineError::Metadata(_)));
    }
}
