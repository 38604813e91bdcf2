//! Request, outcome and response types shared across the engine.

use crate::visualization::{ChartSpec, VisualizationVerdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name to value, in the order the store returned them.
pub type Row = serde_json::Map<String, Value>;

/// Column names of a result set, taken from its first row.
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// Optional narrowing of example retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHint {
    pub datasource: Option<String>,
    pub table: Option<String>,
}

/// A user question. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    #[serde(default)]
    hint: SourceHint,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hint: SourceHint::default(),
        }
    }

    pub fn with_hint(text: impl Into<String>, hint: SourceHint) -> Self {
        Self {
            text: text.into(),
            hint,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hint(&self) -> &SourceHint {
        &self.hint
    }

    /// A sub-question inherits the hint of the question it was split from.
    pub fn derive(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hint: self.hint.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded { row_count: usize },
    Failed { reason: String },
}

/// One generate-then-execute iteration of the self-correction loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based.
    pub index: u32,
    pub query: String,
    #[serde(flatten)]
    pub status: AttemptStatus,
}

impl Attempt {
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            AttemptStatus::Failed { reason } => Some(reason),
            AttemptStatus::Succeeded { .. } => None,
        }
    }
}

/// Terminal state of one execution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        query: String,
        rows: Vec<Row>,
        columns: Vec<String>,
        attempts_used: u32,
        history: Vec<Attempt>,
    },
    Failure {
        last_query: String,
        reason: String,
        attempts_used: u32,
        history: Vec<Attempt>,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn attempts_used(&self) -> u32 {
        match self {
            ExecutionOutcome::Success { attempts_used, .. }
            | ExecutionOutcome::Failure { attempts_used, .. } => *attempts_used,
        }
    }

    pub fn history(&self) -> &[Attempt] {
        match self {
            ExecutionOutcome::Success { history, .. }
            | ExecutionOutcome::Failure { history, .. } => history,
        }
    }

    /// The query that produced the outcome: the executed one on success,
    /// the last attempted one on failure.
    pub fn query(&self) -> &str {
        match self {
            ExecutionOutcome::Success { query, .. } => query,
            ExecutionOutcome::Failure { last_query, .. } => last_query,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            ExecutionOutcome::Success { rows, .. } => rows,
            ExecutionOutcome::Failure { .. } => &[],
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ExecutionOutcome::Success { columns, .. } => columns,
            ExecutionOutcome::Failure { .. } => &[],
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failure { reason, .. } => Some(reason),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

/// A (sub-)question together with everything its execution loop produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResult {
    pub question: String,
    pub outcome: ExecutionOutcome,
    pub visualization: Option<VisualizationVerdict>,
    pub chart: Option<ChartSpec>,
    /// Rendered form of `chart`, produced by the render capability.
    pub plot: Option<Value>,
}

impl SubResult {
    pub fn new(
        question: impl Into<String>,
        outcome: ExecutionOutcome,
        visualization: Option<VisualizationVerdict>,
        chart: Option<ChartSpec>,
        plot: Option<Value>,
    ) -> Self {
        let visualize = visualization
            .as_ref()
            .map(|v| v.should_visualize)
            .unwrap_or(false);
        // A chart never survives a verdict that declined to visualize.
        let (chart, plot) = if visualize { (chart, plot) } else { (None, None) };
        Self {
            question: question.into(),
            outcome,
            visualization,
            chart,
            plot,
        }
    }

    pub fn failed(question: impl Into<String>, outcome: ExecutionOutcome) -> Self {
        Self::new(question, outcome, None, None, None)
    }
}

/// Narrative answer produced by the result synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesis {
    #[serde(alias = "unified_answer", alias = "answer")]
    pub summary: String,
    #[serde(default, alias = "key_insights")]
    pub insights: Vec<String>,
}

/// What the inbound surface returns for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinalResponse {
    Simple {
        question: String,
        reasoning: String,
        result: SubResult,
        summary: String,
        insights: Vec<String>,
    },
    Complex {
        question: String,
        execution_plan: String,
        sub_queries_count: usize,
        sub_queries: Vec<SubResult>,
        unified_answer: String,
        key_insights: Vec<String>,
    },
    Error {
        question: String,
        error: String,
    },
}

impl FinalResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            FinalResponse::Simple { .. } => "simple",
            FinalResponse::Complex { .. } => "complex",
            FinalResponse::Error { .. } => "error",
        }
    }
}
