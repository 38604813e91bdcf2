//! Execution Loop
//!
//! Bounded generate-execute-retry loop with self-correction.

use crate::config::EngineConfig;
use crate::error::{with_timeout, EngineError, Result};
use crate::execution_loop::prompt::build_query_prompt;
use crate::db::DataStore;
use crate::llm::{strip_code_fences, LanguageModel};
use crate::models::{columns_of, Attempt, AttemptStatus, ExecutionOutcome, Question, SubResult};
use crate::schema_rag::{retrieve_context, ContextRetriever, RetrievalContext};
use crate::visualization::{assess, synthesize, ChartRenderer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs questions through retrieval, the self-correction loop and
/// visualization. Cheap to clone; every clone shares the same capabilities.
#[derive(Clone)]
pub struct ExecutionLoop {
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn DataStore>,
    retriever: Arc<dyn ContextRetriever>,
    renderer: Arc<dyn ChartRenderer>,
    config: EngineConfig,
}

impl ExecutionLoop {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn DataStore>,
        retriever: Arc<dyn ContextRetriever>,
        renderer: Arc<dyn ChartRenderer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            store,
            retriever,
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer one (sub-)question end to end: retrieve context, run the loop
    /// with the configured retry bound, and on success attach the
    /// visualization verdict and chart.
    pub async fn answer(&self, question: &Question) -> SubResult {
        let context = retrieve_context(self.retriever.as_ref(), question, &self.config).await;
        let outcome = self.run(question, &context, self.config.max_retries).await;
        self.visualize(question, outcome).await
    }

    /// Run the state machine. At most `max_retries + 1` attempts are made and
    /// every attempt, including a successful last one, is kept in the history.
    pub async fn run(
        &self,
        question: &Question,
        context: &RetrievalContext,
        max_retries: u32,
    ) -> ExecutionOutcome {
        let max_attempts = max_retries.saturating_add(1);
        let mut history: Vec<Attempt> = Vec::new();

        for index in 1..=max_attempts {
            info!("Execution attempt {} of {}", index, max_attempts);
            let prompt = build_query_prompt(question.text(), context, &history);

            let query = match self.generate(&prompt).await {
                Ok(query) => query,
                Err(e) => {
                    warn!(attempt = index, error = %e, "Query generation failed");
                    history.push(Attempt {
                        index,
                        query: String::new(),
                        status: AttemptStatus::Failed { reason: e.reason() },
                    });
                    continue;
                }
            };
            debug!(attempt = index, query = %query, "Generated query");

            let started = Instant::now();
            let executed = with_timeout(
                self.config.call_timeout,
                "query execution",
                self.store.execute(&query),
            )
            .await;
            match executed {
                Ok(rows) => {
                    let columns = columns_of(&rows);
                    info!(
                        attempt = index,
                        rows = rows.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Execution succeeded on attempt {}",
                        index
                    );
                    history.push(Attempt {
                        index,
                        query: query.clone(),
                        status: AttemptStatus::Succeeded {
                            row_count: rows.len(),
                        },
                    });
                    return ExecutionOutcome::Success {
                        query,
                        rows,
                        columns,
                        attempts_used: index,
                        history,
                    };
                }
                Err(e) => {
                    let reason = e.reason();
                    warn!(attempt = index, store = self.store.name(), error = %reason, "Query execution failed");
                    history.push(Attempt {
                        index,
                        query,
                        status: AttemptStatus::Failed { reason },
                    });
                }
            }
        }

        let (last_query, last_reason) = history
            .last()
            .map(|a| (a.query.clone(), a.failure_reason().unwrap_or_default().to_string()))
            .unwrap_or_default();
        warn!(attempts = history.len(), "Retries exhausted");
        ExecutionOutcome::Failure {
            last_query,
            reason: format!(
                "Query failed after {} attempt(s). Last error: {}",
                history.len(),
                last_reason
            ),
            attempts_used: history.len() as u32,
            history,
        }
    }

    /// Ask the model for one query; an empty answer counts as a failure.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = with_timeout(
            self.config.call_timeout,
            "query generation",
            self.llm.complete(prompt),
        )
        .await?;
        let query = strip_code_fences(&response);
        if query.is_empty() {
            return Err(EngineError::Parse("Generated query is empty".to_string()));
        }
        Ok(query)
    }

    /// Attach the assessor's verdict and, when it recommends one, a chart.
    /// Failed outcomes pass through without either.
    pub async fn visualize(&self, question: &Question, outcome: ExecutionOutcome) -> SubResult {
        if !outcome.is_success() {
            return SubResult::failed(question.text(), outcome);
        }

        let verdict = assess(outcome.rows(), outcome.columns());
        debug!(visualize = verdict.should_visualize, reason = %verdict.reason, "Visualization assessed");
        let family = match (verdict.should_visualize, verdict.chart_family) {
            (true, Some(family)) => family,
            _ => return SubResult::new(question.text(), outcome, Some(verdict), None, None),
        };

        let chart = match synthesize(family, outcome.rows(), outcome.columns()) {
            Ok(chart) => chart,
            Err(e) => {
                warn!(error = %e, "Chart synthesis failed");
                return SubResult::new(question.text(), outcome, Some(verdict), None, None);
            }
        };
        let plot = match with_timeout(self.config.call_timeout, "chart rendering", self.renderer.render(&chart)).await {
            Ok(plot) => Some(plot),
            Err(e) => {
                warn!(error = %e, "Chart rendering failed");
                None
            }
        };
        SubResult::new(question.text(), outcome, Some(verdict), Some(chart), plot)
    }
}
