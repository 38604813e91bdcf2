//! Map-Reduce Orchestrator
//!
//! Classifies a question, answers it directly or fans its sub-questions out
//! to concurrent execution loops, and reduces everything into one response.

use crate::config::EngineConfig;
use crate::db::DataStore;
use crate::error::{EngineError, Result};
use crate::execution_loop::ExecutionLoop;
use crate::llm::LanguageModel;
use crate::models::{ExecutionOutcome, FinalResponse, Question, SubResult, Synthesis};
use crate::planner::QuestionClassifier;
use crate::schema_rag::ContextRetriever;
use crate::synthesizer::ResultSynthesizer;
use crate::visualization::ChartRenderer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Orchestrator {
    classifier: QuestionClassifier,
    runner: ExecutionLoop,
    synthesizer: ResultSynthesizer,
    request_timeout: Duration,
}

impl Orchestrator {
    /// Wire the engine from its capabilities. They are shared read-only by
    /// every request for the lifetime of the orchestrator.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn DataStore>,
        retriever: Arc<dyn ContextRetriever>,
        renderer: Arc<dyn ChartRenderer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            classifier: QuestionClassifier::new(llm.clone(), config.call_timeout),
            synthesizer: ResultSynthesizer::new(
                llm.clone(),
                config.synthesis_sample_rows,
                config.call_timeout,
            ),
            request_timeout: config.request_timeout,
            runner: ExecutionLoop::new(llm, store, retriever, renderer, config),
        }
    }

    pub fn runner(&self) -> &ExecutionLoop {
        &self.runner
    }

    /// Answer a question. Never fails: errors and the request deadline are
    /// turned into an `error` response. Hitting the deadline drops the
    /// in-flight sub-question tasks, which aborts them.
    pub async fn execute(&self, question: &Question) -> FinalResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id);
        async {
            let started = Instant::now();
            info!(question = %question.text(), "Processing question");
            let response = match tokio::time::timeout(self.request_timeout, self.process(question)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!(error = %e, "Request failed");
                    FinalResponse::Error {
                        question: question.text().to_string(),
                        error: e.to_string(),
                    }
                }
                Err(_) => {
                    error!(timeout = ?self.request_timeout, "Request timed out");
                    FinalResponse::Error {
                        question: question.text().to_string(),
                        error: EngineError::Timeout(self.request_timeout, "request".to_string()).to_string(),
                    }
                }
            };
            info!(
                kind = response.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn process(&self, question: &Question) -> Result<FinalResponse> {
        if question.text().trim().is_empty() {
            return Err(EngineError::Parse("Question is empty".to_string()));
        }

        let classification = self.classifier.classify(question.text()).await;
        if !classification.is_composite {
            return Ok(self.answer_simple(question, classification.reasoning).await);
        }

        let sub_questions: Vec<Question> = classification
            .sub_questions
            .iter()
            .map(|text| question.derive(text.as_str()))
            .collect();
        let results = self.map(&sub_questions).await;
        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        info!(sub_questions = results.len(), succeeded, "Sub-questions joined");

        let synthesis = self.synthesizer.synthesize_many(question.text(), &results).await;
        Ok(FinalResponse::Complex {
            question: question.text().to_string(),
            execution_plan: classification.reasoning,
            sub_queries_count: results.len(),
            sub_queries: results,
            unified_answer: synthesis.summary,
            key_insights: synthesis.insights,
        })
    }

    async fn answer_simple(&self, question: &Question, reasoning: String) -> FinalResponse {
        let result = self.runner.answer(question).await;
        let synthesis = match result.outcome.failure_reason() {
            Some(reason) => Synthesis {
                summary: format!("The question could not be answered: {}", reason),
                insights: Vec::new(),
            },
            None => {
                self.synthesizer
                    .synthesize_single(
                        question.text(),
                        result.outcome.query(),
                        result.outcome.rows(),
                        result.outcome.columns(),
                    )
                    .await
            }
        };
        FinalResponse::Simple {
            question: question.text().to_string(),
            reasoning,
            result,
            summary: synthesis.summary,
            insights: synthesis.insights,
        }
    }

    /// Run every sub-question on its own task and collect the results in
    /// sub-question order, whatever order the tasks finish in.
    async fn map(&self, sub_questions: &[Question]) -> Vec<SubResult> {
        let mut tasks = TaskGroup(Vec::with_capacity(sub_questions.len()));
        for (index, sub_question) in sub_questions.iter().enumerate() {
            let runner = self.runner.clone();
            let sub_question = sub_question.clone();
            let span = info_span!("sub_question", index = index + 1);
            tasks.0.push(tokio::spawn(
                async move { runner.answer(&sub_question).await }.instrument(span),
            ));
        }

        let mut results = Vec::with_capacity(sub_questions.len());
        for (handle, sub_question) in tasks.0.iter_mut().zip(sub_questions) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(question = %sub_question.text(), error = %e, "Sub-question task did not complete");
                    results.push(SubResult::failed(
                        sub_question.text(),
                        ExecutionOutcome::Failure {
                            last_query: String::new(),
                            reason: format!("Sub-question task did not complete: {}", e),
                            attempts_used: 0,
                            history: Vec::new(),
                        },
                    ));
                }
            }
        }
        results
    }
}

/// Spawned sub-question tasks; dropping the group aborts any still running.
struct TaskGroup(Vec<JoinHandle<SubResult>>);

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
