//! Result Synthesizer
//!
//! Turns one or many executed results into a short narrative answer plus a
//! handful of insights. Never fails: call or parse problems produce a
//! minimal synthesis stating row counts.

use crate::error::with_timeout;
use crate::llm::{parse_json_payload, LanguageModel};
use crate::models::{Row, SubResult, Synthesis};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_INSIGHTS: usize = 5;
pub const NO_DATA_ANSWER: &str = "No data found for this question.";

pub struct ResultSynthesizer {
    llm: Arc<dyn LanguageModel>,
    sample_rows: usize,
    call_timeout: Duration,
}

impl ResultSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, sample_rows: usize, call_timeout: Duration) -> Self {
        Self {
            llm,
            sample_rows,
            call_timeout,
        }
    }

    /// Summarize a single executed query. Zero rows short-circuit without a
    /// model call.
    pub async fn synthesize_single(&self, question: &str, query: &str, rows: &[Row], columns: &[String]) -> Synthesis {
        if rows.is_empty() {
            return Synthesis {
                summary: NO_DATA_ANSWER.to_string(),
                insights: vec!["The query returned no rows.".to_string()],
            };
        }

        let mut context = String::new();
        let _ = write!(context, "\nSQL: {}\nColumns: {}", query, columns.join(", "));
        self.append_sample(&mut context, rows);
        let prompt = build_synthesis_prompt(question, "QUERY RESULT", &context);

        match self.ask(&prompt).await {
            Some(synthesis) => synthesis,
            None => Synthesis {
                summary: format!("The query returned {} row(s).", rows.len()),
                insights: Vec::new(),
            },
        }
    }

    /// Unify the results of a decomposed question. Failed sub-questions are
    /// reported explicitly so the answer never presents them as empty data.
    pub async fn synthesize_many(&self, question: &str, results: &[SubResult]) -> Synthesis {
        let mut context = String::new();
        for (i, result) in results.iter().enumerate() {
            let _ = write!(context, "\n\nSub-Query {}: {}", i + 1, result.question);
            let _ = write!(context, "\nSQL: {}", result.outcome.query());
            match result.outcome.failure_reason() {
                Some(reason) => {
                    let _ = write!(
                        context,
                        "\nFAILED after {} attempt(s): {}",
                        result.outcome.attempts_used(),
                        reason
                    );
                }
                None => self.append_sample(&mut context, result.outcome.rows()),
            }
        }
        let prompt = build_synthesis_prompt(question, "SUB-QUERY RESULTS", &context);

        match self.ask(&prompt).await {
            Some(synthesis) => synthesis,
            None => fallback_many(results),
        }
    }

    fn append_sample(&self, context: &mut String, rows: &[Row]) {
        let shown = rows.len().min(self.sample_rows);
        let sample = serde_json::to_string_pretty(&rows[..shown]).unwrap_or_else(|_| "[]".to_string());
        let _ = write!(context, "\nResults: {}", sample);
        if rows.len() > shown {
            let _ = write!(
                context,
                "\n... ({} more rows omitted, {} total rows)",
                rows.len() - shown,
                rows.len()
            );
        }
    }

    async fn ask(&self, prompt: &str) -> Option<Synthesis> {
        let response = match with_timeout(self.call_timeout, "result synthesis", self.llm.complete(prompt)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Synthesis call failed, using fallback");
                return None;
            }
        };
        match parse_json_payload::<Synthesis>(&response) {
            Ok(mut synthesis) if !synthesis.summary.trim().is_empty() => {
                synthesis.insights.retain(|i| !i.trim().is_empty());
                synthesis.insights.truncate(MAX_INSIGHTS);
                debug!(insights = synthesis.insights.len(), "Synthesis parsed");
                Some(synthesis)
            }
            Ok(_) => {
                warn!("Synthesis had an empty answer, using fallback");
                None
            }
            Err(e) => {
                warn!(error = %e, "Unparseable synthesis, using fallback");
                None
            }
        }
    }
}

fn fallback_many(results: &[SubResult]) -> Synthesis {
    let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
    let mut insights: Vec<String> = results
        .iter()
        .map(|r| match r.outcome.failure_reason() {
            Some(reason) => format!("{}: failed ({})", r.question, reason),
            None => format!("{}: {} row(s)", r.question, r.outcome.rows().len()),
        })
        .collect();
    insights.truncate(MAX_INSIGHTS);
    Synthesis {
        summary: format!(
            "Results from {} of {} queries executed successfully.",
            succeeded,
            results.len()
        ),
        insights,
    }
}

fn build_synthesis_prompt(question: &str, heading: &str, context: &str) -> String {
    format!(
        r#"You are a data analyst synthesizing results from database queries.

ORIGINAL QUESTION: {question}

{heading}:{context}

Based on these results, provide:
1. A unified answer that directly answers the original question
2. 3-5 key insights or patterns discovered in the data
3. If any sub-query failed, say so plainly instead of guessing its result

Respond in JSON format:
{{
    "unified_answer": "A concise summary that answers the original question",
    "key_insights": [
        "Insight 1",
        "Insight 2",
        "Insight 3"
    ]
}}

JSON Response:"#
    )
}
