//! Question Classifier / Decomposer
//!
//! Decides whether a question needs several independent queries and, if so,
//! splits it into sub-questions that can run in parallel.

use crate::error::with_timeout;
use crate::llm::{parse_json_payload, LanguageModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MIN_SUB_QUESTIONS: usize = 2;
pub const MAX_SUB_QUESTIONS: usize = 4;

/// Decomposition decision. `sub_questions` is empty exactly when the
/// question is simple, and holds 2 to 4 entries otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_composite: bool,
    pub reasoning: String,
    pub sub_questions: Vec<String>,
}

impl Classification {
    pub fn simple(reasoning: impl Into<String>) -> Self {
        Self {
            is_composite: false,
            reasoning: reasoning.into(),
            sub_questions: Vec::new(),
        }
    }
}

/// Raw model answer.
#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    #[serde(alias = "is_composite")]
    is_complex: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "sub_questions")]
    sub_queries: Vec<String>,
}

pub struct QuestionClassifier {
    llm: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl QuestionClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, call_timeout: Duration) -> Self {
        Self { llm, call_timeout }
    }

    /// Classify `question`. Never fails: any call, timeout or parse problem
    /// yields a simple classification whose reasoning names the problem.
    pub async fn classify(&self, question: &str) -> Classification {
        let prompt = build_classifier_prompt(question);
        let response = match with_timeout(self.call_timeout, "question classification", self.llm.complete(&prompt)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Classification call failed, treating question as simple");
                return Classification::simple(format!(
                    "Error analyzing question: {}. Treating as simple query.",
                    e
                ));
            }
        };

        let parsed: ClassifierResponse = match parse_json_payload(&response) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Unparseable classification, treating question as simple");
                return Classification::simple(format!(
                    "Error analyzing question: {}. Treating as simple query.",
                    e
                ));
            }
        };

        let classification = normalize(parsed);
        info!(
            composite = classification.is_composite,
            sub_questions = classification.sub_questions.len(),
            "Question classified"
        );
        classification
    }
}

/// Enforce the decomposition bounds on a model answer.
fn normalize(response: ClassifierResponse) -> Classification {
    if !response.is_complex {
        return Classification::simple(response.reasoning);
    }

    let mut sub_questions: Vec<String> = Vec::new();
    for text in response.sub_queries {
        let text = text.trim();
        if !text.is_empty() && !sub_questions.iter().any(|s| s.eq_ignore_ascii_case(text)) {
            sub_questions.push(text.to_string());
        }
    }

    if sub_questions.len() < MIN_SUB_QUESTIONS {
        return Classification::simple(format!(
            "{} (decomposition produced fewer than {} sub-questions; treating as simple query)",
            response.reasoning, MIN_SUB_QUESTIONS
        ));
    }
    if sub_questions.len() > MAX_SUB_QUESTIONS {
        warn!(count = sub_questions.len(), "Too many sub-questions, keeping the first {}", MAX_SUB_QUESTIONS);
        sub_questions.truncate(MAX_SUB_QUESTIONS);
    }

    Classification {
        is_composite: true,
        reasoning: response.reasoning,
        sub_questions,
    }
}

pub fn build_classifier_prompt(question: &str) -> String {
    format!(
        r#"Analyze the following user question and determine if it requires multiple independent SQL queries to answer.

USER QUESTION: {question}

A question is COMPLEX if it asks for:
1. Multiple distinct metrics or calculations (e.g., "total customers AND churn rate by country")
2. Information from different time periods or segments that can't be combined in a single query
3. Multiple unrelated aggregations

A question is SIMPLE if it asks for:
1. A single metric or calculation
2. Data that can be retrieved with one SQL query
3. Related information that can be JOINed in a single query

If the question is COMPLEX, break it down into 2-4 independent sub-questions that can be executed in parallel.
Each sub-question must be answerable on its own and must not depend on the result of another.

Respond in JSON format:
{{
    "is_complex": true/false,
    "reasoning": "Explanation of why the question is complex or simple",
    "sub_queries": ["sub-question 1", "sub-question 2"]
}}

JSON Response:"#
    )
}
