//! Query Generator prompts.

use crate::models::Attempt;
use crate::schema_rag::RetrievalContext;
use std::fmt::Write;

const NOT_AVAILABLE: &str = "N/A";

/// Build the generation prompt for one attempt.
///
/// On retries every earlier attempt is listed in order, each with its query
/// and the reason it failed.
pub fn build_query_prompt(question: &str, context: &RetrievalContext, history: &[Attempt]) -> String {
    let mut prompt = format!(
        "You are an expert SQL query generator. Generate a SQL query to answer the user's question.\n\n\
         USER QUESTION: {}\n\n\
         AVAILABLE TABLES:\n",
        question
    );

    if context.tables.is_empty() {
        prompt.push_str("\n(no table descriptions were retrieved; inspect sqlite_master if needed)\n");
    }
    for table in &context.tables {
        let _ = write!(prompt, "\n{}\n", table.document);
    }

    if !context.examples.is_empty() {
        prompt.push_str("\n\nEXAMPLE QUERIES:\n");
        for example in &context.examples {
            let reasoning = if example.example.reasoning.is_empty() {
                NOT_AVAILABLE
            } else {
                example.example.reasoning.as_str()
            };
            let _ = write!(
                prompt,
                "\nQuestion: {}\nSQL: {}\nReasoning: {}\n",
                example.example.question, example.example.query, reasoning
            );
        }
    }

    let failures: Vec<&Attempt> = history.iter().filter(|a| a.failure_reason().is_some()).collect();
    if !failures.is_empty() {
        prompt.push_str("\n\nPREVIOUS FAILED ATTEMPTS:\n");
        for attempt in &failures {
            let query = if attempt.query.trim().is_empty() {
                "(no query was produced)"
            } else {
                attempt.query.as_str()
            };
            let _ = write!(
                prompt,
                "\nAttempt {}:\nSQL: {}\nError: {}\n",
                attempt.index,
                query,
                attempt.failure_reason().unwrap_or(NOT_AVAILABLE)
            );
        }
        prompt.push_str(
            "\nEvery attempt above failed. Diagnose each error, then write a corrected query \
             that avoids all of them. Do not repeat a query that already failed.\n",
        );
    }

    prompt.push_str(
        "\n\nINSTRUCTIONS:\n\
         1. Generate a valid SQLite query\n\
         2. Use proper JOINs based on table relationships\n\
         3. Follow the patterns from example queries when applicable\n\
         4. Keep the query simple and efficient\n\
         5. Return ONLY the SQL query, no explanations\n\n\
         SQL Query:",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ExampleQuery;
    use crate::models::AttemptStatus;
    use crate::schema_rag::{ExampleMatch, TableMatch};

    fn context() -> RetrievalContext {
        RetrievalContext {
            tables: vec![TableMatch {
                table: "account".to_string(),
                description: "Customer accounts".to_string(),
                document: "Table: account\nDescription: Customer accounts".to_string(),
                columns: vec![],
                score: 0.9,
            }],
            examples: vec![ExampleMatch {
                example: ExampleQuery {
                    question: "How many customers?".to_string(),
                    query: "SELECT COUNT(*) FROM account".to_string(),
                    reasoning: String::new(),
                },
                main_table: "account".to_string(),
                score: 0.8,
            }],
        }
    }

    fn failed(index: u32, query: &str, reason: &str) -> Attempt {
        Attempt {
            index,
            query: query.to_string(),
            status: AttemptStatus::Failed {
                reason: reason.to_string(),
            },
        }
    }

    #[test]
    fn test_first_attempt_prompt() {
        let prompt = build_query_prompt("How many customers?", &context(), &[]);
        assert!(prompt.contains("USER QUESTION: How many customers?"));
        assert!(prompt.contains("Table: account"));
        assert!(prompt.contains("SQL: SELECT COUNT(*) FROM account"));
        assert!(prompt.contains("Reasoning: N/A"));
        assert!(!prompt.contains("PREVIOUS FAILED ATTEMPTS"));
        assert!(prompt.ends_with("SQL Query:"));
    }

    #[test]
    fn test_retry_prompt_lists_every_failure_in_order() {
        let history = vec![
            failed(1, "SELECT nope FROM account", "no such column: nope"),
            failed(2, "", "Parse error: Generated query is empty"),
        ];
        let prompt = build_query_prompt("q", &RetrievalContext::default(), &history);
        let first = prompt.find("no such column: nope").unwrap();
        let second = prompt.find("(no query was produced)").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Attempt 2:"));
        assert!(prompt.contains("Diagnose each error"));
    }
}
