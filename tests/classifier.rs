mod common;

use common::ScriptedModel;
use nlq_engine::error::EngineError;
use nlq_engine::planner::{QuestionClassifier, MAX_SUB_QUESTIONS, MIN_SUB_QUESTIONS};
use std::sync::Arc;
use std::time::Duration;

fn classifier(model: ScriptedModel, timeout: Duration) -> QuestionClassifier {
    QuestionClassifier::new(Arc::new(model), timeout)
}

fn replying(reply: &'static str) -> QuestionClassifier {
    classifier(
        ScriptedModel::new().classify_with(move |_| Ok(reply.to_string())),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_composite_question_is_split() {
    let c = replying(
        r#"```json
{"is_complex": true, "reasoning": "two metrics", "sub_queries": ["How many customers do I have?", "What is the churn rate per country?"]}
```"#,
    )
    .classify("How many customers do I have and what is the churn rate per country?")
    .await;
    assert!(c.is_composite);
    assert_eq!(c.reasoning, "two metrics");
    assert_eq!(
        c.sub_questions,
        vec!["How many customers do I have?", "What is the churn rate per country?"]
    );
}

#[tokio::test]
async fn test_simple_question_never_carries_sub_questions() {
    let c = replying(r#"{"is_complex": false, "reasoning": "one metric", "sub_queries": ["stray"]}"#)
        .classify("How many customers?")
        .await;
    assert!(!c.is_composite);
    assert!(c.sub_questions.is_empty());
}

#[tokio::test]
async fn test_sub_question_count_is_always_bounded() {
    let replies = [
        r#"{"is_complex": true, "reasoning": "r", "sub_queries": []}"#,
        r#"{"is_complex": true, "reasoning": "r", "sub_queries": ["a"]}"#,
        r#"{"is_complex": true, "reasoning": "r", "sub_queries": ["a", "a"]}"#,
        r#"{"is_complex": true, "reasoning": "r", "sub_queries": ["a", "b"]}"#,
        r#"{"is_complex": true, "reasoning": "r", "sub_queries": ["a", "b", "c", "d", "e", "f"]}"#,
        r#"{"is_complex": false, "reasoning": "r"}"#,
        r#"{"is_complex": true}"#,
    ];
    for reply in replies {
        let c = replying(reply).classify("q").await;
        if c.is_composite {
            assert!(
                (MIN_SUB_QUESTIONS..=MAX_SUB_QUESTIONS).contains(&c.sub_questions.len()),
                "{reply} produced {:?}",
                c.sub_questions
            );
        } else {
            assert!(c.sub_questions.is_empty(), "{reply} produced {:?}", c.sub_questions);
        }
    }
}

#[tokio::test]
async fn test_unparseable_answer_degrades_to_simple() {
    let c = replying("I think this question is complex.").classify("q").await;
    assert!(!c.is_composite);
    assert!(c.sub_questions.is_empty());
    assert!(c.reasoning.contains("Error analyzing question"));
}

#[tokio::test]
async fn test_model_failure_degrades_to_simple() {
    let c = classifier(
        ScriptedModel::new().classify_with(|_| Err(EngineError::Llm("connection reset".to_string()))),
        Duration::from_secs(5),
    )
    .classify("q")
    .await;
    assert!(!c.is_composite);
    assert!(c.reasoning.contains("connection reset"));
}

#[tokio::test]
async fn test_model_timeout_degrades_to_simple() {
    let c = classifier(
        ScriptedModel::new().with_delay(Duration::from_millis(500)),
        Duration::from_millis(50),
    )
    .classify("q")
    .await;
    assert!(!c.is_composite);
    assert!(c.reasoning.contains("Timed out"));
}
