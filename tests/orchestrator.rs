mod common;

use common::{orchestrator, rows, store_error, test_config, ScriptedModel, ScriptedStore};
use nlq_engine::error::EngineError;
use nlq_engine::models::{FinalResponse, Question};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn composite(subs: &'static [&'static str]) -> ScriptedModel {
    ScriptedModel::new().classify_with(move |_| {
        Ok(json!({
            "is_complex": true,
            "reasoning": "independent metrics",
            "sub_queries": subs,
        })
        .to_string())
    })
}

/// Each generated query echoes its question, so the store can tell them apart.
fn echo_store(delay_for: fn(&str) -> Duration, fail_for: fn(&str) -> bool) -> ScriptedStore {
    ScriptedStore::new(move |query| {
        let delay = delay_for(query);
        if fail_for(query) {
            (delay, Err(store_error("no such table: refunds")))
        } else {
            (delay, Ok(rows(json!([{"answer": query}]))))
        }
    })
}

#[tokio::test]
async fn test_sub_results_keep_classifier_order() {
    let model = Arc::new(composite(&["slow first", "fast second", "medium third"]));
    let store = Arc::new(echo_store(
        |query| {
            if query.contains("slow") {
                Duration::from_millis(300)
            } else if query.contains("medium") {
                Duration::from_millis(120)
            } else {
                Duration::from_millis(10)
            }
        },
        |_| false,
    ));
    let engine = orchestrator(model, store, test_config());

    match engine.execute(&Question::new("three things")).await {
        FinalResponse::Complex {
            sub_queries,
            sub_queries_count,
            execution_plan,
            ..
        } => {
            assert_eq!(sub_queries_count, 3);
            assert_eq!(execution_plan, "independent metrics");
            let order: Vec<&str> = sub_queries.iter().map(|s| s.question.as_str()).collect();
            assert_eq!(order, vec!["slow first", "fast second", "medium third"]);
            for sub in &sub_queries {
                assert!(sub.outcome.query().contains(&sub.question));
            }
        }
        other => panic!("expected complex response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sub_questions_run_concurrently() {
    let model = Arc::new(composite(&["a", "b", "c"]));
    let store = Arc::new(echo_store(|_| Duration::from_millis(300), |_| false));
    let engine = orchestrator(model, store, test_config());

    let started = Instant::now();
    let response = engine.execute(&Question::new("abc")).await;
    assert_eq!(response.kind(), "complex");
    assert!(
        started.elapsed() < Duration::from_millis(800),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_one_failing_sub_question_does_not_sink_the_request() {
    let model = Arc::new(composite(&["total customers", "refund volume", "churn by country"]));
    let store = Arc::new(echo_store(|_| Duration::ZERO, |query| query.contains("refund")));
    let engine = orchestrator(model, store, test_config());

    match engine.execute(&Question::new("customers, refunds and churn")).await {
        FinalResponse::Complex {
            sub_queries,
            unified_answer,
            ..
        } => {
            assert_eq!(sub_queries.len(), 3);
            let success: Vec<bool> = sub_queries.iter().map(|s| s.outcome.is_success()).collect();
            assert_eq!(success, vec![true, false, true]);
            assert_eq!(sub_queries[1].outcome.attempts_used(), 3);
            assert!(sub_queries[1]
                .outcome
                .failure_reason()
                .unwrap()
                .contains("no such table: refunds"));
            assert!(sub_queries[1].chart.is_none());
            assert!(!unified_answer.is_empty());
        }
        other => panic!("expected complex response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_partial_failure_with_broken_synthesis_still_answers() {
    let model = Arc::new(
        composite(&["total customers", "refund volume", "churn by country"])
            .synthesize_with(|_| Err(EngineError::Llm("service unavailable".to_string()))),
    );
    let store = Arc::new(echo_store(|_| Duration::ZERO, |query| query.contains("refund")));
    let engine = orchestrator(model, store, test_config());

    match engine.execute(&Question::new("customers, refunds and churn")).await {
        FinalResponse::Complex {
            unified_answer,
            key_insights,
            ..
        } => {
            assert_eq!(unified_answer, "Results from 2 of 3 queries executed successfully.");
            assert!(key_insights.iter().any(|i| i.contains("refund volume: failed")));
        }
        other => panic!("expected complex response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_simple_question_runs_one_loop() {
    let model = Arc::new(ScriptedModel::new());
    let store = Arc::new(ScriptedStore::returning(rows(json!([
        {"country": "USA", "churn_rate": 24.5},
        {"country": "UK", "churn_rate": 23.1}
    ]))));
    let engine = orchestrator(model, store.clone(), test_config());

    match engine.execute(&Question::new("Churn rate per country")).await {
        FinalResponse::Simple {
            result,
            summary,
            insights,
            reasoning,
            ..
        } => {
            assert_eq!(reasoning, "single metric");
            assert!(result.outcome.is_success());
            assert!(result.visualization.unwrap().should_visualize);
            assert!(result.chart.is_some());
            assert_eq!(summary, "All done.");
            assert_eq!(insights.len(), 3);
        }
        other => panic!("expected simple response, got {:?}", other),
    }
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn test_empty_result_is_summarized_without_the_model() {
    let model = Arc::new(
        ScriptedModel::new().synthesize_with(|_| panic!("synthesis must not be asked about zero rows")),
    );
    let store = Arc::new(ScriptedStore::returning(vec![]));
    let engine = orchestrator(model, store, test_config());

    match engine.execute(&Question::new("Customers in Antarctica")).await {
        FinalResponse::Simple { summary, result, .. } => {
            assert_eq!(summary, nlq_engine::synthesizer::NO_DATA_ANSWER);
            assert!(!result.visualization.unwrap().should_visualize);
        }
        other => panic!("expected simple response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_timeout_cancels_sub_questions() {
    let model = Arc::new(composite(&["a", "b"]));
    let store = Arc::new(echo_store(|_| Duration::from_millis(400), |_| false));
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(100);
    let engine = orchestrator(model, store.clone(), config);

    let response = engine.execute(&Question::new("ab")).await;
    match &response {
        FinalResponse::Error { question, error } => {
            assert_eq!(question, "ab");
            assert!(error.contains("Timed out"));
        }
        other => panic!("expected error response, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.calls(), 2);
    assert_eq!(store.completed(), 0);
}

#[tokio::test]
async fn test_blank_question_is_an_error_response() {
    let engine = orchestrator(
        Arc::new(ScriptedModel::new()),
        Arc::new(ScriptedStore::returning(vec![])),
        test_config(),
    );
    let response = engine.execute(&Question::new("   ")).await;
    assert_eq!(response.kind(), "error");
}
