//! Scripted fakes of the engine's external capabilities.

#![allow(dead_code)]

use async_trait::async_trait;
use nlq_engine::config::EngineConfig;
use nlq_engine::db::DataStore;
use nlq_engine::error::{EngineError, Result};
use nlq_engine::execution_loop::ExecutionLoop;
use nlq_engine::llm::LanguageModel;
use nlq_engine::models::Row;
use nlq_engine::orchestrator::Orchestrator;
use nlq_engine::schema_rag::{ContextRetriever, ExampleMatch, TableMatch};
use nlq_engine::visualization::PlotlyRenderer;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reply = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Language model answering by prompt kind. Query generation receives the
/// question text and the number of prompts seen for that question so far.
pub struct ScriptedModel {
    pub classification: Reply,
    pub synthesis: Reply,
    pub generation: Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>,
    pub delay: Duration,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            classification: Box::new(|_| Ok(r#"{"is_complex": false, "reasoning": "single metric", "sub_queries": []}"#.to_string())),
            synthesis: Box::new(|_| Ok(r#"{"unified_answer": "All done.", "key_insights": ["one", "two", "three"]}"#.to_string())),
            generation: Box::new(|question, _| Ok(format!("SELECT '{}'", question))),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn classify_with(mut self, reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        self.classification = Box::new(reply);
        self
    }

    pub fn synthesize_with(mut self, reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        self.synthesis = Box::new(reply);
        self
    }

    pub fn generate_with(mut self, reply: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static) -> Self {
        self.generation = Box::new(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn generation_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("SQL Query:"))
            .cloned()
            .collect()
    }
}

/// The text after "USER QUESTION: " on its line.
pub fn question_of(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("USER QUESTION: "))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let seen = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            let question = question_of(prompt);
            prompts
                .iter()
                .filter(|p| p.contains("SQL Query:") && question_of(p) == question)
                .count()
        };
        if prompt.contains("\"is_complex\"") {
            (self.classification)(prompt)
        } else if prompt.contains("\"unified_answer\"") {
            (self.synthesis)(prompt)
        } else {
            (self.generation)(&question_of(prompt), seen)
        }
    }
}

type Handler = Box<dyn Fn(&str) -> (Duration, Result<Vec<Row>>) + Send + Sync>;

/// Store answering each query through a handler that also picks a delay.
pub struct ScriptedStore {
    handler: Handler,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(handler: impl Fn(&str) -> (Duration, Result<Vec<Row>>) + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Every query returns `rows` immediately.
    pub fn returning(rows: Vec<Row>) -> Self {
        Self::new(move |_| (Duration::ZERO, Ok(rows.clone())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for ScriptedStore {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = (self.handler)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

pub fn store_error(message: &str) -> EngineError {
    EngineError::Store(message.to_string())
}

/// Retriever with nothing to offer, or one that always fails.
pub struct StaticRetriever {
    pub fail: bool,
}

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn search_tables(&self, _text: &str, _k: usize) -> Result<Vec<TableMatch>> {
        if self.fail {
            return Err(EngineError::Retrieval("index unavailable".to_string()));
        }
        Ok(vec![TableMatch {
            table: "account".to_string(),
            description: "Customer accounts".to_string(),
            document: "Table: account\nDescription: Customer accounts".to_string(),
            columns: vec![],
            score: 1.0,
        }])
    }

    async fn search_examples(
        &self,
        _text: &str,
        _k: usize,
        _datasource: Option<&str>,
        _table: Option<&str>,
    ) -> Result<Vec<ExampleMatch>> {
        if self.fail {
            return Err(EngineError::Retrieval("index unavailable".to_string()));
        }
        Ok(vec![])
    }
}

pub fn rows(value: Value) -> Vec<Row> {
    value
        .as_array()
        .expect("array of rows")
        .iter()
        .map(|r| r.as_object().cloned().expect("row object"))
        .collect()
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        call_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(20),
        ..EngineConfig::default()
    }
}

pub fn execution_loop(model: Arc<ScriptedModel>, store: Arc<ScriptedStore>, config: EngineConfig) -> ExecutionLoop {
    ExecutionLoop::new(
        model,
        store,
        Arc::new(StaticRetriever { fail: false }),
        Arc::new(PlotlyRenderer),
        config,
    )
}

pub fn orchestrator(model: Arc<ScriptedModel>, store: Arc<ScriptedStore>, config: EngineConfig) -> Orchestrator {
    Orchestrator::new(
        model,
        store,
        Arc::new(StaticRetriever { fail: false }),
        Arc::new(PlotlyRenderer),
        config,
    )
}
