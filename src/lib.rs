//! Natural-language question answering over a relational store.
//!
//! A question is classified as simple or composite; each (sub-)question runs
//! through a self-correcting generate-execute loop, results are assessed for
//! charting, and a synthesizer produces the final narrative answer.

pub mod config;
pub mod db;
pub mod error;
pub mod execution_loop;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod schema_rag;
pub mod server;
pub mod synthesizer;
pub mod visualization;

pub use config::{AppConfig, EngineConfig, LlmConfig};
pub use error::{EngineError, Result};
pub use models::{ExecutionOutcome, FinalResponse, Question, SubResult, Synthesis};
pub use orchestrator::Orchestrator;
