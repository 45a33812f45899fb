pub mod executor;
pub mod generator;
pub mod interpreter;
pub mod orchestrator;

use crate::db::StoreError;
use crate::llm::LlmError;
use thiserror::Error;

pub use executor::{DuckDbExecutor, QueryExecutor, QueryFailure, QueryOutcome, QueryResult};
pub use generator::SqlGenerator;
pub use interpreter::ResultInterpreter;
pub use orchestrator::{ChatAnswer, Orchestrator};

/// One result row, keyed by column name in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Chat {0} not found")]
    ChatNotFound(i64),
    #[error("Project {0} not found")]
    ProjectNotFound(i64),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Interpretation failed: {0}")]
    Interpretation(LlmError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Internal error: {0}")]
    Internal(String),
}
