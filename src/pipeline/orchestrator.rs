//! Answers one question in one chat.
//!
//! The flow is strictly sequential:
//!
//! ```text
//! RECEIVED -> GENERATING_SQL -> EXECUTING -> INTERPRETING -> DONE
//!                  |                |
//!                  v                v
//!               FAILED         REPAIRING -> RE_EXECUTING -> INTERPRETING -> DONE
//!                                   |              |
//!                                   v              v
//!                                FAILED         FAILED
//! ```
//!
//! The user turn is stored before anything else happens. Every path after
//! that stores exactly one assistant turn, except a missing model
//! configuration, which fails the request without one.

use crate::catalog::{Project, SchemaCatalog};
use crate::conversation::{Chat, ConversationStore, ConversationTurn, NewTurn};
use crate::llm::models::{HistoryEntry, VisualizationType};
use crate::llm::LanguageModel;
use crate::pipeline::executor::{QueryExecutor, QueryFailure, QueryOutcome, QueryResult};
use crate::pipeline::generator::SqlGenerator;
use crate::pipeline::interpreter::ResultInterpreter;
use crate::pipeline::{PipelineError, Row};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    GeneratingSql,
    Executing,
    Repairing,
    ReExecuting,
    Interpreting,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::GeneratingSql => "GENERATING_SQL",
            Stage::Executing => "EXECUTING",
            Stage::Repairing => "REPAIRING",
            Stage::ReExecuting => "RE_EXECUTING",
            Stage::Interpreting => "INTERPRETING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What the caller gets back for one question.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub turn: ConversationTurn,
    /// Result columns in query order, empty when no query succeeded.
    pub columns: Vec<String>,
    pub data: Option<Vec<Row>>,
    pub visualization_type: Option<VisualizationType>,
    pub insights: Vec<String>,
}

impl ChatAnswer {
    fn without_data(turn: ConversationTurn) -> Self {
        Self {
            turn,
            columns: Vec::new(),
            data: None,
            visualization_type: None,
            insights: Vec::new(),
        }
    }
}

pub struct Orchestrator {
    conversations: Arc<dyn ConversationStore>,
    catalog: Arc<dyn SchemaCatalog>,
    executor: Arc<dyn QueryExecutor>,
    model: Option<Arc<dyn LanguageModel>>,
    history_window: usize,
    preview_rows: usize,
}

impl Orchestrator {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        catalog: Arc<dyn SchemaCatalog>,
        executor: Arc<dyn QueryExecutor>,
        model: Option<Arc<dyn LanguageModel>>,
        history_window: usize,
        preview_rows: usize,
    ) -> Self {
        Self {
            conversations,
            catalog,
            executor,
            model,
            history_window,
            preview_rows,
        }
    }

    /// Fails only when the chat cannot be resolved for `user`, when no
    /// model is configured, or when the interpretation call itself fails.
    /// SQL generation and execution problems come back as an `Ok` answer
    /// whose turn carries the error.
    pub async fn answer_question(
        &self,
        user: &str,
        chat_id: i64,
        question: &str,
    ) -> Result<ChatAnswer, PipelineError> {
        let chat = match self.conversations.chat(chat_id).await? {
            Some(chat) if chat.owner == user => chat,
            _ => return Err(PipelineError::ChatNotFound(chat_id)),
        };

        self.conversations
            .append_turn(chat.id, NewTurn::user(question))
            .await?;
        self.transition(chat.id, Stage::Received);

        let Some(model) = self.model.clone() else {
            warn!("Chat {}: no language model configured", chat.id);
            return Err(PipelineError::Configuration(
                "No language model is configured".to_string(),
            ));
        };

        match self.run(&chat, question, model).await {
            Ok(answer) => Ok(answer),
            // Already recorded alongside the SQL that produced the rows
            Err(PipelineError::Interpretation(e)) => Err(PipelineError::Interpretation(e)),
            Err(e) => {
                error!("Chat {}: unhandled pipeline error: {}", chat.id, e);
                self.transition(chat.id, Stage::Failed);
                let turn = NewTurn::assistant(format!("An error occurred: {}", e))
                    .with_error(e.to_string());
                if let Err(store_err) = self.conversations.append_turn(chat.id, turn).await {
                    error!("Chat {}: could not record the error turn: {}", chat.id, store_err);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        chat: &Chat,
        question: &str,
        model: Arc<dyn LanguageModel>,
    ) -> Result<ChatAnswer, PipelineError> {
        let project = self
            .catalog
            .project(chat.project_id)
            .await?
            .ok_or(PipelineError::ProjectNotFound(chat.project_id))?;

        let history: Vec<HistoryEntry> = self
            .conversations
            .recent_turns(chat.id, self.history_window)
            .await?
            .into_iter()
            .map(|turn| HistoryEntry {
                role: turn.role,
                content: turn.content,
            })
            .collect();

        let generator = SqlGenerator::new(model.clone());

        self.transition(chat.id, Stage::GeneratingSql);
        let sql = match generator.generate(question, &project.schema, &history).await {
            Ok(sql) => sql,
            Err(e) => {
                warn!("Chat {}: SQL generation failed: {}", chat.id, e);
                self.transition(chat.id, Stage::Failed);
                let turn = NewTurn::assistant(format!("I couldn't generate a SQL query: {}", e))
                    .with_error(e.to_string());
                return self.record_without_data(chat.id, turn).await;
            }
        };

        self.transition(chat.id, Stage::Executing);
        let (sql, result) = match self.executor.execute(&project.store_path, &sql).await {
            QueryOutcome::Success(result) => (sql, result),
            QueryOutcome::Failure(failure) => {
                match self.repair(chat, &project, &generator, failure).await? {
                    Ok(repaired) => repaired,
                    Err(answer) => return Ok(answer),
                }
            }
        };

        self.transition(chat.id, Stage::Interpreting);
        let interpreter = ResultInterpreter::new(model, self.preview_rows);
        let interpretation = match interpreter.interpret(question, &sql, &result.rows).await {
            Ok(interpretation) => interpretation,
            Err(e) => {
                error!("Chat {}: interpretation call failed: {}", chat.id, e);
                self.transition(chat.id, Stage::Failed);
                let turn = NewTurn::assistant(format!("An error occurred: {}", e))
                    .with_sql(&sql)
                    .with_error(e.to_string());
                if let Err(store_err) = self.conversations.append_turn(chat.id, turn).await {
                    error!("Chat {}: could not record the error turn: {}", chat.id, store_err);
                }
                return Err(PipelineError::Interpretation(e));
            }
        };

        let serialized = serde_json::to_string(&result.rows)
            .map_err(|e| PipelineError::Internal(format!("Could not serialize rows: {}", e)))?;
        let turn = self
            .conversations
            .append_turn(
                chat.id,
                NewTurn::assistant(interpretation.answer)
                    .with_sql(&sql)
                    .with_result(serialized),
            )
            .await?;
        self.transition(chat.id, Stage::Done);

        Ok(ChatAnswer {
            turn,
            columns: result.columns,
            data: Some(result.rows),
            visualization_type: Some(interpretation.visualization_type),
            insights: interpretation.insights,
        })
    }

    /// The single repair cycle. `Ok(Err(answer))` means the question ended
    /// in a recorded failure.
    async fn repair(
        &self,
        chat: &Chat,
        project: &Project,
        generator: &SqlGenerator,
        failure: QueryFailure,
    ) -> Result<Result<(String, QueryResult), ChatAnswer>, PipelineError> {
        debug!("Chat {}: execution failed: {}", chat.id, failure.error);
        self.transition(chat.id, Stage::Repairing);

        let repaired_sql = match generator
            .repair(&failure.sql, &failure.error, &project.schema)
            .await
        {
            Ok(sql) => sql,
            Err(e) => {
                warn!("Chat {}: repair call failed: {}", chat.id, e);
                return self.record_failure(chat.id, failure).await.map(Err);
            }
        };

        self.transition(chat.id, Stage::ReExecuting);
        match self.executor.execute(&project.store_path, &repaired_sql).await {
            QueryOutcome::Success(result) => {
                info!("Chat {}: repaired SQL succeeded", chat.id);
                Ok(Ok((repaired_sql, result)))
            }
            QueryOutcome::Failure(second) => {
                warn!("Chat {}: repaired SQL failed too: {}", chat.id, second.error);
                self.record_failure(chat.id, second).await.map(Err)
            }
        }
    }

    async fn record_failure(
        &self,
        chat_id: i64,
        failure: QueryFailure,
    ) -> Result<ChatAnswer, PipelineError> {
        self.transition(chat_id, Stage::Failed);
        let turn = NewTurn::assistant(format!("I encountered an error: {}", failure.error))
            .with_sql(failure.sql)
            .with_error(failure.error);
        self.record_without_data(chat_id, turn).await
    }

    async fn record_without_data(
        &self,
        chat_id: i64,
        turn: NewTurn,
    ) -> Result<ChatAnswer, PipelineError> {
        let turn = self.conversations.append_turn(chat_id, turn).await?;
        Ok(ChatAnswer::without_data(turn))
    }

    fn transition(&self, chat_id: i64, stage: Stage) {
        debug!("Chat {}: {}", chat_id, stage);
    }
}
