use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::Corrupt(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: i64,
    pub project_id: i64,
    pub owner: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub chat_id: i64,
    pub role: Role,
    pub content: String,
    pub sql_query: Option<String>,
    /// Result rows serialized as a JSON array
    pub query_result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A turn before the store has assigned it an id and timestamp
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    pub sql_query: Option<String>,
    pub query_result: Option<String>,
    pub error_message: Option<String>,
}

impl NewTurn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            sql_query: None,
            query_result: None,
            error_message: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql_query = Some(sql.into());
        self
    }

    pub fn with_result(mut self, serialized_rows: String) -> Self {
        self.query_result = Some(serialized_rows);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Append-only chat history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn chat(&self, chat_id: i64) -> Result<Option<Chat>, StoreError>;

    async fn append_turn(&self, chat_id: i64, turn: NewTurn) -> Result<ConversationTurn, StoreError>;

    /// At most `n` most recent turns, oldest first.
    async fn recent_turns(&self, chat_id: i64, n: usize) -> Result<Vec<ConversationTurn>, StoreError>;
}
