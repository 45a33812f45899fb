//! Relational bookkeeping for projects, chats and turns.
//!
//! Everything lives in one DuckDB database reached through an r2d2 pool.
//! Ids come from sequences, so ordering turns by id is ordering them by
//! arrival. DuckDB has no `ON DELETE CASCADE`; deletes cascade by hand
//! inside a transaction.

use crate::catalog::descriptor::SchemaDescriptor;
use crate::catalog::{Project, SchemaCatalog};
use crate::conversation::{Chat, ConversationStore, ConversationTurn, NewTurn};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Connection, Row};
use r2d2::Pool;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CREATE_SEQUENCES_SQL: &str = "
    CREATE SEQUENCE IF NOT EXISTS project_id_seq START 1;
    CREATE SEQUENCE IF NOT EXISTS chat_id_seq START 1;
    CREATE SEQUENCE IF NOT EXISTS turn_id_seq START 1;
";

const CREATE_PROJECTS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id BIGINT PRIMARY KEY DEFAULT nextval('project_id_seq'),
        owner VARCHAR NOT NULL,
        name VARCHAR NOT NULL,
        description VARCHAR,
        store_path VARCHAR NOT NULL DEFAULT '',
        original_filename VARCHAR,
        schema_json VARCHAR,
        created_at VARCHAR NOT NULL,
        updated_at VARCHAR
    );
";

const CREATE_CHATS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS chats (
        id BIGINT PRIMARY KEY DEFAULT nextval('chat_id_seq'),
        owner VARCHAR NOT NULL,
        project_id BIGINT NOT NULL,
        title VARCHAR NOT NULL,
        created_at VARCHAR NOT NULL
    );
";

const CREATE_TURNS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS turns (
        id BIGINT PRIMARY KEY DEFAULT nextval('turn_id_seq'),
        chat_id BIGINT NOT NULL,
        role VARCHAR NOT NULL,
        content VARCHAR NOT NULL,
        sql_query VARCHAR,
        query_result VARCHAR,
        error_message VARCHAR,
        created_at VARCHAR NOT NULL
    );
";

const ALL_TABLE_CREATION_SQL: &[&str] = &[
    CREATE_SEQUENCES_SQL,
    CREATE_PROJECTS_TABLE_SQL,
    CREATE_CHATS_TABLE_SQL,
    CREATE_TURNS_TABLE_SQL,
];

const PROJECT_COLUMNS: &str =
    "id, owner, name, description, store_path, original_filename, schema_json, created_at";
const CHAT_COLUMNS: &str = "id, owner, project_id, title, created_at";
const TURN_COLUMNS: &str =
    "id, chat_id, role, content, sql_query, query_result, error_message, created_at";

pub struct MetadataStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl MetadataStore {
    /// Wraps the pool and creates any missing tables.
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Result<Self, StoreError> {
        let conn = pool.get()?;
        for statement in ALL_TABLE_CREATION_SQL {
            conn.execute_batch(statement)?;
        }
        info!("Metadata store ready");
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn create_project(
        &self,
        owner: &str,
        name: &str,
        description: Option<&str>,
        original_filename: Option<&str>,
    ) -> Result<i64, StoreError> {
        let owner = owner.to_string();
        let name = name.to_string();
        let description = description.map(str::to_string);
        let original_filename = original_filename.map(str::to_string);

        self.with_conn(move |conn| {
            let id = conn.query_row(
                "INSERT INTO projects (owner, name, description, original_filename, created_at) \
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
                params![owner, name, description, original_filename, now()],
                |row| row.get(0),
            )?;
            debug!("Created project {} for {}", id, owner);
            Ok(id)
        })
        .await
    }

    pub async fn set_store_path(&self, project_id: i64, store_path: &Path) -> Result<(), StoreError> {
        let store_path = store_path.to_string_lossy().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE projects SET store_path = ?, updated_at = ? WHERE id = ?",
                params![store_path, now(), project_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_projects(&self, owner: &str) -> Result<Vec<Project>, StoreError> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM projects WHERE owner = ? ORDER BY id",
                PROJECT_COLUMNS
            ))?;
            let rows = stmt.query_map([&owner], raw_project)?;
            let mut projects = Vec::new();
            for row in rows {
                projects.push(row?.into_project()?);
            }
            Ok(projects)
        })
        .await
    }

    /// Removes the project, its chats and their turns.
    pub async fn delete_project(&self, project_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM turns WHERE chat_id IN (SELECT id FROM chats WHERE project_id = ?)",
                [project_id],
            )?;
            tx.execute("DELETE FROM chats WHERE project_id = ?", [project_id])?;
            tx.execute("DELETE FROM projects WHERE id = ?", [project_id])?;
            tx.commit()?;
            info!("Deleted project {}", project_id);
            Ok(())
        })
        .await
    }

    pub async fn create_chat(
        &self,
        owner: &str,
        project_id: i64,
        title: Option<&str>,
    ) -> Result<Chat, StoreError> {
        let owner = owner.to_string();
        let title = title.unwrap_or("New Chat").to_string();
        self.with_conn(move |conn| {
            let chat = conn.query_row(
                &format!(
                    "INSERT INTO chats (owner, project_id, title, created_at) \
                     VALUES (?, ?, ?, ?) RETURNING {}",
                    CHAT_COLUMNS
                ),
                params![owner, project_id, title, now()],
                raw_chat,
            )?;
            chat.into_chat()
        })
        .await
    }

    /// Chats of `owner`, newest first, optionally limited to one project.
    pub async fn list_chats(&self, owner: &str, project_id: Option<i64>) -> Result<Vec<Chat>, StoreError> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let raw = match project_id {
                Some(project_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM chats WHERE owner = ? AND project_id = ? ORDER BY id DESC",
                        CHAT_COLUMNS
                    ))?;
                    stmt.query_map(params![owner, project_id], raw_chat)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM chats WHERE owner = ? ORDER BY id DESC",
                        CHAT_COLUMNS
                    ))?;
                    stmt.query_map([&owner], raw_chat)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };
            raw.into_iter().map(RawChat::into_chat).collect()
        })
        .await
    }

    /// Removes the chat and every turn in it.
    pub async fn delete_chat(&self, chat_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM turns WHERE chat_id = ?", [chat_id])?;
            tx.execute("DELETE FROM chats WHERE id = ?", [chat_id])?;
            tx.commit()?;
            info!("Deleted chat {}", chat_id);
            Ok(())
        })
        .await
    }

    /// Full transcript of a chat, oldest first.
    pub async fn turns(&self, chat_id: i64) -> Result<Vec<ConversationTurn>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM turns WHERE chat_id = ? ORDER BY id",
                TURN_COLUMNS
            ))?;
            let raw = stmt
                .query_map([chat_id], raw_turn)?
                .collect::<Result<Vec<_>, _>>()?;
            raw.into_iter().map(RawTurn::into_turn).collect()
        })
        .await
    }
}

#[async_trait]
impl SchemaCatalog for MetadataStore {
    async fn project(&self, project_id: i64) -> Result<Option<Project>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM projects WHERE id = ?",
                PROJECT_COLUMNS
            ))?;
            let mut rows = stmt.query_map([project_id], raw_project)?;
            match rows.next() {
                Some(row) => Ok(Some(row?.into_project()?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn replace_schema(&self, project_id: i64, schema: &SchemaDescriptor) -> Result<(), StoreError> {
        let schema_json = serde_json::to_string(schema)?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE projects SET schema_json = ?, updated_at = ? WHERE id = ?",
                params![schema_json, now(), project_id],
            )?;
            debug!("Replaced schema of project {}", project_id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConversationStore for MetadataStore {
    async fn chat(&self, chat_id: i64) -> Result<Option<Chat>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM chats WHERE id = ?", CHAT_COLUMNS))?;
            let mut rows = stmt.query_map([chat_id], raw_chat)?;
            match rows.next() {
                Some(row) => Ok(Some(row?.into_chat()?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn append_turn(&self, chat_id: i64, turn: NewTurn) -> Result<ConversationTurn, StoreError> {
        self.with_conn(move |conn| {
            let raw = conn.query_row(
                &format!(
                    "INSERT INTO turns (chat_id, role, content, sql_query, query_result, error_message, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {}",
                    TURN_COLUMNS
                ),
                params![
                    chat_id,
                    turn.role.as_str(),
                    turn.content,
                    turn.sql_query,
                    turn.query_result,
                    turn.error_message,
                    now()
                ],
                raw_turn,
            )?;
            debug!("Appended {} turn {} to chat {}", raw.role, raw.id, chat_id);
            raw.into_turn()
        })
        .await
    }

    async fn recent_turns(&self, chat_id: i64, n: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM turns WHERE chat_id = ? ORDER BY id DESC LIMIT {}",
                TURN_COLUMNS, n
            ))?;
            let mut raw = stmt
                .query_map([chat_id], raw_turn)?
                .collect::<Result<Vec<_>, _>>()?;
            raw.reverse();
            raw.into_iter().map(RawTurn::into_turn).collect()
        })
        .await
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

// Rows are read into plain structs first; the fallible conversions run
// outside the duckdb row callback.

struct RawProject {
    id: i64,
    owner: String,
    name: String,
    description: Option<String>,
    store_path: String,
    original_filename: Option<String>,
    schema_json: Option<String>,
    created_at: String,
}

fn raw_project(row: &Row<'_>) -> duckdb::Result<RawProject> {
    Ok(RawProject {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        store_path: row.get(4)?,
        original_filename: row.get(5)?,
        schema_json: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl RawProject {
    fn into_project(self) -> Result<Project, StoreError> {
        Ok(Project {
            id: self.id,
            owner: self.owner,
            name: self.name,
            description: self.description,
            store_path: PathBuf::from(self.store_path),
            original_filename: self.original_filename,
            schema: self
                .schema_json
                .as_deref()
                .map(SchemaDescriptor::from_json_str)
                .unwrap_or_default(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct RawChat {
    id: i64,
    owner: String,
    project_id: i64,
    title: String,
    created_at: String,
}

fn raw_chat(row: &Row<'_>) -> duckdb::Result<RawChat> {
    Ok(RawChat {
        id: row.get(0)?,
        owner: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl RawChat {
    fn into_chat(self) -> Result<Chat, StoreError> {
        Ok(Chat {
            id: self.id,
            project_id: self.project_id,
            owner: self.owner,
            title: self.title,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct RawTurn {
    id: i64,
    chat_id: i64,
    role: String,
    content: String,
    sql_query: Option<String>,
    query_result: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

fn raw_turn(row: &Row<'_>) -> duckdb::Result<RawTurn> {
    Ok(RawTurn {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        sql_query: row.get(4)?,
        query_result: row.get(5)?,
        error_message: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl RawTurn {
    fn into_turn(self) -> Result<ConversationTurn, StoreError> {
        Ok(ConversationTurn {
            id: self.id,
            chat_id: self.chat_id,
            role: self.role.parse()?,
            content: self.content,
            sql_query: self.sql_query,
            query_result: self.query_result,
            error_message: self.error_message,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    fn memory_store() -> MetadataStore {
        let manager = DuckDBConnectionManager::new(":memory:").unwrap();
        let pool = Pool::builder().max_size(2).build(manager).unwrap();
        MetadataStore::new(pool).unwrap()
    }

    async fn chat_with_turns(store: &MetadataStore, turns: usize) -> Chat {
        let project_id = store.create_project("alice", "sales", None, None).await.unwrap();
        let chat = store.create_chat("alice", project_id, None).await.unwrap();
        for i in 0..turns {
            let turn = if i % 2 == 0 {
                NewTurn::user(format!("question {}", i))
            } else {
                NewTurn::assistant(format!("answer {}", i))
            };
            store.append_turn(chat.id, turn).await.unwrap();
        }
        chat
    }

    #[tokio::test]
    async fn recent_turns_returns_the_latest_window_oldest_first() {
        let store = memory_store();
        let chat = chat_with_turns(&store, 8).await;

        let recent = store.recent_turns(chat.id, 5).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["answer 3", "question 4", "answer 5", "question 6", "answer 7"]
        );
        assert!(recent.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[tokio::test]
    async fn recent_turns_never_exceeds_what_is_stored() {
        let store = memory_store();
        let chat = chat_with_turns(&store, 3).await;

        let recent = store.recent_turns(chat.id, 5).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].role, Role::User);

        let empty = chat_with_turns(&store, 0).await;
        assert!(store.recent_turns(empty.id, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appended_turns_keep_their_fields() {
        let store = memory_store();
        let chat = chat_with_turns(&store, 0).await;

        let stored = store
            .append_turn(
                chat.id,
                NewTurn::assistant("I encountered an error: boom")
                    .with_sql("SELECT nope")
                    .with_error("boom"),
            )
            .await
            .unwrap();

        assert_eq!(stored.role, Role::Assistant);
        assert_eq!(stored.sql_query.as_deref(), Some("SELECT nope"));
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.query_result.is_none());
        assert_eq!(store.turns(chat.id).await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn deleting_a_chat_removes_its_turns() {
        let store = memory_store();
        let chat = chat_with_turns(&store, 4).await;

        store.delete_chat(chat.id).await.unwrap();

        assert!(store.chat(chat.id).await.unwrap().is_none());
        assert!(store.turns(chat.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_project_cascades_to_chats_and_turns() {
        let store = memory_store();
        let chat = chat_with_turns(&store, 2).await;

        store.delete_project(chat.project_id).await.unwrap();

        assert!(store.project(chat.project_id).await.unwrap().is_none());
        assert!(store.chat(chat.id).await.unwrap().is_none());
        assert!(store.turns(chat.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_is_replaced_wholesale() {
        let store = memory_store();
        let project_id = store
            .create_project("alice", "sales", Some("Q3 numbers"), Some("sales.csv"))
            .await
            .unwrap();

        let first = SchemaDescriptor::from_json_str(
            r#"{"tables": [{"table_name": "data", "columns": []}], "insights": "seasonal"}"#,
        );
        store.replace_schema(project_id, &first).await.unwrap();

        let second = SchemaDescriptor::from_json_str(r#"{"relationships": "none"}"#);
        store.replace_schema(project_id, &second).await.unwrap();

        let project = store.project(project_id).await.unwrap().unwrap();
        assert_eq!(project.schema, second);
        assert_eq!(project.description.as_deref(), Some("Q3 numbers"));
        assert_eq!(project.original_filename.as_deref(), Some("sales.csv"));
    }

    #[tokio::test]
    async fn chats_list_newest_first_per_owner() {
        let store = memory_store();
        let project_id = store.create_project("alice", "sales", None, None).await.unwrap();
        let older = store.create_chat("alice", project_id, Some("first")).await.unwrap();
        let newer = store.create_chat("alice", project_id, None).await.unwrap();
        store.create_chat("bob", project_id, None).await.unwrap();

        let chats = store.list_chats("alice", Some(project_id)).await.unwrap();
        let ids: Vec<i64> = chats.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(chats[0].title, "New Chat");
        assert_eq!(store.list_chats("bob", None).await.unwrap().len(), 1);
    }
}
