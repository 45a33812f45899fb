use crate::db::project_store::ProjectStoreManager;
use crate::pipeline::Row;
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use duckdb::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Rows of a successful query, in result order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

/// A query that did not run, with the database's own error text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub error: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(QueryResult),
    Failure(QueryFailure),
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success(_))
    }
}

/// Runs one SQL statement against one project store. Failures are values,
/// never errors, so the caller can decide whether to repair.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, store_path: &Path, sql: &str) -> QueryOutcome;
}

const INTERRUPT_RETRY: Duration = Duration::from_millis(100);

pub struct DuckDbExecutor {
    stores: Arc<ProjectStoreManager>,
    timeout: Duration,
}

impl DuckDbExecutor {
    pub fn new(stores: Arc<ProjectStoreManager>, timeout: Duration) -> Self {
        Self { stores, timeout }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbExecutor {
    async fn execute(&self, store_path: &Path, sql: &str) -> QueryOutcome {
        let failure = |error: String| {
            QueryOutcome::Failure(QueryFailure {
                error,
                sql: sql.to_string(),
            })
        };

        if !store_path.exists() {
            return failure(format!("Store not found: {}", store_path.display()));
        }

        let stores = self.stores.clone();
        let store_path: PathBuf = store_path.to_path_buf();
        let conn = match tokio::task::spawn_blocking(move || stores.open_for_query(&store_path)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return failure(e.to_string()),
            Err(join_err) => {
                error!("Task join error: {}", join_err);
                return failure(format!("Query task failed: {}", join_err));
            }
        };
        let interrupt = conn.interrupt_handle();
        let sql_to_execute = sql.to_string();

        // The connection lives only inside the task and is closed when it ends
        let mut blocking_task = tokio::task::spawn_blocking(move || {
            let start_time = Instant::now();
            let result = run_sql(&conn, &sql_to_execute)?;
            debug!(
                "Query returned {} rows in {}ms",
                result.row_count,
                start_time.elapsed().as_millis()
            );
            Ok::<_, String>(result)
        });

        match tokio::time::timeout(self.timeout, &mut blocking_task).await {
            Ok(Ok(Ok(result))) => {
                info!("Query succeeded with {} rows", result.row_count);
                QueryOutcome::Success(result)
            }
            Ok(Ok(Err(db_error))) => {
                debug!("Query failed: {}", db_error);
                failure(db_error)
            }
            Ok(Err(join_err)) => {
                error!("Task join error: {}", join_err);
                failure(format!("Query task failed: {}", join_err))
            }
            Err(_) => {
                error!("Query exceeded {:?}, interrupting", self.timeout);
                // An interrupt that lands before execution starts is lost, so
                // keep interrupting until the task hands the connection back.
                loop {
                    interrupt.interrupt();
                    match tokio::time::timeout(INTERRUPT_RETRY, &mut blocking_task).await {
                        Ok(_) => break,
                        Err(_) => debug!("Query still running after interrupt"),
                    }
                }
                failure(format!(
                    "Query timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

/// Executes `sql` on an open connection and materialises every row.
/// The error string is DuckDB's message, unmodified.
pub(crate) fn run_sql(conn: &Connection, sql: &str) -> Result<QueryResult, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let arrow_batch = stmt.query_arrow([]).map_err(|e| e.to_string())?;

    let schema = unique_field_names(&arrow_batch.get_schema());
    let columns = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();

    let record_batches = arrow_batch
        .map(|batch| RecordBatch::try_new(schema.clone(), batch.columns().to_vec()))
        .collect::<Result<Vec<RecordBatch>, _>>()
        .map_err(|e| format!("Failed to read result: {}", e))?;
    let rows = batches_to_rows(&record_batches)?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
    })
}

/// Rows are keyed by column name, so repeated names (`SELECT *` over a
/// join) get a numeric suffix: `id`, `id_1`, `id_2`.
fn unique_field_names(schema: &Schema) -> SchemaRef {
    let mut seen: HashSet<String> = HashSet::new();
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            let mut name = field.name().clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", field.name(), suffix);
                suffix += 1;
            }
            field.as_ref().clone().with_name(name)
        })
        .collect::<Vec<Field>>();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>, String> {
    if batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer
        .write_batches(&refs)
        .map_err(|e| format!("Failed to serialize result: {}", e))?;
    writer
        .finish()
        .map_err(|e| format!("Failed to serialize result: {}", e))?;

    let buffer = writer.into_inner();
    serde_json::from_slice(&buffer).map_err(|e| format!("Failed to read serialized result: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_store(read_only: bool) -> (tempfile::TempDir, Arc<ProjectStoreManager>, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Arc::new(ProjectStoreManager::new(dir.path().to_path_buf(), read_only));
        let path = stores.prepare_store(1).unwrap();
        let conn = stores.open_for_write(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE data (id INTEGER, region VARCHAR, amount DOUBLE);
             INSERT INTO data VALUES (1, 'west', 10.5), (2, 'east', NULL), (3, 'west', 7.25);",
        )
        .unwrap();
        drop(conn);
        (dir, stores, path)
    }

    #[tokio::test]
    async fn successful_queries_return_rows_in_order() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));

        let outcome = executor
            .execute(&path, "SELECT id, amount FROM data ORDER BY id")
            .await;

        let QueryOutcome::Success(result) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(result.columns, vec!["id", "amount"]);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[0].get("id"), Some(&json!(1)));
        assert_eq!(result.rows[1].get("amount"), Some(&serde_json::Value::Null));
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "amount"]);
    }

    #[tokio::test]
    async fn failures_carry_the_database_error_verbatim() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores.clone(), Duration::from_secs(10));

        let outcome = executor.execute(&path, "SELECT missing_column FROM data").await;

        let conn = stores.open_for_query(&path).unwrap();
        let expected = conn
            .prepare("SELECT missing_column FROM data")
            .err()
            .map(|e| e.to_string())
            .unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::Failure(QueryFailure {
                error: expected,
                sql: "SELECT missing_column FROM data".into(),
            })
        );
    }

    #[tokio::test]
    async fn repeated_reads_are_identical() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));
        let sql = "SELECT region, SUM(amount) AS total FROM data GROUP BY region ORDER BY region";

        let first = executor.execute(&path, sql).await;
        let second = executor.execute(&path, sql).await;
        assert!(first.is_success());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_only_stores_reject_mutations() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));

        let outcome = executor.execute(&path, "DELETE FROM data").await;
        assert!(!outcome.is_success());

        let count = executor.execute(&path, "SELECT COUNT(*) AS n FROM data").await;
        let QueryOutcome::Success(result) = count else {
            panic!("count failed");
        };
        assert_eq!(result.rows[0].get("n"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn empty_results_have_columns_but_no_rows() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));

        let outcome = executor.execute(&path, "SELECT id FROM data WHERE id > 100").await;
        let QueryOutcome::Success(result) = outcome else {
            panic!("expected success");
        };
        assert_eq!(result.columns, vec!["id"]);
        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn repeated_column_names_keep_every_value() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));

        let outcome = executor
            .execute(&path, "SELECT 1 AS a, 2 AS a, 3 AS a_1, a.id FROM data a JOIN data b ON a.id = b.id WHERE a.id = 1")
            .await;
        let QueryOutcome::Success(result) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };

        assert_eq!(result.columns, vec!["a", "a_1", "a_1_1", "id"]);
        let row = &result.rows[0];
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["a", "a_1", "a_1_1", "id"]);
        assert_eq!(row.get("a"), Some(&json!(1)));
        assert_eq!(row.get("a_1"), Some(&json!(2)));
        assert_eq!(row.get("a_1_1"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn joins_over_star_suffix_the_second_copy() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores, Duration::from_secs(10));

        let outcome = executor
            .execute(&path, "SELECT * FROM data a JOIN data b ON a.id = b.id ORDER BY a.id")
            .await;
        let QueryOutcome::Success(result) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };

        assert_eq!(
            result.columns,
            vec!["id", "region", "amount", "id_1", "region_1", "amount_1"]
        );
        assert_eq!(result.rows[0].len(), 6);
        assert_eq!(result.rows[0].get("region_1"), Some(&json!("west")));
    }

    #[tokio::test]
    async fn timed_out_queries_are_interrupted() {
        let (_dir, stores, path) = seeded_store(true);
        let executor = DuckDbExecutor::new(stores.clone(), Duration::from_secs(1));

        let started = Instant::now();
        let outcome = executor
            .execute(
                &path,
                "SELECT sum(a.range * b.range) FROM range(200000) a, range(200000) b",
            )
            .await;

        assert_eq!(
            outcome,
            QueryOutcome::Failure(QueryFailure {
                error: "Query timed out after 1 seconds".into(),
                sql: "SELECT sum(a.range * b.range) FROM range(200000) a, range(200000) b".into(),
            })
        );
        assert!(started.elapsed() < Duration::from_secs(30));

        // The store is usable again straight away
        let after = executor.execute(&path, "SELECT COUNT(*) AS n FROM data").await;
        assert!(after.is_success());
    }

    #[tokio::test]
    async fn missing_stores_are_failures() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Arc::new(ProjectStoreManager::new(dir.path().to_path_buf(), true));
        let executor = DuckDbExecutor::new(stores.clone(), Duration::from_secs(10));

        let outcome = executor.execute(&stores.store_path(9), "SELECT 1").await;
        assert!(!outcome.is_success());
    }
}
