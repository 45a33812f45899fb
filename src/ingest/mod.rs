//! Loads an uploaded data file into a project store.
//!
//! Each format is read by DuckDB's own table functions, so type inference
//! is DuckDB's. The target table is replaced if it already exists.

pub mod csv;
pub mod json;
pub mod parquet;

use crate::db::quote_ident;
use duckdb::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Database error: {0}")]
    DatabaseError(#[from] duckdb::Error),
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

pub trait FileIngestor: Send + Sync {
    /// Creates `table_name` from the file and returns the number of rows loaded.
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<u64, IngestError>;
}

/// Materialises `source` (a DuckDB table function call) as `table_name`
/// and returns the resulting row count.
fn create_table_from(conn: &Connection, table_name: &str, source: &str) -> Result<u64, IngestError> {
    let table = quote_ident(table_name);
    let sql = format!("CREATE OR REPLACE TABLE {} AS SELECT * FROM {}", table, source);
    debug!("Ingesting: {}", sql);
    conn.execute_batch(&sql)?;
    let rows: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(rows as u64)
}

#[derive(Clone)]
pub struct IngestManager {
    csv_ingestor: csv::CsvIngestor,
    parquet_ingestor: parquet::ParquetIngestor,
    json_ingestor: json::JsonIngestor,
}

impl IngestManager {
    pub fn new() -> Self {
        Self {
            csv_ingestor: csv::CsvIngestor::new(),
            parquet_ingestor: parquet::ParquetIngestor::new(),
            json_ingestor: json::JsonIngestor::new(),
        }
    }

    fn ingestor_for(&self, path: &Path) -> Result<&dyn FileIngestor, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| IngestError::UnsupportedFileType("No extension".to_string()))?;

        match extension.to_lowercase().as_str() {
            "csv" | "tsv" => Ok(&self.csv_ingestor),
            "parquet" => Ok(&self.parquet_ingestor),
            "json" | "ndjson" | "jsonl" => Ok(&self.json_ingestor),
            _ => Err(IngestError::UnsupportedFileType(extension.to_string())),
        }
    }

    /// Rejects files no ingestor can read, before any project state is created.
    pub fn check_supported(&self, path: &Path) -> Result<(), IngestError> {
        self.ingestor_for(path).map(|_| ())
    }

    pub fn ingest_file(
        &self,
        conn: &Connection,
        path: &Path,
        table_name: &str,
    ) -> Result<u64, IngestError> {
        let ingestor = self.ingestor_for(path)?;
        if !path.is_file() {
            return Err(IngestError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            )));
        }

        let rows = ingestor.ingest(conn, path, table_name)?;
        info!("Loaded {} rows from {} into {}", rows, path.display(), table_name);
        Ok(rows)
    }
}

impl Default for IngestManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn csv_files_are_loaded_with_inferred_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "sales.csv",
            "region,amount,day\nwest,10.5,2024-01-02\neast,3,2024-01-03\n",
        );
        let conn = Connection::open_in_memory().unwrap();

        let rows = IngestManager::new().ingest_file(&conn, &path, "data").unwrap();

        assert_eq!(rows, 2);
        assert_eq!(count(&conn, "data"), 2);
        let amount_type: String = conn
            .query_row(
                "SELECT data_type FROM information_schema.columns \
                 WHERE table_name = 'data' AND column_name = 'amount'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(amount_type, "DOUBLE");
    }

    #[test]
    fn newline_delimited_json_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "events.ndjson",
            "{\"id\": 1, \"kind\": \"click\"}\n{\"id\": 2, \"kind\": \"view\"}\n{\"id\": 3, \"kind\": \"click\"}\n",
        );
        let conn = Connection::open_in_memory().unwrap();

        let rows = IngestManager::new().ingest_file(&conn, &path, "data").unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn parquet_files_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.parquet");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY (SELECT range AS n FROM range(5)) TO '{}' (FORMAT PARQUET)",
            path.display()
        ))
        .unwrap();

        let rows = IngestManager::new().ingest_file(&conn, &path, "data").unwrap();
        assert_eq!(rows, 5);
    }

    #[test]
    fn unknown_extensions_are_rejected_before_touching_the_store() {
        let manager = IngestManager::new();
        assert!(matches!(
            manager.check_supported(Path::new("report.xlsx")),
            Err(IngestError::UnsupportedFileType(ext)) if ext == "xlsx"
        ));
        assert!(matches!(
            manager.check_supported(Path::new("README")),
            Err(IngestError::UnsupportedFileType(_))
        ));
        assert!(manager.check_supported(Path::new("DATA.CSV")).is_ok());
    }

    #[test]
    fn missing_files_are_io_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let result = IngestManager::new().ingest_file(&conn, Path::new("/nonexistent/x.csv"), "data");
        assert!(matches!(result, Err(IngestError::IoError(_))));
    }
}
