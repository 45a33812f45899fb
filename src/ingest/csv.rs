use crate::db::quote_literal;
use crate::ingest::{create_table_from, FileIngestor, IngestError};
use duckdb::Connection;
use std::path::Path;

#[derive(Clone)]
pub struct CsvIngestor {
    sample_size: usize,
}

impl CsvIngestor {
    pub fn new() -> Self {
        Self {
            sample_size: 1000, // Rows DuckDB reads to infer column types
        }
    }

    pub fn with_sample_size(sample_size: usize) -> Self {
        Self { sample_size }
    }
}

impl Default for CsvIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIngestor for CsvIngestor {
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<u64, IngestError> {
        let source = format!(
            "read_csv_auto({}, SAMPLE_SIZE={})",
            quote_literal(&path.to_string_lossy()),
            self.sample_size
        );
        create_table_from(conn, table_name, &source)
    }
}
