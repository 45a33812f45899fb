use crate::db::quote_literal;
use crate::ingest::{create_table_from, FileIngestor, IngestError};
use duckdb::Connection;
use std::path::Path;

#[derive(Clone, Default)]
pub struct ParquetIngestor {}

impl ParquetIngestor {
    pub fn new() -> Self {
        Self {}
    }
}

impl FileIngestor for ParquetIngestor {
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<u64, IngestError> {
        let source = format!("read_parquet({})", quote_literal(&path.to_string_lossy()));
        create_table_from(conn, table_name, &source)
    }
}
