use crate::db::quote_literal;
use crate::ingest::{create_table_from, FileIngestor, IngestError};
use duckdb::Connection;
use std::path::Path;

/// Reads JSON arrays and newline-delimited JSON alike.
#[derive(Clone, Default)]
pub struct JsonIngestor {}

impl JsonIngestor {
    pub fn new() -> Self {
        Self {}
    }
}

impl FileIngestor for JsonIngestor {
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<u64, IngestError> {
        let source = format!("read_json_auto({})", quote_literal(&path.to_string_lossy()));
        create_table_from(conn, table_name, &source)
    }
}
