pub mod db_pool;
pub mod introspect;
pub mod metadata;
pub mod project_store;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Quotes an identifier for interpolation into DuckDB SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for interpolation into DuckDB SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("order \"items\""), "\"order \"\"items\"\"\"");
        assert_eq!(quote_literal("/tmp/o'brien.csv"), "'/tmp/o''brien.csv'");
    }
}
