use crate::db::{quote_ident, StoreError};
use crate::pipeline::executor::run_sql;
use crate::pipeline::Row;
use duckdb::Connection;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// A table as it exists in a project store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalTable {
    pub table_name: String,
    pub columns: Vec<PhysicalColumn>,
    pub sample_data: Vec<Row>,
    pub row_count: i64,
}

/// Lists every user table in the store with its columns, the first
/// `sample_rows` rows and the total row count.
pub fn list_physical_tables(
    conn: &Connection,
    sample_rows: usize,
) -> Result<Vec<PhysicalTable>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
    )?;
    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let mut tables = Vec::with_capacity(table_names.len());
    for table_name in table_names {
        let mut columns_stmt = conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = 'main' AND table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<PhysicalColumn> = columns_stmt
            .query_map([&table_name], |row| {
                Ok(PhysicalColumn {
                    name: row.get(0)?,
                    column_type: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        let quoted = quote_ident(&table_name);
        let sample = run_sql(conn, &format!("SELECT * FROM {} LIMIT {}", quoted, sample_rows))
            .map_err(StoreError::Query)?;
        let row_count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| row.get(0))?;

        debug!(
            "Found table {} with {} columns and {} rows",
            table_name,
            columns.len(),
            row_count
        );

        tables.push(PhysicalTable {
            table_name,
            columns,
            sample_data: sample.rows,
            row_count,
        });
    }

    Ok(tables)
}
