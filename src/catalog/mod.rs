pub mod descriptor;
pub mod seed;

use crate::db::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use descriptor::SchemaDescriptor;
use serde::Serialize;
use std::path::PathBuf;

/// An uploaded dataset with its own analytical store and semantic schema.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub store_path: PathBuf,
    pub original_filename: Option<String>,
    pub schema: SchemaDescriptor,
    pub created_at: DateTime<Utc>,
}

/// Source of per-project schema descriptors.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn project(&self, project_id: i64) -> Result<Option<Project>, StoreError>;

    /// Overwrites the descriptor; there is no merge and no history.
    async fn replace_schema(&self, project_id: i64, schema: &SchemaDescriptor) -> Result<(), StoreError>;
}
