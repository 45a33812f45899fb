//! Application wiring and the user-facing project and chat operations.

use crate::catalog::descriptor::SchemaDescriptor;
use crate::catalog::{seed, Project, SchemaCatalog};
use crate::config::AppConfig;
use crate::conversation::{Chat, ConversationStore, ConversationTurn};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::introspect::{list_physical_tables, PhysicalTable};
use crate::db::metadata::MetadataStore;
use crate::db::project_store::ProjectStoreManager;
use crate::db::StoreError;
use crate::ingest::{IngestError, IngestManager};
use crate::llm::{LanguageModel, LlmManager};
use crate::pipeline::{ChatAnswer, DuckDbExecutor, Orchestrator, PipelineError};
use r2d2::Pool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Name of the table every uploaded file is loaded into.
pub const DATA_TABLE: &str = "data";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Project {0} not found")]
    ProjectNotFound(i64),
    #[error("Chat {0} not found")]
    ChatNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("Schema document is not valid JSON: {0}")]
    InvalidSchema(serde_json::Error),
}

pub struct AppState {
    pub config: AppConfig,
    pub metadata: Arc<MetadataStore>,
    pub stores: Arc<ProjectStoreManager>,
    pub ingest: IngestManager,
    pub model: Option<Arc<dyn LanguageModel>>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Builds the state from configuration. A missing or unusable model
    /// configuration is logged and leaves the state without a model.
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let model: Option<Arc<dyn LanguageModel>> = match &config.llm {
            Some(llm_config) => match LlmManager::new(llm_config) {
                Ok(manager) => Some(Arc::new(manager)),
                Err(e) => {
                    error!("Language model unavailable: {}", e);
                    None
                }
            },
            None => {
                warn!("No [llm] section configured; questions cannot be answered");
                None
            }
        };
        Self::with_model(config, model)
    }

    pub fn with_model(
        config: AppConfig,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Self, AppError> {
        let data_dir = PathBuf::from(&config.data_dir);
        if !data_dir.exists() {
            info!("Creating data directory: {}", config.data_dir);
            std::fs::create_dir_all(&data_dir)?;
        }

        info!(
            "Opening metadata store: {}",
            config.database.connection_string
        );
        let db_manager = DuckDBConnectionManager::new(&config.database.connection_string)
            .map_err(StoreError::from)?;
        let pool = Pool::builder()
            .max_size(config.database.pool_size.max(1) as u32)
            .build(db_manager)
            .map_err(StoreError::from)?;
        let metadata = Arc::new(MetadataStore::new(pool)?);

        let stores = Arc::new(ProjectStoreManager::new(
            data_dir,
            config.pipeline.read_only,
        ));
        let executor = Arc::new(DuckDbExecutor::new(
            stores.clone(),
            Duration::from_secs(config.pipeline.store_timeout_secs),
        ));

        let orchestrator = Orchestrator::new(
            metadata.clone(),
            metadata.clone(),
            executor,
            model.clone(),
            config.pipeline.history_window,
            config.pipeline.preview_rows,
        );

        Ok(Self {
            config,
            metadata,
            stores,
            ingest: IngestManager::new(),
            model,
            orchestrator,
        })
    }

    /// Registers a project, loads `file` into its own store and seeds the
    /// schema descriptor. If loading or introspection fails, the project
    /// record and its store are removed again.
    pub async fn create_project(
        &self,
        owner: &str,
        name: &str,
        description: Option<&str>,
        file: &Path,
    ) -> Result<Project, AppError> {
        self.ingest.check_supported(file)?;

        let filename = file.file_name().map(|f| f.to_string_lossy().to_string());
        let project_id = self
            .metadata
            .create_project(owner, name, description, filename.as_deref())
            .await?;

        let tables = match self.load_store(project_id, file).await {
            Ok(tables) => tables,
            Err(e) => {
                error!("Creating project {} failed, rolling back: {}", project_id, e);
                self.rollback_project(project_id).await;
                return Err(e);
            }
        };

        let descriptor = seed::describe_tables(self.model.as_deref(), &tables).await;
        self.metadata.replace_schema(project_id, &descriptor).await?;

        info!("Project {} ({}) created for {}", project_id, name, owner);
        self.get_project(owner, project_id).await
    }

    async fn load_store(&self, project_id: i64, file: &Path) -> Result<Vec<PhysicalTable>, AppError> {
        let store_path = self.stores.prepare_store(project_id)?;
        self.metadata.set_store_path(project_id, &store_path).await?;

        let stores = self.stores.clone();
        let ingest = self.ingest.clone();
        let file = file.to_path_buf();
        let sample_rows = self.config.pipeline.sample_rows;

        tokio::task::spawn_blocking(move || -> Result<Vec<PhysicalTable>, AppError> {
            let conn = stores.open_for_write(&store_path).map_err(StoreError::from)?;
            ingest.ingest_file(&conn, &file, DATA_TABLE)?;
            Ok(list_physical_tables(&conn, sample_rows)?)
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
    }

    async fn rollback_project(&self, project_id: i64) {
        if let Err(e) = self.metadata.delete_project(project_id).await {
            error!("Rollback of project {} record failed: {}", project_id, e);
        }
        if let Err(e) = self.stores.remove_store(project_id) {
            error!("Rollback of project {} store failed: {}", project_id, e);
        }
    }

    pub async fn list_projects(&self, owner: &str) -> Result<Vec<Project>, AppError> {
        Ok(self.metadata.list_projects(owner).await?)
    }

    /// Projects owned by someone else read as missing.
    pub async fn get_project(&self, owner: &str, project_id: i64) -> Result<Project, AppError> {
        match self.metadata.project(project_id).await? {
            Some(project) if project.owner == owner => Ok(project),
            _ => Err(AppError::ProjectNotFound(project_id)),
        }
    }

    pub async fn set_schema(
        &self,
        owner: &str,
        project_id: i64,
        schema: &SchemaDescriptor,
    ) -> Result<(), AppError> {
        self.get_project(owner, project_id).await?;
        self.metadata.replace_schema(project_id, schema).await?;
        info!("Schema of project {} replaced", project_id);
        Ok(())
    }

    /// Replaces the schema from a hand-edited JSON document.
    pub async fn import_schema(
        &self,
        owner: &str,
        project_id: i64,
        document: &str,
    ) -> Result<SchemaDescriptor, AppError> {
        let schema = SchemaDescriptor::parse_document(document).map_err(AppError::InvalidSchema)?;
        self.set_schema(owner, project_id, &schema).await?;
        Ok(schema)
    }

    pub async fn delete_project(&self, owner: &str, project_id: i64) -> Result<(), AppError> {
        self.get_project(owner, project_id).await?;
        self.metadata.delete_project(project_id).await?;
        self.stores.remove_store(project_id)?;
        Ok(())
    }

    pub async fn create_chat(
        &self,
        owner: &str,
        project_id: i64,
        title: Option<&str>,
    ) -> Result<Chat, AppError> {
        self.get_project(owner, project_id).await?;
        Ok(self.metadata.create_chat(owner, project_id, title).await?)
    }

    pub async fn list_chats(&self, owner: &str, project_id: Option<i64>) -> Result<Vec<Chat>, AppError> {
        Ok(self.metadata.list_chats(owner, project_id).await?)
    }

    /// The chat with its full transcript, oldest turn first.
    pub async fn get_chat(&self, owner: &str, chat_id: i64) -> Result<(Chat, Vec<ConversationTurn>), AppError> {
        let chat = match self.metadata.chat(chat_id).await? {
            Some(chat) if chat.owner == owner => chat,
            _ => return Err(AppError::ChatNotFound(chat_id)),
        };
        let turns = self.metadata.turns(chat_id).await?;
        Ok((chat, turns))
    }

    pub async fn delete_chat(&self, owner: &str, chat_id: i64) -> Result<(), AppError> {
        self.get_chat(owner, chat_id).await?;
        self.metadata.delete_chat(chat_id).await?;
        Ok(())
    }

    pub async fn ask(&self, owner: &str, chat_id: i64, question: &str) -> Result<ChatAnswer, AppError> {
        Ok(self
            .orchestrator
            .answer_question(owner, chat_id, question)
            .await?)
    }
}
