use duckdb::{AccessMode, Config, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locates and opens the dedicated analytical store of each project.
///
/// Stores are never shared: project `n` lives in
/// `<data_dir>/projects/project_<n>/store.duckdb`. Callers get a fresh
/// connection per use and release it by dropping it.
pub struct ProjectStoreManager {
    data_dir: PathBuf,
    read_only_queries: bool,
}

impl ProjectStoreManager {
    pub fn new(data_dir: PathBuf, read_only_queries: bool) -> Self {
        Self {
            data_dir,
            read_only_queries,
        }
    }

    pub fn project_dir(&self, project_id: i64) -> PathBuf {
        self.data_dir
            .join("projects")
            .join(format!("project_{}", project_id))
    }

    pub fn store_path(&self, project_id: i64) -> PathBuf {
        self.project_dir(project_id).join("store.duckdb")
    }

    /// Creates the project directory and returns the store path.
    pub fn prepare_store(&self, project_id: i64) -> std::io::Result<PathBuf> {
        let dir = self.project_dir(project_id);
        if !dir.exists() {
            info!("Creating store directory: {}", dir.display());
            std::fs::create_dir_all(&dir)?;
        }
        Ok(self.store_path(project_id))
    }

    /// Connection used for generated SQL. Read-only unless configured otherwise.
    pub fn open_for_query(&self, store_path: &Path) -> Result<Connection, duckdb::Error> {
        if self.read_only_queries {
            debug!("Opening store read-only: {}", store_path.display());
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            Connection::open_with_flags(store_path, config)
        } else {
            debug!("Opening store read-write: {}", store_path.display());
            Connection::open(store_path)
        }
    }

    /// Connection used by ingestion.
    pub fn open_for_write(&self, store_path: &Path) -> Result<Connection, duckdb::Error> {
        debug!("Opening store for ingestion: {}", store_path.display());
        Connection::open(store_path)
    }

    pub fn remove_store(&self, project_id: i64) -> std::io::Result<()> {
        let dir = self.project_dir(project_id);
        if dir.exists() {
            info!("Removing store directory: {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        } else {
            warn!("No store directory to remove for project {}", project_id);
        }
        Ok(())
    }
}
