use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Metadata store holding projects, chats and turns
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai", "anthropic", "google" or "ollama"
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_tokens() -> usize {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Number of most recent turns fed to SQL generation
    pub history_window: usize,
    /// Rows shown to the model when interpreting a result
    pub preview_rows: usize,
    /// Open project stores read-only when executing generated SQL
    pub read_only: bool,
    pub store_timeout_secs: u64,
    /// Sample rows captured per table when seeding a schema
    pub sample_rows: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: Option<LlmConfig>,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub data_dir: String,
    pub default_user: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for project stores
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Act as this user
    #[arg(short, long)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage projects (uploaded datasets)
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Manage chats
    #[command(subcommand)]
    Chat(ChatCommand),
    /// Ask a question in a chat
    Ask(AskArgs),
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project by ingesting a data file
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Show { id: i64 },
    /// Print the project's schema descriptor as JSON
    Schema { id: i64 },
    /// Replace the project's schema descriptor with the contents of a JSON file
    SetSchema {
        id: i64,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    Create {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        title: Option<String>,
    },
    List {
        #[arg(long)]
        project: Option<i64>,
    },
    Show { id: i64 },
    Delete { id: i64 },
}

#[derive(Args, Debug)]
pub struct AskArgs {
    #[arg(long)]
    pub chat: i64,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    pub question: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder()
            .set_default("database.connection_string", "insightflow.db")?
            .set_default("database.pool_size", 4)?
            .set_default("pipeline.history_window", 5)?
            .set_default("pipeline.preview_rows", 10)?
            .set_default("pipeline.read_only", true)?
            .set_default("pipeline.store_timeout_secs", 30)?
            .set_default("pipeline.sample_rows", 5)?
            .set_default("logging.format", "pretty")?
            .set_default("data_dir", "data")?
            .set_default("default_user", "local")?;

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/insightflow/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // INSIGHTFLOW__LLM__API_KEY=... keeps secrets out of the file
        config_builder = config_builder.add_source(
            Environment::with_prefix("INSIGHTFLOW")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(user) = &args.user {
            config.default_user = user.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "insightflow.db".to_string(),
                pool_size: 4,
            },
            llm: None,
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig {
                format: LogFormat::Pretty,
            },
            data_dir: "data".to_string(),
            default_user: "local".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            preview_rows: 10,
            read_only: true,
            store_timeout_secs: 30,
            sample_rows: 5,
        }
    }
}
