pub mod catalog;
pub mod config;
pub mod conversation;
pub mod db;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod state;
pub mod util;
