//! Environment-backed configuration, snapshotted once at startup.

use crate::error::{AgentError, Result};
use std::path::PathBuf;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_DATABASE: &str = "data.sqlite";

/// Configuration for the gateways. Built once from the environment and
/// passed by value; never mutated during a pipeline run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub database_path: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let openai_base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE));

        Ok(Self {
            openai_api_key,
            openai_base_url,
            model,
            database_path,
        })
    }
}
