use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Malformed response from {stage}: {message}\nRaw response: {raw}")]
    MalformedResponse {
        stage: &'static str,
        message: String,
        raw: String,
    },

    #[error("Data shaping error: {0}")]
    Shaping(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn malformed(stage: &'static str, message: impl Into<String>, raw: impl Into<String>) -> Self {
        AgentError::MalformedResponse {
            stage,
            message: message.into(),
            raw: raw.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
