//! Natural-language question answering over a tabular dataset, with
//! chart-ready output.
//!
//! The pipeline translates a question into SQL via a reasoning service,
//! validates and executes it, formats a one-line answer, recommends a chart
//! kind and reshapes the raw rows into that chart's renderer payload.

pub mod agent;
pub mod config;
pub mod data_formatter;
pub mod database;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod state;
pub mod workflow;

pub use agent::SqlAgent;
pub use config::AgentConfig;
pub use data_formatter::DataFormatter;
pub use database::{DataStore, SchemaSnapshot, SqliteStore};
pub use error::{AgentError, Result};
pub use llm::{LlmClient, ReasoningService};
pub use state::{AgentResponse, ChartKind, PipelineState, Relevance};
pub use workflow::WorkflowManager;
