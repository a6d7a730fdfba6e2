//! Pipeline state and the data model threaded through the workflow stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Outcome of a relevance-gated stage.
///
/// Replaces the `NOT_RELEVANT` / `NOT_ENOUGH_INFO` string sentinels with a
/// tagged variant checked at each stage boundary. `Irrelevant` and
/// `InsufficientInfo` are expected control flow, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance<T> {
    Relevant(T),
    Irrelevant,
    InsufficientInfo,
}

impl<T> Relevance<T> {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Relevance::Relevant(_))
    }

    pub fn as_relevant(&self) -> Option<&T> {
        match self {
            Relevance::Relevant(value) => Some(value),
            _ => None,
        }
    }

    /// Carries the non-relevant marker into the next stage's value space.
    pub fn propagate<U>(&self) -> Option<Relevance<U>> {
        match self {
            Relevance::Relevant(_) => None,
            Relevance::Irrelevant => Some(Relevance::Irrelevant),
            Relevance::InsufficientInfo => Some(Relevance::InsufficientInfo),
        }
    }
}

/// One table the question parser judged relevant to the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantTable {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Columns likely holding noun-like values (names, categories, places).
    #[serde(default)]
    pub noun_columns: Vec<String>,
}

/// Wire shape of the question parser's JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub is_relevant: bool,
    #[serde(default)]
    pub relevant_tables: Vec<RelevantTable>,
}

/// A generated SQL query together with the validator's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub text: String,
    pub is_valid: bool,
    /// Issue description from the validator, or "None".
    pub issues: String,
}

impl SqlQuery {
    pub fn unvalidated(text: String) -> Self {
        Self {
            text,
            is_valid: false,
            issues: "None".to_string(),
        }
    }
}

/// Raw query results: ordered rows of heterogeneous scalar values.
pub type Row = Vec<Value>;
pub type ResultSet = Vec<Row>;

/// Closed vocabulary of supported chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    HorizontalBar,
    Line,
    Pie,
    Scatter,
    None,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::HorizontalBar => "horizontal_bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::None => "none",
        }
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "horizontal_bar" => Ok(ChartKind::HorizontalBar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "scatter" => Ok(ChartKind::Scatter),
            "none" => Ok(ChartKind::None),
            other => Err(format!("unknown chart kind: {}", other)),
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The visualization selector's recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationChoice {
    pub kind: ChartKind,
    pub reason: String,
}

impl VisualizationChoice {
    pub fn none_for_irrelevant() -> Self {
        Self {
            kind: ChartKind::None,
            reason: "No visualization needed for irrelevant questions.".to_string(),
        }
    }
}

/// The accumulating record threaded through all pipeline stages.
///
/// Owned exclusively by the workflow for the duration of one run; each
/// stage writes only the fields it is contracted to produce and fields are
/// never retracted once set.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub question: String,
    pub parsed: Option<Relevance<Vec<RelevantTable>>>,
    pub unique_nouns: BTreeSet<String>,
    pub sql_query: Option<Relevance<SqlQuery>>,
    pub results: Option<Relevance<ResultSet>>,
    /// Store execution failure or shaping failure, surfaced on the response.
    pub error: Option<String>,
    pub answer: Option<String>,
    pub visualization: Option<VisualizationChoice>,
    pub formatted_data: Option<Value>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            parsed: None,
            unique_nouns: BTreeSet::new(),
            sql_query: None,
            results: None,
            error: None,
            answer: None,
            visualization: None,
            formatted_data: None,
        }
    }

    pub fn into_response(self) -> AgentResponse {
        let (visualization, visualization_reason) = match self.visualization {
            Some(choice) => (choice.kind, choice.reason),
            None => (ChartKind::None, String::new()),
        };
        AgentResponse {
            answer: self.answer.unwrap_or_default(),
            visualization,
            visualization_reason,
            formatted_data_for_visualization: self.formatted_data,
            error: self.error,
        }
    }
}

/// Final output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub visualization: ChartKind,
    pub visualization_reason: String,
    pub formatted_data_for_visualization: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_propagate() {
        let parsed: Relevance<Vec<RelevantTable>> = Relevance::Irrelevant;
        let next: Option<Relevance<SqlQuery>> = parsed.propagate();
        assert_eq!(next, Some(Relevance::Irrelevant));

        let parsed: Relevance<Vec<RelevantTable>> = Relevance::Relevant(vec![]);
        let next: Option<Relevance<SqlQuery>> = parsed.propagate();
        assert_eq!(next, None);
    }

    #[test]
    fn test_chart_kind_round_trip() {
        for kind in [
            ChartKind::Bar,
            ChartKind::HorizontalBar,
            ChartKind::Line,
            ChartKind::Pie,
            ChartKind::Scatter,
            ChartKind::None,
        ] {
            assert_eq!(kind.as_str().parse::<ChartKind>().unwrap(), kind);
        }
        assert!("Bar Graph".parse::<ChartKind>().is_err());
    }

    #[test]
    fn test_parsed_question_deserializes_without_tables() {
        let parsed: ParsedQuestion = serde_json::from_str(r#"{"is_relevant": false}"#).unwrap();
        assert!(!parsed.is_relevant);
        assert!(parsed.relevant_tables.is_empty());
    }
}
