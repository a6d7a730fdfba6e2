//! Chart-specific data shaping.
//!
//! Converts raw, untyped result rows into the payload shape each chart
//! renderer expects. Scatter, bar and line have deterministic heuristic
//! paths for 2- and 3-column results; everything else, and any heuristic
//! failure, goes through a generic reasoning-service formatting call.

use crate::error::{AgentError, Result};
use crate::llm::{strip_code_fences, ReasoningService};
use crate::prompts;
use crate::state::{ChartKind, ResultSet, Row};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub id: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterSeries {
    pub data: Vec<ScatterPoint>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterPayload {
    pub series: Vec<ScatterSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesValues {
    pub data: Vec<f64>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarPayload {
    pub labels: Vec<String>,
    pub values: Vec<SeriesValues>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinePayload {
    #[serde(rename = "xValues")]
    pub x_values: Vec<String>,
    #[serde(rename = "yValues")]
    pub y_values: Vec<SeriesValues>,
    #[serde(rename = "yAxisLabel", skip_serializing_if = "Option::is_none")]
    pub y_axis_label: Option<String>,
}

/// Label/axis disambiguation predicate for 3-column rows.
///
/// A value is treated as the series label iff it is a string, is not
/// entirely numeric digits once `.` characters are stripped, and does not
/// contain `/` (dates like "2024/01" stay on the axis).
pub fn is_label_value(value: &Value) -> bool {
    match value.as_str() {
        Some(s) => {
            let stripped: String = s.chars().filter(|c| *c != '.').collect();
            let numeric = !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit());
            !numeric && !s.contains('/')
        }
        None => false,
    }
}

fn to_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| AgentError::Shaping(format!("cannot coerce {} to a number", n))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| AgentError::Shaping(format!("cannot coerce \"{}\" to a number", s))),
        other => Err(AgentError::Shaping(format!(
            "cannot coerce {} to a number",
            other
        ))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Splits a 3-column row into (label, x position, y position).
///
/// Position 1 is checked against the predicate first; if it does not
/// qualify, position 2 is taken as the label by elimination, mirroring the
/// original heuristic. Numeric coercion is left to the caller since line
/// charts allow non-numeric x values (dates).
fn split_label_row(row: &Row) -> Result<(String, &Value, &Value)> {
    if row.len() != 3 {
        return Err(AgentError::Shaping(format!(
            "expected 3 columns, got {}",
            row.len()
        )));
    }
    if is_label_value(&row[0]) {
        Ok((display_value(&row[0]), &row[1], &row[2]))
    } else {
        Ok((display_value(&row[1]), &row[0], &row[2]))
    }
}

fn arity(results: &ResultSet) -> Result<usize> {
    let first = results
        .first()
        .ok_or_else(|| AgentError::Shaping("empty result set".to_string()))?;
    Ok(first.len())
}

fn check_rows(results: &ResultSet, expected: usize) -> Result<()> {
    if results.iter().any(|r| r.len() != expected) {
        return Err(AgentError::Shaping("ragged result rows".to_string()));
    }
    Ok(())
}

/// Shapes raw query results into the payload of the chosen chart kind.
pub struct DataFormatter {
    llm: Arc<dyn ReasoningService>,
}

impl DataFormatter {
    pub fn new(llm: Arc<dyn ReasoningService>) -> Self {
        Self { llm }
    }

    /// Entry point: dispatches on the chart kind. Returns `None` for
    /// `ChartKind::None`; heuristic failures fall back to the generic
    /// formatting path instead of failing the stage.
    pub async fn format_for_visualization(
        &self,
        kind: ChartKind,
        question: &str,
        sql: &str,
        results: &ResultSet,
    ) -> Result<Option<Value>> {
        let shaped = match kind {
            ChartKind::None => return Ok(None),
            ChartKind::Scatter => self
                .format_scatter(results)
                .and_then(|p| serde_json::to_value(p).map_err(Into::into)),
            ChartKind::Bar | ChartKind::HorizontalBar => match self.format_bar(results, question).await {
                Ok(p) => serde_json::to_value(p).map_err(Into::into),
                Err(e) => Err(e),
            },
            ChartKind::Line => match self.format_line(results, question).await {
                Ok(p) => serde_json::to_value(p).map_err(Into::into),
                Err(e) => Err(e),
            },
            ChartKind::Pie => {
                return self
                    .format_generic(kind, question, sql, results)
                    .await
                    .map(Some)
            }
        };

        match shaped {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(kind = %kind, error = %e, "heuristic shaping failed, using generic formatter");
                self.format_generic(kind, question, sql, results)
                    .await
                    .map(Some)
            }
        }
    }

    fn format_scatter(&self, results: &ResultSet) -> Result<ScatterPayload> {
        match arity(results)? {
            2 => {
                check_rows(results, 2)?;
                let mut data = Vec::with_capacity(results.len());
                for (i, row) in results.iter().enumerate() {
                    data.push(ScatterPoint {
                        x: to_f64(&row[0])?,
                        y: to_f64(&row[1])?,
                        id: i + 1,
                    });
                }
                Ok(ScatterPayload {
                    series: vec![ScatterSeries {
                        data,
                        label: "Data Points".to_string(),
                    }],
                })
            }
            3 => {
                // One series per distinct label, in first-seen order.
                let mut series: Vec<ScatterSeries> = Vec::new();
                for row in results {
                    let (label, x, y) = split_label_row(row)?;
                    let (x, y) = (to_f64(x)?, to_f64(y)?);
                    let idx = match series.iter().position(|s| s.label == label) {
                        Some(idx) => idx,
                        None => {
                            series.push(ScatterSeries {
                                data: Vec::new(),
                                label,
                            });
                            series.len() - 1
                        }
                    };
                    let id = series[idx].data.len() + 1;
                    series[idx].data.push(ScatterPoint { x, y, id });
                }
                Ok(ScatterPayload { series })
            }
            n => Err(AgentError::Shaping(format!(
                "scatter expects 2 or 3 columns, got {}",
                n
            ))),
        }
    }

    async fn format_bar(&self, results: &ResultSet, question: &str) -> Result<BarPayload> {
        match arity(results)? {
            2 => {
                check_rows(results, 2)?;
                let labels = results.iter().map(|r| display_value(&r[0])).collect();
                let data = results
                    .iter()
                    .map(|r| to_f64(&r[1]))
                    .collect::<Result<Vec<_>>>()?;
                let label = self.series_label(question, results).await?;
                Ok(BarPayload {
                    labels,
                    values: vec![SeriesValues { data, label }],
                })
            }
            3 => {
                check_rows(results, 3)?;
                // Shared labels come from position 2, one series per distinct
                // position-1 entity, both in first-seen order.
                let labels: Vec<String> = results
                    .iter()
                    .map(|r| display_value(&r[1]))
                    .unique()
                    .collect();
                let entities: Vec<String> = results
                    .iter()
                    .map(|r| display_value(&r[0]))
                    .unique()
                    .collect();
                let mut values = Vec::with_capacity(entities.len());
                for entity in entities {
                    let data = results
                        .iter()
                        .filter(|r| display_value(&r[0]) == entity)
                        .map(|r| to_f64(&r[2]))
                        .collect::<Result<Vec<_>>>()?;
                    values.push(SeriesValues {
                        data,
                        label: entity,
                    });
                }
                Ok(BarPayload { labels, values })
            }
            n => Err(AgentError::Shaping(format!(
                "bar expects 2 or 3 columns, got {}",
                n
            ))),
        }
    }

    async fn format_line(&self, results: &ResultSet, question: &str) -> Result<LinePayload> {
        match arity(results)? {
            2 => {
                check_rows(results, 2)?;
                let x_values = results.iter().map(|r| display_value(&r[0])).collect();
                let data = results
                    .iter()
                    .map(|r| to_f64(&r[1]))
                    .collect::<Result<Vec<_>>>()?;
                let label = self.series_label(question, results).await?;
                Ok(LinePayload {
                    x_values,
                    y_values: vec![SeriesValues { data, label }],
                    y_axis_label: None,
                })
            }
            3 => {
                let mut x_values: Vec<String> = Vec::new();
                let mut y_values: Vec<SeriesValues> = Vec::new();
                for row in results {
                    let (label, x, y) = split_label_row(row)?;
                    let (x, y) = (display_value(x), to_f64(y)?);
                    if !x_values.contains(&x) {
                        x_values.push(x);
                    }
                    match y_values.iter().position(|s| s.label == label) {
                        Some(idx) => y_values[idx].data.push(y),
                        None => y_values.push(SeriesValues {
                            data: vec![y],
                            label,
                        }),
                    }
                }
                let y_axis_label = self.y_axis_label(question, results).await?;
                Ok(LinePayload {
                    x_values,
                    y_values,
                    y_axis_label: Some(y_axis_label),
                })
            }
            n => Err(AgentError::Shaping(format!(
                "line expects 2 or 3 columns, got {}",
                n
            ))),
        }
    }

    /// One reasoning-service call that names a 2-column data series.
    async fn series_label(&self, question: &str, results: &ResultSet) -> Result<String> {
        let sample: Vec<&Row> = results.iter().take(2).collect();
        let human = format!(
            "Question: {}\nData (first few rows): {}\n\nProvide a concise label for this y axis. For example, if the data is the sales figures for products, the label could be 'Sales'. If the data is the population of cities, the label could be 'Population'. If the data is the revenue trend, the label could be 'Revenue'.",
            question,
            serde_json::to_string(&sample)?
        );
        let label = self
            .llm
            .invoke(prompts::SERIES_LABEL_SYSTEM, &human)
            .await?;
        Ok(label.trim().to_string())
    }

    async fn y_axis_label(&self, question: &str, results: &ResultSet) -> Result<String> {
        let sample: Vec<&Row> = results.iter().take(2).collect();
        let human = format!(
            "Question: {}\nData (first few rows): {}\n\nProvide a concise label for the y-axis. For example, if the data represents sales figures over time for different categories, the label could be 'Sales'. If it's about population growth for different groups, it could be 'Population'.",
            question,
            serde_json::to_string(&sample)?
        );
        let label = self
            .llm
            .invoke(prompts::SERIES_LABEL_SYSTEM, &human)
            .await?;
        Ok(label.trim().to_string())
    }

    /// Generic fallback: asks the reasoning service to emit a JSON payload
    /// matching the per-kind structural example. A parse failure here is a
    /// stage error carrying the raw response for diagnosis.
    async fn format_generic(
        &self,
        kind: ChartKind,
        question: &str,
        sql: &str,
        results: &ResultSet,
    ) -> Result<Value> {
        let human = format!(
            "For the given question: {}\n\nSQL query: {}\n\nResult: {}\n\nUse the following example to structure the data: {}. Just give the json string. Do not format it.",
            question,
            sql,
            serde_json::to_string(results)?,
            prompts::graph_instructions(kind)
        );
        let response = self.llm.invoke(prompts::FORMAT_DATA_SYSTEM, &human).await?;
        let cleaned = strip_code_fences(&response);
        serde_json::from_str::<Value>(cleaned).map_err(|e| {
            AgentError::malformed(
                "data formatter",
                format!("invalid JSON: {}", e),
                response.clone(),
            )
        })
    }
}
