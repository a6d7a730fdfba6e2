//! Fixed-topology pipeline orchestration.
//!
//! parse -> nouns -> generate -> validate -> execute, then two independent
//! branches (answer formatting, visualization selection) joined
//! concurrently, then data shaping chained after selection. The graph is
//! static; the only early exits are the relevance short-circuits built into
//! each stage.

use crate::agent::SqlAgent;
use crate::data_formatter::DataFormatter;
use crate::database::DataStore;
use crate::error::Result;
use crate::llm::ReasoningService;
use crate::state::{AgentResponse, ChartKind, PipelineState, VisualizationChoice};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct WorkflowManager {
    agent: SqlAgent,
    formatter: DataFormatter,
    store: Arc<dyn DataStore>,
}

impl WorkflowManager {
    pub fn new(llm: Arc<dyn ReasoningService>, store: Arc<dyn DataStore>) -> Self {
        Self {
            agent: SqlAgent::new(llm.clone(), store.clone()),
            formatter: DataFormatter::new(llm),
            store,
        }
    }

    /// Runs the full pipeline for one question. Owns the `PipelineState`
    /// for the duration of the run.
    pub async fn run(&self, question: &str) -> Result<AgentResponse> {
        let run_id = Uuid::new_v4();
        info!(%run_id, question, "starting pipeline run");
        let mut state = PipelineState::new(question);

        let schema = self.store.get_schema()?;

        let parsed = self.agent.parse_question(question, &schema).await?;
        state.unique_nouns = self.agent.unique_nouns(&parsed);

        let generated = self
            .agent
            .generate_sql(question, &parsed, &state.unique_nouns, &schema)
            .await?;
        state.parsed = Some(parsed);
        let validated = self.agent.validate_and_fix_sql(generated, &schema).await?;
        let sql_text = validated
            .as_relevant()
            .map(|q| q.text.clone())
            .unwrap_or_default();

        match self.agent.execute_sql(&validated) {
            Ok(results) => state.results = Some(results),
            Err(message) => {
                error!(%run_id, error = %message, "query execution failed");
                state.error = Some(message);
            }
        }
        state.sql_query = Some(validated);

        match &state.results {
            Some(results) => {
                // The two branches read the same immutable result set and
                // write disjoint fields, so they run concurrently.
                let (answer, choice) = tokio::try_join!(
                    self.agent.format_answer(question, results),
                    self.agent.choose_visualization(question, &sql_text, results),
                )?;
                state.answer = Some(answer);

                if let Some(rows) = results.as_relevant() {
                    if choice.kind != ChartKind::None {
                        match self
                            .formatter
                            .format_for_visualization(choice.kind, question, &sql_text, rows)
                            .await
                        {
                            Ok(payload) => state.formatted_data = payload,
                            Err(e) => {
                                error!(%run_id, error = %e, "data shaping failed");
                                state.error = Some(e.to_string());
                            }
                        }
                    }
                }
                state.visualization = Some(choice);
            }
            None => {
                // Store execution failed; suppress both branches and report
                // the failure explicitly instead of calling the LLM with no
                // results.
                let message = state.error.clone().unwrap_or_default();
                state.answer = Some(format!("The query could not be executed: {}", message));
                state.visualization = Some(VisualizationChoice {
                    kind: ChartKind::None,
                    reason: "Query execution failed; there is no data to visualize.".to_string(),
                });
            }
        }

        info!(%run_id, "pipeline run complete");
        Ok(state.into_response())
    }
}
