//! Pipeline stages: question parsing, noun resolution, SQL generation,
//! validation, execution, answer formatting and visualization selection.

use crate::database::{DataStore, SchemaSnapshot};
use crate::error::{AgentError, Result};
use crate::llm::{strip_code_fences, ReasoningService};
use crate::prompts;
use crate::state::{
    ChartKind, ParsedQuestion, Relevance, RelevantTable, ResultSet, SqlQuery, VisualizationChoice,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed answer for questions the parser judged irrelevant to the database.
pub const IRRELEVANT_ANSWER: &str = "Sorry, I can only give answers relevant to the database.";

/// Implements each stage of the question-to-chart pipeline. Stateless across
/// runs; all per-run data lives in the workflow's `PipelineState`.
pub struct SqlAgent {
    llm: Arc<dyn ReasoningService>,
    store: Arc<dyn DataStore>,
}

impl SqlAgent {
    pub fn new(llm: Arc<dyn ReasoningService>, store: Arc<dyn DataStore>) -> Self {
        Self { llm, store }
    }

    /// Identifies relevant tables, columns and noun columns, or flags the
    /// question as unanswerable from the schema.
    ///
    /// Malformed JSON from the reasoning service is fatal for this stage;
    /// unlike the validator, no repair is attempted here.
    pub async fn parse_question(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
    ) -> Result<Relevance<Vec<RelevantTable>>> {
        let human = format!(
            "===Database schema:\n{}\n\n===User question:\n{}\n\nIdentify relevant tables and columns:",
            schema.to_prompt(),
            question
        );
        let response = self
            .llm
            .invoke(prompts::PARSE_QUESTION_SYSTEM, &human)
            .await?;
        let cleaned = strip_code_fences(&response);
        let parsed: ParsedQuestion = serde_json::from_str(cleaned).map_err(|e| {
            AgentError::malformed(
                "question parser",
                format!("invalid JSON: {}", e),
                response.clone(),
            )
        })?;

        if parsed.is_relevant {
            info!(tables = parsed.relevant_tables.len(), "question parsed as relevant");
            Ok(Relevance::Relevant(parsed.relevant_tables))
        } else {
            info!("question parsed as not relevant to the database");
            Ok(Relevance::Irrelevant)
        }
    }

    /// Expands the noun columns of every relevant table into a deduplicated
    /// set of literal values, used to correct spelling in generated SQL.
    ///
    /// Per-table failures are skipped so partial results survive. Pure
    /// short-circuit when the question is not relevant: the store is never
    /// touched.
    pub fn unique_nouns(&self, parsed: &Relevance<Vec<RelevantTable>>) -> BTreeSet<String> {
        let tables = match parsed.as_relevant() {
            Some(tables) => tables,
            None => return BTreeSet::new(),
        };

        let mut nouns = BTreeSet::new();
        for table in tables {
            if table.noun_columns.is_empty() {
                continue;
            }
            let column_list = table
                .noun_columns
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ");
            let query = format!("SELECT DISTINCT {} FROM \"{}\"", column_list, table.table_name);
            match self.store.execute_query(&query) {
                Ok(rows) => {
                    for row in rows {
                        for value in row {
                            match value {
                                Value::Null => {}
                                Value::String(s) if s.is_empty() => {}
                                Value::String(s) => {
                                    nouns.insert(s);
                                }
                                other => {
                                    nouns.insert(other.to_string());
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(table = %table.table_name, error = %e, "noun resolution failed for table, skipping");
                }
            }
        }
        nouns
    }

    /// Generates a candidate SQL query, or recognizes that the schema does
    /// not carry enough information to answer.
    pub async fn generate_sql(
        &self,
        question: &str,
        parsed: &Relevance<Vec<RelevantTable>>,
        nouns: &BTreeSet<String>,
        schema: &SchemaSnapshot,
    ) -> Result<Relevance<SqlQuery>> {
        if let Some(short_circuit) = parsed.propagate() {
            return Ok(short_circuit);
        }
        let tables = parsed.as_relevant().cloned().unwrap_or_default();

        let human = format!(
            "===Database schema:\n{}\n\n===User question:\n{}\n\n===Relevant tables and columns:\n{}\n\n===Unique nouns in relevant tables:\n{}\n\nGenerate SQL query string",
            schema.to_prompt(),
            question,
            serde_json::to_string_pretty(&tables)?,
            nouns.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        let response = self
            .llm
            .invoke(prompts::GENERATE_SQL_SYSTEM, &human)
            .await?;
        let text = strip_code_fences(&response).to_string();

        if text == "NOT_ENOUGH_INFO" {
            info!("generator reported insufficient information");
            return Ok(Relevance::InsufficientInfo);
        }
        info!(sql = %text, "generated SQL query");
        Ok(Relevance::Relevant(SqlQuery::unvalidated(text)))
    }

    /// Checks the candidate query against the schema and replaces it
    /// wholesale when the validator reports problems.
    pub async fn validate_and_fix_sql(
        &self,
        query: Relevance<SqlQuery>,
        schema: &SchemaSnapshot,
    ) -> Result<Relevance<SqlQuery>> {
        let candidate = match &query {
            Relevance::Relevant(q) => q.clone(),
            _ => return Ok(query),
        };

        let human = format!(
            "===Database schema:\n{}\n\n===Generated SQL query:\n{}\n\nValidate and fix the SQL query:",
            schema.to_prompt(),
            candidate.text
        );
        let response = self
            .llm
            .invoke(prompts::VALIDATE_SQL_SYSTEM, &human)
            .await?;

        let mut lines = response.lines().filter(|l| !l.trim().is_empty());
        let valid = parse_prefixed_line(lines.next(), "Valid", "SQL validator", &response)?;
        let issues = parse_prefixed_line(lines.next(), "Issues", "SQL validator", &response)?;
        let corrected =
            parse_prefixed_line(lines.next(), "Corrected Query", "SQL validator", &response)?;

        let is_valid = valid.eq_ignore_ascii_case("yes");
        if is_valid && issues == "None" && corrected == "N/A" {
            return Ok(Relevance::Relevant(SqlQuery {
                text: candidate.text,
                is_valid: true,
                issues: "None".to_string(),
            }));
        }

        // The validator may flag issues without offering a replacement; keep
        // the original text in that case but record the verdict.
        let text = if corrected == "N/A" {
            candidate.text
        } else {
            corrected.to_string()
        };
        info!(is_valid, issues = %issues, "validator rewrote or flagged the query");
        Ok(Relevance::Relevant(SqlQuery {
            text,
            is_valid,
            issues: issues.to_string(),
        }))
    }

    /// Runs the validated query. Store failures are returned as an error
    /// string destined for the pipeline state's `error` field; they never
    /// abort the workflow.
    pub fn execute_sql(
        &self,
        query: &Relevance<SqlQuery>,
    ) -> std::result::Result<Relevance<ResultSet>, String> {
        let validated = match query {
            Relevance::Relevant(q) => q,
            Relevance::Irrelevant => return Ok(Relevance::Irrelevant),
            Relevance::InsufficientInfo => return Ok(Relevance::InsufficientInfo),
        };
        match self.store.execute_query(&validated.text) {
            Ok(rows) => {
                info!(rows = rows.len(), "query executed");
                Ok(Relevance::Relevant(rows))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Produces a one-line natural-language answer, or the fixed apology
    /// when the question was judged irrelevant.
    pub async fn format_answer(
        &self,
        question: &str,
        results: &Relevance<ResultSet>,
    ) -> Result<String> {
        let rows = match results.as_relevant() {
            Some(rows) => rows,
            None => return Ok(IRRELEVANT_ANSWER.to_string()),
        };

        let human = format!(
            "User question: {}\n\nQuery results: {}\n\nFormatted response:",
            question,
            serde_json::to_string(rows)?
        );
        let response = self
            .llm
            .invoke(prompts::FORMAT_ANSWER_SYSTEM, &human)
            .await?;
        Ok(response.trim().to_string())
    }

    /// Chooses one chart kind from the closed vocabulary, with a reason.
    pub async fn choose_visualization(
        &self,
        question: &str,
        sql: &str,
        results: &Relevance<ResultSet>,
    ) -> Result<VisualizationChoice> {
        let rows = match results.as_relevant() {
            Some(rows) => rows,
            None => return Ok(VisualizationChoice::none_for_irrelevant()),
        };

        let human = format!(
            "User question: {}\nSQL query: {}\nQuery results: {}\n\nRecommend a visualization:",
            question,
            sql,
            serde_json::to_string(rows)?
        );
        let response = self
            .llm
            .invoke(prompts::CHOOSE_VISUALIZATION_SYSTEM, &human)
            .await?;

        let mut lines = response.lines().filter(|l| !l.trim().is_empty());
        let kind_text = parse_prefixed_line(
            lines.next(),
            "Recommended Visualization",
            "visualization selector",
            &response,
        )?;
        let reason = parse_prefixed_line(lines.next(), "Reason", "visualization selector", &response)?;

        let kind = kind_text
            .trim_end_matches('.')
            .parse::<ChartKind>()
            .map_err(|e| AgentError::malformed("visualization selector", e, response.clone()))?;
        info!(kind = %kind, "visualization chosen");
        Ok(VisualizationChoice {
            kind,
            reason: reason.to_string(),
        })
    }
}

/// Splits one `Key: value` line of a fixed-format response. A missing line
/// or a different key is a hard parse failure for the calling stage.
fn parse_prefixed_line<'a>(
    line: Option<&'a str>,
    key: &str,
    stage: &'static str,
    raw: &str,
) -> Result<&'a str> {
    let line = line.ok_or_else(|| {
        AgentError::malformed(stage, format!("missing \"{}\" line", key), raw.to_string())
    })?;
    let (found_key, value) = line.trim().split_once(": ").ok_or_else(|| {
        AgentError::malformed(
            stage,
            format!("expected \"{}: ...\", got \"{}\"", key, line.trim()),
            raw.to_string(),
        )
    })?;
    if found_key != key {
        return Err(AgentError::malformed(
            stage,
            format!("expected \"{}\" line, got \"{}\"", key, found_key),
            raw.to_string(),
        ));
    }
    Ok(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TableSchema;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedLlm {
        async fn invoke(&self, _system: &str, _human: &str) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Llm("unexpected LLM call".to_string()))
        }
    }

    struct StubStore {
        rows: std::result::Result<ResultSet, String>,
        executed: AtomicUsize,
    }

    impl StubStore {
        fn with_rows(rows: ResultSet) -> Arc<Self> {
            Arc::new(Self {
                rows: Ok(rows),
                executed: AtomicUsize::new(0),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                rows: Err(message.to_string()),
                executed: AtomicUsize::new(0),
            })
        }
    }

    impl DataStore for StubStore {
        fn get_schema(&self) -> Result<SchemaSnapshot> {
            Ok(SchemaSnapshot {
                tables: vec![TableSchema {
                    name: "sales".to_string(),
                    create_sql: "CREATE TABLE sales (category TEXT, quantity INTEGER)".to_string(),
                    example_rows: vec![],
                }],
            })
        }

        fn execute_query(&self, _query: &str) -> Result<ResultSet> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            match &self.rows {
                Ok(rows) => Ok(rows.clone()),
                Err(message) => Err(AgentError::Database(message.clone())),
            }
        }
    }

    fn agent(llm: Arc<ScriptedLlm>, store: Arc<StubStore>) -> SqlAgent {
        SqlAgent::new(llm, store)
    }

    #[tokio::test]
    async fn test_parse_question_relevant_with_fences() {
        let llm = ScriptedLlm::new(&[r#"```json
{"is_relevant": true, "relevant_tables": [{"table_name": "sales", "columns": ["category", "quantity"], "noun_columns": ["category"]}]}
```"#]);
        let store = StubStore::with_rows(vec![]);
        let agent = agent(llm, store);
        let schema = SchemaSnapshot::default();

        let parsed = agent.parse_question("market share?", &schema).await.unwrap();
        let tables = parsed.as_relevant().unwrap();
        assert_eq!(tables[0].table_name, "sales");
        assert_eq!(tables[0].noun_columns, vec!["category"]);
    }

    #[tokio::test]
    async fn test_parse_question_malformed_json_is_fatal() {
        let llm = ScriptedLlm::new(&["the sales table looks relevant"]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let err = agent
            .parse_question("q", &SchemaSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse { stage: "question parser", .. }));
    }

    #[tokio::test]
    async fn test_unique_nouns_short_circuits_without_store_access() {
        let store = StubStore::with_rows(vec![vec!["x".into()]]);
        let agent = agent(ScriptedLlm::new(&[]), store.clone());
        let nouns = agent.unique_nouns(&Relevance::Irrelevant);
        assert!(nouns.is_empty());
        assert_eq!(store.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unique_nouns_deduplicates_and_skips_nulls() {
        let store = StubStore::with_rows(vec![
            vec!["Electronics".into(), serde_json::Value::Null],
            vec!["Clothing".into(), "Electronics".into()],
            vec!["".into(), "Toys".into()],
        ]);
        let agent = agent(ScriptedLlm::new(&[]), store);
        let parsed = Relevance::Relevant(vec![RelevantTable {
            table_name: "sales".to_string(),
            columns: vec!["category".to_string()],
            noun_columns: vec!["category".to_string()],
        }]);
        let nouns = agent.unique_nouns(&parsed);
        assert_eq!(
            nouns.into_iter().collect::<Vec<_>>(),
            vec!["Clothing", "Electronics", "Toys"]
        );
    }

    #[tokio::test]
    async fn test_unique_nouns_skips_failing_tables() {
        let store = StubStore::failing("no such table: ghosts");
        let agent = agent(ScriptedLlm::new(&[]), store.clone());
        let parsed = Relevance::Relevant(vec![RelevantTable {
            table_name: "ghosts".to_string(),
            columns: vec![],
            noun_columns: vec!["name".to_string()],
        }]);
        let nouns = agent.unique_nouns(&parsed);
        assert!(nouns.is_empty());
        assert_eq!(store.executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_sql_short_circuits_when_irrelevant() {
        let agent = agent(ScriptedLlm::new(&[]), StubStore::with_rows(vec![]));
        let generated = agent
            .generate_sql("q", &Relevance::Irrelevant, &BTreeSet::new(), &SchemaSnapshot::default())
            .await
            .unwrap();
        assert_eq!(generated, Relevance::Irrelevant);
    }

    #[tokio::test]
    async fn test_generate_sql_recognizes_not_enough_info() {
        let llm = ScriptedLlm::new(&["NOT_ENOUGH_INFO"]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let generated = agent
            .generate_sql(
                "q",
                &Relevance::Relevant(vec![]),
                &BTreeSet::new(),
                &SchemaSnapshot::default(),
            )
            .await
            .unwrap();
        assert_eq!(generated, Relevance::InsufficientInfo);
    }

    #[tokio::test]
    async fn test_validator_round_trip_keeps_query() {
        let llm = ScriptedLlm::new(&["Valid: Yes\nIssues: None\nCorrected Query: N/A"]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let query = Relevance::Relevant(SqlQuery::unvalidated(
            "SELECT category, quantity FROM sales".to_string(),
        ));
        let validated = agent
            .validate_and_fix_sql(query, &SchemaSnapshot::default())
            .await
            .unwrap();
        let q = validated.as_relevant().unwrap();
        assert_eq!(q.text, "SELECT category, quantity FROM sales");
        assert!(q.is_valid);
        assert_eq!(q.issues, "None");
    }

    #[tokio::test]
    async fn test_validator_replaces_query_wholesale() {
        let llm = ScriptedLlm::new(&[
            "Valid: No\nIssues: column \"catgory\" does not exist\nCorrected Query: SELECT \"category\" FROM \"sales\"",
        ]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let query = Relevance::Relevant(SqlQuery::unvalidated("SELECT catgory FROM sales".to_string()));
        let validated = agent
            .validate_and_fix_sql(query, &SchemaSnapshot::default())
            .await
            .unwrap();
        let q = validated.as_relevant().unwrap();
        assert_eq!(q.text, "SELECT \"category\" FROM \"sales\"");
        assert!(!q.is_valid);
        assert!(q.issues.contains("catgory"));
    }

    #[tokio::test]
    async fn test_validator_malformed_response_is_fatal() {
        let llm = ScriptedLlm::new(&["Looks fine to me!"]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let query = Relevance::Relevant(SqlQuery::unvalidated("SELECT 1".to_string()));
        let err = agent
            .validate_and_fix_sql(query, &SchemaSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse { stage: "SQL validator", .. }));
    }

    #[tokio::test]
    async fn test_execute_sql_carries_non_relevant_markers() {
        let store = StubStore::with_rows(vec![vec!["x".into()]]);
        let agent = agent(ScriptedLlm::new(&[]), store.clone());
        assert_eq!(
            agent.execute_sql(&Relevance::Irrelevant).unwrap(),
            Relevance::Irrelevant
        );
        assert_eq!(
            agent.execute_sql(&Relevance::InsufficientInfo).unwrap(),
            Relevance::InsufficientInfo
        );
        assert_eq!(store.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_sql_captures_store_failure() {
        let store = StubStore::failing("no such column: nope");
        let agent = agent(ScriptedLlm::new(&[]), store);
        let query = Relevance::Relevant(SqlQuery::unvalidated("SELECT nope FROM sales".to_string()));
        let error = agent.execute_sql(&query).unwrap_err();
        assert!(error.contains("no such column"));
    }

    #[tokio::test]
    async fn test_format_answer_apologizes_for_irrelevant() {
        let agent = agent(ScriptedLlm::new(&[]), StubStore::with_rows(vec![]));
        let answer = agent
            .format_answer("weather today?", &Relevance::Irrelevant)
            .await
            .unwrap();
        assert_eq!(answer, IRRELEVANT_ANSWER);
    }

    #[tokio::test]
    async fn test_choose_visualization_parses_two_line_response() {
        let llm = ScriptedLlm::new(&[
            "Recommended Visualization: pie\nReason: The question asks for proportions of a whole.",
        ]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let results = Relevance::Relevant(vec![vec!["Electronics".into(), 27.3.into()]]);
        let choice = agent
            .choose_visualization("market share?", "SELECT ...", &results)
            .await
            .unwrap();
        assert_eq!(choice.kind, ChartKind::Pie);
        assert!(choice.reason.contains("proportions"));
    }

    #[tokio::test]
    async fn test_choose_visualization_rejects_unknown_kind() {
        let llm = ScriptedLlm::new(&["Recommended Visualization: Column Graph\nReason: because"]);
        let agent = agent(llm, StubStore::with_rows(vec![]));
        let results = Relevance::Relevant(vec![vec!["a".into(), 1.into()]]);
        let err = agent
            .choose_visualization("q", "sql", &results)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse { stage: "visualization selector", .. }));
    }

    #[tokio::test]
    async fn test_choose_visualization_fixed_for_irrelevant() {
        let agent = agent(ScriptedLlm::new(&[]), StubStore::with_rows(vec![]));
        let choice = agent
            .choose_visualization("q", "NOT_RELEVANT", &Relevance::Irrelevant)
            .await
            .unwrap();
        assert_eq!(choice.kind, ChartKind::None);
    }
}
