// ask-service-rs/src/orchestrator.rs
//
// The NL-to-SQL pipeline: prompt -> SQL draft -> safety validation ->
// execution -> narration, with exactly one repair round.
//
// A candidate can fail in two ways before narration: the safety validator
// rejects it, or the store errors while executing it. Either failure feeds
// one repair prompt (carrying the failed SQL and the failure reason) and the
// repaired candidate goes through the same validate-then-execute path. A
// second failure is terminal. Narration failures are terminal too; the
// response is all-or-nothing.

use std::sync::Arc;

use election_store::{QueryRows, SqlExecutor};
use llm_client::{strip_code_fences, GenerationProfile, TextGenerator};
use prompt_builder::{build_answer_prompt, build_repair_prompt, build_sql_prompt};
use serde::Serialize;
use serde_json::{Map, Value};

/// Successful outcome of one `/ask` request. `rows` is the full result set;
/// only the narration prompt was capped.
#[derive(Debug, Serialize)]
pub struct AskOutcome {
    pub question: String,
    pub sql: String,
    pub answer: String,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    /// True when the result was larger than the narration cap; the narrator
    /// saw a prefix of `rows`.
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("SQL generation failed: {0}")]
    Generation(String),
    #[error("generated SQL was rejected: {0}")]
    ValidationRejected(String),
    #[error("query execution failed: {0}")]
    StoreExecution(String),
    #[error("answer generation failed: {0}")]
    Narration(String),
}

impl AskError {
    /// Pipeline stage label for structured failure logs.
    pub fn stage(&self) -> &'static str {
        match self {
            AskError::EmptyQuestion => "input",
            AskError::Generation(_) => "sql_generation",
            AskError::ValidationRejected(_) => "validation",
            AskError::StoreExecution(_) => "execution",
            AskError::Narration(_) => "narration",
        }
    }
}

// Pre-narration failure of one candidate. Both kinds are repairable; the
// distinction survives into the terminal error after the repair round.
enum CandidateFailure {
    Rejected(String),
    Execution(String),
}

impl CandidateFailure {
    fn message(&self) -> &str {
        match self {
            CandidateFailure::Rejected(msg) => msg,
            CandidateFailure::Execution(msg) => msg,
        }
    }

    fn into_ask_error(self) -> AskError {
        match self {
            CandidateFailure::Rejected(msg) => AskError::ValidationRejected(msg),
            CandidateFailure::Execution(msg) => AskError::StoreExecution(msg),
        }
    }
}

pub struct AskPipeline {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SqlExecutor>,
    schema_description: String,
}

impl AskPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SqlExecutor>,
        schema_description: String,
    ) -> Self {
        Self {
            generator,
            store,
            schema_description,
        }
    }

    /// Run the full pipeline for one question.
    pub async fn ask(&self, question: &str) -> Result<AskOutcome, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }

        let prompt = build_sql_prompt(question, &self.schema_description);
        let draft = self.generate_sql(&prompt.text).await?;

        let (sql, result) = match self.try_candidate(&draft).await {
            Ok(result) => (draft, result),
            Err(failure) => {
                log::warn!(
                    "SQL candidate failed ({}); attempting one repair",
                    failure.message()
                );
                let repair = build_repair_prompt(
                    question,
                    &draft,
                    failure.message(),
                    &self.schema_description,
                );
                let repaired = self.generate_sql(&repair.text).await?;
                match self.try_candidate(&repaired).await {
                    Ok(result) => (repaired, result),
                    Err(second) => {
                        log::error!("repaired SQL failed too: {}", second.message());
                        return Err(second.into_ask_error());
                    }
                }
            }
        };

        let total_rows = result.row_count();
        let answer_prompt = build_answer_prompt(question, &sql, &result.rows, total_rows);
        let answer = self
            .generator
            .generate(&answer_prompt.text, GenerationProfile::Narration)
            .await
            .map_err(|err| AskError::Narration(err.to_string()))?;

        log::info!("ask pipeline completed: {} rows, sql length {}", total_rows, sql.len());

        Ok(AskOutcome {
            question: question.to_string(),
            sql,
            answer,
            truncated: total_rows > prompt_builder::NARRATION_ROW_CAP,
            row_count: total_rows,
            rows: result.rows,
        })
    }

    async fn generate_sql(&self, prompt: &str) -> Result<String, AskError> {
        let raw = self
            .generator
            .generate(prompt, GenerationProfile::SqlDraft)
            .await
            .map_err(|err| AskError::Generation(err.to_string()))?;
        Ok(strip_code_fences(&raw))
    }

    // Validation always runs before execution; a rejected candidate never
    // reaches the store.
    async fn try_candidate(&self, sql: &str) -> Result<QueryRows, CandidateFailure> {
        let verdict = sql_guard::validate(sql);
        if !verdict.accepted {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "statement rejected".to_string());
            return Err(CandidateFailure::Rejected(reason));
        }

        self.store
            .execute_select(sql)
            .await
            .map_err(|err| CandidateFailure::Execution(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use election_store::StoreError;
    use llm_client::LlmError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // Scripted generator: pops the next canned response per call and records
    // every prompt it was asked to complete.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<(String, GenerationProfile)>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<&str, &str>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<(String, GenerationProfile)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            profile: GenerationProfile,
        ) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), profile));
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(LlmError::ServerError(msg)),
                None => panic!("generator called more times than scripted"),
            }
        }
    }

    // Scripted store: pops the next canned result per call and records every
    // SQL statement it was asked to execute.
    struct ScriptedStore {
        script: Mutex<VecDeque<Result<QueryRows, String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn new(script: Vec<Result<QueryRows, &str>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map_err(String::from))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlExecutor for ScriptedStore {
        async fn execute_select(&self, sql: &str) -> Result<QueryRows, StoreError> {
            self.calls.lock().unwrap().push(sql.to_string());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(msg)) => Err(StoreError::Failed(msg)),
                None => panic!("store called more times than scripted"),
            }
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        m
    }

    fn rows_result(rows: Vec<Map<String, Value>>) -> QueryRows {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        QueryRows { columns, rows }
    }

    fn pipeline(
        generator: Arc<ScriptedGenerator>,
        store: Arc<ScriptedStore>,
    ) -> AskPipeline {
        AskPipeline::new(generator, store, "schema: candidates(...)".to_string())
    }

    #[tokio::test]
    async fn test_happy_path_returns_sql_rows_and_answer() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT party, COUNT(*) AS seats FROM results \
                GROUP BY party ORDER BY seats DESC LIMIT 1"),
            Ok("BJP won the most seats with 89."),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(vec![row(&[
            ("party", Value::from("BJP")),
            ("seats", Value::from(89)),
        ])]))]));

        let outcome = pipeline(generator.clone(), store.clone())
            .ask("Which party won the most seats?")
            .await
            .unwrap();

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0]["party"], "BJP");
        assert_eq!(outcome.rows[0]["seats"], 89);
        assert!(outcome.answer.contains("BJP"));
        assert!(outcome.sql.starts_with("SELECT party"));
        assert_eq!(outcome.row_count, 1);
        assert!(!outcome.truncated);
        assert_eq!(store.calls().len(), 1);

        // Exactly two generation calls: draft and narration.
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].1, GenerationProfile::SqlDraft);
        assert_eq!(prompts[1].1, GenerationProfile::Narration);
    }

    #[tokio::test]
    async fn test_empty_question_rejected_before_generation() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let store = Arc::new(ScriptedStore::new(vec![]));

        let err = pipeline(generator.clone(), store)
            .ask("   ")
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::EmptyQuestion));
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_code_fences_stripped_before_validation() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("```sql\nSELECT 1 AS one\n```"),
            Ok("The answer is one."),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(vec![row(&[(
            "one",
            Value::from(1),
        )])]))]));

        let outcome = pipeline(generator, store.clone()).ask("one?").await.unwrap();
        assert_eq!(outcome.sql, "SELECT 1 AS one");
        assert_eq!(store.calls()[0], "SELECT 1 AS one");
    }

    #[tokio::test]
    async fn test_validation_rejection_triggers_repair_and_repaired_sql_is_returned() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("DROP TABLE candidates"),
            Ok("SELECT candidate FROM candidates LIMIT 5"),
            Ok("Here are five candidates."),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(vec![row(&[(
            "candidate",
            Value::from("Anil Kumar"),
        )])]))]));

        let outcome = pipeline(generator.clone(), store.clone())
            .ask("Show some candidates")
            .await
            .unwrap();

        // The repaired statement is what comes back, and the rejected one
        // never reached the store.
        assert_eq!(outcome.sql, "SELECT candidate FROM candidates LIMIT 5");
        assert_eq!(store.calls(), vec!["SELECT candidate FROM candidates LIMIT 5"]);

        // The repair prompt carries the failed SQL and the rejection reason.
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].0.contains("DROP TABLE candidates"));
        assert!(prompts[1].0.contains("DROP"));
    }

    #[tokio::test]
    async fn test_store_error_triggers_repair_with_error_message() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT partyy FROM party_summary"),
            Ok("SELECT party FROM party_summary"),
            Ok("Here are the parties."),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![
            Err("no such column: partyy"),
            Ok(rows_result(vec![row(&[("party", Value::from("BJP"))])])),
        ]));

        let outcome = pipeline(generator.clone(), store.clone())
            .ask("List parties")
            .await
            .unwrap();

        assert_eq!(outcome.sql, "SELECT party FROM party_summary");
        assert_eq!(store.calls().len(), 2);

        let prompts = generator.prompts();
        assert!(prompts[1].0.contains("no such column: partyy"));
        assert!(prompts[1].0.contains("SELECT partyy FROM party_summary"));
    }

    #[tokio::test]
    async fn test_double_rejection_is_terminal_and_store_is_never_called() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("DROP TABLE candidates"),
            Ok("DELETE FROM candidates"),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![]));

        let err = pipeline(generator, store.clone())
            .ask("break things")
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::ValidationRejected(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_store_failure_is_terminal() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT a FROM t"),
            Ok("SELECT b FROM t"),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![
            Err("no such table: t"),
            Err("no such table: t"),
        ]));

        let err = pipeline(generator, store.clone())
            .ask("query a missing table")
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::StoreExecution(_)));
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err("upstream 503")]));
        let store = Arc::new(ScriptedStore::new(vec![]));

        let err = pipeline(generator, store)
            .ask("anything")
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::Generation(_)));
    }

    #[tokio::test]
    async fn test_narration_failure_fails_the_whole_request() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT 1 AS one"),
            Err("narration model unavailable"),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(vec![row(&[(
            "one",
            Value::from(1),
        )])]))]));

        let err = pipeline(generator, store)
            .ask("one?")
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::Narration(_)));
        assert_eq!(err.stage(), "narration");
    }

    #[tokio::test]
    async fn test_large_result_returns_all_rows_but_caps_narration() {
        let all_rows: Vec<_> = (0..500)
            .map(|i| row(&[("ac_no", Value::from(i))]))
            .collect();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT ac_no FROM candidates"),
            Ok("There are many constituencies."),
        ]));
        let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(all_rows))]));

        let outcome = pipeline(generator.clone(), store)
            .ask("List all constituencies")
            .await
            .unwrap();

        // Full rows to the caller, capped rows to the narrator.
        assert_eq!(outcome.rows.len(), 500);
        assert_eq!(outcome.row_count, 500);
        assert!(outcome.truncated);
        let narration_prompt = &generator.prompts()[1].0;
        assert!(narration_prompt.contains("\"ac_no\": 119"));
        assert!(!narration_prompt.contains("\"ac_no\": 120"));
        assert!(narration_prompt.contains("Only the first 120 of 500 rows"));
    }

    #[tokio::test]
    async fn test_pipeline_is_deterministic_for_identical_scripts() {
        async fn run() -> AskOutcome {
            let generator = Arc::new(ScriptedGenerator::new(vec![
                Ok("SELECT party FROM party_summary LIMIT 1"),
                Ok("BJP leads."),
            ]));
            let store = Arc::new(ScriptedStore::new(vec![Ok(rows_result(vec![row(&[(
                "party",
                Value::from("BJP"),
            )])]))]));
            pipeline(generator, store).ask("Who leads?").await.unwrap()
        }

        let first = run().await;
        let second = run().await;
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.answer, second.answer);
        assert_eq!(first.rows, second.rows);
    }
}
