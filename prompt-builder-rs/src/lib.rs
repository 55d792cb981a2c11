//! Prompt construction for the NL-to-SQL pipeline.
//!
//! Three builders, all pure and deterministic:
//! - `build_sql_prompt`: question + schema description -> instruction to emit
//!   exactly one SELECT statement, no prose, no code fences
//! - `build_repair_prompt`: adds the failed SQL and its failure reason and
//!   asks for a corrected single statement
//! - `build_answer_prompt`: question + at most `NARRATION_ROW_CAP` result
//!   rows as JSON, with an explicit truncation note when the full result was
//!   larger
//!
//! The domain context block pins party abbreviations so the generator does
//! not hallucinate expansions (e.g. JSP is Jan Suraaj, not Janata Socialist).

use serde_json::{Map, Value};

/// Maximum number of result rows fed into the answer prompt. Rows beyond the
/// cap are omitted from narration; the full row set still goes back to the
/// caller.
pub const NARRATION_ROW_CAP: usize = 120;

/// Party abbreviation glossary shared by the SQL and answer prompts.
pub const DOMAIN_CONTEXT: &str = "\
IMPORTANT PARTY ABBREVIATIONS & CONTEXT:
- JSP = Jan Suraaj Party (Founded by Prashant Kishor). IT IS NOT \"Janata Socialist Party\".
- RJD = Rashtriya Janata Dal
- JDU = Janata Dal (United)
- VIP = Vikassheel Insaan Party
- HAM = Hindustani Awam Morcha
- CPIML / CPI(ML) = Communist Party of India (Marxist-Leninist) Liberation
- AIMIM = All India Majlis-e-Ittehadul Muslimeen
- IND = Independent candidates (not a political party)";

/// An instruction payload for a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub text: String,
}

/// Build the prompt asking the generator for one SELECT statement grounded
/// only in the given schema.
pub fn build_sql_prompt(question: &str, schema_description: &str) -> PromptPayload {
    let text = format!(
        "You are a data analyst writing SQL for SQLite against the following schema:\n\
         \n{schema}\n\
         \n{context}\n\
         \nWrite a SINGLE SQL SELECT query that answers the user's question.\n\
         \nRules:\n\
         - Only use SELECT (no INSERT/UPDATE/DELETE/CREATE/DROP/ALTER/TRUNCATE).\n\
         - Do not modify data.\n\
         - Prefer concise results (include LIMIT where appropriate).\n\
         - For vague questions like \"Top candidates\", default LIMIT 50.\n\
         - Use correct column and table/view names.\n\
         - Prefer using candidates_enriched, party_summary_enriched, and alliance_summary\n  \
           when working with alliances or party short codes.\n\
         - Be careful with table aliases: if you alias a table as \"ce\", use \"ce\" consistently.\n\
         - Do NOT wrap the query in backticks.\n\
         - Return only the SQL, nothing else.\n\
         \nUser question: {question}",
        schema = schema_description,
        context = DOMAIN_CONTEXT,
        question = question,
    );
    PromptPayload { text }
}

/// Build the one-shot repair prompt from a failed candidate and its failure
/// reason (validator rejection or store error).
pub fn build_repair_prompt(
    question: &str,
    failed_sql: &str,
    error_message: &str,
    schema_description: &str,
) -> PromptPayload {
    let text = format!(
        "The following SQL query failed and must be corrected.\n\
         \nSchema:\n{schema}\n\
         \nFailed SQL:\n{failed}\n\
         \nFailure reason:\n{error}\n\
         \nUser question: {question}\n\
         \nReturn a corrected SINGLE SQL SELECT query for SQLite. \
         No explanations, no Markdown, only the SQL.",
        schema = schema_description,
        failed = failed_sql,
        error = error_message,
        question = question,
    );
    PromptPayload { text }
}

/// Build the narration prompt from the question, the SQL that produced the
/// result, and the result rows. At most `NARRATION_ROW_CAP` rows are
/// serialized; `total_rows` is the size of the full result so the prompt can
/// state the truncation explicitly.
pub fn build_answer_prompt(
    question: &str,
    sql: &str,
    rows: &[Map<String, Value>],
    total_rows: usize,
) -> PromptPayload {
    let capped: Vec<&Map<String, Value>> = rows.iter().take(NARRATION_ROW_CAP).collect();
    let rows_json =
        serde_json::to_string_pretty(&capped).unwrap_or_else(|_| "[]".to_string());

    let truncation_note = if total_rows > NARRATION_ROW_CAP {
        format!(
            "\nNOTE: Only the first {} of {} rows are shown in Result rows. \
             Base your answer on these, mention that the result was truncated, \
             and you may describe overall patterns without listing every row.\n",
            NARRATION_ROW_CAP, total_rows
        )
    } else {
        String::new()
    };

    let text = format!(
        "User question:\n{question}\n\
         \nSQL used:\n{sql}\n\
         \n{context}\n\
         \nResult rows (JSON, up to {cap} rows):\n{rows}\n{note}\
         \nInstructions:\n\
         - Base your answer ONLY on the information in the result rows.\n\
         - Explain the answer clearly in 1-3 short paragraphs.\n\
         - Highlight key numbers (vote shares, total votes, seats won, margins, etc.) when relevant.\n\
         - If the result is a list (e.g., top candidates or constituencies), summarise patterns\n  \
           such as which parties or alliances dominate.\n\
         - If there are no rows, say that no matching data was found.\n\
         - Do NOT invent data that is not present in the rows.\n\
         - STRICTLY use the party abbreviations defined in the CONTEXT (e.g., JSP is Jan Suraaj Party).",
        question = question,
        sql = sql,
        context = DOMAIN_CONTEXT,
        cap = NARRATION_ROW_CAP,
        rows = rows_json,
        note = truncation_note,
    );
    PromptPayload { text }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(party: &str, seats: i64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("party".to_string(), Value::String(party.to_string()));
        m.insert("seats".to_string(), Value::Number(seats.into()));
        m
    }

    #[test]
    fn test_sql_prompt_contains_question_and_schema() {
        let payload = build_sql_prompt("Which party won?", "tables: party_summary(...)");
        assert!(payload.text.contains("Which party won?"));
        assert!(payload.text.contains("party_summary"));
        assert!(payload.text.contains("SINGLE SQL SELECT"));
        assert!(payload.text.contains("Jan Suraaj Party"));
    }

    #[test]
    fn test_sql_prompt_is_deterministic() {
        let a = build_sql_prompt("q", "s");
        let b = build_sql_prompt("q", "s");
        assert_eq!(a, b);
    }

    #[test]
    fn test_repair_prompt_carries_failure_details() {
        let payload = build_repair_prompt(
            "Which party won?",
            "SELECT partyy FROM party_summary",
            "no such column: partyy",
            "schema here",
        );
        assert!(payload.text.contains("SELECT partyy FROM party_summary"));
        assert!(payload.text.contains("no such column: partyy"));
        assert!(payload.text.contains("Which party won?"));
        assert!(payload.text.contains("corrected SINGLE SQL SELECT"));
    }

    #[test]
    fn test_answer_prompt_caps_rows_at_limit() {
        let rows: Vec<_> = (0..500).map(|i| row("P", i)).collect();
        let payload = build_answer_prompt("q", "SELECT 1", &rows, rows.len());

        // Row 119 is included, row 120 and beyond are not.
        assert!(payload.text.contains("\"seats\": 119"));
        assert!(!payload.text.contains("\"seats\": 120"));
        assert!(payload.text.contains("Only the first 120 of 500 rows"));
        assert!(payload.text.contains("truncated"));
    }

    #[test]
    fn test_answer_prompt_no_truncation_note_under_cap() {
        let rows: Vec<_> = (0..5).map(|i| row("P", i)).collect();
        let payload = build_answer_prompt("q", "SELECT 1", &rows, rows.len());
        assert!(!payload.text.contains("NOTE: Only the first"));
    }

    #[test]
    fn test_answer_prompt_mentions_empty_result_handling() {
        let payload = build_answer_prompt("q", "SELECT 1", &[], 0);
        assert!(payload.text.contains("no matching data"));
        assert!(payload.text.contains("[]"));
    }
}
