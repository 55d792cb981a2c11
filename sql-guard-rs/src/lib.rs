//! SQL Safety Validator
//!
//! Inspects candidate SQL produced by the generation step and accepts or
//! rejects it based on read-only criteria before it can reach the store:
//! - the statement must begin with SELECT or WITH (case-insensitive, leading
//!   whitespace and comments stripped)
//! - no second statement may be chained behind a semicolon
//! - no mutation or schema-change keyword may appear as a standalone word
//!
//! The scan is token-based and skips string literals and comments, so a
//! column named `created_at` or a literal like 'DROP me' is not a false
//! positive. A rejection here is a hard stop for the candidate; the reason
//! is recorded and handed to the repair prompt.

use serde::Serialize;

/// Keywords that indicate mutation, schema change, or an escape hatch out of
/// the read-only surface. Matched as whole words, case-insensitive.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "ATTACH", "DETACH", "VACUUM", "REINDEX", "PRAGMA", "COPY", "GRANT",
    "REVOKE",
];

/// Outcome of validating a single SQL candidate.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validate a candidate SQL string for read-only execution.
pub fn validate(candidate: &str) -> ValidationResult {
    let result = validate_inner(candidate);
    if let Some(reason) = &result.reason {
        log::debug!("SQL candidate rejected: {}", reason);
    }
    result
}

fn validate_inner(candidate: &str) -> ValidationResult {
    let body = strip_leading_trivia(candidate);
    if body.is_empty() {
        return ValidationResult::reject("empty statement");
    }

    let first_word = leading_keyword(body);
    let upper = first_word.to_ascii_uppercase();
    if upper != "SELECT" && upper != "WITH" {
        return ValidationResult::reject(format!(
            "only SELECT statements are allowed (statement starts with '{}')",
            first_word
        ));
    }

    // Walk the statement once, outside strings and comments, collecting
    // bare-word tokens and watching for statement separators.
    let mut tokens = Tokenizer::new(candidate);
    while let Some(event) = tokens.next_event() {
        match event {
            Event::Word(word) => {
                let upper = word.to_ascii_uppercase();
                if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
                    return ValidationResult::reject(format!(
                        "forbidden keyword '{}' in candidate SQL",
                        upper
                    ));
                }
            }
            Event::Semicolon { rest } => {
                // A single trailing semicolon is tolerated; anything after
                // it would be a second statement.
                if !strip_leading_trivia(rest).is_empty() {
                    return ValidationResult::reject(
                        "multiple statements are not allowed",
                    );
                }
            }
            Event::UnterminatedString => {
                return ValidationResult::reject("unterminated string literal");
            }
        }
    }

    ValidationResult::accept()
}

/// Strip leading whitespace, `-- line` comments and `/* block */` comments.
fn strip_leading_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = match rest.find('\n') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = match rest.find("*/") {
                Some(idx) => &rest[idx + 2..],
                None => "",
            };
        } else {
            return s;
        }
    }
}

/// First run of alphabetic characters, used for the statement-opening check.
fn leading_keyword(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

enum Event<'a> {
    Word(&'a str),
    Semicolon { rest: &'a str },
    UnterminatedString,
}

/// Minimal SQL scanner: yields bare words and semicolons, skipping string
/// literals ('…' and "…"), quoted identifiers and comments.
struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn next_event(&mut self) -> Option<Event<'a>> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            let rest = &self.src[self.pos..];

            // Comments
            if rest.starts_with("--") {
                self.pos += match rest.find('\n') {
                    Some(idx) => idx + 1,
                    None => rest.len(),
                };
                continue;
            }
            if rest.starts_with("/*") {
                self.pos += match rest.find("*/") {
                    Some(idx) => idx + 2,
                    None => rest.len(),
                };
                continue;
            }

            // String literals and quoted identifiers
            let c = rest.chars().next().unwrap();
            if c == '\'' || c == '"' || c == '`' {
                match rest[1..].find(c) {
                    Some(idx) => {
                        self.pos += idx + 2;
                        continue;
                    }
                    None => {
                        self.pos = self.src.len();
                        return Some(Event::UnterminatedString);
                    }
                }
            }

            if c == ';' {
                self.pos += 1;
                return Some(Event::Semicolon {
                    rest: &self.src[self.pos..],
                });
            }

            if c.is_ascii_alphabetic() || c == '_' {
                let start = self.pos;
                let len = rest
                    .char_indices()
                    .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                self.pos += len;
                return Some(Event::Word(&self.src[start..start + len]));
            }

            self.pos += c.len_utf8();
        }
        None
    }
}
