// llm-client-rs/src/lib.rs
//
// HTTP client for an OpenAI-compatible chat-completions API.
//
// This crate provides:
// - Real HTTP calls to the generation provider via reqwest, with a
//   per-request timeout
// - Separate model/temperature profiles for SQL drafting (deterministic)
//   and answer narration
// - Error classification so the orchestrator can distinguish client errors,
//   rate limits, server errors and network failures
// - Code-fence stripping for SQL-role responses
//
// Configuration (.env file or environment):
// - LLM_API_KEY: API key for the provider
// - LLM_API_URL: endpoint URL (defaults to the OpenAI chat completions URL)
// - LLM_SQL_MODEL: model for SQL generation (default: "gpt-4o")
// - LLM_ANSWER_MODEL: model for narration (default: "gpt-4o")
// - LLM_TIMEOUT_SECS: per-request timeout in seconds (default: 30)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Which role this generation call plays in the pipeline. Selects model and
/// temperature: SQL drafting runs deterministic, narration slightly creative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProfile {
    SqlDraft,
    Narration,
}

// Custom error type for generation calls. The orchestrator treats all of
// these as a generation failure; the classification exists for diagnostics
// and HTTP status mapping.
#[derive(Debug)]
pub enum LlmError {
    InvalidRequest(String),    // 400, 401, 403, 404
    RateLimitExceeded(String), // 429
    ServerError(String),       // 500, 502, 503, 504
    NetworkError(String),      // connection failures, timeouts
    ParseError(String),        // malformed response body
    EmptyOutput,               // provider returned no usable text
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LlmError::RateLimitExceeded(msg) => write!(f, "Rate limit exceeded: {}", msg),
            LlmError::ServerError(msg) => write!(f, "Server error: {}", msg),
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            LlmError::EmptyOutput => write!(f, "Generation returned empty output"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Text generation interface consumed by the orchestrator. Implemented by
/// `LlmClient` for production and by deterministic stubs in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        profile: GenerationProfile,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    sql_model: String,
    answer_model: String,
}

impl LlmClient {
    /// Build a client from environment variables. The reqwest client carries
    /// the per-request timeout; a timed-out call surfaces as
    /// `LlmError::NetworkError` and is handled like any other generation
    /// failure.
    pub fn from_env() -> Self {
        let api_url = env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            log::warn!("LLM_API_KEY is not set; generation calls will fail");
        }
        let sql_model = env::var("LLM_SQL_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let answer_model =
            env::var("LLM_ANSWER_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30u64);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        log::info!(
            "LLM client configured: url={}, sql_model={}, answer_model={}, timeout={}s",
            api_url,
            sql_model,
            answer_model,
            timeout_secs
        );

        Self {
            client,
            api_url,
            api_key,
            sql_model,
            answer_model,
        }
    }

    fn params_for(&self, profile: GenerationProfile) -> (&str, f32) {
        match profile {
            GenerationProfile::SqlDraft => (self.sql_model.as_str(), 0.0),
            GenerationProfile::Narration => (self.answer_model.as_str(), 0.3),
        }
    }

    async fn execute_request(
        &self,
        request_body: &ChatCompletionRequest,
    ) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::InvalidRequest("API key is not set".to_string()));
        }

        let response = match self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    return Err(LlmError::NetworkError(format!("Request timed out: {}", err)));
                } else if err.is_connect() {
                    return Err(LlmError::NetworkError(format!("Connection failed: {}", err)));
                } else {
                    return Err(LlmError::NetworkError(format!("Network error: {}", err)));
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                400 => Err(LlmError::InvalidRequest(format!("Bad request: {}", text))),
                401 => Err(LlmError::InvalidRequest(format!("Unauthorized: {}", text))),
                403 => Err(LlmError::InvalidRequest(format!("Forbidden: {}", text))),
                404 => Err(LlmError::InvalidRequest(format!("Not found: {}", text))),
                429 => Err(LlmError::RateLimitExceeded(text)),
                500 | 502 | 503 | 504 => Err(LlmError::ServerError(format!(
                    "Server error ({}): {}",
                    status, text
                ))),
                _ => Err(LlmError::ServerError(format!(
                    "Unexpected status ({}): {}",
                    status, text
                ))),
            };
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::ParseError(format!("Failed to parse response: {}", err)))?;

        if let Some(usage) = &data.usage {
            log::info!("LLM request completed. Used {} tokens", usage.total_tokens);
        }

        let text = data
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyOutput);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        profile: GenerationProfile,
    ) -> Result<String, LlmError> {
        let (model, temperature) = self.params_for(profile);

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature,
        };

        log::info!(
            "LLM request to {} (model: {}, profile: {:?}, prompt length: {})",
            self.api_url,
            model,
            profile,
            prompt.len()
        );

        self.execute_request(&request_body).await
    }
}

/// Strip surrounding Markdown code fences from a generated SQL string.
/// Generators sometimes ignore the "no backticks" instruction; the pipeline
/// normalizes the output before validation.
pub fn strip_code_fences(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```sql") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences_variants() {
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  ```sql\nSELECT 1\n```  "), "SELECT 1");
        assert_eq!(strip_code_fences("```sql SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_strip_code_fences_leaves_inner_backticks() {
        assert_eq!(
            strip_code_fences("SELECT '`quoted`' AS x"),
            "SELECT '`quoted`' AS x"
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            LlmError::InvalidRequest("bad".to_string()).to_string(),
            "Invalid request: bad"
        );
        assert_eq!(
            LlmError::EmptyOutput.to_string(),
            "Generation returned empty output"
        );
    }

    #[test]
    fn test_profile_parameters() {
        std::env::set_var("LLM_SQL_MODEL", "sql-model-x");
        std::env::set_var("LLM_ANSWER_MODEL", "answer-model-y");
        let client = LlmClient::from_env();

        let (model, temp) = client.params_for(GenerationProfile::SqlDraft);
        assert_eq!(model, "sql-model-x");
        assert_eq!(temp, 0.0);

        let (model, temp) = client.params_for(GenerationProfile::Narration);
        assert_eq!(model, "answer-model-y");
        assert_eq!(temp, 0.3);

        std::env::remove_var("LLM_SQL_MODEL");
        std::env::remove_var("LLM_ANSWER_MODEL");
    }

    #[tokio::test]
    async fn test_generate_without_api_key_fails_fast() {
        std::env::remove_var("LLM_API_KEY");
        let client = LlmClient::from_env();
        let err = client
            .generate("SELECT prompt", GenerationProfile::SqlDraft)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
