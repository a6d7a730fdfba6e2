//! Reasoning gateway: structured prompts in, raw text out.

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Boundary to the language-reasoning backend.
///
/// All parsing of the returned text is the calling stage's responsibility;
/// no determinism is guaranteed.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn invoke(&self, system_prompt: &str, human_prompt: &str) -> Result<String>;
}

/// OpenAI chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.model.clone(),
        )
    }
}

#[async_trait]
impl ReasoningService for LlmClient {
    async fn invoke(&self, system_prompt: &str, human_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": human_prompt}
            ],
            "temperature": 0
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response body: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Llm("No content in LLM response".to_string()))?;

        debug!(chars = content.len(), "LLM response received");
        Ok(content.to_string())
    }
}

/// Strips markdown code fences the model sometimes wraps around JSON or SQL,
/// despite being instructed not to.
pub fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("plain text"), "plain text");
        assert_eq!(strip_code_fences("```\n[1, 2]\n```"), "[1, 2]");
    }
}
