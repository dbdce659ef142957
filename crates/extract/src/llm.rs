use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::cache::ResponseCache;
use crate::prompt;
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
    permits: Arc<Semaphore>,
    max_json_retries: usize,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
            cache: None,
            permits: Arc::new(Semaphore::new(3)),
            max_json_retries: 3,
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Cap the number of in-flight requests across every clone of this client.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(), // Force JSON output
            options: OllamaOptions { temperature: 0.0 },
        };

        let _permit = self.permits
            .acquire()
            .await
            .context("LLM request limiter closed")?;

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    /// One completion, retried with backoff on transport errors and served
    /// from the cache when possible.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get_llm_response(prompt)) {
            tracing::debug!(model = %self.model, "LLM cache hit");
            return Ok(cached);
        }

        let response = self.retry
            .retry("ollama_generate", || self.generate_once(prompt))
            .await?;

        Ok(response)
    }

    /// Generate with retry for invalid JSON
    pub async fn generate_json_with_retry(
        &self,
        prompt: &str,
        max_retries: usize,
    ) -> Result<String> {
        for attempt in 0..max_retries {
            let response = strip_code_fence(&self.generate(prompt).await?);

            if serde_json::from_str::<serde_json::Value>(&response).is_ok() {
                self.remember(prompt, &response);
                return Ok(response);
            }

            // If invalid, retry with correction prompt
            if attempt < max_retries - 1 {
                tracing::debug!(attempt, "LLM returned invalid JSON, asking for a correction");
                let retry_prompt = prompt::build_retry_prompt(&response);

                let corrected = strip_code_fence(&self.generate(&retry_prompt).await?);
                if serde_json::from_str::<serde_json::Value>(&corrected).is_ok() {
                    self.remember(prompt, &corrected);
                    return Ok(corrected);
                }
            }
        }

        anyhow::bail!("Failed to get valid JSON after {} retries", max_retries)
    }

    /// Generate and deserialize a structured response.
    pub async fn generate_structured<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        let json_str = self
            .generate_json_with_retry(prompt, self.max_json_retries)
            .await?;

        serde_json::from_str(&json_str).context("Failed to parse structured LLM output")
    }

    fn remember(&self, prompt: &str, response: &str) {
        if let Some(cache) = &self.cache {
            cache.set_llm_response(prompt, response.to_string());
        }
    }
}

/// Models sometimes wrap JSON in markdown fences despite being told not to.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.trim_end_matches("```").trim().to_string()
}
