use serde::{Deserialize, Serialize};

use super::types::{LlmClient, ModelOptions};
use super::ExtractionError;

/// Environment variables for the default client.
const ENV_API_BASE: &str = "HOLDERSCAN_API_BASE";
const ENV_API_KEY: &str = "HOLDERSCAN_API_KEY";
const ENV_MODEL: &str = "HOLDERSCAN_MODEL";

const DEFAULT_API_BASE: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo-instruct";

/// HTTP client for an OpenAI-compatible text-completion endpoint.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }

    /// Build a client from `HOLDERSCAN_API_BASE` / `HOLDERSCAN_API_KEY` /
    /// `HOLDERSCAN_MODEL`, with the caller's model-call timeout. Fails with
    /// `Config` when the key is unset.
    pub fn from_env(timeout_secs: u64) -> Result<Self, ExtractionError> {
        Self::from_env_vars(ENV_API_BASE, ENV_API_KEY, ENV_MODEL, timeout_secs)
    }

    fn from_env_vars(
        base_var: &str,
        key_var: &str,
        model_var: &str,
        timeout_secs: u64,
    ) -> Result<Self, ExtractionError> {
        let api_key = std::env::var(key_var)
            .map_err(|_| ExtractionError::Config(format!("{key_var} is not set")))?;
        let base_url =
            std::env::var(base_var).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let model = std::env::var(model_var).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(&base_url, &api_key, &model, timeout_secs))
    }

    /// The model name being used.
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Request body for /v1/completions
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

/// Response body from /v1/completions
#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        prompt: &str,
        options: &ModelOptions,
    ) -> Result<String, ExtractionError> {
        let url = format!("{}/v1/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    ExtractionError::Transport(format!("cannot reach {}", self.base_url))
                } else {
                    ExtractionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Transport(format!(
                "completion endpoint returned status {status}: {body}"
            )));
        }

        // Envelope decode failure is a transport-class error: no completion
        // text ever existed, so it must not consume a content retry.
        let parsed: CompletionResponse = response.json().map_err(|e| {
            ExtractionError::Transport(format!("invalid completion envelope: {e}"))
        })?;

        match parsed.choices.into_iter().next() {
            Some(choice) => Ok(choice.text),
            None => Err(ExtractionError::Transport(
                "completion envelope carried no choices".into(),
            )),
        }
    }
}

/// Mock model invoker for testing — returns a configured response.
pub struct MockLlmClient {
    response: String,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
        }
    }
}

impl LlmClient for MockLlmClient {
    fn complete(
        &self,
        _prompt: &str,
        _options: &ModelOptions,
    ) -> Result<String, ExtractionError> {
        Ok(self.response.clone())
    }
}
