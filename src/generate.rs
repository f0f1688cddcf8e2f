use crate::config::PipelineConfig;
use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";

/// A text-generation backend. Providers are interchangeable: same prompt
/// in, plain text out, errors surfaced for the caller to fall through.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The configured providers in preference order. `generate` walks the
/// chain and returns the first success; an empty set or a full sweep of
/// failures is an error the transformer answers with its template.
pub struct ProviderSet {
    providers: Vec<Arc<dyn GenerativeProvider>>,
    timeout: Duration,
}

impl ProviderSet {
    /// Build the chain from configuration. Gemini is preferred when both
    /// keys are present; an empty chain is valid and means template-only
    /// operation.
    pub fn configure(config: &PipelineConfig) -> Self {
        let mut providers: Vec<Arc<dyn GenerativeProvider>> = Vec::new();

        if let Some(key) = &config.gemini_api_key {
            providers.push(Arc::new(GeminiProvider::new(key.clone())));
        }
        if let Some(key) = &config.openai_api_key {
            providers.push(Arc::new(OpenAiProvider::new(key.clone())));
        }

        info!(
            providers = providers.len(),
            "Configured generation providers"
        );
        Self {
            providers,
            timeout: config.generation_timeout,
        }
    }

    /// Build a chain directly, bypassing configuration. Tests use this
    /// with `MockProvider`.
    pub fn with_providers(providers: Vec<Arc<dyn GenerativeProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        if self.providers.is_empty() {
            return Err(PipelineError::Generation(
                "no generation provider configured".to_string(),
            ));
        }

        let mut last_error = None;
        for provider in &self.providers {
            match timeout(self.timeout, provider.generate(prompt)).await {
                Ok(Ok(text)) => {
                    debug!(provider = provider.name(), "Generation succeeded");
                    return Ok(text);
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        provider = provider.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Provider timed out, trying next"
                    );
                    last_error = Some(PipelineError::Timeout {
                        budget_ms: self.timeout.as_millis() as u64,
                    });
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::Generation("all providers failed".to_string())))
    }
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}?key={}", GEMINI_ENDPOINT, self.api_key);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.7 }
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Generation(format!(
                "gemini returned HTTP {}",
                response.status()
            )));
        }

        let parsed: GeminiResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::Generation("gemini returned no text".to_string()))
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl GenerativeProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": OPENAI_MODEL,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.7
        });

        let response = self
            .client
            .post(OPENAI_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::Generation(format!(
                "openai returned HTTP {}",
                response.status()
            )));
        }

        let parsed: OpenAiResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::Generation("openai returned no text".to_string()))
    }
}

/// Pull a typed JSON payload out of a provider reply. Replies routinely
/// wrap the JSON in a fenced code block or surround it with prose, so
/// after a direct parse fails the outermost brace span is tried.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(parsed) = serde_json::from_str(unfenced) {
        return Some(parsed);
    }

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&unfenced[start..=end]).ok()
}

/// Canned provider for tests: returns a fixed response, or fails when
/// constructed with `failing()`.
pub struct MockProvider {
    response: Option<String>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
        }
    }

    pub fn failing() -> Self {
        Self { response: None }
    }
}

#[async_trait]
impl GenerativeProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(PipelineError::Generation("mock failure".to_string())),
        }
    }
}
