//! HTTP generation backends (OpenAI-compatible chat completions, Anthropic messages).

use super::prompt::{PromptTemplates, RenderedPrompt};
use super::{GeneratorBackend, ModuleSpecContext};
use crate::config::JauntConfig;
use crate::error::JauntError;
use crate::python::strip_markdown_fences;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 8192;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TRANSIENT_RETRIES: u32 = 4;
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Which wire protocol the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, JauntError> {
        match name {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(JauntError::Config(format!(
                "Unsupported llm.provider: {:?}. Supported: 'openai', 'anthropic'.",
                other
            ))),
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_BASE_URL,
            Provider::Anthropic => ANTHROPIC_BASE_URL,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// A failed call, and whether repeating it could help.
struct CallFailure {
    error: JauntError,
    transient: bool,
}

fn map_http_error(error: reqwest::Error) -> CallFailure {
    let transient = error.is_timeout() || error.is_connect();
    CallFailure {
        error: JauntError::from(error),
        transient,
    }
}

fn status_failure(status: StatusCode, body: &str) -> CallFailure {
    let message = match status.as_u16() {
        401 => format!("Authentication failed: {}", body),
        404 => format!("Model not found: {}", body),
        429 => format!("Rate limit exceeded: {}", body),
        _ => format!("Request failed with status {}: {}", status, body),
    };
    CallFailure {
        error: JauntError::Backend(message),
        transient: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
    }
}

/// Backend that calls a hosted model over HTTP.
pub struct HttpBackend {
    client: Client,
    provider: Provider,
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: Option<u32>,
    templates: PromptTemplates,
    backoff: Duration,
}

impl HttpBackend {
    pub fn new(
        provider: Provider,
        model: String,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
        templates: PromptTemplates,
    ) -> Result<Self, JauntError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| JauntError::Backend(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            provider,
            model,
            api_key,
            base_url,
            max_tokens: None,
            templates,
            backoff: BASE_BACKOFF,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Base delay between transient-failure retries (doubles each time).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete_once(&self, prompt: &RenderedPrompt) -> Result<String, CallFailure> {
        match self.provider {
            Provider::OpenAi => self.complete_openai(prompt).await,
            Provider::Anthropic => self.complete_anthropic(prompt).await,
        }
    }

    async fn complete_openai(&self, prompt: &RenderedPrompt) -> Result<String, CallFailure> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_failure(status, &body));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| CallFailure {
            error: JauntError::Backend(format!("Failed to parse response: {}", e)),
            transient: false,
        })?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CallFailure {
                error: JauntError::Backend("OpenAI returned empty content.".to_string()),
                transient: false,
            })
    }

    async fn complete_anthropic(&self, prompt: &RenderedPrompt) -> Result<String, CallFailure> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            system: &prompt.system,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user.clone(),
            }],
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_failure(status, &body));
        }

        let message: AnthropicResponse = response.json().await.map_err(|e| CallFailure {
            error: JauntError::Backend(format!("Failed to parse response: {}", e)),
            transient: false,
        })?;
        let text: String = message
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(CallFailure {
                error: JauntError::Backend("Anthropic returned empty content.".to_string()),
                transient: false,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl GeneratorBackend for HttpBackend {
    async fn generate_module(
        &self,
        ctx: &ModuleSpecContext,
        extra_error_context: &[String],
    ) -> Result<String, JauntError> {
        let prompt = self.templates.render(ctx, extra_error_context);
        debug!(module = %ctx.spec_module, provider = ?self.provider, model = %self.model, "Requesting generation");

        let mut attempt = 0;
        loop {
            match self.complete_once(&prompt).await {
                Ok(raw) => return Ok(strip_markdown_fences(&raw)),
                Err(failure) if failure.transient && attempt + 1 < MAX_TRANSIENT_RETRIES => {
                    let delay = self.backoff * 2u32.pow(attempt);
                    warn!(
                        module = %ctx.spec_module,
                        attempt = attempt + 1,
                        max = MAX_TRANSIENT_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "Transient backend error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }
}

/// Build the configured backend. A missing API key is a configuration error.
pub fn backend_from_config(
    cfg: &JauntConfig,
    root: &Path,
) -> Result<Arc<dyn GeneratorBackend>, JauntError> {
    let provider = Provider::parse(&cfg.llm.provider)?;
    let api_key = std::env::var(&cfg.llm.api_key_env)
        .map(|k| k.trim().to_string())
        .unwrap_or_default();
    if api_key.is_empty() {
        return Err(JauntError::Config(format!(
            "Missing API key: {}. Set it in the environment.",
            cfg.llm.api_key_env
        )));
    }
    let templates = PromptTemplates::load(root, &cfg.prompts)?;
    let backend = HttpBackend::new(
        provider,
        cfg.llm.model.clone(),
        api_key,
        cfg.llm.base_url.clone(),
        Duration::from_secs(cfg.llm.timeout_secs),
        templates,
    )?
    .with_max_tokens(cfg.llm.max_tokens);
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("openai").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("anthropic").unwrap(), Provider::Anthropic);
        assert!(matches!(Provider::parse("ollama"), Err(JauntError::Config(_))));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let mut cfg = JauntConfig::default();
        cfg.llm.api_key_env = "JAUNT_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let dir = tempfile::TempDir::new().unwrap();
        let err = match backend_from_config(&cfg, dir.path()) {
            Err(e) => e,
            Ok(_) => panic!("expected a config error"),
        };
        assert!(matches!(err, JauntError::Config(ref m) if m.contains("JAUNT_TEST_KEY_THAT_IS_NEVER_SET")));
        assert_eq!(err.exit_code().as_i32(), 2);
    }

    #[test]
    fn test_status_failure_classification() {
        assert!(status_failure(StatusCode::TOO_MANY_REQUESTS, "slow down").transient);
        assert!(status_failure(StatusCode::BAD_GATEWAY, "").transient);
        let auth = status_failure(StatusCode::UNAUTHORIZED, "bad key");
        assert!(!auth.transient);
        assert!(auth.error.to_string().contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_backend_error() {
        let backend = HttpBackend::new(
            Provider::OpenAi,
            "m".into(),
            "k".into(),
            Some("http://127.0.0.1:9".into()),
            Duration::from_secs(2),
            PromptTemplates::default(),
        )
        .unwrap()
        .with_backoff(Duration::from_millis(1));
        let ctx = ModuleSpecContext {
            kind: crate::registry::SpecKind::Implementation,
            spec_module: "pkg.mod".into(),
            generated_module: "pkg.__generated__.mod".into(),
            expected_names: vec!["f".into()],
            spec_sources: Default::default(),
            decorator_prompts: Default::default(),
            dependency_apis: Default::default(),
            dependency_generated_modules: Default::default(),
        };
        let result = backend.generate_with_retry(&ctx, 2).await;
        assert!(result.source.is_none());
        assert!(result.errors[0].starts_with("Backend error"));
    }
}
