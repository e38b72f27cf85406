use std::thread;
use std::time::Duration;

use fgd_core::config::{LlmConfig, ProviderConfig};
use fgd_core::model::ContextItem;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;
// Only the first two delays are ever used since attempts are capped at
// three; the third is kept so the sequence reads the way it is specified.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];
const CONTEXT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Grok,
    OpenAi,
    Claude,
    Ollama,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Provider> {
        match name.to_ascii_lowercase().as_str() {
            "grok" => Some(Provider::Grok),
            "openai" => Some(Provider::OpenAi),
            "claude" => Some(Provider::Claude),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Grok => "grok",
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::Ollama => "ollama",
        }
    }

    fn default_timeout(&self) -> Duration {
        match self {
            Provider::Grok => Duration::from_secs(30),
            Provider::OpenAi => Duration::from_secs(60),
            Provider::Claude => Duration::from_secs(90),
            Provider::Ollama => Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown llm provider: {0}")]
    UnknownProvider(String),
    #[error("no configuration for llm provider: {0}")]
    MissingProviderConfig(String),
    #[error("missing credentials for llm provider: {0}")]
    AuthMissing(String),
    #[error("llm provider {provider} request failed (status {status:?}): {message}")]
    Http {
        provider: String,
        status: Option<u16>,
        message: String,
    },
    #[error("llm provider {0} request timed out")]
    Timeout(String),
    #[error("llm provider {provider} returned an unparseable response: {message}")]
    Json { provider: String, message: String },
}

impl RouterError {
    fn is_transient(&self) -> bool {
        match self {
            RouterError::Timeout(_) => true,
            RouterError::Http { status, .. } => {
                matches!(status, Some(s) if *s >= 500 || *s == 429)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestBody {
    prompt: String,
    context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub provider: String,
    pub text: String,
    pub context_used: usize,
}

/// Routes `llm_query` calls to a configured provider, injecting the recent
/// context ring into the request and retrying transient failures with
/// exponential backoff. An unconfigured or unrecognized provider is
/// rejected outright — there is no silent fallback to a default provider.
pub struct LlmRouter {
    config: LlmConfig,
    client: Client,
}

impl LlmRouter {
    pub fn new(config: LlmConfig) -> LlmRouter {
        LlmRouter {
            config,
            client: Client::new(),
        }
    }

    pub fn query(
        &self,
        provider_override: Option<&str>,
        prompt: &str,
        context: &[ContextItem],
    ) -> Result<QueryResult, RouterError> {
        let (provider, cfg) = self.resolve_provider(provider_override)?;
        let api_key = match &cfg.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| RouterError::AuthMissing(provider.as_str().to_string()))?,
            ),
            None => None,
        };
        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| provider.default_timeout());

        let body = RequestBody {
            prompt: prompt.to_string(),
            context: recent_summaries(context),
            model: cfg.model.clone(),
        };

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.send(provider, &cfg, &body, api_key.as_deref(), timeout) {
                Ok(text) => {
                    return Ok(QueryResult {
                        provider: provider.as_str().to_string(),
                        text,
                        context_used: body.context.len(),
                    })
                }
                Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = BACKOFF[attempt as usize];
                    log::warn!(
                        "llm provider {} request failed ({err}), retrying in {delay:?}",
                        provider.as_str()
                    );
                    thread::sleep(delay);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.expect("loop always attempts at least once"))
    }

    fn resolve_provider(
        &self,
        provider_override: Option<&str>,
    ) -> Result<(Provider, ProviderConfig), RouterError> {
        let name = provider_override.unwrap_or(&self.config.default_provider);
        let provider =
            Provider::parse(name).ok_or_else(|| RouterError::UnknownProvider(name.to_string()))?;
        let cfg = self
            .config
            .providers
            .get(provider.as_str())
            .cloned()
            .ok_or_else(|| RouterError::MissingProviderConfig(provider.as_str().to_string()))?;
        Ok((provider, cfg))
    }

    fn send(
        &self,
        provider: Provider,
        cfg: &ProviderConfig,
        body: &RequestBody,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<String, RouterError> {
        let mut request = self.client.post(&cfg.base_url).timeout(timeout).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                RouterError::Timeout(provider.as_str().to_string())
            } else {
                RouterError::Http {
                    provider: provider.as_str().to_string(),
                    status: err.status().map(|s| s.as_u16()),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(RouterError::Http {
                provider: provider.as_str().to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: ResponseBody = response.json().map_err(|source| RouterError::Json {
            provider: provider.as_str().to_string(),
            message: source.to_string(),
        })?;
        Ok(parsed.text)
    }
}

fn recent_summaries(context: &[ContextItem]) -> Vec<String> {
    context
        .iter()
        .rev()
        .take(CONTEXT_WINDOW)
        .map(|item| format!("[{}] {}", item.kind, item.summary))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

pub fn new_chat_id() -> String {
    format!("chat_{}", Uuid::new_v4())
}
