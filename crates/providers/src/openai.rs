//! OpenAI-compatible chat completions adapter.
//!
//! One adapter type covers the three wire shapes the catalog uses:
//!
//! | Style             | URL                                                            | Auth            |
//! |-------------------|----------------------------------------------------------------|-----------------|
//! | `azure_openai`    | `{base}/openai/deployments/{model}/chat/completions?api-version=…` | `api-key` header |
//! | `azure_inference` | `{base}/models/chat/completions?api-version=…`                 | `api-key` header |
//! | `openai`          | `{base}/chat/completions`                                      | bearer token    |

use std::time::Duration;

use async_trait::async_trait;
use routing::{Backend, BackendError, BackendRequest, RawResponse, TokenUsage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default `api-version` query parameter for Azure styles.
pub const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

/// Longest error body kept in a `BackendError` message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    #[default]
    AzureOpenai,
    AzureInference,
    Openai,
}

impl std::fmt::Display for ApiStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureOpenai => write!(f, "azure_openai"),
            Self::AzureInference => write!(f, "azure_inference"),
            Self::Openai => write!(f, "openai"),
        }
    }
}

/// Where and how to reach one deployment.
#[derive(Clone, PartialEq)]
pub struct Endpoint {
    pub api_base: String,
    pub api_version: String,
    pub api_key: String,
    pub style: ApiStyle,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("api_base", &self.api_base)
            .field("api_version", &self.api_version)
            .field("api_key", &"<redacted>")
            .field("style", &self.style)
            .finish()
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

/// A model deployment reached over HTTP.
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    sampling: Sampling,
    timeout: Duration,
}

impl ChatCompletionsBackend {
    /// `timeout` must match the one the client was built with; it is only
    /// used to report `BackendError::Timeout`.
    pub fn new(
        client: reqwest::Client,
        endpoint: Endpoint,
        model: impl Into<String>,
        sampling: Sampling,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            model: model.into(),
            sampling,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn url(&self) -> String {
        let base = self.endpoint.api_base.trim_end_matches('/');
        match self.endpoint.style {
            ApiStyle::AzureOpenai => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, self.model, self.endpoint.api_version
            ),
            ApiStyle::AzureInference => format!(
                "{}/models/chat/completions?api-version={}",
                base, self.endpoint.api_version
            ),
            ApiStyle::Openai => format!("{}/chat/completions", base),
        }
    }

    pub fn request_body(&self, request: &BackendRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": [
                {"role": "user", "content": request.instruction}
            ],
            "temperature": self.sampling.temperature,
        });
        // Azure OpenAI selects the model by deployment path.
        if self.endpoint.style != ApiStyle::AzureOpenai {
            body["model"] = serde_json::Value::String(self.model.clone());
        }
        if let Some(max_tokens) = self.sampling.max_tokens {
            body["max_tokens"] = serde_json::Value::from(max_tokens);
        }
        body
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if e.is_connect() || e.is_request() {
            BackendError::Connection(e.to_string())
        } else if e.is_builder() {
            BackendError::Configuration(e.to_string())
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl Backend for ChatCompletionsBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn submit(&self, request: &BackendRequest) -> Result<RawResponse, BackendError> {
        let url = self.url();
        debug!(model = %self.model, style = %self.endpoint.style, %url, "Sending chat completion");

        let builder = self.client.post(&url).json(&self.request_body(request));
        let builder = match self.endpoint.style {
            ApiStyle::AzureOpenai | ApiStyle::AzureInference => {
                builder.header("api-key", &self.endpoint.api_key)
            }
            ApiStyle::Openai => builder.bearer_auth(&self.endpoint.api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(BackendError::from_status(
                status.as_u16(),
                truncate(&body, MAX_ERROR_BODY),
            ));
        }
        parse_completion(&body)
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<Message>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Parse a successful chat completions body into a [`RawResponse`].
///
/// A body without `choices[0].message.content` is an invalid response.
pub fn parse_completion(body: &str) -> Result<RawResponse, BackendError> {
    let parsed: CompletionBody = serde_json::from_str(body)
        .map_err(|e| BackendError::InvalidResponse(format!("not a completion body: {}", e)))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("no choices in response".to_string()))?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| BackendError::InvalidResponse("choice has no message content".to_string()))?;

    Ok(RawResponse {
        content,
        model: parsed.model,
        usage: parsed.usage,
        finish_reason: choice.finish_reason,
    })
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
