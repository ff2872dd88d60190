//! OpenAI-compatible chat completions.
//!
//! Anything that speaks `POST {base_url}/chat/completions` works: OpenAI
//! itself, Ollama, vLLM, LocalAI.

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions backend.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    require_credential: bool,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            require_credential: false,
        })
    }

    /// The hosted OpenAI API, where every call needs a key.
    pub fn openai(model: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        Ok(Self::new(OPENAI_BASE_URL, model, api_key)?.with_required_credential(true))
    }

    /// Fail fast when a call has no key at all.
    pub fn with_required_credential(mut self, required: bool) -> Self {
        self.require_credential = required;
        self
    }

    fn bearer<'a>(&'a self, request: &'a CompletionRequest) -> Result<Option<&'a str>, LlmError> {
        match request.credential().or(self.api_key.as_deref()) {
            Some(key) => Ok(Some(key)),
            None if self.require_credential => Err(LlmError::MissingCredential),
            None => Ok(None),
        }
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<Turn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Format>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Format {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl<'a> ChatBody<'a> {
    fn new(model: &'a str, request: &'a CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(Turn {
                role: "system",
                content: system,
            });
        }
        messages.push(Turn {
            role: "user",
            content: &request.prompt,
        });

        Self {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_output.then_some(Format {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ReplyChoice>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

async fn status_error(response: Response) -> LlmError {
    let status = response.status().as_u16();
    match status {
        401 | 403 => LlmError::Unauthorized(status),
        429 => LlmError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        _ => LlmError::Status {
            status,
            body: response.text().await.unwrap_or_default(),
        },
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let bearer = self.bearer(&request)?;
        let url = format!("{}/chat/completions", self.base_url);

        let mut http = self
            .client
            .post(&url)
            .json(&ChatBody::new(&self.model, &request));
        if let Some(key) = bearer {
            http = http.bearer_auth(key);
        }

        debug!(model = %self.model, json = request.json_output, "Sending chat completion");

        let response = http
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        let choice = reply.choices.into_iter().next().ok_or(LlmError::Empty)?;
        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::Empty)?;

        Ok(CompletionResponse {
            content,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            truncated: choice.finish_reason.as_deref() == Some("length"),
        })
    }
}
