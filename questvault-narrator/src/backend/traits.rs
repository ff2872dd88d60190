//! The narration seam.
//!
//! A backend turns one prompt into one piece of text. Requests carry the
//! crawler's own credential, so a single backend serves every user.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

/// Why a narration call produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend switched off or unreachable at construction
    #[error("Narrator unavailable: {0}")]
    Unavailable(String),

    /// Neither the request nor the backend carries a key
    #[error("No API credential")]
    MissingCredential,

    /// Key rejected upstream
    #[error("Credential rejected (HTTP {0})")]
    Unauthorized(u16),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unreadable response: {0}")]
    Decode(String),

    /// Upstream answered with no text
    #[error("Completion was empty")]
    Empty,
}

/// A text-generation backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Model or backend identifier, for logs.
    fn id(&self) -> &str;

    /// Generate text for a single prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// One prompt, optionally framed by a system instruction.
#[derive(Clone, Default, Serialize)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    /// Clamped to 0.0..=2.0
    pub temperature: Option<f32>,
    /// Ask for a bare JSON object
    pub json_output: bool,
    /// Per-request credential; takes precedence over a backend key
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl CompletionRequest {
    pub fn user(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// The request's key, ignoring blanks.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

// Keys must never reach a log line
impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("system", &self.system)
            .field("prompt", &self.prompt)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("json_output", &self.json_output)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
    /// Model that answered, as reported upstream
    pub model: String,
    /// Generation stopped at the token limit
    pub truncated: bool,
}
