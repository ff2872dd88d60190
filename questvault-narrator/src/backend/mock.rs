//! Scripted backend for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};

/// Answers every prompt with the same text and records what it was sent.
pub struct MockBackend {
    model: String,
    reply: String,
    available: bool,
    delay: Option<Duration>,
    calls: AtomicU32,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reply: r#"{"description": "Mock description", "reward": "Mock reward"}"#.to_string(),
            available: true,
            delay: None,
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_response(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// An unavailable mock fails every call.
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Credential on the most recent request.
    pub fn last_api_key(&self) -> Option<String> {
        self.last_request()
            .and_then(|request| request.credential().map(String::from))
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|request| request.clone())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available {
            return Err(LlmError::Unavailable("mock switched off".to_string()));
        }

        Ok(CompletionResponse {
            content: self.reply.clone(),
            model: self.model.clone(),
            truncated: false,
        })
    }
}
