//! QuestVault Narrator - external text generation for achievements
//!
//! Provides the optional capability that writes achievement flavor text in
//! the "System AI" voice:
//! - Trait-based LLM backends (OpenAI-compatible HTTP, mock)
//! - Per-request credentials, so each user can bring their own API key
//!
//! The core treats every backend as fallible. Nothing in this crate knows
//! about quests or achievements; it only turns a prompt into text.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     AchievementGenerator     │
//! │   (questvault core crate)    │
//! └──────────────┬───────────────┘
//!                │ CompletionRequest + api_key
//!      ┌─────────┴─────────┐
//!      ▼                   ▼
//! ┌─────────────┐   ┌─────────────┐
//! │ OpenAi      │   │ Mock        │
//! │ Backend     │   │ Backend     │
//! └─────────────┘   └─────────────┘
//! ```

pub mod backend;

pub use backend::{
    CompletionRequest, CompletionResponse, LlmBackend, LlmError, MockBackend, OpenAiBackend,
};
