//! QuestVault - gamification rules engine
//!
//! Turns everyday tasks into quests and keeps the game state consistent:
//! - Quest lifecycle state machine (backlog → active → completed)
//! - Achievement generation with an optional external narrator and a
//!   deterministic local fallback
//! - Per-dimension XP ledger with full recomputation from history
//! - Filter / search / sort / paginate over quests and achievements
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         GamificationService             │
//! │  (per-user lock, one unit of work)      │
//! └────────────────┬────────────────────────┘
//!                  │
//!    ┌─────────────┼──────────────┬──────────────┐
//!    ▼             ▼              ▼              ▼
//! ┌─────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐
//! │ machine │ │ generator │ │  ledger   │ │   Store   │
//! │         │ │ (narrator)│ │           │ │ (query)   │
//! └─────────┘ └───────────┘ └───────────┘ └───────────┘
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod machine;
pub mod memory;
pub mod profile;
pub mod query;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{GenerationConfig, ListingConfig, ServiceConfig};
pub use error::{Result, StoreError, VaultError};
pub use generator::{
    AchievementDraft, AchievementGenerator, AchievementSource, FixedRandom, RandomSource,
    SeededRandom, ThreadRandom,
};
pub use machine::{NewQuest, QuestPatch, Transition};
pub use memory::MemoryStore;
pub use profile::{ProfileSummary, PublicProfile, Rank};
pub use query::{
    AchievementQuery, AchievementSort, AchievementView, Page, Pagination, QuestQuery, QuestSort,
};
pub use service::{AchievementPatch, GamificationService, QuestUpdate, SettingsPatch};
pub use store::{Store, StoreResult, UnitOfWork, VisibilityTarget, Write};
pub use types::*;
