//! Persistence seam.
//!
//! Reads are owner-scoped: every quest and achievement lookup takes the
//! owning user id and returns `None` for records owned by someone else.
//! Writes are batched into a [`UnitOfWork`] that a backend must apply
//! all-or-nothing.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, VaultError};
use crate::query::{AchievementQuery, AchievementView, Page, QuestQuery};
use crate::types::{Achievement, Dimension, DimensionStat, Quest, User};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which records a bulk visibility update touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityTarget {
    Quests,
    Achievements,
}

impl VisibilityTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityTarget::Quests => "quests",
            VisibilityTarget::Achievements => "achievements",
        }
    }
}

impl fmt::Display for VisibilityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisibilityTarget {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quests" => Ok(VisibilityTarget::Quests),
            "achievements" => Ok(VisibilityTarget::Achievements),
            other => Err(VaultError::Validation(format!(
                "unknown visibility target '{}'",
                other
            ))),
        }
    }
}

/// One write inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert or replace a user. Fails with `Conflict` when another user
    /// already holds the username.
    PutUser(User),
    /// Insert or replace a quest
    PutQuest(Quest),
    /// Delete a quest if the user owns it
    DeleteQuest { user_id: String, quest_id: String },
    /// Insert or replace an achievement
    PutAchievement(Achievement),
    /// Insert or replace one ledger row
    PutStat(DimensionStat),
    /// Drop every ledger row of the user and insert `stats`
    ReplaceStats {
        user_id: String,
        stats: Vec<DimensionStat>,
    },
    /// Set the visibility flag on all of a user's quests or achievements
    SetVisibility {
        user_id: String,
        target: VisibilityTarget,
        hidden: bool,
    },
    /// Delete all quests, achievements and ledger rows of a user
    PurgeUserData { user_id: String },
}

impl Write {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Write::PutUser(_) => "put_user",
            Write::PutQuest(_) => "put_quest",
            Write::DeleteQuest { .. } => "delete_quest",
            Write::PutAchievement(_) => "put_achievement",
            Write::PutStat(_) => "put_stat",
            Write::ReplaceStats { .. } => "replace_stats",
            Write::SetVisibility { .. } => "set_visibility",
            Write::PurgeUserData { .. } => "purge_user_data",
        }
    }
}

/// Ordered batch of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn with(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Abstract persistence used by the gamification service.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Fetch a quest owned by `user_id`.
    async fn get_quest(&self, user_id: &str, quest_id: &str) -> StoreResult<Option<Quest>>;

    /// Every quest owned by `user_id`, in no particular order.
    async fn user_quests(&self, user_id: &str) -> StoreResult<Vec<Quest>>;

    /// Filter, sort and page a user's quests with [`QuestQuery`] semantics.
    async fn query_quests(&self, user_id: &str, query: &QuestQuery) -> StoreResult<Page<Quest>>;

    /// Fetch an achievement owned by `user_id`.
    async fn get_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> StoreResult<Option<Achievement>>;

    /// Filter, sort and page a user's achievements, joining the linked
    /// quest's title when that quest is owned by the same user.
    async fn query_achievements(
        &self,
        user_id: &str,
        query: &AchievementQuery,
    ) -> StoreResult<Page<AchievementView>>;

    /// All ledger rows of a user, in canonical dimension order.
    async fn dimension_stats(&self, user_id: &str) -> StoreResult<Vec<DimensionStat>>;

    async fn dimension_stat(
        &self,
        user_id: &str,
        dimension: Dimension,
    ) -> StoreResult<Option<DimensionStat>>;

    /// Apply every write or none of them.
    async fn apply(&self, unit: UnitOfWork) -> StoreResult<()>;
}
