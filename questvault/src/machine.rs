//! Quest state machine.
//!
//! ```text
//! backlog ──start──▶ active ──complete──▶ completed
//! ```
//!
//! Backlog cannot jump straight to completed, active cannot fall back to
//! backlog, and a completed quest is frozen except for its visibility flag.
//! Planning an update is pure: [`plan_update`] returns the new quest and the
//! transition that fired, and the service turns that into side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::generator::{AchievementDraft, AchievementSource};
use crate::types::{validate_title, Dimension, Quest, QuestStatus, TITLE_MAX_LEN};

/// Largest progress value.
pub const MAX_PROGRESS: u8 = 100;

/// Victory condition quoted when a completed quest has none.
pub const DEFAULT_VICTORY_CONDITION: &str = "Survival";

/// A status change that carries side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// backlog -> active
    Started,
    /// active -> completed
    Completed,
}

impl Transition {
    pub fn source(&self) -> AchievementSource {
        match self {
            Transition::Started => AchievementSource::QuestStarted,
            Transition::Completed => AchievementSource::QuestCompleted,
        }
    }
}

/// Check a status change against the lifecycle table.
///
/// Returns `None` when the status is unchanged.
pub fn check_transition(from: QuestStatus, to: QuestStatus) -> Result<Option<Transition>> {
    use QuestStatus::*;

    match (from, to) {
        (a, b) if a == b => Ok(None),
        (Backlog, Active) => Ok(Some(Transition::Started)),
        (Active, Completed) => Ok(Some(Transition::Completed)),
        (Backlog, Completed) => Err(VaultError::InvalidTransition {
            from,
            to,
            reason: "quest must be started before it can be completed",
        }),
        (Active, Backlog) => Err(VaultError::InvalidTransition {
            from,
            to,
            reason: "committed quests cannot be un-started",
        }),
        (Completed, _) => Err(VaultError::ImmutableRecord("status".into())),
        _ => Err(VaultError::InvalidTransition {
            from,
            to,
            reason: "transition not permitted",
        }),
    }
}

/// Input for creating a quest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewQuest {
    pub title: String,
    pub dimension: Option<Dimension>,
    /// `backlog` or `active`; defaults to `active`
    pub status: Option<QuestStatus>,
    pub tags: Vec<String>,
    pub victory_condition: Option<String>,
    pub is_hidden: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub progress: u8,
    pub difficulty: Option<u32>,
    pub xp_reward: Option<u32>,
}

impl NewQuest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_status(mut self, status: QuestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_victory_condition(mut self, condition: impl Into<String>) -> Self {
        self.victory_condition = Some(condition.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_xp_reward(mut self, xp_reward: u32) -> Self {
        self.xp_reward = Some(xp_reward);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    /// Validate and turn into a quest owned by `user_id`.
    pub fn build(self, user_id: &str) -> Result<Quest> {
        let status = self.status.unwrap_or(QuestStatus::Active);
        if status == QuestStatus::Completed {
            return Err(VaultError::Validation(
                "quests cannot be created as completed".into(),
            ));
        }

        Ok(Quest {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: validate_title(&self.title)?,
            dimension: self.dimension,
            status,
            tags: normalize_tags(self.tags),
            victory_condition: normalize_text(self.victory_condition),
            is_hidden: self.is_hidden,
            due_date: self.due_date,
            progress: validate_progress(self.progress)?,
            difficulty: validate_difficulty(self.difficulty.unwrap_or(1))?,
            xp_reward: Some(self.xp_reward.unwrap_or(crate::types::DEFAULT_XP_REWARD)),
            created_at: Utc::now(),
        })
    }
}

/// Partial update of a quest. `None` leaves a field alone; for the
/// clearable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestPatch {
    pub title: Option<String>,
    pub dimension: Option<Option<Dimension>>,
    pub status: Option<QuestStatus>,
    pub tags: Option<Vec<String>>,
    pub victory_condition: Option<Option<String>>,
    pub is_hidden: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub progress: Option<u8>,
    pub difficulty: Option<u32>,
    pub xp_reward: Option<u32>,
}

impl QuestPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: QuestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn visibility(hidden: bool) -> Self {
        Self {
            is_hidden: Some(hidden),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_status(mut self, status: QuestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_dimension(mut self, dimension: Option<Dimension>) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_xp_reward(mut self, xp_reward: u32) -> Self {
        self.xp_reward = Some(xp_reward);
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.is_hidden = Some(hidden);
        self
    }
}

/// Outcome of planning an update.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub quest: Quest,
    pub transition: Option<Transition>,
    /// Fields whose value actually changes
    pub changed: Vec<&'static str>,
}

impl PlannedUpdate {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Plan `patch` against `current`.
///
/// Fields equal to the current value are not changes. A completed quest
/// rejects every change except visibility with `ImmutableRecord` before the
/// transition table is consulted.
pub fn plan_update(current: &Quest, patch: &QuestPatch) -> Result<PlannedUpdate> {
    let mut next = current.clone();
    let mut changed = Vec::new();

    if let Some(title) = &patch.title {
        if title.trim() != current.title {
            next.title = title.clone();
            changed.push("title");
        }
    }
    if let Some(dimension) = patch.dimension {
        if dimension != current.dimension {
            next.dimension = dimension;
            changed.push("dimension");
        }
    }
    if let Some(tags) = &patch.tags {
        let tags = normalize_tags(tags.clone());
        if tags != current.tags {
            next.tags = tags;
            changed.push("tags");
        }
    }
    if let Some(condition) = &patch.victory_condition {
        let condition = normalize_text(condition.clone());
        if condition != current.victory_condition {
            next.victory_condition = condition;
            changed.push("victory_condition");
        }
    }
    if let Some(due_date) = patch.due_date {
        if due_date != current.due_date {
            next.due_date = due_date;
            changed.push("due_date");
        }
    }
    if let Some(progress) = patch.progress {
        if progress != current.progress {
            next.progress = progress;
            changed.push("progress");
        }
    }
    if let Some(difficulty) = patch.difficulty {
        if difficulty != current.difficulty {
            next.difficulty = difficulty;
            changed.push("difficulty");
        }
    }
    if let Some(xp_reward) = patch.xp_reward {
        if Some(xp_reward) != current.xp_reward {
            next.xp_reward = Some(xp_reward);
            changed.push("xp_reward");
        }
    }
    if let Some(status) = patch.status {
        if status != current.status {
            next.status = status;
            changed.push("status");
        }
    }

    if current.is_completed() && !changed.is_empty() {
        return Err(VaultError::ImmutableRecord(changed.join(", ")));
    }

    if let Some(hidden) = patch.is_hidden {
        if hidden != current.is_hidden {
            next.is_hidden = hidden;
            changed.push("is_hidden");
        }
    }

    next.title = validate_title(&next.title)?;
    validate_progress(next.progress)?;
    validate_difficulty(next.difficulty)?;

    let transition = check_transition(current.status, next.status)?;

    Ok(PlannedUpdate {
        quest: next,
        transition,
        changed,
    })
}

/// Achievement draft for a transition that just happened to `quest`.
pub fn transition_draft(quest: &Quest, transition: Transition, use_genai: bool) -> AchievementDraft {
    let (title, context) = match transition {
        Transition::Started => (
            format!("Quest Started: {}", quest.title),
            format!("Started the quest '{}'.", quest.title),
        ),
        Transition::Completed => (
            format!("Quest Complete: {}", quest.title),
            format!(
                "Completed the quest '{}'. Victory Condition: {}",
                quest.title,
                quest
                    .victory_condition
                    .as_deref()
                    .unwrap_or(DEFAULT_VICTORY_CONDITION)
            ),
        ),
    };

    AchievementDraft::manual(truncate_chars(&title, TITLE_MAX_LEN), context)
        .with_dimension(quest.dimension)
        .with_quest(quest.id.clone())
        .with_genai(use_genai)
        .with_source(transition.source())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn validate_progress(progress: u8) -> Result<u8> {
    if progress > MAX_PROGRESS {
        return Err(VaultError::Validation(format!(
            "progress must be between 0 and {}",
            MAX_PROGRESS
        )));
    }
    Ok(progress)
}

fn validate_difficulty(difficulty: u32) -> Result<u32> {
    if difficulty == 0 {
        return Err(VaultError::Validation("difficulty must be >= 1".into()));
    }
    Ok(difficulty)
}
