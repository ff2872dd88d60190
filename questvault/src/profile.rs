//! Profile summaries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::ledger;
use crate::query::{AchievementView, Page};
use crate::types::{DimensionStat, Quest, QuestStatus, User};

/// Player rank derived from the hardest completed quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Novice,
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rank {
    /// Rank for a set of completed difficulties.
    pub fn from_completed<I: IntoIterator<Item = u32>>(difficulties: I) -> Self {
        match difficulties.into_iter().max() {
            None => Rank::Novice,
            Some(d) if d >= 5 => Rank::Legendary,
            Some(4) => Rank::Epic,
            Some(3) => Rank::Rare,
            Some(2) => Rank::Uncommon,
            Some(_) => Rank::Common,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Novice => "Novice",
            Rank::Common => "Common",
            Rank::Uncommon => "Uncommon",
            Rank::Rare => "Rare",
            Rank::Epic => "Epic",
            Rank::Legendary => "Legendary",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quest counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestCounts {
    pub backlog: usize,
    pub active: usize,
    pub completed: usize,
}

impl QuestCounts {
    pub fn tally<'a>(quests: impl IntoIterator<Item = &'a Quest>) -> Self {
        let mut counts = Self::default();
        for quest in quests {
            match quest.status {
                QuestStatus::Backlog => counts.backlog += 1,
                QuestStatus::Active => counts.active += 1,
                QuestStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }
}

/// Character sheet for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub character_level: u32,
    pub total_xp: u64,
    /// Ledger rows in canonical dimension order
    pub dimensions: Vec<DimensionStat>,
    pub quests: QuestCounts,
    pub achievements_unlocked: usize,
    /// Completed quests keyed by difficulty
    pub difficulty_breakdown: BTreeMap<u32, usize>,
    pub rank: Rank,
    pub recent_achievements: Vec<AchievementView>,
    /// Whether a generation credential is configured. Always false in a
    /// public profile.
    pub has_credential: bool,
}

impl ProfileSummary {
    /// Assemble a summary. `quests` and `recent` must already be scoped
    /// to what the viewer may see.
    pub fn build(
        user: &User,
        mut stats: Vec<DimensionStat>,
        quests: &[Quest],
        achievements_unlocked: usize,
        recent: Vec<AchievementView>,
    ) -> Self {
        ledger::sort_canonical(&mut stats);

        let mut breakdown = BTreeMap::new();
        for quest in quests.iter().filter(|q| q.is_completed()) {
            *breakdown.entry(quest.difficulty).or_insert(0) += 1;
        }

        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            character_level: ledger::character_level(&stats),
            total_xp: ledger::total_xp(&stats),
            dimensions: stats,
            quests: QuestCounts::tally(quests),
            achievements_unlocked,
            rank: Rank::from_completed(breakdown.keys().copied()),
            difficulty_breakdown: breakdown,
            recent_achievements: recent,
            has_credential: user.credential().is_some(),
        }
    }

    /// Strip account state that only the owner may see.
    pub fn into_public(mut self) -> Self {
        self.has_credential = false;
        self
    }
}

/// Profile as seen by anyone: visible records only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub summary: ProfileSummary,
    pub quests: Page<Quest>,
    pub achievements: Page<AchievementView>,
}
