//! Query engine: filter, search, sort, and paginate quests and achievements.
//!
//! Queries are plain values. The in-memory store runs them directly with
//! [`QuestQuery::run`] / [`AchievementQuery::run`]; SQL-backed stores
//! translate the same fields into `WHERE` / `ORDER BY` / `LIMIT` clauses and
//! must agree with these semantics, including the tie-breaking order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::error::{Result, VaultError};
use crate::types::{Achievement, Dimension, Quest, QuestStatus};

/// Page size used when the caller gives none.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page selector. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Validate the page number and clamp the size into `[1, MAX_PAGE_SIZE]`.
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 {
            return Err(VaultError::Validation("page must be >= 1".into()));
        }
        Ok(Self {
            page,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.page_size as usize)
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching rows after filtering, before paging
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn empty(pagination: Pagination) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1) as usize)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Cut one page out of an already filtered and sorted list.
pub fn paginate<T>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len();
    let items = items
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.limit())
        .collect();
    Page {
        items,
        total,
        page: pagination.page,
        page_size: pagination.page_size,
    }
}

fn normalize_search(search: Option<&str>) -> Option<String> {
    search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Sort orders for quest listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum QuestSort {
    #[default]
    Newest,
    Oldest,
    DifficultyAsc,
    DifficultyDesc,
    XpAsc,
    XpDesc,
}

impl FromStr for QuestSort {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(QuestSort::Newest),
            "oldest" => Ok(QuestSort::Oldest),
            "difficulty_asc" => Ok(QuestSort::DifficultyAsc),
            "difficulty_desc" => Ok(QuestSort::DifficultyDesc),
            "xp_asc" => Ok(QuestSort::XpAsc),
            "xp_desc" => Ok(QuestSort::XpDesc),
            other => Err(VaultError::Validation(format!("unknown quest sort '{}'", other))),
        }
    }
}

/// Sort orders for achievement listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AchievementSort {
    #[default]
    Newest,
    Oldest,
}

impl FromStr for AchievementSort {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(AchievementSort::Newest),
            "oldest" => Ok(AchievementSort::Oldest),
            other => Err(VaultError::Validation(format!(
                "unknown achievement sort '{}'",
                other
            ))),
        }
    }
}

/// Filter, sort, and page selection over one user's quests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestQuery {
    pub status: Option<QuestStatus>,
    pub difficulty: Option<u32>,
    pub dimension: Option<Dimension>,
    pub is_hidden: Option<bool>,
    pub search: Option<String>,
    pub sort: QuestSort,
    pub pagination: Pagination,
}

impl QuestQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: QuestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort(mut self, sort: QuestSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Restrict to visible quests (public read paths).
    pub fn visible_only(mut self) -> Self {
        self.is_hidden = Some(false);
        self
    }

    /// Lower-cased search term, if any.
    pub fn search_term(&self) -> Option<String> {
        normalize_search(self.search.as_deref())
    }

    pub fn matches(&self, quest: &Quest) -> bool {
        if self.status.is_some_and(|s| s != quest.status) {
            return false;
        }
        if self.difficulty.is_some_and(|d| d != quest.difficulty) {
            return false;
        }
        if self.dimension.is_some() && self.dimension != quest.dimension {
            return false;
        }
        if self.is_hidden.is_some_and(|h| h != quest.is_hidden) {
            return false;
        }
        match self.search_term() {
            Some(term) => {
                quest.title.to_lowercase().contains(&term)
                    || quest
                        .dimension
                        .is_some_and(|d| d.as_str().contains(term.as_str()))
            }
            None => true,
        }
    }

    /// Ordering for the chosen sort key; ties fall back to newest first,
    /// then id.
    pub fn compare(&self, a: &Quest, b: &Quest) -> Ordering {
        let primary = match self.sort {
            QuestSort::Newest => b.created_at.cmp(&a.created_at),
            QuestSort::Oldest => a.created_at.cmp(&b.created_at),
            QuestSort::DifficultyAsc => a.difficulty.cmp(&b.difficulty),
            QuestSort::DifficultyDesc => b.difficulty.cmp(&a.difficulty),
            QuestSort::XpAsc => a.xp_value().cmp(&b.xp_value()),
            QuestSort::XpDesc => b.xp_value().cmp(&a.xp_value()),
        };
        primary
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Run the query over a user's quests.
    pub fn run(&self, quests: impl IntoIterator<Item = Quest>) -> Page<Quest> {
        let mut matched: Vec<Quest> = quests.into_iter().filter(|q| self.matches(q)).collect();
        matched.sort_by(|a, b| self.compare(a, b));
        paginate(matched, self.pagination)
    }
}

/// An achievement joined with its linked quest's title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementView {
    #[serde(flatten)]
    pub achievement: Achievement,
    /// `None` when the link is absent or dangling
    pub quest_title: Option<String>,
}

/// Filter, sort, and page selection over one user's achievements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AchievementQuery {
    pub dimension: Option<Dimension>,
    pub is_hidden: Option<bool>,
    pub quest_id: Option<String>,
    pub search: Option<String>,
    pub sort: AchievementSort,
    pub pagination: Pagination,
}

impl AchievementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_quest(mut self, quest_id: impl Into<String>) -> Self {
        self.quest_id = Some(quest_id.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort(mut self, sort: AchievementSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn visible_only(mut self) -> Self {
        self.is_hidden = Some(false);
        self
    }

    pub fn search_term(&self) -> Option<String> {
        normalize_search(self.search.as_deref())
    }

    pub fn matches(&self, achievement: &Achievement) -> bool {
        if self.dimension.is_some() && self.dimension != achievement.dimension {
            return false;
        }
        if self.is_hidden.is_some_and(|h| h != achievement.is_hidden) {
            return false;
        }
        if self.quest_id.is_some() && self.quest_id != achievement.quest_id {
            return false;
        }
        match self.search_term() {
            Some(term) => {
                achievement.title.to_lowercase().contains(&term)
                    || achievement.context.to_lowercase().contains(&term)
            }
            None => true,
        }
    }

    pub fn compare(&self, a: &Achievement, b: &Achievement) -> Ordering {
        let primary = match self.sort {
            AchievementSort::Newest => b.date_completed.cmp(&a.date_completed),
            AchievementSort::Oldest => a.date_completed.cmp(&b.date_completed),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }

    /// Run the query and join quest titles. `quest_titles` must only hold
    /// quests owned by the same user.
    pub fn run(
        &self,
        achievements: impl IntoIterator<Item = Achievement>,
        quest_titles: &HashMap<String, String>,
    ) -> Page<AchievementView> {
        let mut matched: Vec<Achievement> = achievements
            .into_iter()
            .filter(|a| self.matches(a))
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        paginate(matched, self.pagination).map(|achievement| {
            let quest_title = achievement
                .quest_id
                .as_ref()
                .and_then(|id| quest_titles.get(id).cloned());
            AchievementView {
                achievement,
                quest_title,
            }
        })
    }
}
