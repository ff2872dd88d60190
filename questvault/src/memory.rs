//! In-memory [`Store`] for tests and ephemeral runs.
//!
//! All tables sit behind one `RwLock`. A unit of work is applied to a copy
//! of the tables and swapped in only when every write succeeded.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::query::{AchievementQuery, AchievementView, Page, QuestQuery};
use crate::store::{Store, StoreResult, UnitOfWork, VisibilityTarget, Write};
use crate::types::{Achievement, Dimension, DimensionStat, Quest, User};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<String, User>,
    quests: HashMap<String, Quest>,
    achievements: HashMap<String, Achievement>,
    stats: BTreeMap<(String, Dimension), DimensionStat>,
}

impl Tables {
    fn apply(&mut self, write: Write) -> StoreResult<()> {
        match write {
            Write::PutUser(user) => {
                let taken = self
                    .users
                    .values()
                    .any(|u| u.username == user.username && u.id != user.id);
                if taken {
                    return Err(StoreError::Conflict(format!(
                        "username '{}' is already registered",
                        user.username
                    )));
                }
                self.users.insert(user.id.clone(), user);
            }
            Write::PutQuest(quest) => {
                self.quests.insert(quest.id.clone(), quest);
            }
            Write::DeleteQuest { user_id, quest_id } => {
                if self
                    .quests
                    .get(&quest_id)
                    .is_some_and(|q| q.user_id == user_id)
                {
                    self.quests.remove(&quest_id);
                }
            }
            Write::PutAchievement(achievement) => {
                self.achievements
                    .insert(achievement.id.clone(), achievement);
            }
            Write::PutStat(stat) => {
                self.stats
                    .insert((stat.user_id.clone(), stat.dimension), stat);
            }
            Write::ReplaceStats { user_id, stats } => {
                self.stats.retain(|(owner, _), _| *owner != user_id);
                for stat in stats {
                    self.stats.insert((user_id.clone(), stat.dimension), stat);
                }
            }
            Write::SetVisibility {
                user_id,
                target,
                hidden,
            } => match target {
                VisibilityTarget::Quests => self
                    .quests
                    .values_mut()
                    .filter(|q| q.user_id == user_id)
                    .for_each(|q| q.is_hidden = hidden),
                VisibilityTarget::Achievements => self
                    .achievements
                    .values_mut()
                    .filter(|a| a.user_id == user_id)
                    .for_each(|a| a.is_hidden = hidden),
            },
            Write::PurgeUserData { user_id } => {
                self.quests.retain(|_, q| q.user_id != user_id);
                self.achievements.retain(|_, a| a.user_id != user_id);
                self.stats.retain(|(owner, _), _| *owner != user_id);
            }
        }
        Ok(())
    }

    fn owned_quests(&self, user_id: &str) -> impl Iterator<Item = &Quest> {
        let user_id = user_id.to_string();
        self.quests.values().filter(move |q| q.user_id == user_id)
    }
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_quest(&self, user_id: &str, quest_id: &str) -> StoreResult<Option<Quest>> {
        Ok(self
            .tables
            .read()
            .await
            .quests
            .get(quest_id)
            .filter(|q| q.user_id == user_id)
            .cloned())
    }

    async fn user_quests(&self, user_id: &str) -> StoreResult<Vec<Quest>> {
        Ok(self
            .tables
            .read()
            .await
            .owned_quests(user_id)
            .cloned()
            .collect())
    }

    async fn query_quests(&self, user_id: &str, query: &QuestQuery) -> StoreResult<Page<Quest>> {
        let tables = self.tables.read().await;
        Ok(query.run(tables.owned_quests(user_id).cloned()))
    }

    async fn get_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> StoreResult<Option<Achievement>> {
        Ok(self
            .tables
            .read()
            .await
            .achievements
            .get(achievement_id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn query_achievements(
        &self,
        user_id: &str,
        query: &AchievementQuery,
    ) -> StoreResult<Page<AchievementView>> {
        let tables = self.tables.read().await;
        let titles: HashMap<String, String> = tables
            .owned_quests(user_id)
            .map(|q| (q.id.clone(), q.title.clone()))
            .collect();
        let owned = tables
            .achievements
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned();
        Ok(query.run(owned, &titles))
    }

    async fn dimension_stats(&self, user_id: &str) -> StoreResult<Vec<DimensionStat>> {
        // BTreeMap keys order rows by dimension within a user
        Ok(self
            .tables
            .read()
            .await
            .stats
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, stat)| stat.clone())
            .collect())
    }

    async fn dimension_stat(
        &self,
        user_id: &str,
        dimension: Dimension,
    ) -> StoreResult<Option<DimensionStat>> {
        Ok(self
            .tables
            .read()
            .await
            .stats
            .get(&(user_id.to_string(), dimension))
            .cloned())
    }

    async fn apply(&self, unit: UnitOfWork) -> StoreResult<()> {
        if unit.is_empty() {
            return Ok(());
        }
        let count = unit.len();

        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for write in unit.into_writes() {
            staged.apply(write)?;
        }
        *tables = staged;

        debug!(writes = count, "Applied unit of work");
        Ok(())
    }
}
