//! Gamification service: the entry point for every user-facing operation.
//!
//! Each mutation loads state from the [`Store`], runs it through the state
//! machine, generator and ledger, and persists the result as a single
//! [`UnitOfWork`]. Mutations for one user are serialized by a per-user lock,
//! so a ledger recompute never interleaves with an award for that user.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use questvault_narrator::LlmBackend;

use crate::config::ServiceConfig;
use crate::error::{Result, VaultError};
use crate::generator::{AchievementDraft, AchievementGenerator, RandomSource};
use crate::ledger;
use crate::machine::{plan_update, transition_draft, NewQuest, QuestPatch, Transition};
use crate::profile::{ProfileSummary, PublicProfile};
use crate::query::{AchievementQuery, AchievementView, Page, Pagination, QuestQuery, MAX_PAGE_SIZE};
use crate::store::{Store, UnitOfWork, VisibilityTarget, Write};
use crate::types::{validate_title, Achievement, DimensionStat, Quest, QuestStatus, User};

/// Shortest allowed username.
pub const USERNAME_MIN_LEN: usize = 3;

/// Longest allowed username.
pub const USERNAME_MAX_LEN: usize = 32;

/// Changes to a user's settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    /// Blank clears the display name
    pub display_name: Option<String>,
    /// Blank clears the credential
    pub openai_api_key: Option<String>,
}

/// Editable fields of an achievement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementPatch {
    pub title: Option<String>,
    pub context: Option<String>,
    pub is_hidden: Option<bool>,
    /// `Some(None)` unlinks
    pub quest_id: Option<Option<String>>,
}

/// Result of a quest update.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestUpdate {
    pub quest: Quest,
    pub transition: Option<Transition>,
    /// Achievement generated by the transition
    pub achievement: Option<Achievement>,
    /// Ledger row after the completion award
    pub stat: Option<DimensionStat>,
}

/// Held while one user's state is being mutated. On drop the map entry is
/// removed unless another task still holds or awaits the same lock.
struct UserGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Orchestrates quests, achievements and the XP ledger over a [`Store`].
pub struct GamificationService {
    store: Arc<dyn Store>,
    generator: AchievementGenerator,
    config: ServiceConfig,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GamificationService {
    /// Create a service with local-only achievement text.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self {
            store,
            generator: AchievementGenerator::new(config.generation.clone()),
            config,
            user_locks: DashMap::new(),
        }
    }

    /// Attach an external narrator for achievement text.
    pub fn with_narrator(mut self, narrator: Arc<dyn LlmBackend>) -> Self {
        self.generator = self.generator.with_narrator(narrator);
        self
    }

    /// Replace the random source used for fallback text.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.generator = self.generator.with_random(random);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn lock_user(&self, user_id: &str) -> UserGuard<'_> {
        let lock = self
            .user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        UserGuard {
            locks: &self.user_locks,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn require_user(&self, user_id: &str) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("user {}", user_id)))
    }

    async fn require_quest(&self, user_id: &str, quest_id: &str) -> Result<Quest> {
        self.store
            .get_quest(user_id, quest_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("quest {}", quest_id)))
    }

    async fn require_achievement(&self, user_id: &str, achievement_id: &str) -> Result<Achievement> {
        self.store
            .get_achievement(user_id, achievement_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("achievement {}", achievement_id)))
    }

    // ---- users ----

    /// Register a user. The password hash comes from the auth layer.
    pub async fn register_user(
        &self,
        username: &str,
        display_name: Option<String>,
        hashed_password: &str,
    ) -> Result<User> {
        let username = validate_username(username)?;
        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(VaultError::Conflict(format!(
                "username '{}' is already registered",
                username
            )));
        }

        let mut user = User::new(username, hashed_password);
        user.display_name = display_name
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        self.store
            .apply(UnitOfWork::new().with(Write::PutUser(user.clone())))
            .await?;

        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.require_user(user_id).await
    }

    /// Update display name and generation credential.
    pub async fn update_settings(&self, user_id: &str, patch: SettingsPatch) -> Result<User> {
        let _guard = self.lock_user(user_id).await;

        let mut user = self.require_user(user_id).await?;
        if let Some(display_name) = patch.display_name {
            let trimmed = display_name.trim();
            user.display_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Some(key) = patch.openai_api_key {
            let trimmed = key.trim();
            user.openai_api_key = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }

        self.store
            .apply(UnitOfWork::new().with(Write::PutUser(user.clone())))
            .await?;

        info!(user_id, has_credential = user.credential().is_some(), "Updated settings");
        Ok(user)
    }

    // ---- quests ----

    /// Create a quest. Creation is not a transition and has no side effects.
    pub async fn create_quest(&self, user_id: &str, new_quest: NewQuest) -> Result<Quest> {
        let _guard = self.lock_user(user_id).await;

        self.require_user(user_id).await?;
        let quest = new_quest.build(user_id)?;

        self.store
            .apply(UnitOfWork::new().with(Write::PutQuest(quest.clone())))
            .await?;

        info!(user_id, quest_id = %quest.id, status = %quest.status, "Created quest");
        Ok(quest)
    }

    pub async fn get_quest(&self, user_id: &str, quest_id: &str) -> Result<Quest> {
        self.require_quest(user_id, quest_id).await
    }

    /// Apply a partial update, firing transition side effects exactly once.
    ///
    /// The achievement, the ledger award and the quest write commit together
    /// or not at all.
    pub async fn update_quest(
        &self,
        user_id: &str,
        quest_id: &str,
        patch: QuestPatch,
    ) -> Result<QuestUpdate> {
        let _guard = self.lock_user(user_id).await;

        let user = self.require_user(user_id).await?;
        let current = self.require_quest(user_id, quest_id).await?;
        let plan = plan_update(&current, &patch)?;

        if plan.is_noop() {
            debug!(user_id, quest_id, "Quest update changed nothing");
            return Ok(QuestUpdate {
                quest: current,
                transition: None,
                achievement: None,
                stat: None,
            });
        }

        let quest = plan.quest;
        let mut unit = UnitOfWork::new();
        let mut achievement = None;
        let mut stat = None;

        if let Some(transition) = plan.transition {
            let draft = transition_draft(
                &quest,
                transition,
                self.config.generation.narrate_transitions,
            );
            let generated = self.generator.generate(&user, draft).await?;
            unit.push(Write::PutAchievement(generated.clone()));
            achievement = Some(generated);

            if transition == Transition::Completed {
                if let Some(dimension) = quest.dimension {
                    let current_stat = self.store.dimension_stat(user_id, dimension).await?;
                    let awarded =
                        ledger::award(current_stat, user_id, dimension, quest.xp_value());
                    unit.push(Write::PutStat(awarded.clone()));
                    stat = Some(awarded);
                }
            }
        }

        unit.push(Write::PutQuest(quest.clone()));
        self.store.apply(unit).await?;

        info!(
            user_id,
            quest_id,
            changed = %plan.changed.join(","),
            transition = ?plan.transition,
            "Updated quest"
        );

        Ok(QuestUpdate {
            quest,
            transition: plan.transition,
            achievement,
            stat,
        })
    }

    /// Move a quest from backlog to active.
    pub async fn start_quest(&self, user_id: &str, quest_id: &str) -> Result<QuestUpdate> {
        self.update_quest(user_id, quest_id, QuestPatch::status(QuestStatus::Active))
            .await
    }

    /// Move a quest from active to completed.
    pub async fn complete_quest(&self, user_id: &str, quest_id: &str) -> Result<QuestUpdate> {
        self.update_quest(user_id, quest_id, QuestPatch::status(QuestStatus::Completed))
            .await
    }

    /// Delete a quest. Linked achievements keep their (now dangling) link
    /// and earned XP stays in the ledger until the next recompute.
    pub async fn delete_quest(&self, user_id: &str, quest_id: &str) -> Result<()> {
        let _guard = self.lock_user(user_id).await;

        self.require_quest(user_id, quest_id).await?;
        self.store
            .apply(UnitOfWork::new().with(Write::DeleteQuest {
                user_id: user_id.to_string(),
                quest_id: quest_id.to_string(),
            }))
            .await?;

        info!(user_id, quest_id, "Deleted quest");
        Ok(())
    }

    pub async fn list_quests(&self, user_id: &str, query: &QuestQuery) -> Result<Page<Quest>> {
        Ok(self.store.query_quests(user_id, query).await?)
    }

    // ---- achievements ----

    /// Log an achievement by hand.
    pub async fn create_achievement(
        &self,
        user_id: &str,
        draft: AchievementDraft,
    ) -> Result<Achievement> {
        let _guard = self.lock_user(user_id).await;

        let user = self.require_user(user_id).await?;
        if let Some(quest_id) = &draft.quest_id {
            self.require_quest(user_id, quest_id).await?;
        }

        let achievement = self.generator.generate(&user, draft).await?;
        self.store
            .apply(UnitOfWork::new().with(Write::PutAchievement(achievement.clone())))
            .await?;

        info!(
            user_id,
            achievement_id = %achievement.id,
            use_genai = achievement.use_genai,
            "Created achievement"
        );
        Ok(achievement)
    }

    /// Edit title, context, visibility or quest link.
    pub async fn update_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
        patch: AchievementPatch,
    ) -> Result<Achievement> {
        let _guard = self.lock_user(user_id).await;

        let mut achievement = self.require_achievement(user_id, achievement_id).await?;

        if let Some(title) = &patch.title {
            achievement.title = validate_title(title)?;
        }
        if let Some(context) = &patch.context {
            achievement.context = context.trim().to_string();
        }
        if let Some(hidden) = patch.is_hidden {
            achievement.is_hidden = hidden;
        }
        if let Some(link) = patch.quest_id {
            if let Some(quest_id) = &link {
                if achievement.quest_id.as_ref() != Some(quest_id) {
                    self.require_quest(user_id, quest_id).await?;
                }
            }
            achievement.quest_id = link;
        }

        self.store
            .apply(UnitOfWork::new().with(Write::PutAchievement(achievement.clone())))
            .await?;

        info!(user_id, achievement_id, "Updated achievement");
        Ok(achievement)
    }

    pub async fn get_achievement(&self, user_id: &str, achievement_id: &str) -> Result<Achievement> {
        self.require_achievement(user_id, achievement_id).await
    }

    pub async fn list_achievements(
        &self,
        user_id: &str,
        query: &AchievementQuery,
    ) -> Result<Page<AchievementView>> {
        Ok(self.store.query_achievements(user_id, query).await?)
    }

    // ---- ledger & profile ----

    /// Rebuild a user's ledger from their completed quests.
    pub async fn recompute_ledger(&self, user_id: &str) -> Result<Vec<DimensionStat>> {
        let _guard = self.lock_user(user_id).await;

        self.require_user(user_id).await?;
        let quests = self.store.user_quests(user_id).await?;
        let stats = ledger::recompute(user_id, &quests);

        self.store
            .apply(UnitOfWork::new().with(Write::ReplaceStats {
                user_id: user_id.to_string(),
                stats: stats.clone(),
            }))
            .await?;

        info!(
            user_id,
            dimensions = stats.len(),
            total_xp = ledger::total_xp(&stats),
            "Recomputed ledger"
        );
        Ok(stats)
    }

    pub async fn dimension_stats(&self, user_id: &str) -> Result<Vec<DimensionStat>> {
        Ok(self.store.dimension_stats(user_id).await?)
    }

    /// The owner's own character sheet.
    pub async fn profile(&self, user_id: &str) -> Result<ProfileSummary> {
        let user = self.require_user(user_id).await?;
        let stats = self.store.dimension_stats(user_id).await?;
        let quests = self.store.user_quests(user_id).await?;
        let recent = self
            .store
            .query_achievements(user_id, &AchievementQuery::new().with_page(self.recent_page()?))
            .await?;

        Ok(ProfileSummary::build(
            &user,
            stats,
            &quests,
            recent.total,
            self.trim_recent(recent.items),
        ))
    }

    /// Profile by username, built from visible records only.
    pub async fn public_profile(&self, username: &str, page: u32) -> Result<PublicProfile> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .filter(|u| !u.disabled)
            .ok_or_else(|| VaultError::NotFound(format!("user {}", username)))?;

        let visible: Vec<Quest> = self
            .store
            .user_quests(&user.id)
            .await?
            .into_iter()
            .filter(|q| !q.is_hidden)
            .collect();
        let stats = ledger::recompute(&user.id, &visible);

        let recent = self
            .store
            .query_achievements(
                &user.id,
                &AchievementQuery::new()
                    .visible_only()
                    .with_page(self.recent_page()?),
            )
            .await?;

        let listing = Pagination::new(page, self.config.listing.public_page_size)?;
        let quests = self
            .store
            .query_quests(&user.id, &QuestQuery::new().visible_only().with_page(listing))
            .await?;
        let achievements = self
            .store
            .query_achievements(
                &user.id,
                &AchievementQuery::new().visible_only().with_page(listing),
            )
            .await?;

        let summary = ProfileSummary::build(
            &user,
            stats,
            &visible,
            recent.total,
            self.trim_recent(recent.items),
        )
        .into_public();

        debug!(username, page, "Built public profile");
        Ok(PublicProfile {
            summary,
            quests,
            achievements,
        })
    }

    fn recent_page(&self) -> Result<Pagination> {
        let size = u32::try_from(self.config.recent_achievements).unwrap_or(MAX_PAGE_SIZE);
        Pagination::new(1, size)
    }

    fn trim_recent(&self, mut items: Vec<AchievementView>) -> Vec<AchievementView> {
        items.truncate(self.config.recent_achievements);
        items
    }

    // ---- bulk operations ----

    /// Hide or show every quest or every achievement of a user.
    pub async fn set_all_visibility(
        &self,
        user_id: &str,
        target: VisibilityTarget,
        hidden: bool,
    ) -> Result<()> {
        let _guard = self.lock_user(user_id).await;

        self.require_user(user_id).await?;
        self.store
            .apply(UnitOfWork::new().with(Write::SetVisibility {
                user_id: user_id.to_string(),
                target,
                hidden,
            }))
            .await?;

        info!(user_id, target = %target, hidden, "Set visibility");
        Ok(())
    }

    /// Delete every quest, achievement and ledger row of a user. The user
    /// record itself stays.
    pub async fn reset_user_data(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock_user(user_id).await;

        self.require_user(user_id).await?;
        self.store
            .apply(UnitOfWork::new().with(Write::PurgeUserData {
                user_id: user_id.to_string(),
            }))
            .await?;

        info!(user_id, "Reset user data");
        Ok(())
    }
}

/// Check username length and alphabet.
pub fn validate_username(username: &str) -> Result<String> {
    let trimmed = username.trim();
    let len = trimmed.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(VaultError::Validation(format!(
            "username must be {}-{} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(VaultError::Validation(
            "username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(trimmed.to_string())
}
