//! Integration tests for the gamification service
//!
//! These drive the full service over the in-memory store: transitions,
//! side effects, the ledger, listing, and the public read paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use questvault::{
    AchievementDraft, AchievementPatch, AchievementQuery, AchievementView, Dimension,
    DimensionStat, FixedRandom, GamificationService, MemoryStore, NewQuest, Page, Pagination,
    Quest, QuestPatch, QuestQuery, QuestStatus, ServiceConfig, Store, StoreError, StoreResult,
    UnitOfWork, User, VaultError, VisibilityTarget, Write,
};
use questvault::{Achievement, Transition};
use questvault_narrator::MockBackend;

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_username(username).await
    }

    async fn get_quest(&self, user_id: &str, quest_id: &str) -> StoreResult<Option<Quest>> {
        self.inner.get_quest(user_id, quest_id).await
    }

    async fn user_quests(&self, user_id: &str) -> StoreResult<Vec<Quest>> {
        self.inner.user_quests(user_id).await
    }

    async fn query_quests(&self, user_id: &str, query: &QuestQuery) -> StoreResult<Page<Quest>> {
        self.inner.query_quests(user_id, query).await
    }

    async fn get_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> StoreResult<Option<Achievement>> {
        self.inner.get_achievement(user_id, achievement_id).await
    }

    async fn query_achievements(
        &self,
        user_id: &str,
        query: &AchievementQuery,
    ) -> StoreResult<Page<AchievementView>> {
        self.inner.query_achievements(user_id, query).await
    }

    async fn dimension_stats(&self, user_id: &str) -> StoreResult<Vec<DimensionStat>> {
        self.inner.dimension_stats(user_id).await
    }

    async fn dimension_stat(
        &self,
        user_id: &str,
        dimension: Dimension,
    ) -> StoreResult<Option<DimensionStat>> {
        self.inner.dimension_stat(user_id, dimension).await
    }

    async fn apply(&self, unit: UnitOfWork) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk on fire".into()));
        }
        self.inner.apply(unit).await
    }
}

fn service() -> GamificationService {
    GamificationService::new(Arc::new(MemoryStore::new()), ServiceConfig::default())
        .with_random(Arc::new(FixedRandom(0)))
}

async fn user(service: &GamificationService, username: &str) -> User {
    service.register_user(username, None, "hash").await.unwrap()
}

async fn completed_quest(
    service: &GamificationService,
    user_id: &str,
    dimension: Dimension,
    xp: u32,
) -> Quest {
    let quest = service
        .create_quest(
            user_id,
            NewQuest::new(format!("{} quest", dimension))
                .with_dimension(dimension)
                .with_xp_reward(xp),
        )
        .await
        .unwrap();
    service
        .complete_quest(user_id, &quest.id)
        .await
        .unwrap()
        .quest
}

async fn all_achievements(service: &GamificationService, user_id: &str) -> Page<AchievementView> {
    service
        .list_achievements(user_id, &AchievementQuery::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_backlog_cannot_complete() {
    let service = service();
    let noob = user(&service, "noob").await;
    let quest = service
        .create_quest(
            &noob.id,
            NewQuest::new("Read the manual").with_status(QuestStatus::Backlog),
        )
        .await
        .unwrap();

    let result = service.complete_quest(&noob.id, &quest.id).await;
    assert!(matches!(result, Err(VaultError::InvalidTransition { .. })));

    let stored = service.get_quest(&noob.id, &quest.id).await.unwrap();
    assert_eq!(stored.status, QuestStatus::Backlog);
    assert_eq!(all_achievements(&service, &noob.id).await.total, 0);
}

#[tokio::test]
async fn test_active_cannot_return_to_backlog() {
    let service = service();
    let noob = user(&service, "noob").await;
    let quest = service
        .create_quest(&noob.id, NewQuest::new("Committed"))
        .await
        .unwrap();

    let result = service
        .update_quest(&noob.id, &quest.id, QuestPatch::status(QuestStatus::Backlog))
        .await;
    assert!(matches!(result, Err(VaultError::InvalidTransition { .. })));

    let stored = service.get_quest(&noob.id, &quest.id).await.unwrap();
    assert_eq!(stored.status, QuestStatus::Active);
}

#[tokio::test]
async fn test_start_generates_achievement_without_xp() {
    let service = service();
    let noob = user(&service, "noob").await;
    let quest = service
        .create_quest(
            &noob.id,
            NewQuest::new("Learn Rust")
                .with_dimension(Dimension::Intellectual)
                .with_status(QuestStatus::Backlog),
        )
        .await
        .unwrap();

    let outcome = service.start_quest(&noob.id, &quest.id).await.unwrap();
    assert_eq!(outcome.transition, Some(Transition::Started));
    assert!(outcome.stat.is_none());

    let achievement = outcome.achievement.unwrap();
    assert_eq!(achievement.title, "Quest Started: Learn Rust");
    assert_eq!(achievement.context, "Started the quest 'Learn Rust'.");
    assert_eq!(achievement.quest_id.as_deref(), Some(quest.id.as_str()));
    assert!(service.dimension_stats(&noob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_awards_xp_once() {
    let service = service();
    let veteran = user(&service, "veteran").await;
    let quest = service
        .create_quest(
            &veteran.id,
            NewQuest::new("Smash the Goblin Horde")
                .with_dimension(Dimension::Physical)
                .with_victory_condition("Complete 50 pushups in one set")
                .with_xp_reward(25),
        )
        .await
        .unwrap();

    let outcome = service.complete_quest(&veteran.id, &quest.id).await.unwrap();
    assert_eq!(outcome.transition, Some(Transition::Completed));
    let stat = outcome.stat.unwrap();
    assert_eq!(stat.total_xp, 25);
    assert_eq!(stat.level, 1);

    let achievement = outcome.achievement.unwrap();
    assert_eq!(achievement.title, "Quest Complete: Smash the Goblin Horde");
    assert_eq!(
        achievement.context,
        "Completed the quest 'Smash the Goblin Horde'. Victory Condition: Complete 50 pushups in one set"
    );
    assert_eq!(achievement.dimension, Some(Dimension::Physical));

    // Repeating the same status is a no-op
    let again = service.complete_quest(&veteran.id, &quest.id).await.unwrap();
    assert_eq!(again.transition, None);

    let listed = all_achievements(&service, &veteran.id).await;
    assert_eq!(listed.total, 1);
    assert_eq!(
        listed.items[0].quest_title.as_deref(),
        Some("Smash the Goblin Horde")
    );

    let stats = service.dimension_stats(&veteran.id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_xp, 25);
}

#[tokio::test]
async fn test_completion_crosses_level_boundary() {
    let service = service();
    let veteran = user(&service, "veteran").await;

    completed_quest(&service, &veteran.id, Dimension::Physical, 80).await;
    completed_quest(&service, &veteran.id, Dimension::Physical, 25).await;

    let stats = service.dimension_stats(&veteran.id).await.unwrap();
    assert_eq!(stats[0].total_xp, 105);
    assert_eq!(stats[0].level, 2);
}

#[tokio::test]
async fn test_quest_without_dimension_earns_nothing() {
    let service = service();
    let noob = user(&service, "noob").await;
    let quest = service
        .create_quest(&noob.id, NewQuest::new("Wander"))
        .await
        .unwrap();

    let outcome = service.complete_quest(&noob.id, &quest.id).await.unwrap();
    assert!(outcome.stat.is_none());
    assert!(outcome.achievement.is_some());
    assert!(service.dimension_stats(&noob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_quest_is_immutable() {
    let service = service();
    let veteran = user(&service, "veteran").await;
    let quest = completed_quest(&service, &veteran.id, Dimension::Social, 10).await;

    for patch in [
        QuestPatch::new().with_title("Rewritten history"),
        QuestPatch::new().with_difficulty(5),
        QuestPatch::new().with_xp_reward(1000),
        QuestPatch::new().with_dimension(Some(Dimension::Spiritual)),
        QuestPatch::new().with_progress(50),
    ] {
        let result = service.update_quest(&veteran.id, &quest.id, patch).await;
        assert!(matches!(result, Err(VaultError::ImmutableRecord(_))));
    }

    let hidden = service
        .update_quest(&veteran.id, &quest.id, QuestPatch::visibility(true))
        .await
        .unwrap();
    assert!(hidden.quest.is_hidden);
    assert!(hidden.achievement.is_none());

    let stored = service.get_quest(&veteran.id, &quest.id).await.unwrap();
    assert_eq!(stored.title, quest.title);
    assert!(stored.is_hidden);
}

#[tokio::test]
async fn test_recompute_matches_history_and_is_idempotent() {
    let service = service();
    let veteran = user(&service, "veteran").await;

    completed_quest(&service, &veteran.id, Dimension::Physical, 150).await;
    completed_quest(&service, &veteran.id, Dimension::Intellectual, 300).await;
    completed_quest(&service, &veteran.id, Dimension::Intellectual, 40).await;
    service
        .create_quest(
            &veteran.id,
            NewQuest::new("Still going")
                .with_dimension(Dimension::Physical)
                .with_xp_reward(999),
        )
        .await
        .unwrap();

    let first = service.recompute_ledger(&veteran.id).await.unwrap();
    let second = service.recompute_ledger(&veteran.id).await.unwrap();
    assert_eq!(first, second);

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].dimension, Dimension::Intellectual);
    assert_eq!(first[0].total_xp, 340);
    assert_eq!(first[0].level, 4);
    assert_eq!(first[1].dimension, Dimension::Physical);
    assert_eq!(first[1].total_xp, 150);
    assert_eq!(first[1].level, 2);

    let profile = service.profile(&veteran.id).await.unwrap();
    assert_eq!(profile.character_level, 1);
    assert_eq!(profile.total_xp, 490);
}

#[tokio::test]
async fn test_recompute_drops_deleted_quests() {
    let service = service();
    let veteran = user(&service, "veteran").await;
    let quest = completed_quest(&service, &veteran.id, Dimension::Financial, 120).await;

    service.delete_quest(&veteran.id, &quest.id).await.unwrap();
    // XP stays until the ledger is rebuilt
    assert_eq!(
        service.dimension_stats(&veteran.id).await.unwrap()[0].total_xp,
        120
    );

    let stats = service.recompute_ledger(&veteran.id).await.unwrap();
    assert!(stats.is_empty());

    // The completion achievement survives with a dangling link
    let achievements = all_achievements(&service, &veteran.id).await;
    assert_eq!(achievements.total, 1);
    assert_eq!(
        achievements.items[0].achievement.quest_id.as_deref(),
        Some(quest.id.as_str())
    );
    assert_eq!(achievements.items[0].quest_title, None);
}

#[tokio::test]
async fn test_character_level_needs_every_dimension() {
    let service = service();
    let veteran = user(&service, "veteran").await;

    for dimension in Dimension::ALL {
        let xp = if dimension == Dimension::Emotional { 210 } else { 520 };
        completed_quest(&service, &veteran.id, dimension, xp).await;
    }

    let profile = service.profile(&veteran.id).await.unwrap();
    assert_eq!(profile.dimensions.len(), 8);
    assert_eq!(profile.character_level, 3);
    assert_eq!(profile.quests.completed, 8);
    assert_eq!(profile.achievements_unlocked, 8);
    assert_eq!(profile.recent_achievements.len(), 5);
}

#[tokio::test]
async fn test_pagination_over_service() {
    let service = service();
    let noob = user(&service, "noob").await;
    for n in 0..25 {
        service
            .create_quest(&noob.id, NewQuest::new(format!("Chore {}", n)))
            .await
            .unwrap();
    }

    let page2 = service
        .list_quests(
            &noob.id,
            &QuestQuery::new().with_page(Pagination::new(2, 10).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(page2.items.len(), 10);
    assert_eq!(page2.total, 25);

    let page3 = service
        .list_quests(
            &noob.id,
            &QuestQuery::new().with_page(Pagination::new(3, 10).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(page3.items.len(), 5);

    // Pages never overlap
    let mut seen: Vec<String> = page2.items.iter().map(|q| q.id.clone()).collect();
    seen.extend(page3.items.iter().map(|q| q.id.clone()));
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 15);
}

#[tokio::test]
async fn test_genai_without_credential_falls_back() {
    let backend = Arc::new(MockBackend::default());
    let service = service().with_narrator(backend.clone());
    let noob = user(&service, "noob").await;

    let achievement = service
        .create_achievement(
            &noob.id,
            AchievementDraft::manual("Made the bed", "Made the bed.").with_genai(true),
        )
        .await
        .unwrap();

    assert!(achievement.use_genai);
    assert!(!achievement.ai_description.is_empty());
    assert!(!achievement.ai_reward.is_empty());
    assert!(achievement
        .ai_description
        .contains("You have managed to made the bed."));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_transitions_use_narrator_when_credential_set() {
    let backend = Arc::new(MockBackend::default().with_response(
        r#"{"description": "The System notes your pushups.", "reward": "A sweatband."}"#,
    ));
    let service = service().with_narrator(backend.clone());
    let veteran = user(&service, "veteran").await;
    service
        .update_settings(
            &veteran.id,
            questvault::SettingsPatch {
                display_name: None,
                openai_api_key: Some("sk-veteran".into()),
            },
        )
        .await
        .unwrap();

    let quest = service
        .create_quest(&veteran.id, NewQuest::new("Pushups"))
        .await
        .unwrap();
    let outcome = service.complete_quest(&veteran.id, &quest.id).await.unwrap();

    let achievement = outcome.achievement.unwrap();
    assert_eq!(achievement.ai_description, "The System notes your pushups.");
    assert_eq!(achievement.ai_reward, "A sweatband.");
    assert_eq!(backend.last_api_key().as_deref(), Some("sk-veteran"));
}

#[tokio::test]
async fn test_failed_write_leaves_no_partial_state() {
    let store = Arc::new(FlakyStore::default());
    let service = GamificationService::new(store.clone(), ServiceConfig::default())
        .with_random(Arc::new(FixedRandom(0)));
    let veteran = user(&service, "veteran").await;
    let quest = service
        .create_quest(
            &veteran.id,
            NewQuest::new("Hoard Gold Coins")
                .with_dimension(Dimension::Financial)
                .with_xp_reward(50),
        )
        .await
        .unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let result = service.complete_quest(&veteran.id, &quest.id).await;
    assert!(matches!(result, Err(VaultError::Store(_))));

    let stored = service.get_quest(&veteran.id, &quest.id).await.unwrap();
    assert_eq!(stored.status, QuestStatus::Active);
    assert!(service.dimension_stats(&veteran.id).await.unwrap().is_empty());
    assert_eq!(all_achievements(&service, &veteran.id).await.total, 0);

    // Once the store recovers the transition goes through normally
    store.fail_writes.store(false, Ordering::SeqCst);
    let outcome = service.complete_quest(&veteran.id, &quest.id).await.unwrap();
    assert_eq!(outcome.stat.unwrap().total_xp, 50);
}

#[tokio::test]
async fn test_other_users_records_are_not_found() {
    let service = service();
    let alice = user(&service, "alice").await;
    let bob = user(&service, "bob_the_builder").await;

    let secret = service
        .create_quest(&bob.id, NewQuest::new("Bob's secret"))
        .await
        .unwrap();

    assert!(matches!(
        service.get_quest(&alice.id, &secret.id).await,
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        service.complete_quest(&alice.id, &secret.id).await,
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        service.delete_quest(&alice.id, &secret.id).await,
        Err(VaultError::NotFound(_))
    ));

    let linked = service
        .create_achievement(
            &alice.id,
            AchievementDraft::manual("Sneaky", "Tried to link").with_quest(secret.id.clone()),
        )
        .await;
    assert!(matches!(linked, Err(VaultError::NotFound(_))));

    let own = service
        .create_achievement(&alice.id, AchievementDraft::manual("Honest", "Did a thing"))
        .await
        .unwrap();
    let relinked = service
        .update_achievement(
            &alice.id,
            &own.id,
            AchievementPatch {
                quest_id: Some(Some(secret.id.clone())),
                ..AchievementPatch::default()
            },
        )
        .await;
    assert!(matches!(relinked, Err(VaultError::NotFound(_))));
}

#[tokio::test]
async fn test_achievement_edits() {
    let service = service();
    let noob = user(&service, "noob").await;
    let quest = service
        .create_quest(&noob.id, NewQuest::new("Form a Party"))
        .await
        .unwrap();
    let achievement = service
        .create_achievement(&noob.id, AchievementDraft::manual("First Blood", "Killed a rat."))
        .await
        .unwrap();

    let edited = service
        .update_achievement(
            &noob.id,
            &achievement.id,
            AchievementPatch {
                title: Some("  First Rat  ".into()),
                is_hidden: Some(true),
                quest_id: Some(Some(quest.id.clone())),
                ..AchievementPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.title, "First Rat");
    assert!(edited.is_hidden);
    assert_eq!(edited.ai_description, achievement.ai_description);

    let by_quest = service
        .list_achievements(&noob.id, &AchievementQuery::new().with_quest(quest.id.clone()))
        .await
        .unwrap();
    assert_eq!(by_quest.total, 1);
    assert_eq!(by_quest.items[0].quest_title.as_deref(), Some("Form a Party"));

    let blank = service
        .update_achievement(
            &noob.id,
            &achievement.id,
            AchievementPatch {
                title: Some(" ".into()),
                ..AchievementPatch::default()
            },
        )
        .await;
    assert!(matches!(blank, Err(VaultError::Validation(_))));
}

#[tokio::test]
async fn test_public_profile_hides_private_records() {
    let service = service();
    let veteran = user(&service, "veteran").await;
    service
        .update_settings(
            &veteran.id,
            questvault::SettingsPatch {
                display_name: Some("Princess Donut".into()),
                openai_api_key: Some("sk-top-secret".into()),
            },
        )
        .await
        .unwrap();

    let public_quest = completed_quest(&service, &veteran.id, Dimension::Social, 30).await;
    let private_quest = completed_quest(&service, &veteran.id, Dimension::Physical, 500).await;
    service
        .update_quest(&veteran.id, &private_quest.id, QuestPatch::visibility(true))
        .await
        .unwrap();
    let private_achievement = service
        .create_achievement(&veteran.id, AchievementDraft::manual("Diary", "Dear diary"))
        .await
        .unwrap();
    service
        .update_achievement(
            &veteran.id,
            &private_achievement.id,
            AchievementPatch {
                is_hidden: Some(true),
                ..AchievementPatch::default()
            },
        )
        .await
        .unwrap();

    let public = service.public_profile("veteran", 1).await.unwrap();
    assert_eq!(public.quests.total, 1);
    assert_eq!(public.quests.items[0].id, public_quest.id);
    assert!(public.achievements.items.iter().all(|a| !a.achievement.is_hidden));
    assert_eq!(public.achievements.total, 2);
    assert_eq!(public.summary.total_xp, 30);
    assert_eq!(public.summary.display_name.as_deref(), Some("Princess Donut"));
    assert!(!public.summary.has_credential);

    let json = serde_json::to_string(&public).unwrap();
    assert!(!json.contains("sk-top-secret"));
    assert!(json.contains("\"has_credential\":false"));
    assert!(!json.contains("Dear diary"));

    // The owner's own profile still counts everything
    let own = service.profile(&veteran.id).await.unwrap();
    assert!(own.has_credential);
    assert_eq!(own.total_xp, 530);
    assert_eq!(own.achievements_unlocked, 3);
}

#[tokio::test]
async fn test_public_profile_of_disabled_user_is_not_found() {
    let service = service();
    let mut noob = user(&service, "noob").await;
    noob.disabled = true;
    service
        .store()
        .apply(UnitOfWork::new().with(Write::PutUser(noob)))
        .await
        .unwrap();

    assert!(matches!(
        service.public_profile("noob", 1).await,
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        service.public_profile("nobody", 1).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_bulk_visibility_and_reset() {
    let service = service();
    let noob = user(&service, "noob").await;
    let other = user(&service, "other").await;
    completed_quest(&service, &noob.id, Dimension::Spiritual, 10).await;
    completed_quest(&service, &other.id, Dimension::Spiritual, 10).await;

    service
        .set_all_visibility(&noob.id, VisibilityTarget::Achievements, true)
        .await
        .unwrap();
    let visible = service
        .list_achievements(&noob.id, &AchievementQuery::new().visible_only())
        .await
        .unwrap();
    assert_eq!(visible.total, 0);

    service.reset_user_data(&noob.id).await.unwrap();
    assert_eq!(
        service
            .list_quests(&noob.id, &QuestQuery::new())
            .await
            .unwrap()
            .total,
        0
    );
    assert_eq!(all_achievements(&service, &noob.id).await.total, 0);
    assert!(service.dimension_stats(&noob.id).await.unwrap().is_empty());

    // Other users are untouched, and the reset user can still log in
    assert_eq!(all_achievements(&service, &other.id).await.total, 1);
    assert!(!all_achievements(&service, &other.id).await.items[0]
        .achievement
        .is_hidden);
    assert!(service.get_user(&noob.id).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_completions_sum_correctly() {
    let service = Arc::new(service());
    let veteran = user(&service, "veteran").await;

    let mut ids = Vec::new();
    for n in 0..10 {
        let quest = service
            .create_quest(
                &veteran.id,
                NewQuest::new(format!("Lap {}", n))
                    .with_dimension(Dimension::Physical)
                    .with_xp_reward(15),
            )
            .await
            .unwrap();
        ids.push(quest.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|quest_id| {
            let service = service.clone();
            let user_id = veteran.id.clone();
            tokio::spawn(async move { service.complete_quest(&user_id, &quest_id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = service.dimension_stats(&veteran.id).await.unwrap();
    assert_eq!(stats[0].total_xp, 150);
    assert_eq!(stats[0].level, 2);
    assert_eq!(service.recompute_ledger(&veteran.id).await.unwrap(), stats);
}
