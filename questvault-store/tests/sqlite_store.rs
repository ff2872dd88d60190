//! Integration tests for the SQLite store
//!
//! Runs the gamification service over an on-disk database and checks that
//! SQL query translation agrees with the in-memory query engine.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use questvault::{
    Achievement, AchievementDraft, AchievementQuery, AchievementSort, Dimension, FixedRandom,
    GamificationService, MemoryStore, NewQuest, Pagination, Quest, QuestQuery, QuestSort,
    QuestStatus, ServiceConfig, Store, StoreError, UnitOfWork, User, VaultError, Write,
};
use questvault_store::SqliteStore;
use tempfile::TempDir;

fn service_over(store: Arc<dyn Store>) -> GamificationService {
    GamificationService::new(store, ServiceConfig::default()).with_random(Arc::new(FixedRandom(2)))
}

fn quest(user_id: &str, n: i64) -> Quest {
    let dimensions = Dimension::ALL;
    Quest {
        id: format!("q{:02}", n),
        user_id: user_id.into(),
        title: format!("Quest {} {}", if n % 2 == 0 { "Even" } else { "Odd" }, n),
        dimension: (n % 3 != 0).then(|| dimensions[(n as usize) % dimensions.len()]),
        status: match n % 3 {
            0 => QuestStatus::Backlog,
            1 => QuestStatus::Active,
            _ => QuestStatus::Completed,
        },
        tags: vec![format!("tag{}", n % 4)],
        victory_condition: None,
        is_hidden: n % 5 == 0,
        due_date: None,
        progress: (n % 101) as u8,
        difficulty: (n % 4) as u32 + 1,
        xp_reward: (n % 2 == 0).then(|| (n as u32) * 3),
        // Pairs of quests share a timestamp to exercise tie-breaking
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
            + Duration::minutes(n / 2),
    }
}

#[tokio::test]
async fn test_service_roundtrip_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault").join("questvault.db");

    let (user_id, quest_id) = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let service = service_over(store);
        let user = service
            .register_user("veteran", Some("Princess Donut".into()), "hash")
            .await
            .unwrap();
        let quest = service
            .create_quest(
                &user.id,
                NewQuest::new("Hoard Gold Coins")
                    .with_dimension(Dimension::Financial)
                    .with_tags(["wealth", "saving"])
                    .with_victory_condition("Save $500 this month")
                    .with_xp_reward(120),
            )
            .await
            .unwrap();
        service.complete_quest(&user.id, &quest.id).await.unwrap();
        (user.id, quest.id)
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let service = service_over(store.clone());

    let quest = service.get_quest(&user_id, &quest_id).await.unwrap();
    assert_eq!(quest.status, QuestStatus::Completed);
    assert_eq!(quest.tags, vec!["wealth", "saving"]);
    assert_eq!(quest.xp_reward, Some(120));

    let stats = service.dimension_stats(&user_id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_xp, 120);
    assert_eq!(stats[0].level, 2);

    let achievements = service
        .list_achievements(&user_id, &AchievementQuery::new())
        .await
        .unwrap();
    assert_eq!(achievements.total, 1);
    assert_eq!(
        achievements.items[0].quest_title.as_deref(),
        Some("Hoard Gold Coins")
    );
    assert_eq!(
        achievements.items[0].achievement.context,
        "Completed the quest 'Hoard Gold Coins'. Victory Condition: Save $500 this month"
    );

    let db_stats = store.stats().unwrap();
    assert_eq!(db_stats.users, 1);
    assert_eq!(db_stats.quests, 1);
    assert_eq!(db_stats.achievements, 1);
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = service_over(store.clone());
    service.register_user("noob", None, "hash").await.unwrap();

    // Bypass the service's pre-check to hit the UNIQUE constraint
    let result = store
        .apply(UnitOfWork::new().with(Write::PutUser(User::new("noob", "other"))))
        .await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));

    let result = service.register_user("noob", None, "hash").await;
    assert!(matches!(result, Err(VaultError::Conflict(_))));
}

#[tokio::test]
async fn test_failed_unit_rolls_back() {
    let store = SqliteStore::open_in_memory().unwrap();
    let alice = User::new("alice", "hash");
    store
        .apply(UnitOfWork::new().with(Write::PutUser(alice.clone())))
        .await
        .unwrap();

    let unit = UnitOfWork::new()
        .with(Write::PutQuest(quest(&alice.id, 1)))
        .with(Write::PutUser(User::new("alice", "impostor")));
    assert!(store.apply(unit).await.is_err());

    assert!(store.user_quests(&alice.id).await.unwrap().is_empty());
    assert_eq!(store.stats().unwrap().users, 1);
}

#[tokio::test]
async fn test_queries_match_memory_store() {
    let sqlite = SqliteStore::open_in_memory().unwrap();
    let memory = MemoryStore::new();

    let mut unit = UnitOfWork::new();
    for n in 0..30 {
        unit.push(Write::PutQuest(quest("u1", n)));
    }
    unit.push(Write::PutQuest(quest("u2", 99)));
    let mut eclair = quest("u1", 40);
    eclair.title = "Éclair Baking Marathon".into();
    unit.push(Write::PutQuest(eclair));
    for (n, (title, context)) in [("Über run", "Ran to the ÜBER stop."), ("Nap", "Slept in.")]
        .into_iter()
        .enumerate()
    {
        unit.push(Write::PutAchievement(Achievement {
            id: format!("a{}", n),
            user_id: "u1".into(),
            title: title.into(),
            context: context.into(),
            date_completed: Utc.with_ymd_and_hms(2026, 3, 2, n as u32, 0, 0).unwrap(),
            dimension: None,
            is_hidden: false,
            image_url: String::new(),
            ai_description: "d".into(),
            ai_reward: "r".into(),
            use_genai: false,
            quest_id: None,
        }));
    }
    sqlite.apply(unit.clone()).await.unwrap();
    memory.apply(unit).await.unwrap();

    let queries = vec![
        QuestQuery::new(),
        QuestQuery::new().with_sort(QuestSort::Oldest),
        QuestQuery::new().with_sort(QuestSort::DifficultyDesc),
        QuestQuery::new().with_sort(QuestSort::XpAsc),
        QuestQuery::new().with_sort(QuestSort::XpDesc),
        QuestQuery::new().with_status(QuestStatus::Completed),
        QuestQuery::new().with_difficulty(2),
        QuestQuery::new().with_dimension(Dimension::Physical),
        QuestQuery::new().with_search("ODD"),
        QuestQuery::new().with_search("spirit"),
        QuestQuery::new().with_search("100%"),
        QuestQuery::new().with_search("éclair"),
        QuestQuery::new().with_search("ÉCLAIR BAKING"),
        QuestQuery::new().visible_only(),
        QuestQuery::new().with_page(Pagination::new(2, 7).unwrap()),
        QuestQuery::new()
            .with_sort(QuestSort::DifficultyAsc)
            .with_page(Pagination::new(3, 4).unwrap()),
    ];

    for query in queries {
        let from_sql = sqlite.query_quests("u1", &query).await.unwrap();
        let from_memory = memory.query_quests("u1", &query).await.unwrap();
        let sql_ids: Vec<&str> = from_sql.items.iter().map(|q| q.id.as_str()).collect();
        let mem_ids: Vec<&str> = from_memory.items.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(sql_ids, mem_ids, "query {:?}", query);
        assert_eq!(from_sql.total, from_memory.total, "query {:?}", query);
        assert_eq!(from_sql.items, from_memory.items);
    }

    for term in ["über", "ÜBER STOP", "slept", "nothing"] {
        let query = AchievementQuery::new().with_search(term);
        let from_sql = sqlite.query_achievements("u1", &query).await.unwrap();
        let from_memory = memory.query_achievements("u1", &query).await.unwrap();
        assert_eq!(from_sql.total, from_memory.total, "search {:?}", term);
        assert_eq!(from_sql.items, from_memory.items, "search {:?}", term);
    }

    let found = sqlite
        .query_quests("u1", &QuestQuery::new().with_search("éclair"))
        .await
        .unwrap();
    assert_eq!(found.total, 1);
    let found = sqlite
        .query_achievements("u1", &AchievementQuery::new().with_search("über"))
        .await
        .unwrap();
    assert_eq!(found.total, 1);
}

#[tokio::test]
async fn test_achievement_listing() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = service_over(store.clone());
    let alice = service.register_user("alice", None, "hash").await.unwrap();
    let bob = service.register_user("bobby", None, "hash").await.unwrap();

    let quest = service
        .create_quest(&alice.id, NewQuest::new("Form a Party"))
        .await
        .unwrap();
    let foreign = service
        .create_quest(&bob.id, NewQuest::new("Bob's secret"))
        .await
        .unwrap();

    for (n, context) in ["Killed a rat.", "Found a shiny rock.", "Paid 100% of rent."]
        .iter()
        .enumerate()
    {
        let mut draft = AchievementDraft::manual(format!("Deed {}", n), *context);
        draft.date_completed = Some(Utc.with_ymd_and_hms(2026, 4, 1, n as u32, 0, 0).unwrap());
        if n == 0 {
            draft.quest_id = Some(quest.id.clone());
        }
        service.create_achievement(&alice.id, draft).await.unwrap();
    }

    // A link to someone else's quest written straight to the store
    let mut sneaky = service
        .create_achievement(&alice.id, AchievementDraft::manual("Sneaky", "ctx"))
        .await
        .unwrap();
    sneaky.quest_id = Some(foreign.id.clone());
    store
        .apply(UnitOfWork::new().with(Write::PutAchievement(sneaky.clone())))
        .await
        .unwrap();

    let oldest = service
        .list_achievements(
            &alice.id,
            &AchievementQuery::new().with_sort(AchievementSort::Oldest),
        )
        .await
        .unwrap();
    assert_eq!(oldest.total, 4);
    assert_eq!(oldest.items[0].achievement.title, "Deed 0");
    assert_eq!(oldest.items[0].quest_title.as_deref(), Some("Form a Party"));
    let sneaky_view = oldest
        .items
        .iter()
        .find(|v| v.achievement.id == sneaky.id)
        .unwrap();
    assert_eq!(sneaky_view.quest_title, None);

    let searched = service
        .list_achievements(&alice.id, &AchievementQuery::new().with_search("100%"))
        .await
        .unwrap();
    assert_eq!(searched.total, 1);
    assert_eq!(searched.items[0].achievement.title, "Deed 2");

    let fallback = &searched.items[0].achievement;
    assert_eq!(
        fallback.ai_description,
        "OH LOOK, YOU DID SOMETHING. You have managed to paid 100% of rent. \
         My grandmother could do that, and she's a subroutine."
    );
    assert_eq!(fallback.ai_reward, "A pat on the back. Not really.");
}

#[tokio::test]
async fn test_legacy_rows_use_default_reward() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = service_over(store.clone());
    let user = service.register_user("oldtimer", None, "hash").await.unwrap();

    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO quests (id, user_id, title, dimension, status, tags, created_at, xp_reward)
                 VALUES ('legacy', ?1, 'Imported quest', 'spiritual', 'completed', '[]',
                         '2024-05-01 10:00:00', NULL)",
                [&user.id],
            )?;
            Ok(())
        })
        .unwrap();

    let quest = service.get_quest(&user.id, "legacy").await.unwrap();
    assert_eq!(quest.xp_reward, None);
    assert_eq!(quest.xp_value(), 10);
    assert_eq!(quest.difficulty, 1);

    let stats = service.recompute_ledger(&user.id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].dimension, Dimension::Spiritual);
    assert_eq!(stats[0].total_xp, 10);

    let by_xp = service
        .list_quests(&user.id, &QuestQuery::new().with_sort(QuestSort::XpAsc))
        .await
        .unwrap();
    assert_eq!(by_xp.items[0].id, "legacy");
}

#[tokio::test]
async fn test_reset_and_visibility() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = service_over(store.clone());
    let user = service.register_user("noob", None, "hash").await.unwrap();
    let quest = service
        .create_quest(
            &user.id,
            NewQuest::new("Purify the Poisoned Swamp").with_dimension(Dimension::Environmental),
        )
        .await
        .unwrap();
    service.complete_quest(&user.id, &quest.id).await.unwrap();

    service
        .set_all_visibility(&user.id, questvault::VisibilityTarget::Quests, true)
        .await
        .unwrap();
    let visible = service
        .list_quests(&user.id, &QuestQuery::new().visible_only())
        .await
        .unwrap();
    assert_eq!(visible.total, 0);

    service.reset_user_data(&user.id).await.unwrap();
    let db_stats = store.stats().unwrap();
    assert_eq!(db_stats.users, 1);
    assert_eq!(db_stats.quests, 0);
    assert_eq!(db_stats.achievements, 0);
    assert_eq!(db_stats.dimension_stats, 0);
}
