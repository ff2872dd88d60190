//! Demo data
//!
//! Two crawlers: `noob` starts empty, `veteran` gets one quest per life
//! dimension plus a handful of logged achievements. Running the seed again
//! only fills in what is missing.

use questvault::query::MAX_PAGE_SIZE;
use questvault::{
    AchievementDraft, AchievementQuery, Dimension, GamificationService, NewQuest, Pagination,
    QuestQuery, QuestStatus,
};
use serde::Serialize;
use tracing::info;

use crate::password::hash_password;

pub const DEMO_PASSWORD: &str = "password";

struct SeedQuest {
    title: &'static str,
    dimension: Dimension,
    tags: [&'static str; 2],
    victory_condition: &'static str,
    difficulty: u32,
    xp_reward: u32,
    complete: bool,
}

const VETERAN_QUESTS: [SeedQuest; 8] = [
    SeedQuest {
        title: "Smash the Goblin Horde",
        dimension: Dimension::Physical,
        tags: ["combat", "strength"],
        victory_condition: "Complete 50 pushups in one set",
        difficulty: 3,
        xp_reward: 50,
        complete: true,
    },
    SeedQuest {
        title: "Decipher the Ancient Scroll",
        dimension: Dimension::Intellectual,
        tags: ["study", "intelligence"],
        victory_condition: "Read a non-fiction book this week",
        difficulty: 2,
        xp_reward: 30,
        complete: false,
    },
    SeedQuest {
        title: "Hoard Gold Coins",
        dimension: Dimension::Financial,
        tags: ["wealth", "saving"],
        victory_condition: "Save $500 this month",
        difficulty: 4,
        xp_reward: 80,
        complete: false,
    },
    SeedQuest {
        title: "Purify the Poisoned Swamp",
        dimension: Dimension::Environmental,
        tags: ["nature", "cleaning"],
        victory_condition: "Clean up the local park",
        difficulty: 2,
        xp_reward: 40,
        complete: false,
    },
    SeedQuest {
        title: "Level Up Class",
        dimension: Dimension::Vocational,
        tags: ["career", "promotion"],
        victory_condition: "Complete the certification course",
        difficulty: 5,
        xp_reward: 150,
        complete: false,
    },
    SeedQuest {
        title: "Form a Party",
        dimension: Dimension::Social,
        tags: ["charisma", "friends"],
        victory_condition: "Host a board game night",
        difficulty: 1,
        xp_reward: 25,
        complete: true,
    },
    SeedQuest {
        title: "Conquer Fear",
        dimension: Dimension::Emotional,
        tags: ["willpower", "mental-health"],
        victory_condition: "Meditate for 10 minutes daily",
        difficulty: 3,
        xp_reward: 45,
        complete: false,
    },
    SeedQuest {
        title: "Commune with the AI Gods",
        dimension: Dimension::Spiritual,
        tags: ["faith", "reflection"],
        victory_condition: "Journal about your purpose",
        difficulty: 2,
        xp_reward: 35,
        complete: false,
    },
];

struct SeedAchievement {
    title: &'static str,
    dimension: Option<Dimension>,
    context: &'static str,
    description: &'static str,
    reward: &'static str,
}

const VETERAN_ACHIEVEMENTS: [SeedAchievement; 4] = [
    SeedAchievement {
        title: "Hero of the Village",
        dimension: Some(Dimension::Social),
        context: "Saved the village from a rat infestation.",
        description: "You killed some rats. The villagers are mildly impressed.",
        reward: "+10 Reputation",
    },
    SeedAchievement {
        title: "Found a Shiny Rock",
        dimension: None,
        context: "I picked up a rock. It was shiny.",
        description: "You picked up a rock. Fascinating.",
        reward: "A rock.",
    },
    SeedAchievement {
        title: "First Blood",
        dimension: Some(Dimension::Physical),
        context: "Killed a rat in the sewer.",
        description: "CONGRATULATIONS, CRAWLER! You murdered a rodent. You are truly a force to be reckoned with.",
        reward: "A rat tail. Don't eat it.",
    },
    SeedAchievement {
        title: "Shiny Object Syndrome",
        dimension: Some(Dimension::Financial),
        context: "Collected 100 useless shiny rocks.",
        description: "OH LOOK, YOU DID SOMETHING. You filled your inventory with garbage. Typical.",
        reward: "Back pain.",
    },
];

/// What a seed run created.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub users: usize,
    pub quests: usize,
    pub completed: usize,
    pub achievements: usize,
}

/// Create the demo users and their records where missing.
pub async fn seed(service: &GamificationService) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    ensure_user(service, "noob", "Fresh Meat", &mut report).await?;
    let veteran_id = ensure_user(service, "veteran", "Princess Donut", &mut report).await?;

    let all = QuestQuery::new().with_page(Pagination::new(1, MAX_PAGE_SIZE)?);
    let existing: Vec<String> = service
        .list_quests(&veteran_id, &all)
        .await?
        .items
        .into_iter()
        .map(|q| q.title)
        .collect();

    for entry in VETERAN_QUESTS.iter() {
        if existing.iter().any(|t| t == entry.title) {
            continue;
        }
        let quest = service
            .create_quest(
                &veteran_id,
                NewQuest::new(entry.title)
                    .with_dimension(entry.dimension)
                    .with_tags(entry.tags)
                    .with_victory_condition(entry.victory_condition)
                    .with_difficulty(entry.difficulty)
                    .with_xp_reward(entry.xp_reward)
                    .with_status(QuestStatus::Active),
            )
            .await?;
        report.quests += 1;

        if entry.complete {
            service.complete_quest(&veteran_id, &quest.id).await?;
            report.completed += 1;
        }
    }

    let all = AchievementQuery::new().with_page(Pagination::new(1, MAX_PAGE_SIZE)?);
    let logged: Vec<String> = service
        .list_achievements(&veteran_id, &all)
        .await?
        .items
        .into_iter()
        .map(|v| v.achievement.title)
        .collect();

    for entry in VETERAN_ACHIEVEMENTS.iter() {
        if logged.iter().any(|t| t == entry.title) {
            continue;
        }
        let mut draft =
            AchievementDraft::manual(entry.title, entry.context).with_dimension(entry.dimension);
        draft.ai_description = Some(entry.description.to_string());
        draft.ai_reward = Some(entry.reward.to_string());
        service.create_achievement(&veteran_id, draft).await?;
        report.achievements += 1;
    }

    info!(
        users = report.users,
        quests = report.quests,
        completed = report.completed,
        achievements = report.achievements,
        "Seed finished"
    );
    Ok(report)
}

async fn ensure_user(
    service: &GamificationService,
    username: &str,
    display_name: &str,
    report: &mut SeedReport,
) -> anyhow::Result<String> {
    if let Some(user) = service.store().find_user_by_username(username).await? {
        info!(username, "Demo user already exists");
        return Ok(user.id);
    }

    let user = service
        .register_user(
            username,
            Some(display_name.to_string()),
            &hash_password(DEMO_PASSWORD),
        )
        .await?;
    report.users += 1;
    Ok(user.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use questvault::{FixedRandom, MemoryStore, ServiceConfig};

    fn service() -> GamificationService {
        GamificationService::new(Arc::new(MemoryStore::new()), ServiceConfig::default())
            .with_random(Arc::new(FixedRandom(0)))
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let service = service();

        let first = seed(&service).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                users: 2,
                quests: 8,
                completed: 2,
                achievements: 4,
            }
        );

        let second = seed(&service).await.unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn test_seeded_veteran() {
        let service = service();
        seed(&service).await.unwrap();

        let veteran = service
            .store()
            .find_user_by_username("veteran")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(veteran.display_name.as_deref(), Some("Princess Donut"));

        let profile = service.profile(&veteran.id).await.unwrap();
        assert_eq!(profile.total_xp, 75);
        assert_eq!(profile.quests.completed, 2);
        // Two transition achievements plus the logged ones
        assert_eq!(profile.achievements_unlocked, 6);

        let party = service
            .list_achievements(
                &veteran.id,
                &AchievementQuery::new().with_search("Form a Party"),
            )
            .await
            .unwrap();
        assert_eq!(party.total, 1);
        assert_eq!(party.items[0].achievement.title, "Quest Complete: Form a Party");
        assert_eq!(party.items[0].quest_title.as_deref(), Some("Form a Party"));

        let noob = service
            .store()
            .find_user_by_username("noob")
            .await
            .unwrap()
            .unwrap();
        let empty = service.profile(&noob.id).await.unwrap();
        assert_eq!(empty.total_xp, 0);
        assert_eq!(empty.achievements_unlocked, 0);
    }
}
