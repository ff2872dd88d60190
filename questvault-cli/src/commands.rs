//! Subcommands
//!
//! Every command resolves a username to a user, calls one service
//! operation, and renders the result as text or pretty JSON.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use questvault::query::DEFAULT_PAGE_SIZE;
use questvault::{
    AchievementDraft, AchievementPatch, AchievementQuery, AchievementSort, Dimension,
    GamificationService, NewQuest, Pagination, QuestPatch, QuestQuery, QuestSort, QuestStatus,
    QuestUpdate, SettingsPatch, User, VisibilityTarget,
};
use questvault_store::SqliteStore;
use serde::Serialize;
use tracing::info;

use crate::config::VaultConfig;
use crate::password::{hash_password, verify_password};
use crate::seed;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Create demo users and records
    Seed,

    /// Register a user
    Register {
        username: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, env = "QUESTVAULT_PASSWORD")]
        password: String,
    },

    /// Check a user's password
    VerifyPassword {
        username: String,
        #[arg(long, env = "QUESTVAULT_PASSWORD")]
        password: String,
    },

    /// Change display name or generation credential
    Settings {
        username: String,
        /// Empty string clears it
        #[arg(long)]
        display_name: Option<String>,
        /// Empty string clears it
        #[arg(long, env = "QUESTVAULT_OPENAI_KEY")]
        api_key: Option<String>,
    },

    /// Show a user's character sheet
    Profile { username: String },

    /// Show what other crawlers can see
    PublicProfile {
        username: String,
        #[arg(long, default_value = "1")]
        page: u32,
    },

    #[command(subcommand)]
    Quest(QuestCommands),

    #[command(subcommand)]
    Achievement(AchievementCommands),

    /// Rebuild dimension XP from completed quests
    Recompute { username: String },

    /// Hide or reveal all quests or achievements
    Visibility {
        username: String,
        /// `quests` or `achievements`
        target: VisibilityTarget,
        #[arg(long, conflicts_with = "reveal")]
        hide: bool,
        #[arg(long)]
        reveal: bool,
    },

    /// Delete every quest, achievement and stat of a user
    Reset {
        username: String,
        /// Required
        #[arg(long)]
        yes: bool,
    },

    /// Row counts
    DbStats,
}

#[derive(Debug, Subcommand)]
pub enum QuestCommands {
    /// Filter, search, sort and page quests
    List {
        username: String,
        #[command(flatten)]
        filter: QuestFilter,
    },

    /// Create a quest
    Add {
        username: String,
        title: String,
        #[arg(long)]
        dimension: Option<Dimension>,
        /// backlog or active
        #[arg(long)]
        status: Option<QuestStatus>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        victory: Option<String>,
        #[arg(long)]
        difficulty: Option<u32>,
        #[arg(long)]
        xp: Option<u32>,
        #[arg(long)]
        hidden: bool,
    },

    /// Move a backlog quest to active
    Start { username: String, quest_id: String },

    /// Complete an active quest
    Complete { username: String, quest_id: String },

    /// Set progress (0-100)
    Progress {
        username: String,
        quest_id: String,
        progress: u8,
    },

    Delete { username: String, quest_id: String },
}

#[derive(Debug, Args)]
pub struct QuestFilter {
    #[arg(long)]
    status: Option<QuestStatus>,
    #[arg(long)]
    dimension: Option<Dimension>,
    #[arg(long)]
    difficulty: Option<u32>,
    #[arg(long)]
    search: Option<String>,
    /// newest, oldest, difficulty_asc, difficulty_desc, xp_asc, xp_desc
    #[arg(long, default_value = "newest")]
    sort: QuestSort,
    #[arg(long, default_value = "1")]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

impl QuestFilter {
    fn to_query(&self) -> anyhow::Result<QuestQuery> {
        let mut query = QuestQuery::new()
            .with_sort(self.sort)
            .with_page(Pagination::new(self.page, self.page_size)?);
        if let Some(status) = self.status {
            query = query.with_status(status);
        }
        if let Some(dimension) = self.dimension {
            query = query.with_dimension(dimension);
        }
        if let Some(difficulty) = self.difficulty {
            query = query.with_difficulty(difficulty);
        }
        if let Some(search) = &self.search {
            query = query.with_search(search.clone());
        }
        Ok(query)
    }
}

#[derive(Debug, Subcommand)]
pub enum AchievementCommands {
    /// List achievements, newest first by default
    List {
        username: String,
        #[arg(long)]
        dimension: Option<Dimension>,
        #[arg(long)]
        quest: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "newest")]
        sort: AchievementSort,
        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Log an achievement by hand
    Log {
        username: String,
        title: String,
        context: String,
        #[arg(long)]
        dimension: Option<Dimension>,
        #[arg(long)]
        quest: Option<String>,
        /// Ask the narrator for flavor text
        #[arg(long)]
        genai: bool,
        #[arg(long)]
        hidden: bool,
    },

    /// Edit an achievement
    Edit {
        username: String,
        achievement_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        hidden: Option<bool>,
        /// Link to a quest
        #[arg(long, conflicts_with = "unlink")]
        quest: Option<String>,
        #[arg(long)]
        unlink: bool,
    },
}

/// Write a default config file.
pub fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    VaultConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn execute(
    service: &GamificationService,
    store: &SqliteStore,
    command: Commands,
) -> anyhow::Result<String> {
    match command {
        Commands::InitConfig { .. } => bail!("init-config runs before the store is opened"),

        Commands::Seed => {
            let report = seed::seed(service).await?;
            to_json(&report)
        }

        Commands::Register {
            username,
            display_name,
            password,
        } => {
            let user = service
                .register_user(&username, display_name, &hash_password(&password))
                .await?;
            Ok(format!("Registered {} ({})", user.username, user.id))
        }

        Commands::VerifyPassword { username, password } => {
            let user = resolve(service, &username).await?;
            if !verify_password(&password, &user.hashed_password) {
                bail!("password does not match");
            }
            Ok(format!("Password ok for {}", user.username))
        }

        Commands::Settings {
            username,
            display_name,
            api_key,
        } => {
            let user = resolve(service, &username).await?;
            let user = service
                .update_settings(
                    &user.id,
                    SettingsPatch {
                        display_name,
                        openai_api_key: api_key,
                    },
                )
                .await?;
            Ok(format!(
                "Display name: {}\nCredential configured: {}",
                user.display_name.as_deref().unwrap_or("-"),
                user.credential().is_some()
            ))
        }

        Commands::Profile { username } => {
            let user = resolve(service, &username).await?;
            to_json(&service.profile(&user.id).await?)
        }

        Commands::PublicProfile { username, page } => {
            to_json(&service.public_profile(&username, page).await?)
        }

        Commands::Quest(command) => quest_command(service, command).await,

        Commands::Achievement(command) => achievement_command(service, command).await,

        Commands::Recompute { username } => {
            let user = resolve(service, &username).await?;
            let stats = service.recompute_ledger(&user.id).await?;
            let mut out = String::new();
            for stat in &stats {
                writeln!(
                    out,
                    "{:<14} level {:>3}  {:>6} xp",
                    stat.dimension.as_str(),
                    stat.level,
                    stat.total_xp
                )?;
            }
            if stats.is_empty() {
                out.push_str("No completed quests with a dimension");
            }
            Ok(out.trim_end().to_string())
        }

        Commands::Visibility {
            username,
            target,
            hide,
            reveal,
        } => {
            if hide == reveal {
                bail!("pass exactly one of --hide or --reveal");
            }
            let user = resolve(service, &username).await?;
            service.set_all_visibility(&user.id, target, hide).await?;
            Ok(format!(
                "All {} are now {}",
                target,
                if hide { "hidden" } else { "visible" }
            ))
        }

        Commands::Reset { username, yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            let user = resolve(service, &username).await?;
            service.reset_user_data(&user.id).await?;
            info!(username = %user.username, "Reset user data");
            Ok(format!("Reset all data for {}", user.username))
        }

        Commands::DbStats => to_json(&store.stats()?),
    }
}

async fn quest_command(
    service: &GamificationService,
    command: QuestCommands,
) -> anyhow::Result<String> {
    match command {
        QuestCommands::List { username, filter } => {
            let user = resolve(service, &username).await?;
            let page = service.list_quests(&user.id, &filter.to_query()?).await?;

            let mut out = String::new();
            for quest in &page.items {
                writeln!(
                    out,
                    "{}  [{:<9}] {:<13} d{} {:>4}xp {:>3}%  {}{}",
                    quest.id,
                    quest.status.as_str(),
                    quest.dimension.map(|d| d.as_str()).unwrap_or("-"),
                    quest.difficulty,
                    quest.xp_value(),
                    quest.progress,
                    quest.title,
                    if quest.is_hidden { " (hidden)" } else { "" }
                )?;
            }
            write!(
                out,
                "page {}/{} ({} quests)",
                page.page,
                page.total_pages().max(1),
                page.total
            )?;
            Ok(out)
        }

        QuestCommands::Add {
            username,
            title,
            dimension,
            status,
            tags,
            victory,
            difficulty,
            xp,
            hidden,
        } => {
            let user = resolve(service, &username).await?;
            let mut new_quest = NewQuest::new(title).with_tags(tags);
            if let Some(dimension) = dimension {
                new_quest = new_quest.with_dimension(dimension);
            }
            if let Some(status) = status {
                new_quest = new_quest.with_status(status);
            }
            if let Some(victory) = victory {
                new_quest = new_quest.with_victory_condition(victory);
            }
            if let Some(difficulty) = difficulty {
                new_quest = new_quest.with_difficulty(difficulty);
            }
            if let Some(xp) = xp {
                new_quest = new_quest.with_xp_reward(xp);
            }
            if hidden {
                new_quest = new_quest.hidden();
            }

            let quest = service.create_quest(&user.id, new_quest).await?;
            Ok(format!("Created quest {} ({})", quest.id, quest.status))
        }

        QuestCommands::Start { username, quest_id } => {
            let user = resolve(service, &username).await?;
            Ok(render_update(&service.start_quest(&user.id, &quest_id).await?))
        }

        QuestCommands::Complete { username, quest_id } => {
            let user = resolve(service, &username).await?;
            Ok(render_update(
                &service.complete_quest(&user.id, &quest_id).await?,
            ))
        }

        QuestCommands::Progress {
            username,
            quest_id,
            progress,
        } => {
            let user = resolve(service, &username).await?;
            let update = service
                .update_quest(&user.id, &quest_id, QuestPatch::new().with_progress(progress))
                .await?;
            Ok(render_update(&update))
        }

        QuestCommands::Delete { username, quest_id } => {
            let user = resolve(service, &username).await?;
            service.delete_quest(&user.id, &quest_id).await?;
            Ok(format!("Deleted quest {}", quest_id))
        }
    }
}

async fn achievement_command(
    service: &GamificationService,
    command: AchievementCommands,
) -> anyhow::Result<String> {
    match command {
        AchievementCommands::List {
            username,
            dimension,
            quest,
            search,
            sort,
            page,
        } => {
            let user = resolve(service, &username).await?;
            let mut query = AchievementQuery::new()
                .with_sort(sort)
                .with_page(Pagination::new(page, DEFAULT_PAGE_SIZE)?);
            if let Some(dimension) = dimension {
                query = query.with_dimension(dimension);
            }
            if let Some(quest) = quest {
                query = query.with_quest(quest);
            }
            if let Some(search) = search {
                query = query.with_search(search);
            }
            to_json(&service.list_achievements(&user.id, &query).await?)
        }

        AchievementCommands::Log {
            username,
            title,
            context,
            dimension,
            quest,
            genai,
            hidden,
        } => {
            let user = resolve(service, &username).await?;
            let mut draft = AchievementDraft::manual(title, context)
                .with_dimension(dimension)
                .with_genai(genai);
            if let Some(quest) = quest {
                draft = draft.with_quest(quest);
            }
            draft.is_hidden = hidden;
            to_json(&service.create_achievement(&user.id, draft).await?)
        }

        AchievementCommands::Edit {
            username,
            achievement_id,
            title,
            context,
            hidden,
            quest,
            unlink,
        } => {
            let user = resolve(service, &username).await?;
            let quest_id = match (quest, unlink) {
                (_, true) => Some(None),
                (Some(quest), false) => Some(Some(quest)),
                (None, false) => None,
            };
            let patch = AchievementPatch {
                title,
                context,
                is_hidden: hidden,
                quest_id,
            };
            to_json(
                &service
                    .update_achievement(&user.id, &achievement_id, patch)
                    .await?,
            )
        }
    }
}

async fn resolve(service: &GamificationService, username: &str) -> anyhow::Result<User> {
    service
        .store()
        .find_user_by_username(username)
        .await?
        .with_context(|| format!("no user named '{}'", username))
}

fn render_update(update: &QuestUpdate) -> String {
    let mut out = format!(
        "{} is {} ({}%)",
        update.quest.title, update.quest.status, update.quest.progress
    );
    if let Some(achievement) = &update.achievement {
        out.push_str(&format!(
            "\n\n*** {} ***\n{}\nReward: {}",
            achievement.title, achievement.ai_description, achievement.ai_reward
        ));
    }
    if let Some(stat) = &update.stat {
        out.push_str(&format!(
            "\n\n{} is now level {} ({} xp)",
            stat.dimension, stat.level, stat.total_xp
        ));
    }
    out
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
