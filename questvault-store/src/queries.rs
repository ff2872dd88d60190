//! SQL for reads and unit-of-work writes.
//!
//! Query translation mirrors `QuestQuery::run` / `AchievementQuery::run`:
//! same predicates, same sort keys, same tie-breakers.

use questvault::query::{AchievementQuery, AchievementSort, AchievementView, Page, QuestQuery, QuestSort};
use questvault::store::{VisibilityTarget, Write};
use questvault::{ledger, Achievement, Dimension, DimensionStat, Quest, User, DEFAULT_XP_REWARD};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, ToSql, Transaction};
use tracing::debug;

use crate::error::SqliteStoreError;
use crate::rows::{
    achievement_from_row, format_timestamp, quest_from_row, stat_from_row, user_from_row,
};

type SqlParams = Vec<Box<dyn ToSql>>;

/// `%term%` with LIKE wildcards escaped (`\` is the escape character).
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Register `questvault_lower`, the Unicode-aware lowercase used by search.
/// SQLite's own `LOWER` only folds ASCII.
pub fn register_functions(conn: &Connection) -> Result<(), SqliteStoreError> {
    conn.create_scalar_function(
        "questvault_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )?;
    Ok(())
}

fn param_refs(params: &SqlParams) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p.as_ref()).collect()
}

fn count(conn: &Connection, sql: &str, params: &SqlParams) -> Result<usize, SqliteStoreError> {
    let total: i64 = conn.query_row(sql, param_refs(params).as_slice(), |row| row.get(0))?;
    Ok(usize::try_from(total).unwrap_or(0))
}

// ---- users ----

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>, SqliteStoreError> {
    Ok(conn
        .query_row("SELECT * FROM users WHERE id = ?", params![user_id], user_from_row)
        .optional()?)
}

pub fn find_user_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<User>, SqliteStoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM users WHERE username = ?",
            params![username],
            user_from_row,
        )
        .optional()?)
}

// ---- quests ----

pub fn get_quest(
    conn: &Connection,
    user_id: &str,
    quest_id: &str,
) -> Result<Option<Quest>, SqliteStoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM quests WHERE id = ? AND user_id = ?",
            params![quest_id, user_id],
            quest_from_row,
        )
        .optional()?)
}

pub fn user_quests(conn: &Connection, user_id: &str) -> Result<Vec<Quest>, SqliteStoreError> {
    let mut stmt = conn.prepare("SELECT * FROM quests WHERE user_id = ?")?;
    let rows = stmt.query_map(params![user_id], quest_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn quest_order(sort: QuestSort) -> String {
    let xp = format!("COALESCE(xp_reward, {})", DEFAULT_XP_REWARD);
    match sort {
        QuestSort::Newest => "created_at DESC, id ASC".to_string(),
        QuestSort::Oldest => "created_at ASC, id ASC".to_string(),
        QuestSort::DifficultyAsc => "difficulty ASC, created_at DESC, id ASC".to_string(),
        QuestSort::DifficultyDesc => "difficulty DESC, created_at DESC, id ASC".to_string(),
        QuestSort::XpAsc => format!("{} ASC, created_at DESC, id ASC", xp),
        QuestSort::XpDesc => format!("{} DESC, created_at DESC, id ASC", xp),
    }
}

pub fn query_quests(
    conn: &Connection,
    user_id: &str,
    query: &QuestQuery,
) -> Result<Page<Quest>, SqliteStoreError> {
    let mut conditions = vec!["user_id = ?".to_string()];
    let mut params: SqlParams = vec![Box::new(user_id.to_string())];

    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(Box::new(status.as_str()));
    }
    if let Some(difficulty) = query.difficulty {
        conditions.push("difficulty = ?".to_string());
        params.push(Box::new(i64::from(difficulty)));
    }
    if let Some(dimension) = query.dimension {
        conditions.push("dimension = ?".to_string());
        params.push(Box::new(dimension.as_str()));
    }
    if let Some(hidden) = query.is_hidden {
        conditions.push("is_hidden = ?".to_string());
        params.push(Box::new(hidden));
    }
    if let Some(term) = query.search_term() {
        conditions.push(
            "(questvault_lower(title) LIKE ? ESCAPE '\\' \
             OR COALESCE(dimension, '') LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(&term);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    let where_clause = conditions.join(" AND ");
    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM quests WHERE {}", where_clause),
        &params,
    )?;

    let sql = format!(
        "SELECT * FROM quests WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
        where_clause,
        quest_order(query.sort)
    );
    params.push(Box::new(query.pagination.limit() as i64));
    params.push(Box::new(query.pagination.offset() as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(param_refs(&params).as_slice(), quest_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        page: query.pagination.page,
        page_size: query.pagination.page_size,
    })
}

// ---- achievements ----

pub fn get_achievement(
    conn: &Connection,
    user_id: &str,
    achievement_id: &str,
) -> Result<Option<Achievement>, SqliteStoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM achievements WHERE id = ? AND user_id = ?",
            params![achievement_id, user_id],
            achievement_from_row,
        )
        .optional()?)
}

fn achievement_order(sort: AchievementSort) -> &'static str {
    match sort {
        AchievementSort::Newest => "a.date_completed DESC, a.id ASC",
        AchievementSort::Oldest => "a.date_completed ASC, a.id ASC",
    }
}

pub fn query_achievements(
    conn: &Connection,
    user_id: &str,
    query: &AchievementQuery,
) -> Result<Page<AchievementView>, SqliteStoreError> {
    let mut conditions = vec!["a.user_id = ?".to_string()];
    let mut params: SqlParams = vec![Box::new(user_id.to_string())];

    if let Some(dimension) = query.dimension {
        conditions.push("a.dimension = ?".to_string());
        params.push(Box::new(dimension.as_str()));
    }
    if let Some(hidden) = query.is_hidden {
        conditions.push("a.is_hidden = ?".to_string());
        params.push(Box::new(hidden));
    }
    if let Some(quest_id) = &query.quest_id {
        conditions.push("a.quest_id = ?".to_string());
        params.push(Box::new(quest_id.clone()));
    }
    if let Some(term) = query.search_term() {
        conditions.push(
            "(questvault_lower(a.title) LIKE ? ESCAPE '\\' \
             OR questvault_lower(a.context) LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(&term);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    let where_clause = conditions.join(" AND ");
    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM achievements a WHERE {}", where_clause),
        &params,
    )?;

    // The join is restricted to quests of the same owner
    let sql = format!(
        "SELECT a.*, q.title AS quest_title FROM achievements a \
         LEFT JOIN quests q ON q.id = a.quest_id AND q.user_id = a.user_id \
         WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
        where_clause,
        achievement_order(query.sort)
    );
    params.push(Box::new(query.pagination.limit() as i64));
    params.push(Box::new(query.pagination.offset() as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(param_refs(&params).as_slice(), |row| {
            Ok(AchievementView {
                achievement: achievement_from_row(row)?,
                quest_title: row.get("quest_title")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        page: query.pagination.page,
        page_size: query.pagination.page_size,
    })
}

// ---- ledger ----

pub fn dimension_stats(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<DimensionStat>, SqliteStoreError> {
    let mut stmt = conn.prepare("SELECT * FROM dimension_stats WHERE user_id = ?")?;
    let mut stats = stmt
        .query_map(params![user_id], stat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    ledger::sort_canonical(&mut stats);
    Ok(stats)
}

pub fn dimension_stat(
    conn: &Connection,
    user_id: &str,
    dimension: Dimension,
) -> Result<Option<DimensionStat>, SqliteStoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM dimension_stats WHERE user_id = ? AND dimension = ?",
            params![user_id, dimension.as_str()],
            stat_from_row,
        )
        .optional()?)
}

// ---- writes ----

fn put_user(tx: &Transaction, user: &User) -> Result<(), SqliteStoreError> {
    // Upsert on id only, so a username clash surfaces as a constraint error
    tx.execute(
        "INSERT INTO users (id, username, display_name, openai_api_key, hashed_password, disabled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            username = excluded.username,
            display_name = excluded.display_name,
            openai_api_key = excluded.openai_api_key,
            hashed_password = excluded.hashed_password,
            disabled = excluded.disabled",
        params![
            user.id,
            user.username,
            user.display_name,
            user.openai_api_key,
            user.hashed_password,
            user.disabled,
        ],
    )?;
    Ok(())
}

fn put_quest(tx: &Transaction, quest: &Quest) -> Result<(), SqliteStoreError> {
    let tags = serde_json::to_string(&quest.tags)?;
    tx.execute(
        "INSERT OR REPLACE INTO quests (
            id, user_id, title, dimension, status, tags, victory_condition, is_hidden,
            created_at, progress, due_date, difficulty, xp_reward
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            quest.id,
            quest.user_id,
            quest.title,
            quest.dimension.map(|d| d.as_str()),
            quest.status.as_str(),
            tags,
            quest.victory_condition,
            quest.is_hidden,
            format_timestamp(&quest.created_at),
            i64::from(quest.progress),
            quest.due_date.as_ref().map(format_timestamp),
            i64::from(quest.difficulty),
            quest.xp_reward.map(i64::from),
        ],
    )?;
    Ok(())
}

fn put_achievement(tx: &Transaction, achievement: &Achievement) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO achievements (
            id, user_id, title, context, date_completed, dimension, is_hidden,
            image_url, ai_description, ai_reward, quest_id, use_genai
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            achievement.id,
            achievement.user_id,
            achievement.title,
            achievement.context,
            format_timestamp(&achievement.date_completed),
            achievement.dimension.map(|d| d.as_str()),
            achievement.is_hidden,
            achievement.image_url,
            achievement.ai_description,
            achievement.ai_reward,
            achievement.quest_id,
            achievement.use_genai,
        ],
    )?;
    Ok(())
}

fn put_stat(tx: &Transaction, stat: &DimensionStat) -> Result<(), SqliteStoreError> {
    let total_xp = i64::try_from(stat.total_xp)
        .map_err(|_| SqliteStoreError::Internal(format!("total_xp {} out of range", stat.total_xp)))?;
    tx.execute(
        "INSERT OR REPLACE INTO dimension_stats (user_id, dimension, total_xp, level)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            stat.user_id,
            stat.dimension.as_str(),
            total_xp,
            i64::from(ledger::level_for_xp(stat.total_xp)),
        ],
    )?;
    Ok(())
}

/// Apply one write inside an open transaction.
pub fn apply_write(tx: &Transaction, write: &Write) -> Result<(), SqliteStoreError> {
    match write {
        Write::PutUser(user) => put_user(tx, user),
        Write::PutQuest(quest) => put_quest(tx, quest),
        Write::DeleteQuest { user_id, quest_id } => {
            tx.execute(
                "DELETE FROM quests WHERE id = ? AND user_id = ?",
                params![quest_id, user_id],
            )?;
            Ok(())
        }
        Write::PutAchievement(achievement) => put_achievement(tx, achievement),
        Write::PutStat(stat) => put_stat(tx, stat),
        Write::ReplaceStats { user_id, stats } => {
            tx.execute(
                "DELETE FROM dimension_stats WHERE user_id = ?",
                params![user_id],
            )?;
            for stat in stats {
                put_stat(tx, stat)?;
            }
            Ok(())
        }
        Write::SetVisibility {
            user_id,
            target,
            hidden,
        } => {
            let sql = match target {
                VisibilityTarget::Quests => "UPDATE quests SET is_hidden = ? WHERE user_id = ?",
                VisibilityTarget::Achievements => {
                    "UPDATE achievements SET is_hidden = ? WHERE user_id = ?"
                }
            };
            tx.execute(sql, params![hidden, user_id])?;
            Ok(())
        }
        Write::PurgeUserData { user_id } => {
            for table in ["quests", "achievements", "dimension_stats"] {
                tx.execute(
                    &format!("DELETE FROM {} WHERE user_id = ?", table),
                    params![user_id],
                )?;
            }
            Ok(())
        }
    }
}
