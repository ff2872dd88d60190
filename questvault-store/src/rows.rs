//! Row mapping between SQLite and the core record types.
//!
//! Timestamps are stored as RFC 3339 text with nanosecond precision so that
//! lexical order matches chronological order. Rows written by older
//! deployments may use `YYYY-MM-DD HH:MM:SS[.f]`, read as UTC; the v2
//! migration rewrites those to the storage format.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use questvault::{Achievement, Dimension, DimensionStat, Quest, QuestStatus, User};
use rusqlite::types::Type;
use rusqlite::Row;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn conversion_error(column: usize, err: impl Into<BoxError>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn column_index(row: &Row, name: &str) -> usize {
    row.as_ref().column_index(name).unwrap_or(0)
}

/// Format a timestamp for storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, BoxError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))?;
    Ok(naive.and_utc())
}

fn get_timestamp(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(name)?;
    parse_timestamp(&text).map_err(|e| conversion_error(column_index(row, name), e))
}

fn get_optional_timestamp(row: &Row, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(name)?;
    text.filter(|t| !t.trim().is_empty())
        .map(|t| parse_timestamp(&t).map_err(|e| conversion_error(column_index(row, name), e)))
        .transpose()
}

fn get_dimension(row: &Row, name: &str) -> rusqlite::Result<Option<Dimension>> {
    let text: Option<String> = row.get(name)?;
    text.filter(|t| !t.trim().is_empty())
        .map(|t| {
            Dimension::from_str(&t).map_err(|e| conversion_error(column_index(row, name), e))
        })
        .transpose()
}

fn get_u32(row: &Row, name: &str, default: u32) -> rusqlite::Result<u32> {
    let value: Option<i64> = row.get(name)?;
    match value {
        None => Ok(default),
        Some(v) => u32::try_from(v).map_err(|e| conversion_error(column_index(row, name), e)),
    }
}

pub fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        openai_api_key: row.get("openai_api_key")?,
        hashed_password: row.get::<_, Option<String>>("hashed_password")?.unwrap_or_default(),
        disabled: row.get::<_, Option<bool>>("disabled")?.unwrap_or(false),
    })
}

pub fn quest_from_row(row: &Row) -> rusqlite::Result<Quest> {
    let status: String = row.get("status")?;
    let status = QuestStatus::from_str(&status)
        .map_err(|e| conversion_error(column_index(row, "status"), e))?;

    let tags: Option<String> = row.get("tags")?;
    let tags = match tags.filter(|t| !t.trim().is_empty()) {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| conversion_error(column_index(row, "tags"), e))?,
        None => Vec::new(),
    };

    let progress = get_u32(row, "progress", 0)?;
    let progress =
        u8::try_from(progress).map_err(|e| conversion_error(column_index(row, "progress"), e))?;

    let xp_reward: Option<i64> = row.get("xp_reward")?;
    let xp_reward = xp_reward
        .map(u32::try_from)
        .transpose()
        .map_err(|e| conversion_error(column_index(row, "xp_reward"), e))?;

    Ok(Quest {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        dimension: get_dimension(row, "dimension")?,
        status,
        tags,
        victory_condition: row.get("victory_condition")?,
        is_hidden: row.get::<_, Option<bool>>("is_hidden")?.unwrap_or(false),
        due_date: get_optional_timestamp(row, "due_date")?,
        progress,
        difficulty: get_u32(row, "difficulty", 1)?,
        xp_reward,
        created_at: get_timestamp(row, "created_at")?,
    })
}

pub fn achievement_from_row(row: &Row) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        context: row.get::<_, Option<String>>("context")?.unwrap_or_default(),
        date_completed: get_timestamp(row, "date_completed")?,
        dimension: get_dimension(row, "dimension")?,
        is_hidden: row.get::<_, Option<bool>>("is_hidden")?.unwrap_or(false),
        image_url: row.get::<_, Option<String>>("image_url")?.unwrap_or_default(),
        ai_description: row
            .get::<_, Option<String>>("ai_description")?
            .unwrap_or_default(),
        ai_reward: row.get::<_, Option<String>>("ai_reward")?.unwrap_or_default(),
        use_genai: row.get::<_, Option<bool>>("use_genai")?.unwrap_or(false),
        quest_id: row.get("quest_id")?,
    })
}

pub fn stat_from_row(row: &Row) -> rusqlite::Result<DimensionStat> {
    let dimension = get_dimension(row, "dimension")?.ok_or_else(|| {
        conversion_error(column_index(row, "dimension"), "missing dimension")
    })?;
    let total_xp: i64 = row.get("total_xp")?;
    let total_xp =
        u64::try_from(total_xp).map_err(|e| conversion_error(column_index(row, "total_xp"), e))?;

    Ok(DimensionStat {
        user_id: row.get("user_id")?,
        dimension,
        total_xp,
        // Level always follows from XP
        level: questvault::ledger::level_for_xp(total_xp),
    })
}
