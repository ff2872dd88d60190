//! Database schema definitions

use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::error::SqliteStoreError;
use crate::rows::{format_timestamp, parse_timestamp};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), SqliteStoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(DIMENSION_STATS_SCHEMA)?;
        conn.execute_batch(INDEXES)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(SqliteStoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
pub fn get_schema_version(conn: &Connection) -> Result<i32, SqliteStoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), SqliteStoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, SqliteStoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), SqliteStoreError> {
    if from_version < 2 {
        // v1 predates due dates, difficulty, rewards and the ledger table.
        // Existing quests keep a NULL xp_reward and earn the default.
        let added = [
            ("quests", "due_date", "TEXT"),
            ("quests", "difficulty", "INTEGER NOT NULL DEFAULT 1"),
            ("quests", "xp_reward", "INTEGER"),
            ("achievements", "use_genai", "INTEGER NOT NULL DEFAULT 0"),
        ];
        for (table, column, decl) in added {
            if !column_exists(conn, table, column)? {
                info!(table, column, "Adding column");
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column, decl
                ))?;
            }
        }
        conn.execute_batch(DIMENSION_STATS_SCHEMA)?;
        conn.execute_batch(INDEXES)?;

        // v1 wrote `YYYY-MM-DD HH:MM:SS`, which sorts before RFC 3339 text
        // from the same day
        for (table, column) in [("quests", "created_at"), ("achievements", "date_completed")] {
            let rewritten = normalize_timestamps(conn, table, column)?;
            if rewritten > 0 {
                info!(table, column, rewritten, "Rewrote legacy timestamps");
            }
        }
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Rewrite every non-canonical timestamp in `table.column` to the storage
/// format. Unparseable values are left alone.
fn normalize_timestamps(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<usize, SqliteStoreError> {
    let legacy: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {column} FROM {table} WHERE {column} IS NOT NULL AND {column} NOT LIKE '%Z'"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    let mut rewritten = 0;
    for (id, text) in legacy {
        let ts = match parse_timestamp(&text) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(table, id = %id, value = %text, error = %e, "Unreadable timestamp");
                continue;
            }
        };
        let canonical = format_timestamp(&ts);
        if canonical != text {
            conn.execute(
                &format!("UPDATE {table} SET {column} = ? WHERE id = ?"),
                params![canonical, id],
            )?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Full schema at the current version
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT,
    openai_api_key TEXT,
    hashed_password TEXT NOT NULL,
    disabled INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS quests (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    dimension TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    tags TEXT NOT NULL DEFAULT '[]',        -- JSON array
    victory_condition TEXT,
    is_hidden INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    due_date TEXT,
    difficulty INTEGER NOT NULL DEFAULT 1,
    xp_reward INTEGER
);

CREATE TABLE IF NOT EXISTS achievements (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    date_completed TEXT NOT NULL,
    dimension TEXT,
    is_hidden INTEGER NOT NULL DEFAULT 0,
    image_url TEXT,
    ai_description TEXT,
    ai_reward TEXT,
    quest_id TEXT,                           -- weak link, no FK
    use_genai INTEGER NOT NULL DEFAULT 0
);
"#;

const DIMENSION_STATS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dimension_stats (
    user_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    total_xp INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (user_id, dimension)
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_quests_user ON quests(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_quests_user_status ON quests(user_id, status);
CREATE INDEX IF NOT EXISTS idx_achievements_user ON achievements(user_id, date_completed);
CREATE INDEX IF NOT EXISTS idx_achievements_quest ON achievements(quest_id);
"#;
