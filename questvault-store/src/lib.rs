//! QuestVault Store - SQLite persistence
//!
//! Implements [`questvault::Store`] on a single SQLite connection.
//!
//! ## Tables
//!
//! - `users` - accounts (unique username, optional generation credential)
//! - `quests` - tags as a JSON array, timestamps as RFC 3339 text
//! - `achievements` - weak `quest_id` link, no foreign key
//! - `dimension_stats` - one row per (user, dimension)
//!
//! A [`UnitOfWork`] is applied inside one transaction, so a failed write
//! rolls back everything else in the batch.

pub mod error;
pub mod queries;
pub mod rows;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use questvault::query::{AchievementQuery, AchievementView, Page, QuestQuery};
use questvault::store::{Store, StoreResult, UnitOfWork};
use questvault::{Achievement, Dimension, DimensionStat, Quest, User};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

pub use error::SqliteStoreError;

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        queries::register_functions(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        queries::register_functions(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<(), SqliteStoreError> {
        self.with_conn(schema::init_schema)
    }

    /// Run `f` with shared access to the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, SqliteStoreError>
    where
        F: FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SqliteStoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, SqliteStoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SqliteStoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<DbStats, SqliteStoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, SqliteStoreError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
                Ok(u64::try_from(n).unwrap_or(0))
            };

            Ok(DbStats {
                users: count("users")?,
                quests: count("quests")?,
                achievements: count("achievements")?,
                dimension_stats: count("dimension_stats")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub users: u64,
    pub quests: u64,
    pub achievements: u64,
    pub dimension_stats: u64,
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.with_conn(|conn| queries::get_user(conn, user_id))?)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.with_conn(|conn| queries::find_user_by_username(conn, username))?)
    }

    async fn get_quest(&self, user_id: &str, quest_id: &str) -> StoreResult<Option<Quest>> {
        Ok(self.with_conn(|conn| queries::get_quest(conn, user_id, quest_id))?)
    }

    async fn user_quests(&self, user_id: &str) -> StoreResult<Vec<Quest>> {
        Ok(self.with_conn(|conn| queries::user_quests(conn, user_id))?)
    }

    async fn query_quests(&self, user_id: &str, query: &QuestQuery) -> StoreResult<Page<Quest>> {
        Ok(self.with_conn(|conn| queries::query_quests(conn, user_id, query))?)
    }

    async fn get_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> StoreResult<Option<Achievement>> {
        Ok(self.with_conn(|conn| queries::get_achievement(conn, user_id, achievement_id))?)
    }

    async fn query_achievements(
        &self,
        user_id: &str,
        query: &AchievementQuery,
    ) -> StoreResult<Page<AchievementView>> {
        Ok(self.with_conn(|conn| queries::query_achievements(conn, user_id, query))?)
    }

    async fn dimension_stats(&self, user_id: &str) -> StoreResult<Vec<DimensionStat>> {
        Ok(self.with_conn(|conn| queries::dimension_stats(conn, user_id))?)
    }

    async fn dimension_stat(
        &self,
        user_id: &str,
        dimension: Dimension,
    ) -> StoreResult<Option<DimensionStat>> {
        Ok(self.with_conn(|conn| queries::dimension_stat(conn, user_id, dimension))?)
    }

    async fn apply(&self, unit: UnitOfWork) -> StoreResult<()> {
        if unit.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for write in unit.writes() {
                queries::apply_write(&tx, write).map_err(|e| {
                    debug!(kind = write.kind(), error = %e, "Write failed, rolling back");
                    e
                })?;
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!(writes = unit.len(), "Committed unit of work");
        Ok(())
    }
}
