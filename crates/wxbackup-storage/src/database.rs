//! High-level database interface.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::models::{Article, ArticleKey, NewArticle, NewProfile, Profile, UpsertOutcome};
use crate::pool::ConnectionPool;
use crate::repository::{ArticlesRepo, ProfilesRepo};

/// High-level database interface for captured articles and profiles.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone, Debug)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "wxbackup", "wxbackup")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("wxbackup.db"))
    }

    // === Articles ===

    /// Insert or merge an article observation.
    pub fn upsert_article(&self, article: &NewArticle) -> Result<UpsertOutcome> {
        let conn = self.pool.get()?;
        let outcome =
            ArticlesRepo::upsert(&conn, article).map_err(|e| e.during("upsert article"))?;
        debug!(key = %article.key, ?outcome, "Stored article");
        Ok(outcome)
    }

    /// Flag an article as failed.
    pub fn mark_article_failed(&self, key: &ArticleKey) -> Result<UpsertOutcome> {
        let conn = self.pool.get()?;
        ArticlesRepo::mark_failed(&conn, key).map_err(|e| e.during("mark article failed"))
    }

    /// Get an article by its natural key.
    pub fn get_article(&self, key: &ArticleKey) -> Result<Option<Article>> {
        let conn = self.pool.get()?;
        ArticlesRepo::get_by_key(&conn, key)
    }

    /// Count stored articles.
    pub fn count_articles(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        ArticlesRepo::count(&conn)
    }

    // === Profiles ===

    /// Insert or merge a profile observation.
    pub fn upsert_profile(&self, profile: &NewProfile) -> Result<UpsertOutcome> {
        let conn = self.pool.get()?;
        let outcome =
            ProfilesRepo::upsert(&conn, profile).map_err(|e| e.during("upsert profile"))?;
        debug!(biz = %profile.biz, ?outcome, "Stored profile");
        Ok(outcome)
    }

    /// Get a profile by publisher id.
    pub fn get_profile(&self, biz: &str) -> Result<Option<Profile>> {
        let conn = self.pool.get()?;
        ProfilesRepo::get_by_biz(&conn, biz)
    }

    /// Get the least recently opened profile not opened since `opened_before`.
    pub fn next_profile_to_visit(&self, opened_before: i64) -> Result<Option<Profile>> {
        let conn = self.pool.get()?;
        ProfilesRepo::next_to_visit(&conn, opened_before)
    }

    /// Count stored profiles.
    pub fn count_profiles(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        ProfilesRepo::count(&conn)
    }

    // === Lifecycle ===

    /// Flush the write-ahead log. Call once all writers have stopped.
    pub fn close(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        info!("Database closed");
        Ok(())
    }
}
