//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        if current_version < 2 {
            migrate_v2(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: articles.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: articles");

    // Every column has a default so a failure marker can be stored by key alone.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            biz TEXT NOT NULL,
            mid TEXT NOT NULL,
            idx TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            link TEXT NOT NULL DEFAULT '',
            publish_at INTEGER NOT NULL DEFAULT 0,
            cover TEXT NOT NULL DEFAULT '',
            digest TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            html TEXT NOT NULL DEFAULT '',
            source_url TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            nickname TEXT NOT NULL DEFAULT '',
            username TEXT NOT NULL DEFAULT '',
            copyright_stat INTEGER NOT NULL DEFAULT 0,
            read_num INTEGER NOT NULL DEFAULT 0,
            like_num INTEGER NOT NULL DEFAULT 0,
            is_fail INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (biz, mid, idx)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_biz_publish ON articles (biz, publish_at)",
        [],
    )?;

    Ok(())
}

/// Migration to version 2: publisher profiles.
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("Applying migration v2: publisher profiles");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            biz TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            headimg TEXT NOT NULL DEFAULT '',
            username TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            max_day_pub_count INTEGER NOT NULL DEFAULT 0,
            opened_history_at INTEGER,
            first_publish_at INTEGER NOT NULL DEFAULT 0,
            latest_publish_at INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // next_link picks the least recently opened history page
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_opened ON profiles (opened_history_at)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_set_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn articles_enforce_natural_key() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO articles (biz, mid, idx, created_at, updated_at)
                      VALUES ('b', '1', '1', 'now', 'now')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
