//! Publisher profile repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StorageError};
use crate::models::{NewProfile, Profile, UpsertOutcome};
use crate::repository::parse_datetime;

const PROFILE_COLUMNS: &str = "id, biz, title, headimg, username, description, max_day_pub_count,
     opened_history_at, first_publish_at, latest_publish_at, created_at, updated_at";

/// Repository for profile operations.
pub struct ProfilesRepo;

impl ProfilesRepo {
    /// Insert or merge a profile observation.
    pub fn upsert(conn: &Connection, profile: &NewProfile) -> Result<UpsertOutcome> {
        if profile.biz.is_empty() {
            return Err(StorageError::InvalidKey(
                "profile observation without biz".to_string(),
            ));
        }

        let existed = Self::get_by_biz(conn, &profile.biz)?.is_some();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO profiles (biz, title, headimg, username, description, max_day_pub_count,
                                   opened_history_at, first_publish_at, latest_publish_at,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT (biz) DO UPDATE SET
                title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE profiles.title END,
                headimg = CASE WHEN excluded.headimg <> '' THEN excluded.headimg
                               ELSE profiles.headimg END,
                username = CASE WHEN excluded.username <> '' THEN excluded.username
                                ELSE profiles.username END,
                description = CASE WHEN excluded.description <> '' THEN excluded.description
                                   ELSE profiles.description END,
                max_day_pub_count = MAX(profiles.max_day_pub_count, excluded.max_day_pub_count),
                opened_history_at = COALESCE(excluded.opened_history_at, profiles.opened_history_at),
                first_publish_at = CASE
                    WHEN excluded.first_publish_at > 0
                         AND (profiles.first_publish_at = 0
                              OR excluded.first_publish_at < profiles.first_publish_at)
                    THEN excluded.first_publish_at
                    ELSE profiles.first_publish_at END,
                latest_publish_at = MAX(profiles.latest_publish_at, excluded.latest_publish_at),
                updated_at = excluded.updated_at",
            params![
                profile.biz,
                profile.title,
                profile.headimg,
                profile.username,
                profile.description,
                profile.max_day_pub_count,
                profile.opened_history_at,
                profile.first_publish_at,
                profile.latest_publish_at,
                now,
            ],
        )?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Get a profile by publisher id.
    pub fn get_by_biz(conn: &Connection, biz: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE biz = ?1", PROFILE_COLUMNS);
        let profile = conn.query_row(&sql, [biz], row_to_profile).optional()?;
        Ok(profile)
    }

    /// Get the profile whose history page was opened longest ago, skipping
    /// profiles opened at or after `opened_before` (Unix seconds).
    ///
    /// Profiles never opened come first.
    pub fn next_to_visit(conn: &Connection, opened_before: i64) -> Result<Option<Profile>> {
        let sql = format!(
            "SELECT {} FROM profiles
             WHERE opened_history_at IS NULL OR opened_history_at < ?1
             ORDER BY COALESCE(opened_history_at, 0) ASC, id ASC
             LIMIT 1",
            PROFILE_COLUMNS
        );
        let profile = conn
            .query_row(&sql, [opened_before], row_to_profile)
            .optional()?;
        Ok(profile)
    }

    /// Count stored profiles.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let opened: Option<i64> = row.get(7)?;
    Ok(Profile {
        id: row.get(0)?,
        biz: row.get(1)?,
        title: row.get(2)?,
        headimg: row.get(3)?,
        username: row.get(4)?,
        description: row.get(5)?,
        max_day_pub_count: row.get(6)?,
        opened_history_at: opened.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        first_publish_at: row.get(8)?,
        latest_publish_at: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn observed(biz: &str) -> NewProfile {
        NewProfile {
            biz: biz.to_string(),
            title: "Daily News".to_string(),
            headimg: "https://img/head.png".to_string(),
            username: "gh_123".to_string(),
            description: "News every day".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get_profile() {
        let conn = setup_db();

        let outcome = ProfilesRepo::upsert(&conn, &observed("biz1")).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let stored = ProfilesRepo::get_by_biz(&conn, "biz1").unwrap().unwrap();
        assert_eq!(stored.title, "Daily News");
        assert_eq!(stored.username, "gh_123");
        assert!(stored.opened_history_at.is_none());
    }

    #[test]
    fn test_upsert_keeps_strings_when_incoming_empty() {
        let conn = setup_db();
        ProfilesRepo::upsert(&conn, &observed("biz1")).unwrap();

        let outcome = ProfilesRepo::upsert(&conn, &NewProfile::new("biz1")).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stored = ProfilesRepo::get_by_biz(&conn, "biz1").unwrap().unwrap();
        assert_eq!(stored.title, "Daily News");
        assert_eq!(stored.description, "News every day");
        assert_eq!(ProfilesRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_strings_when_incoming_present() {
        let conn = setup_db();
        ProfilesRepo::upsert(&conn, &observed("biz1")).unwrap();

        let mut renamed = NewProfile::new("biz1");
        renamed.title = "Weekly News".to_string();
        ProfilesRepo::upsert(&conn, &renamed).unwrap();

        let stored = ProfilesRepo::get_by_biz(&conn, "biz1").unwrap().unwrap();
        assert_eq!(stored.title, "Weekly News");
    }

    #[test]
    fn test_publish_bounds_merge() {
        let conn = setup_db();

        let mut first = NewProfile::new("biz1");
        first.latest_publish_at = 500;
        first.first_publish_at = 300;
        first.max_day_pub_count = 2;
        ProfilesRepo::upsert(&conn, &first).unwrap();

        let mut second = NewProfile::new("biz1");
        second.latest_publish_at = 400;
        second.first_publish_at = 100;
        second.max_day_pub_count = 1;
        ProfilesRepo::upsert(&conn, &second).unwrap();

        let mut third = NewProfile::new("biz1");
        third.latest_publish_at = 900;
        ProfilesRepo::upsert(&conn, &third).unwrap();

        let stored = ProfilesRepo::get_by_biz(&conn, "biz1").unwrap().unwrap();
        assert_eq!(stored.latest_publish_at, 900);
        assert_eq!(stored.first_publish_at, 100);
        assert_eq!(stored.max_day_pub_count, 2);
    }

    #[test]
    fn test_opened_history_at_overwrites_when_present() {
        let conn = setup_db();

        let mut opened = NewProfile::new("biz1");
        opened.opened_history_at = Some(1_000);
        ProfilesRepo::upsert(&conn, &opened).unwrap();
        ProfilesRepo::upsert(&conn, &NewProfile::new("biz1")).unwrap();

        let stored = ProfilesRepo::get_by_biz(&conn, "biz1").unwrap().unwrap();
        assert_eq!(stored.opened_history_at.unwrap().timestamp(), 1_000);
    }

    #[test]
    fn test_next_to_visit() {
        let conn = setup_db();

        for (biz, opened) in [("recent", 5_000), ("stale", 1_000), ("older", 2_000)] {
            let mut profile = NewProfile::new(biz);
            profile.opened_history_at = Some(opened);
            ProfilesRepo::upsert(&conn, &profile).unwrap();
        }

        let next = ProfilesRepo::next_to_visit(&conn, 4_000).unwrap().unwrap();
        assert_eq!(next.biz, "stale");

        assert!(ProfilesRepo::next_to_visit(&conn, 500).unwrap().is_none());
    }

    #[test]
    fn test_next_to_visit_prefers_never_opened() {
        let conn = setup_db();

        let mut opened = NewProfile::new("opened");
        opened.opened_history_at = Some(1_000);
        ProfilesRepo::upsert(&conn, &opened).unwrap();
        ProfilesRepo::upsert(&conn, &NewProfile::new("fresh")).unwrap();

        let next = ProfilesRepo::next_to_visit(&conn, 4_000).unwrap().unwrap();
        assert_eq!(next.biz, "fresh");
    }

    #[test]
    fn test_upsert_requires_biz() {
        let conn = setup_db();
        let result = ProfilesRepo::upsert(&conn, &NewProfile::default());
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
