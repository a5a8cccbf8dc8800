//! Article repository.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StorageError};
use crate::models::{Article, ArticleKey, NewArticle, UpsertOutcome};
use crate::repository::parse_datetime;

const ARTICLE_COLUMNS: &str = "id, biz, mid, idx, title, link, publish_at, cover, digest, content, html,
     source_url, author, nickname, username, copyright_stat, read_num, like_num, is_fail,
     created_at, updated_at";

/// Repository for article operations.
pub struct ArticlesRepo;

impl ArticlesRepo {
    /// Insert or merge an article observation.
    ///
    /// Counters and `updated_at` are always refreshed. Every other field is
    /// filled only when the stored value is empty and the incoming one is not.
    pub fn upsert(conn: &Connection, article: &NewArticle) -> Result<UpsertOutcome> {
        require_key(&article.key)?;

        let existed = Self::exists(conn, &article.key)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO articles (biz, mid, idx, title, link, publish_at, cover, digest, content,
                                   html, source_url, author, nickname, username, copyright_stat,
                                   read_num, like_num, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     COALESCE(?16, 0), COALESCE(?17, 0), ?18, ?18)
             ON CONFLICT (biz, mid, idx) DO UPDATE SET
                title = CASE WHEN articles.title = '' THEN excluded.title ELSE articles.title END,
                link = CASE WHEN articles.link = '' THEN excluded.link ELSE articles.link END,
                publish_at = CASE WHEN articles.publish_at = 0 THEN excluded.publish_at
                                  ELSE articles.publish_at END,
                cover = CASE WHEN articles.cover = '' THEN excluded.cover ELSE articles.cover END,
                digest = CASE WHEN articles.digest = '' THEN excluded.digest ELSE articles.digest END,
                content = CASE WHEN articles.content = '' THEN excluded.content
                               ELSE articles.content END,
                html = CASE WHEN articles.html = '' THEN excluded.html ELSE articles.html END,
                source_url = CASE WHEN articles.source_url = '' THEN excluded.source_url
                                  ELSE articles.source_url END,
                author = CASE WHEN articles.author = '' THEN excluded.author ELSE articles.author END,
                nickname = CASE WHEN articles.nickname = '' THEN excluded.nickname
                                ELSE articles.nickname END,
                username = CASE WHEN articles.username = '' THEN excluded.username
                                ELSE articles.username END,
                copyright_stat = CASE WHEN articles.copyright_stat = 0 THEN excluded.copyright_stat
                                      ELSE articles.copyright_stat END,
                read_num = COALESCE(?16, articles.read_num),
                like_num = COALESCE(?17, articles.like_num),
                updated_at = excluded.updated_at",
            params![
                article.key.biz,
                article.key.mid,
                article.key.idx,
                article.title,
                article.link,
                article.publish_at,
                article.cover,
                article.digest,
                article.content,
                article.html,
                article.source_url,
                article.author,
                article.nickname,
                article.username,
                article.copyright_stat,
                article.read_num,
                article.like_num,
                now,
            ],
        )?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Flag an article as failed, creating a bare record when it was never seen.
    pub fn mark_failed(conn: &Connection, key: &ArticleKey) -> Result<UpsertOutcome> {
        require_key(key)?;

        let existed = Self::exists(conn, key)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO articles (biz, mid, idx, is_fail, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT (biz, mid, idx) DO UPDATE SET
                is_fail = 1,
                updated_at = excluded.updated_at",
            params![key.biz, key.mid, key.idx, now],
        )?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Get an article by its natural key.
    pub fn get_by_key(conn: &Connection, key: &ArticleKey) -> Result<Option<Article>> {
        let sql = format!(
            "SELECT {} FROM articles WHERE biz = ?1 AND mid = ?2 AND idx = ?3",
            ARTICLE_COLUMNS
        );
        let article = conn
            .query_row(&sql, params![key.biz, key.mid, key.idx], row_to_article)
            .optional()?;

        Ok(article)
    }

    /// Check whether an article exists.
    pub fn exists(conn: &Connection, key: &ArticleKey) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM articles WHERE biz = ?1 AND mid = ?2 AND idx = ?3",
                params![key.biz, key.mid, key.idx],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    /// Count stored articles.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn require_key(key: &ArticleKey) -> Result<()> {
    if key.is_complete() {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!(
            "article key is incomplete: {}",
            key
        )))
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        key: ArticleKey {
            biz: row.get(1)?,
            mid: row.get(2)?,
            idx: row.get(3)?,
        },
        title: row.get(4)?,
        link: row.get(5)?,
        publish_at: row.get(6)?,
        cover: row.get(7)?,
        digest: row.get(8)?,
        content: row.get(9)?,
        html: row.get(10)?,
        source_url: row.get(11)?,
        author: row.get(12)?,
        nickname: row.get(13)?,
        username: row.get(14)?,
        copyright_stat: row.get(15)?,
        read_num: row.get(16)?,
        like_num: row.get(17)?,
        is_fail: row.get::<_, i32>(18)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(19)?),
        updated_at: parse_datetime(&row.get::<_, String>(20)?),
    })
}
