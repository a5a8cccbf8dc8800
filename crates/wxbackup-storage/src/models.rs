//! Data models for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural key of an article: publisher id, message id and position in the
/// message group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ArticleKey {
    /// Publisher id (`__biz`).
    pub biz: String,
    /// Message id (`mid`).
    pub mid: String,
    /// Index inside a multi-article message (`idx`).
    pub idx: String,
}

impl ArticleKey {
    /// Creates a key from its three parts.
    pub fn new(biz: impl Into<String>, mid: impl Into<String>, idx: impl Into<String>) -> Self {
        Self {
            biz: biz.into(),
            mid: mid.into(),
            idx: idx.into(),
        }
    }

    /// Returns true when all three parts are present.
    pub fn is_complete(&self) -> bool {
        !self.biz.is_empty() && !self.mid.is_empty() && !self.idx.is_empty()
    }
}

impl std::fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.biz, self.mid, self.idx)
    }
}

/// A stored article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Row id.
    pub id: i64,
    /// Natural key.
    pub key: ArticleKey,
    /// Article title.
    pub title: String,
    /// Canonical link.
    pub link: String,
    /// Publish time as Unix seconds (0 when unknown).
    pub publish_at: i64,
    /// Cover image URL.
    pub cover: String,
    /// Digest shown in lists.
    pub digest: String,
    /// Plain-text body.
    pub content: String,
    /// Cleaned body HTML.
    pub html: String,
    /// "Read more" source URL.
    pub source_url: String,
    /// Author byline.
    pub author: String,
    /// Publisher display name at the time of capture.
    pub nickname: String,
    /// Publisher account name.
    pub username: String,
    /// Copyright classification code.
    pub copyright_stat: i64,
    /// Read count.
    pub read_num: i64,
    /// Like count.
    pub like_num: i64,
    /// Whether the article could not be captured (deleted, blocked, ...).
    pub is_fail: bool,
    /// First observation.
    pub created_at: DateTime<Utc>,
    /// Last observation.
    pub updated_at: DateTime<Utc>,
}

/// An observation of an article, merged into storage by [`ArticleKey`].
///
/// Empty strings and a zero `publish_at` mean "not observed". Counters are
/// optional so that list summaries, which carry no counters, never reset them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewArticle {
    pub key: ArticleKey,
    pub title: String,
    pub link: String,
    pub publish_at: i64,
    pub cover: String,
    pub digest: String,
    pub content: String,
    pub html: String,
    pub source_url: String,
    pub author: String,
    pub nickname: String,
    pub username: String,
    pub copyright_stat: i64,
    pub read_num: Option<i64>,
    pub like_num: Option<i64>,
}

impl NewArticle {
    /// Creates an empty observation for the given key.
    pub fn new(key: ArticleKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }
}

/// A stored publisher profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Row id.
    pub id: i64,
    /// Publisher id (`__biz`).
    pub biz: String,
    /// Display title.
    pub title: String,
    /// Avatar URL.
    pub headimg: String,
    /// Account name.
    pub username: String,
    /// Profile description.
    pub description: String,
    /// Most articles observed on a single day.
    pub max_day_pub_count: i64,
    /// When the history page was last opened.
    pub opened_history_at: Option<DateTime<Utc>>,
    /// Oldest publish time observed, Unix seconds (0 when unknown).
    pub first_publish_at: i64,
    /// Newest publish time observed, Unix seconds (0 when unknown).
    pub latest_publish_at: i64,
    /// First observation.
    pub created_at: DateTime<Utc>,
    /// Last observation.
    pub updated_at: DateTime<Utc>,
}

/// An observation of a publisher profile.
///
/// Merge rules: display strings replace stored values only when non-empty,
/// `latest_publish_at` and `max_day_pub_count` keep the maximum,
/// `first_publish_at` keeps the smallest non-zero value, and
/// `opened_history_at` replaces the stored value when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewProfile {
    pub biz: String,
    pub title: String,
    pub headimg: String,
    pub username: String,
    pub description: String,
    pub max_day_pub_count: i64,
    pub opened_history_at: Option<i64>,
    pub first_publish_at: i64,
    pub latest_publish_at: i64,
}

impl NewProfile {
    /// Creates an empty observation for the given publisher.
    pub fn new(biz: impl Into<String>) -> Self {
        Self {
            biz: biz.into(),
            ..Default::default()
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created.
    Inserted,
    /// An existing record was merged.
    Updated,
}
