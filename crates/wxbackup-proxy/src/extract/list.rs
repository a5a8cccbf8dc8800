//! Article list fragments from the publisher history page.
//!
//! The same JSON shape arrives two ways: HTML-escaped inside the history
//! page (`var msgList = '...'`), and as the `general_msg_list` string of the
//! paginated `action=getmsg` endpoint. Each entry is one published message
//! holding a lead article and, for group posts, secondary articles.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;
use wxbackup_storage::{ArticleKey, NewArticle};

use crate::error::RuleError;
use crate::extract::article::key_from_url;
use crate::extract::html;

/// Publish days are counted in the platform's local time (UTC+8).
const PLATFORM_UTC_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Default, Deserialize)]
struct MsgListPayload {
    #[serde(default)]
    list: Vec<MsgEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct MsgEntry {
    #[serde(default)]
    comm_msg_info: CommMsgInfo,
    #[serde(default)]
    app_msg_ext_info: Option<AppMsgItem>,
}

#[derive(Debug, Default, Deserialize)]
struct CommMsgInfo {
    #[serde(default, deserialize_with = "lenient_i64")]
    datetime: i64,
}

#[derive(Debug, Default, Deserialize)]
struct AppMsgItem {
    #[serde(default, deserialize_with = "lenient_string")]
    title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    content_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    cover: String,
    #[serde(default, deserialize_with = "lenient_string")]
    digest: String,
    #[serde(default, deserialize_with = "lenient_string")]
    source_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    author: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    copyright_stat: i64,
    #[serde(default)]
    multi_app_msg_item_list: Vec<AppMsgItem>,
}

#[derive(Debug, Deserialize)]
struct GetMsgEnvelope {
    #[serde(default, deserialize_with = "lenient_i64")]
    ret: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    can_msg_continue: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    general_msg_list: String,
}

/// One article listed in a history fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSummary {
    pub key: ArticleKey,
    pub title: String,
    pub link: String,
    pub cover: String,
    pub digest: String,
    pub source_url: String,
    pub author: String,
    pub copyright_stat: i64,
    /// Unix seconds of the message the article belongs to.
    pub publish_at: i64,
}

impl ArticleSummary {
    /// Converts the summary into a storage observation without counters.
    pub fn to_new_article(&self) -> NewArticle {
        NewArticle {
            key: self.key.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            publish_at: self.publish_at,
            cover: self.cover.clone(),
            digest: self.digest.clone(),
            source_url: self.source_url.clone(),
            author: self.author.clone(),
            copyright_stat: self.copyright_stat,
            ..Default::default()
        }
    }
}

/// A parsed `action=getmsg` response.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralMsgList {
    pub summaries: Vec<ArticleSummary>,
    /// False once the oldest page of history has been served.
    pub can_continue: bool,
}

/// Aggregates over a set of summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    /// Newest publish time, 0 when empty.
    pub latest_publish_at: i64,
    /// Oldest non-zero publish time, 0 when empty.
    pub oldest_publish_at: i64,
    /// Most articles published on one day.
    pub max_day_count: i64,
}

impl ListStats {
    /// Computes stats for the given summaries.
    pub fn from_summaries(summaries: &[ArticleSummary]) -> Self {
        let offset = FixedOffset::east_opt(PLATFORM_UTC_OFFSET_SECS);
        let mut per_day: HashMap<NaiveDate, i64> = HashMap::new();
        let mut stats = ListStats::default();

        for summary in summaries.iter().filter(|s| s.publish_at > 0) {
            stats.latest_publish_at = stats.latest_publish_at.max(summary.publish_at);
            stats.oldest_publish_at = if stats.oldest_publish_at == 0 {
                summary.publish_at
            } else {
                stats.oldest_publish_at.min(summary.publish_at)
            };

            let day = DateTime::from_timestamp(summary.publish_at, 0)
                .zip(offset)
                .map(|(at, offset)| at.with_timezone(&offset).date_naive());
            if let Some(day) = day {
                *per_day.entry(day).or_default() += 1;
            }
        }

        stats.max_day_count = per_day.values().copied().max().unwrap_or(0);
        stats
    }
}

/// Parses the `msgList` literal embedded in the history page.
pub fn parse_inline_msg_list(raw: &str) -> Result<Vec<ArticleSummary>, RuleError> {
    let json = html::unescape(raw).replace("\\/", "/");
    parse_msg_list_json(&json)
}

/// Parses an `action=getmsg` response body.
pub fn parse_general_msg_list(body: &str) -> Result<GeneralMsgList, RuleError> {
    let envelope: GetMsgEnvelope = serde_json::from_str(body)?;
    if envelope.ret != 0 {
        return Err(RuleError::Parse(format!(
            "getmsg returned ret={}",
            envelope.ret
        )));
    }
    if envelope.general_msg_list.is_empty() {
        return Err(RuleError::Parse("getmsg without general_msg_list".into()));
    }

    Ok(GeneralMsgList {
        summaries: parse_msg_list_json(&envelope.general_msg_list)?,
        can_continue: envelope.can_msg_continue != 0,
    })
}

/// Parses the list JSON shared by both sources.
///
/// Items without a title or link, or whose link lacks the article key, are
/// skipped.
pub fn parse_msg_list_json(json: &str) -> Result<Vec<ArticleSummary>, RuleError> {
    let payload: MsgListPayload = serde_json::from_str(json)?;

    let mut summaries = Vec::new();
    for entry in payload.list {
        let Some(lead) = entry.app_msg_ext_info else {
            continue;
        };
        let publish_at = entry.comm_msg_info.datetime;

        let secondary = lead.multi_app_msg_item_list.iter();
        for item in std::iter::once(&lead).chain(secondary) {
            if let Some(summary) = summarize(item, publish_at) {
                summaries.push(summary);
            }
        }
    }

    Ok(summaries)
}

fn summarize(item: &AppMsgItem, publish_at: i64) -> Option<ArticleSummary> {
    if item.title.is_empty() || item.content_url.is_empty() {
        debug!("Skipping list item without title or link");
        return None;
    }

    let link = html::unescape(&item.content_url);
    let key = key_from_url(&link);
    if !key.is_complete() {
        debug!(link = %link, "Skipping list item without article key");
        return None;
    }

    Some(ArticleSummary {
        key,
        title: item.title.clone(),
        link,
        cover: html::unescape(&item.cover),
        digest: item.digest.clone(),
        source_url: html::unescape(&item.source_url),
        author: item.author.clone(),
        copyright_stat: item.copyright_stat,
        publish_at,
    })
}

/// Accepts a number, a numeric string or null.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Accepts a string or null.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
