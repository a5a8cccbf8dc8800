//! Publisher history page (`/mp/profile_ext?action=home`).

use once_cell::sync::Lazy;
use regex::Regex;

use super::{FieldCascade, PostProcess};

/// Page texts shown for accounts that can no longer be browsed.
pub const INVALID_ACCOUNT_MARKERS: &[&str] = &[
    "此帐号已申请帐号迁移",
    "已停止访问该网页",
    "此账号已自主注销",
];

static BIZ: Lazy<FieldCascade> =
    Lazy::new(|| FieldCascade::new(&[(r#"var __biz = "([^"]+)""#, PostProcess::Verbatim)]));

static TITLE: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[(r#"var nickname =.*?\s"([^"]+?)""#, PostProcess::Unescape)])
});

static HEADIMG: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[(r#"var headimg =.*?\s"([^"]+?)""#, PostProcess::Unescape)])
});

static USERNAME: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[(r#"var username =.*?\s"([^"]+?)""#, PostProcess::Verbatim)])
});

static DESCRIPTION: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[(r#"<p class="profile_desc">([\s\S]+?)</p>"#, PostProcess::Trim)])
});

static MSG_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"var msgList = '(.+)';").expect("Invalid regex pattern"));

/// Fields read from a history page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePage {
    pub biz: String,
    pub title: String,
    pub headimg: String,
    pub username: String,
    pub description: String,
    /// Raw, still HTML-escaped `msgList` literal.
    pub msg_list: Option<String>,
    /// The page reports a migrated, closed or deregistered account.
    pub invalid: bool,
}

/// Reads a history page. Unresolved fields are left empty.
pub fn parse_profile_page(page: &str) -> ProfilePage {
    ProfilePage {
        biz: BIZ.extract(page),
        title: TITLE.extract(page),
        headimg: HEADIMG.extract(page),
        username: USERNAME.extract(page),
        description: DESCRIPTION.extract(page),
        msg_list: MSG_LIST
            .captures(page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()),
        invalid: INVALID_ACCOUNT_MARKERS
            .iter()
            .any(|marker| page.contains(marker)),
    }
}
