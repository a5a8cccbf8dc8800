//! Article pages (`/s?__biz=...`, `/s/<token>`, legacy `/mp/appmsg/show`).

use chrono::{Local, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use url::Url;
use wxbackup_storage::{ArticleKey, NewArticle};

use super::{html, FieldCascade, PostProcess};
use crate::error::RuleError;

/// Page texts shown instead of an article that was removed, restricted or
/// rejected by the platform.
pub const INVALID_ARTICLE_MARKERS: &[&str] = &[
    "global_error_msg",
    "icon_msg warn",
    "此内容因违规无法查看",
    "此内容被投诉且经审核涉嫌侵权",
    "此内容已被发布者删除",
];

const TITLE_SUFFIX: &str = " - 微信公众号";

static BIZ: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var biz = ""\s*\|\|\s*"([^"]+)""#, PostProcess::Verbatim),
        (r#"var biz = "([^"]+)""#, PostProcess::Verbatim),
    ])
});

static MID: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var mid = ""\s*\|\|\s*"([^"]+)""#, PostProcess::Verbatim),
        (r#"var mid = "([^"]+)""#, PostProcess::Verbatim),
    ])
});

static IDX: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var idx = ""\s*\|\|\s*"([^"]+)""#, PostProcess::Verbatim),
        (r#"var idx = "([^"]+)""#, PostProcess::Verbatim),
    ])
});

static TITLE: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var msg_title = "(.+?)";"#, PostProcess::Unescape),
        (r"var msg_title = '(.+?)'\.html\(false\);", PostProcess::Unescape),
        (r"<title>(.*?)</title>", PostProcess::UnescapeStripSuffix(TITLE_SUFFIX)),
    ])
});

static DIGEST: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var msg_desc = htmlDecode\("(.+?)"\);"#, PostProcess::Unescape),
        (r#"var msg_desc = "(.+?)";"#, PostProcess::Unescape),
        (r#"<meta name="description" content="(.*?)""#, PostProcess::Unescape),
    ])
});

static NICKNAME: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var nickname = htmlDecode\("(.+?)"\);"#, PostProcess::Unescape),
        (r#"var nickname = "(.+?)";"#, PostProcess::Unescape),
    ])
});

static USERNAME: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[(r#"var user_name = "(.+?)";"#, PostProcess::Verbatim)])
});

static COVER: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var msg_cdn_url = "(.+?)";"#, PostProcess::Unescape),
        (r#"<meta property="og:image" content="(.*?)""#, PostProcess::Unescape),
    ])
});

static SOURCE_URL: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r"var msg_source_url = '(.+?)';", PostProcess::Unescape),
        (r#"var msg_source_url = "(.+?)";"#, PostProcess::Unescape),
    ])
});

static AUTHOR: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var author = "(.+?)";"#, PostProcess::Unescape),
        (r"var author = '(.+?)';", PostProcess::Unescape),
        (r#"<meta property="og:article:author" content="(.*?)""#, PostProcess::Unescape),
    ])
});

static COPYRIGHT: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var _copyrightStat = "(\d+)";"#, PostProcess::Verbatim),
        (r#"var copyright_stat = "(\d+)";"#, PostProcess::Verbatim),
    ])
});

static PUBLISH_TIME: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var publishTime = "(.+?)""#, PostProcess::Verbatim),
        (r#"var ct = "(\d+)""#, PostProcess::Verbatim),
    ])
});

static READ_NUM: Lazy<FieldCascade> =
    Lazy::new(|| FieldCascade::new(&[(r#"var readNum = "(.*?)";"#, PostProcess::Verbatim)]));

static LIKE_NUM: Lazy<FieldCascade> =
    Lazy::new(|| FieldCascade::new(&[(r#"var likeNum = "(.*?)";"#, PostProcess::Verbatim)]));

static LINK: Lazy<FieldCascade> = Lazy::new(|| {
    FieldCascade::new(&[
        (r#"var msg_link = "(.+?)";"#, PostProcess::Unescape),
        (r#"<meta property="og:url" content="(.*?)""#, PostProcess::Unescape),
    ])
});

/// Outcome of reading an article page.
#[derive(Debug, Clone, PartialEq)]
pub enum ArticlePage {
    /// The page carries an invalid-content marker; nothing was extracted.
    /// The key holds whatever the URL and page revealed and may be
    /// incomplete for short links.
    Invalid(ArticleKey),
    /// The extracted article.
    Parsed(NewArticle),
}

impl ArticlePage {
    /// Natural key of the page.
    pub fn key(&self) -> &ArticleKey {
        match self {
            ArticlePage::Invalid(key) => key,
            ArticlePage::Parsed(article) => &article.key,
        }
    }
}

/// Reads an article page fetched from `url`.
///
/// Invalid-content markers are checked first. The natural key comes from
/// the URL query and, for short links, from page variables. A valid page
/// without a resolvable key is an error; every other unresolved field is
/// left empty.
pub fn parse_article(url: &str, page: &str) -> Result<ArticlePage, RuleError> {
    let key = resolve_key(url, page);

    if INVALID_ARTICLE_MARKERS
        .iter()
        .any(|marker| page.contains(marker))
    {
        return Ok(ArticlePage::Invalid(key));
    }

    if !key.is_complete() {
        return Err(RuleError::Parse(format!("article key not found for {url}")));
    }

    let body = html::extract_body(page);
    let link = match LINK.extract(page) {
        link if link.is_empty() => url.to_string(),
        link => link,
    };

    Ok(ArticlePage::Parsed(NewArticle {
        key,
        title: TITLE.extract(page),
        link,
        publish_at: parse_publish_time(&PUBLISH_TIME.extract(page)),
        cover: COVER.extract(page),
        digest: DIGEST.extract(page),
        content: html::to_plain_text(&body),
        html: body,
        source_url: SOURCE_URL.extract(page),
        author: AUTHOR.extract(page),
        nickname: NICKNAME.extract(page),
        username: USERNAME.extract(page),
        copyright_stat: COPYRIGHT.extract_i64(page),
        read_num: counter(&READ_NUM, page),
        like_num: counter(&LIKE_NUM, page),
    }))
}

/// Reads `__biz`, `mid` and `idx` from an article link.
///
/// Legacy links name the last two `appmsgid` and `itemidx`. Missing parts
/// are left empty.
pub fn key_from_url(url: &str) -> ArticleKey {
    let Ok(parsed) = Url::parse(url) else {
        return ArticleKey::default();
    };

    let mut key = ArticleKey::default();
    for (name, value) in parsed.query_pairs() {
        match name.as_ref() {
            "__biz" => key.biz = value.into_owned(),
            "mid" => key.mid = value.into_owned(),
            "appmsgid" if key.mid.is_empty() => key.mid = value.into_owned(),
            "idx" => key.idx = value.into_owned(),
            "itemidx" if key.idx.is_empty() => key.idx = value.into_owned(),
            _ => {}
        }
    }
    key
}

fn resolve_key(url: &str, page: &str) -> ArticleKey {
    let mut key = key_from_url(url);
    if key.biz.is_empty() {
        key.biz = BIZ.extract(page);
    }
    if key.mid.is_empty() {
        key.mid = MID.extract(page);
    }
    if key.idx.is_empty() {
        key.idx = IDX.extract(page);
    }
    key
}

/// Accepts Unix seconds or a local `YYYY-MM-DD HH:MM:SS` timestamp.
fn parse_publish_time(raw: &str) -> i64 {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return secs;
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|at| at.timestamp())
        .unwrap_or(0)
}

/// A counter present on the page; malformed values count as zero.
fn counter(cascade: &FieldCascade, page: &str) -> Option<i64> {
    let raw = cascade.extract(page);
    (!raw.is_empty()).then(|| raw.trim().parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str =
        "https://mp.weixin.qq.com/s?__biz=MzA5&mid=2650&idx=1&sn=abc&chksm=def#rd";

    fn page(script: &str, body: &str) -> String {
        format!(
            r#"<html><head><title>Fallback - 微信公众号</title></head><body>
            <div class="rich_media_content " id="js_content" style="visibility: hidden;">{body}</div>
            <script>{script}</script></body></html>"#
        )
    }

    fn parsed(page: &str) -> NewArticle {
        match parse_article(URL, page).unwrap() {
            ArticlePage::Parsed(article) => article,
            other => panic!("expected parsed article, got {other:?}"),
        }
    }

    #[test]
    fn extracts_article_fields() {
        let page = page(
            r#"var msg_title = "Hello";
               var author = "Alice";
               var publishTime = "1700000000";
               var msg_desc = htmlDecode("A &amp; B");
               var nickname = htmlDecode("Tech Notes");
               var user_name = "gh_abc";
               var msg_cdn_url = "https://img/cover.jpg";
               var _copyrightStat = "1";
               var readNum = "42";"#,
            r#"<p><img data-src="https://x/y.png"></p><p>Body text</p>"#,
        );

        let article = parsed(&page);

        assert_eq!(article.key, ArticleKey::new("MzA5", "2650", "1"));
        assert_eq!(article.title, "Hello");
        assert_eq!(article.author, "Alice");
        assert_eq!(article.publish_at, 1_700_000_000);
        assert_eq!(article.digest, "A & B");
        assert_eq!(article.nickname, "Tech Notes");
        assert_eq!(article.username, "gh_abc");
        assert_eq!(article.cover, "https://img/cover.jpg");
        assert_eq!(article.copyright_stat, 1);
        assert_eq!(article.read_num, Some(42));
        assert_eq!(article.like_num, None);
        assert!(article.html.contains(r#"<img src="https://x/y.png">"#));
        assert_eq!(article.content, "Body text");
        assert_eq!(article.link, URL);
    }

    #[test]
    fn title_falls_back_to_title_element() {
        let article = parsed(&page("", "<p>x</p>"));
        assert_eq!(article.title, "Fallback");
    }

    #[test]
    fn legacy_single_quoted_title() {
        let article = parsed(&page("var msg_title = 'Old &amp; New'.html(false);", ""));
        assert_eq!(article.title, "Old & New");
    }

    #[test]
    fn malformed_counter_is_zero() {
        let article = parsed(&page(r#"var readNum = "10w+";"#, ""));
        assert_eq!(article.read_num, Some(0));
    }

    #[test]
    fn publish_time_formats() {
        assert_eq!(parse_publish_time("1700000000"), 1_700_000_000);
        assert_eq!(parse_publish_time("not a time"), 0);
        assert_eq!(parse_publish_time(""), 0);

        let expected = Local
            .from_local_datetime(
                &NaiveDateTime::parse_from_str("2023-11-15 06:13:20", "%Y-%m-%d %H:%M:%S")
                    .unwrap(),
            )
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(parse_publish_time("2023-11-15 06:13:20"), expected);
    }

    #[test]
    fn invalid_marker_skips_extraction() {
        let page = page(r#"var msg_title = "Gone";"#, "<p>此内容已被发布者删除</p>");

        let result = parse_article(URL, &page).unwrap();
        assert_eq!(
            result,
            ArticlePage::Invalid(ArticleKey::new("MzA5", "2650", "1"))
        );
    }

    #[test]
    fn short_link_key_from_page_variables() {
        let page = page(
            r#"var biz = "" || "MzA5";
               var mid = "" || "2650";
               var idx = "" || "2";"#,
            "",
        );

        let result =
            parse_article("https://mp.weixin.qq.com/s/AbCdEfGhIjKlMnOpQrStUv", &page).unwrap();
        assert_eq!(result.key(), &ArticleKey::new("MzA5", "2650", "2"));
    }

    #[test]
    fn invalid_short_link_without_variables() {
        let page = r#"<div class="global_error_msg">此内容已被发布者删除</div>"#;

        let result =
            parse_article("https://mp.weixin.qq.com/s/AbCdEfGhIjKlMnOpQrStUv", page).unwrap();
        assert_eq!(result, ArticlePage::Invalid(ArticleKey::default()));
    }

    #[test]
    fn missing_key_is_error() {
        let result = parse_article("https://mp.weixin.qq.com/s/AbCdEfGhIjKlMnOpQrStUv", "<html>");
        assert!(matches!(result, Err(RuleError::Parse(_))));
    }

    #[test]
    fn key_from_legacy_link() {
        let key = key_from_url(
            "https://mp.weixin.qq.com/mp/appmsg/show?__biz=MzA5&appmsgid=100&itemidx=3",
        );
        assert_eq!(key, ArticleKey::new("MzA5", "100", "3"));
        assert_eq!(key_from_url("not a url"), ArticleKey::default());
    }
}
