//! Field extraction from platform pages.
//!
//! Pages are semi-structured: values live in inline script assignments whose
//! quoting and escaping changed over the years. Each field is described by a
//! [`FieldCascade`], an ordered list of patterns tried until one captures a
//! non-empty value. A field no pattern resolves yields its empty value; it is
//! never an error.

pub mod article;
pub mod html;
pub mod list;
pub mod profile;

use regex::Regex;

pub use article::{parse_article, ArticlePage, INVALID_ARTICLE_MARKERS};
pub use list::{
    parse_general_msg_list, parse_inline_msg_list, ArticleSummary, GeneralMsgList, ListStats,
};
pub use profile::{parse_profile_page, ProfilePage, INVALID_ACCOUNT_MARKERS};

/// What to do with a captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    /// Use capture group 1 as is.
    Verbatim,
    /// Decode HTML entities.
    Unescape,
    /// Trim surrounding whitespace.
    Trim,
    /// Decode HTML entities, then drop the given suffix.
    UnescapeStripSuffix(&'static str),
}

impl PostProcess {
    fn apply(self, raw: &str) -> String {
        match self {
            PostProcess::Verbatim => raw.to_string(),
            PostProcess::Unescape => html::unescape(raw),
            PostProcess::Trim => raw.trim().to_string(),
            PostProcess::UnescapeStripSuffix(suffix) => {
                let decoded = html::unescape(raw);
                decoded
                    .strip_suffix(suffix)
                    .map(str::to_string)
                    .unwrap_or(decoded)
            }
        }
    }
}

#[derive(Debug)]
struct Attempt {
    pattern: Regex,
    post: PostProcess,
}

/// Ordered fallback patterns for one field.
#[derive(Debug)]
pub struct FieldCascade {
    attempts: Vec<Attempt>,
}

impl FieldCascade {
    /// Builds a cascade from `(pattern, post-processing)` pairs.
    ///
    /// Patterns are compile-time constants; an invalid one is a bug.
    pub fn new(attempts: &[(&str, PostProcess)]) -> Self {
        Self {
            attempts: attempts
                .iter()
                .map(|(pattern, post)| Attempt {
                    pattern: Regex::new(pattern).expect("Invalid regex pattern"),
                    post: *post,
                })
                .collect(),
        }
    }

    /// Returns the first non-empty capture, or an empty string.
    pub fn extract(&self, text: &str) -> String {
        self.attempts
            .iter()
            .filter_map(|attempt| {
                let raw = attempt.pattern.captures(text)?.get(1)?.as_str();
                let value = attempt.post.apply(raw);
                (!value.trim().is_empty()).then_some(value)
            })
            .next()
            .unwrap_or_default()
    }

    /// Returns the first capture parsed as a base-10 integer, or zero.
    pub fn extract_i64(&self, text: &str) -> i64 {
        self.extract(text).trim().parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_cascade() -> FieldCascade {
        FieldCascade::new(&[
            (r#"var msg_title = "(.*?)";"#, PostProcess::Unescape),
            (r"<title>(.*?)</title>", PostProcess::UnescapeStripSuffix(" - 微信公众号")),
        ])
    }

    #[test]
    fn first_match_wins() {
        let page = r#"var msg_title = "Primary"; <title>Secondary</title>"#;
        assert_eq!(title_cascade().extract(page), "Primary");
    }

    #[test]
    fn empty_capture_falls_through() {
        let page = r#"var msg_title = ""; <title>Fallback - 微信公众号</title>"#;
        assert_eq!(title_cascade().extract(page), "Fallback");
    }

    #[test]
    fn unresolved_is_empty() {
        assert_eq!(title_cascade().extract("<html></html>"), "");
    }

    #[test]
    fn unescape_is_applied() {
        let page = r#"var msg_title = "Tom &amp; Jerry";"#;
        assert_eq!(title_cascade().extract(page), "Tom & Jerry");
    }

    #[test]
    fn malformed_integer_is_zero() {
        let cascade = FieldCascade::new(&[(r#"var readNum = "(.*?)";"#, PostProcess::Verbatim)]);
        assert_eq!(cascade.extract_i64(r#"var readNum = "12";"#), 12);
        assert_eq!(cascade.extract_i64(r#"var readNum = "1.2k";"#), 0);
        assert_eq!(cascade.extract_i64("nothing here"), 0);
    }

    #[test]
    fn trim_post_process() {
        let cascade = FieldCascade::new(&[(r"<p>([\s\S]+?)</p>", PostProcess::Trim)]);
        assert_eq!(cascade.extract("<p>\n  text \n</p>"), "text");
    }
}
