//! HTML entity decoding and article body cleaning.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Node, Selector};

/// Elements that end a line of plain text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "blockquote", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6",
];

static DECODE_CARRIER: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span").expect("Invalid selector"));

static STYLE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s+style\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("Invalid regex pattern")
});

static DATA_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s+data-([\w-]+)\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("Invalid regex pattern")
});

static LAZY_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(img|iframe|video|audio)\b[^>]*?\sdata-src\s*=\s*"([^"]*)"[^>]*>"#)
        .expect("Invalid regex pattern")
});

static MPVOICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<mpvoice\b[^>]*?\svoice_encode_fileid\s*=\s*"([^"]*)"[^>]*>(?:\s*</mpvoice>)?"#,
    )
    .expect("Invalid regex pattern")
});

static EMPTY_P: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<p\b[^>]*>\s*</p>").expect("Invalid regex pattern"));

static EMPTY_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<span\b[^>]*>\s*</span>").expect("Invalid regex pattern"));

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid regex pattern"));

static BODY_OPENERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"<div class="rich_media_content " id="js_content"[^>]*>"#,
        r#"<div class="rich_media_content[^"]*" id="js_content"[^>]*>"#,
        r#"<div\b[^>]*\bid="js_content"[^>]*>"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex pattern"))
    .collect()
});

static DIV_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?div\b[^>]*>").expect("Invalid regex pattern"));

/// Decodes HTML entities in a single pass.
///
/// The text is decoded by html5ever as an attribute value, so literal markup
/// stays as written and every named or numeric reference HTML knows is
/// resolved. `&nbsp;` becomes a plain space. Unknown entities are kept.
pub fn unescape(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let carrier = format!(r#"<span title="{}"></span>"#, input.replace('"', "&quot;"));
    let fragment = Html::parse_fragment(&carrier);
    fragment
        .select(&DECODE_CARRIER)
        .next()
        .and_then(|span| span.value().attr("title"))
        .map(|decoded| decoded.replace('\u{a0}', " "))
        .unwrap_or_else(|| input.to_string())
}

/// Locates the article body container and returns its inner HTML.
///
/// The closing tag is found by balancing nested `div`s; if they never
/// balance, the body ends at the first `</div>`.
pub fn locate_body(page: &str) -> Option<&str> {
    let opener = BODY_OPENERS.iter().find_map(|re| re.find(page))?;
    let start = opener.end();

    let mut depth = 1usize;
    for tag in DIV_TAG.find_iter(&page[start..]) {
        if tag.as_str().starts_with("</") {
            depth -= 1;
            if depth == 0 {
                return Some(&page[start..start + tag.start()]);
            }
        } else {
            depth += 1;
        }
    }

    let end = page[start..]
        .find("</div>")
        .map(|i| start + i)
        .unwrap_or(page.len());
    Some(&page[start..end])
}

/// Extracts and cleans the article body; empty when there is no container.
pub fn extract_body(page: &str) -> String {
    locate_body(page).map(clean_content).unwrap_or_default()
}

/// Normalizes article body HTML.
///
/// Strips inline styles and `data-*` attributes other than `data-src`,
/// promotes lazy-load sources of images, frames, video and audio to `src`,
/// turns voice messages into audio placeholders, decodes entities, drops
/// empty paragraphs and spans, collapses horizontal whitespace and trims.
pub fn clean_content(body: &str) -> String {
    let html = STYLE_ATTR.replace_all(body, "");

    let html = DATA_ATTR.replace_all(&html, |caps: &Captures| {
        if &caps[1] == "src" {
            caps[0].to_string()
        } else {
            String::new()
        }
    });

    let html = LAZY_MEDIA.replace_all(&html, |caps: &Captures| match &caps[1] {
        "img" => format!(r#"<img src="{}">"#, &caps[2]),
        "iframe" => format!(r#"<iframe src="{}">"#, &caps[2]),
        tag => format!(r#"<{} src="{}" controls>"#, tag, &caps[2]),
    });

    let html = MPVOICE.replace_all(&html, r#"<audio data-voice-id="$1" controls></audio>"#);

    let mut html = unescape(&html);

    // Removing one empty element can empty its parent.
    loop {
        let stripped = {
            let without_p = EMPTY_P.replace_all(&html, "");
            EMPTY_SPAN.replace_all(&without_p, "").into_owned()
        };
        if stripped == html {
            break;
        }
        html = stripped;
    }

    HORIZONTAL_SPACE
        .replace_all(&html, " ")
        .trim()
        .to_string()
}

/// Converts cleaned body HTML into plain text, one block per line.
pub fn to_plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();
    collect_text(fragment.root_element(), &mut text);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => match el.name() {
                "br" => out.push('\n'),
                "script" | "style" => {}
                name => {
                    if let Some(child) = ElementRef::wrap(child) {
                        collect_text(child, out);
                    }
                    if BLOCK_ELEMENTS.contains(&name) {
                        out.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_named_and_numeric() {
        assert_eq!(unescape("a &lt;b&gt; &amp; &quot;c&quot;"), "a <b> & \"c\"");
        assert_eq!(unescape("&#39;x&#x27;"), "'x'");
        assert_eq!(unescape("a&nbsp;b"), "a b");
    }

    #[test]
    fn unescape_resolves_full_entity_table() {
        assert_eq!(unescape("a&emsp;b&ensp;c"), "a\u{2003}b\u{2002}c");
        assert_eq!(unescape("2&times;3"), "2\u{d7}3");
    }

    #[test]
    fn unescape_keeps_literal_markup() {
        assert_eq!(unescape(r#"<b class="x">&amp;</b>"#), r#"<b class="x">&</b>"#);
    }

    #[test]
    fn unescape_is_single_pass() {
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }

    #[test]
    fn unescape_keeps_unknown_entities() {
        assert_eq!(unescape("AT&T &bogus; &"), "AT&T &bogus; &");
        assert_eq!(unescape("&#xZZ;"), "&#xZZ;");
    }

    #[test]
    fn unescape_handles_multibyte_text() {
        assert_eq!(unescape("中文&amp;字"), "中文&字");
        assert_eq!(unescape("&中文字符串很长很长很长"), "&中文字符串很长很长很长");
    }

    #[test]
    fn locate_body_balances_nested_divs() {
        let page = r#"<div class="rich_media_content " id="js_content" style="visibility: hidden;"><div><p>a</p></div><p>b</p></div><div id="after"></div>"#;
        assert_eq!(
            locate_body(page),
            Some("<div><p>a</p></div><p>b</p>")
        );
    }

    #[test]
    fn locate_body_tolerates_extra_classes() {
        let page = r#"<div class="rich_media_content js_underline_content autoTypeSetting24psection" id="js_content"><p>x</p></div>"#;
        assert_eq!(locate_body(page), Some("<p>x</p>"));
    }

    #[test]
    fn locate_body_missing_container() {
        assert_eq!(locate_body("<div id=\"other\"></div>"), None);
        assert_eq!(extract_body("<html></html>"), "");
    }

    #[test]
    fn clean_strips_style_and_data_attributes() {
        let body = r#"<p style="color: red;" data-tools="x" data-id='1'>hi</p>"#;
        assert_eq!(clean_content(body), "<p>hi</p>");
    }

    #[test]
    fn clean_promotes_lazy_image() {
        let body = r#"<img class="rich_pages" data-ratio="0.5" data-src="https://x/y.png" data-type="png" style="width: 100%;">"#;
        assert_eq!(clean_content(body), r#"<img src="https://x/y.png">"#);
    }

    #[test]
    fn clean_promotes_lazy_iframe_and_video() {
        let body = r#"<iframe class="video_iframe" data-src="https://v.qq.com/x"></iframe><video data-src="https://v/1.mp4"></video>"#;
        assert_eq!(
            clean_content(body),
            r#"<iframe src="https://v.qq.com/x"></iframe><video src="https://v/1.mp4" controls></video>"#
        );
    }

    #[test]
    fn clean_rewrites_voice() {
        let body = r#"<mpvoice frameborder="0" class="res_iframe" voice_encode_fileid="MzA_123" name="clip"></mpvoice>"#;
        assert_eq!(
            clean_content(body),
            r#"<audio data-voice-id="MzA_123" controls></audio>"#
        );
    }

    #[test]
    fn clean_drops_nested_empty_elements() {
        let body = "<p><span> </span></p><p>text</p><span></span>";
        assert_eq!(clean_content(body), "<p>text</p>");
    }

    #[test]
    fn clean_collapses_horizontal_space_keeps_newlines() {
        let body = "  <p>a  \t b</p>\n<p>c&nbsp;&nbsp;d</p>  ";
        assert_eq!(clean_content(body), "<p>a b</p>\n<p>c d</p>");
    }

    #[test]
    fn clean_decodes_wide_spaces() {
        assert_eq!(
            clean_content("<p>缩进&emsp;&emsp;正文</p>"),
            "<p>缩进\u{2003}\u{2003}正文</p>"
        );
    }

    #[test]
    fn locate_body_unbalanced_container_ends_at_first_close() {
        let page = r#"<div class="rich_media_content " id="js_content"><section><div>a</div>tail"#;
        assert_eq!(locate_body(page), Some("<section><div>a"));
    }

    #[test]
    fn locate_body_without_closing_tag_runs_to_end() {
        let page = r#"<div id="js_content"><p>b"#;
        assert_eq!(locate_body(page), Some("<p>b"));
        assert_eq!(extract_body(page), "<p>b");
    }

    #[test]
    fn locate_body_marker_only() {
        let page = r#"<div class="rich_media_content " id="js_content">"#;
        assert_eq!(locate_body(page), Some(""));
        assert_eq!(extract_body(page), "");
        assert_eq!(to_plain_text(&extract_body(page)), "");
    }

    #[test]
    fn clean_is_total_on_malformed_markup() {
        let body = r#"<p style="color: red">open <span data-x="1">never closed"#;
        assert_eq!(clean_content(body), "<p>open <span>never closed");
        assert_eq!(to_plain_text(&clean_content(body)), "open never closed");
    }

    #[test]
    fn clean_is_total_on_empty_input() {
        assert_eq!(clean_content(""), "");
    }

    #[test]
    fn plain_text_one_block_per_line() {
        let html = "<p>first <strong>bold</strong></p><p>second<br>third</p><img src=\"x\">";
        assert_eq!(to_plain_text(html), "first bold\nsecond\nthird");
    }

    #[test]
    fn plain_text_keeps_decoded_angle_brackets() {
        let html = clean_content("<p>1 &lt; 2 and 3 &gt; 2</p><p>next</p>");
        assert_eq!(to_plain_text(&html), "1 < 2 and 3 > 2\nnext");
    }

    #[test]
    fn plain_text_skips_scripts() {
        assert_eq!(to_plain_text("<p>a</p><script>var x = 1;</script>"), "a");
    }
}
