//! Auto-advance scripts injected into captured pages.
//!
//! The history page script scrolls until it reaches articles older than the
//! history window (or the end of the history), reports the oldest article
//! through `first_post`, then asks `next_link` where to go. The article page
//! script only asks `next_link` after the jump interval.

use std::time::Duration;

const PROFILE_SCRIPT: &str = include_str!("../../assets/profile_script.html");
const ARTICLE_SCRIPT: &str = include_str!("../../assets/article_script.html");

const HEAD_TRAP: &str = "<!--headTrap<body></body><head></head><html></html>-->";
const TAIL_TRAP: &str = "<!--tailTrap<body></body><head></head><html></html>-->";

/// Default delay before the page moves on.
pub const DEFAULT_JUMP_INTERVAL: Duration = Duration::from_secs(8);

/// Default history window scrolled on already known profiles.
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Script settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptConfig {
    /// Delay before the page asks for the next link.
    pub jump_interval: Duration,
    /// How far back the history page is scrolled for profiles whose first
    /// article is already known.
    pub history_window: Duration,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            jump_interval: DEFAULT_JUMP_INTERVAL,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl ScriptConfig {
    /// Sets the jump interval.
    pub fn with_jump_interval(mut self, interval: Duration) -> Self {
        self.jump_interval = interval;
        self
    }

    /// Sets the history window.
    pub fn with_history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    /// History page script that stops scrolling at `min_time_ms`
    /// (Unix milliseconds; 0 scrolls the whole history).
    pub fn profile_script(&self, min_time_ms: i64) -> String {
        PROFILE_SCRIPT
            .replace("{{JUMP_INTERVAL}}", &self.jump_interval.as_secs().to_string())
            .replace("{{JUMP_MIN_TIME}}", &min_time_ms.to_string())
    }

    /// Article page script.
    pub fn article_script(&self) -> String {
        ARTICLE_SCRIPT.replace("{{JUMP_INTERVAL}}", &self.jump_interval.as_secs().to_string())
    }
}

/// Removes the comment traps the platform plants around the document and
/// inserts `script` before the last `</body>`, or appends it.
pub fn inject(page: &str, script: &str) -> String {
    let page = page.replace(HEAD_TRAP, "").replace(TAIL_TRAP, "");

    match page.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(page.len() + script.len());
            out.push_str(&page[..pos]);
            out.push_str(script);
            out.push_str(&page[pos..]);
            out
        }
        None => page + script,
    }
}
