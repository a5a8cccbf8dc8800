//! Content rules and their dispatch.
//!
//! A [`ContentRule`] pairs a [`RulePredicate`] over method and URL with a
//! handler that reads an [`Exchange`], submits extracted records and may
//! rewrite the response. The [`RuleEngine`] runs every matching rule in
//! registration order and stops at the first handler error.
//!
//! ## Default rules
//!
//! | Rule | Matches |
//! |------|---------|
//! | `profile` | `GET /mp/profile_ext?action=home` |
//! | `msg_list` | `GET /mp/profile_ext?action=getmsg` |
//! | `article` | `GET /s?__biz=...`, `/mp/appmsg/show`, `/s/<22-char token>` |
//! | `next_link` | `GET /wx/profiles/next_link` |
//! | `first_post` | `POST /wx/profiles/first_post` |
//! | `front_end_logger` | `POST /wx/front_end_logger` |

mod article;
mod endpoints;
mod list;
mod profile;
pub mod script;

use std::sync::Arc;
use std::time::Duration;

use hyper::Method;
use regex::Regex;
use tracing::debug;
use wxbackup_storage::Database;

use crate::error::RuleError;
use crate::exchange::Exchange;
use crate::pipeline::IngestPipeline;

pub use article::ArticleRule;
pub use endpoints::{FirstPostRule, FrontendLoggerRule, NextLinkRule};
pub use list::MsgListRule;
pub use profile::ProfileRule;
pub use script::ScriptConfig;

/// Default interval before a profile is revisited by `next_link`.
pub const DEFAULT_REVISIT_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// URL condition of a rule.
#[derive(Debug, Clone)]
pub enum UrlMatch {
    /// The URL contains the substring.
    Contains(String),
    /// The URL contains every substring.
    AllOf(Vec<String>),
    /// Any of the nested conditions holds.
    AnyOf(Vec<UrlMatch>),
    /// The URL matches the regex.
    Pattern(Regex),
}

impl UrlMatch {
    /// Substring condition.
    pub fn contains(needle: &str) -> Self {
        UrlMatch::Contains(needle.to_string())
    }

    /// Conjunction of substrings.
    pub fn all_of(needles: &[&str]) -> Self {
        UrlMatch::AllOf(needles.iter().map(|n| n.to_string()).collect())
    }

    /// Regex condition. Patterns are constants; an invalid one is a bug.
    pub fn pattern(pattern: &str) -> Self {
        UrlMatch::Pattern(Regex::new(pattern).expect("Invalid regex pattern"))
    }

    /// Checks the condition against a URL.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatch::Contains(needle) => url.contains(needle.as_str()),
            UrlMatch::AllOf(needles) => needles.iter().all(|n| url.contains(n.as_str())),
            UrlMatch::AnyOf(conditions) => conditions.iter().any(|c| c.matches(url)),
            UrlMatch::Pattern(re) => re.is_match(url),
        }
    }
}

/// Match condition of a rule: a URL condition and an optional method.
#[derive(Debug, Clone)]
pub struct RulePredicate {
    pub url: UrlMatch,
    pub method: Option<Method>,
}

impl RulePredicate {
    /// Matches any method.
    pub fn any_method(url: UrlMatch) -> Self {
        Self { url, method: None }
    }

    /// Matches GET requests.
    pub fn get(url: UrlMatch) -> Self {
        Self {
            url,
            method: Some(Method::GET),
        }
    }

    /// Matches POST requests.
    pub fn post(url: UrlMatch) -> Self {
        Self {
            url,
            method: Some(Method::POST),
        }
    }

    /// Checks the predicate.
    pub fn matches(&self, method: &Method, url: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.url.matches(url)
    }
}

/// A content rule.
pub trait ContentRule: Send + Sync {
    /// Rule name used in logs.
    fn name(&self) -> &'static str;

    /// When the rule applies.
    fn predicate(&self) -> &RulePredicate;

    /// Handles a matching exchange.
    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError>;
}

/// Collaborators shared by the default rules.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub db: Database,
    pub pipeline: Arc<IngestPipeline>,
    pub scripts: ScriptConfig,
    /// How long a visited profile waits before `next_link` offers it again.
    pub revisit_interval: Duration,
}

impl RuleContext {
    /// Creates a context with default script and revisit settings.
    pub fn new(db: Database, pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            db,
            pipeline,
            scripts: ScriptConfig::default(),
            revisit_interval: DEFAULT_REVISIT_INTERVAL,
        }
    }

    /// Sets the script settings.
    pub fn with_scripts(mut self, scripts: ScriptConfig) -> Self {
        self.scripts = scripts;
        self
    }

    /// Sets the revisit interval.
    pub fn with_revisit_interval(mut self, interval: Duration) -> Self {
        self.revisit_interval = interval;
        self
    }
}

/// Ordered collection of content rules.
#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<Arc<dyn ContentRule>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.names())
            .finish()
    }
}

impl RuleEngine {
    /// Creates an engine without rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with the default rules.
    pub fn with_defaults(ctx: RuleContext) -> Self {
        let mut engine = Self::new();
        engine.register(Arc::new(ProfileRule::new(ctx.clone())));
        engine.register(Arc::new(MsgListRule::new(ctx.clone())));
        engine.register(Arc::new(ArticleRule::new(ctx.clone())));
        engine.register(Arc::new(NextLinkRule::new(ctx.clone())));
        engine.register(Arc::new(FirstPostRule::new(ctx)));
        engine.register(Arc::new(FrontendLoggerRule::new()));
        engine
    }

    /// Appends a rule; it runs after every rule registered before it.
    pub fn register(&mut self, rule: Arc<dyn ContentRule>) {
        self.rules.push(rule);
    }

    /// Registered rule names, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if any rule applies to the request.
    pub fn matches_any(&self, method: &Method, url: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.predicate().matches(method, url))
    }

    /// Runs every matching rule in order.
    ///
    /// Returns how many rules ran. The first handler error is returned and
    /// the remaining rules are skipped.
    pub fn handle(&self, exchange: &mut Exchange) -> Result<usize, RuleError> {
        let mut handled = 0;
        for rule in &self.rules {
            if !rule.predicate().matches(exchange.method(), exchange.url()) {
                continue;
            }
            debug!(rule = rule.name(), url = %exchange.url(), "Dispatching exchange");
            rule.handle(exchange)?;
            handled += 1;
        }
        Ok(handled)
    }
}

/// Current time as Unix seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PendingRequest;
    use hyper::body::Bytes;
    use hyper::HeaderMap;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        predicate: RulePredicate,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ContentRule for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn predicate(&self) -> &RulePredicate {
            &self.predicate
        }

        fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(RuleError::Parse(format!("{} failed", self.name)));
            }
            exchange.set_response_body(self.name);
            Ok(())
        }
    }

    fn rule(
        name: &'static str,
        needle: &str,
        fail: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ContentRule> {
        Arc::new(Recording {
            name,
            predicate: RulePredicate::any_method(UrlMatch::contains(needle)),
            fail,
            log: Arc::clone(log),
        })
    }

    fn exchange(method: Method, url: &str) -> Exchange {
        PendingRequest::new(method, url, &HeaderMap::new(), Bytes::new()).complete(Vec::new())
    }

    #[test]
    fn matching_rules_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RuleEngine::new();
        engine.register(rule("first", "/mp/", false, &log));
        engine.register(rule("other", "/nope", false, &log));
        engine.register(rule("second", "profile_ext", false, &log));

        let mut ex = exchange(Method::GET, "https://mp.weixin.qq.com/mp/profile_ext");
        assert_eq!(engine.handle(&mut ex).unwrap(), 2);

        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(ex.response_body(), b"second");
    }

    #[test]
    fn first_error_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RuleEngine::new();
        engine.register(rule("failing", "/mp/", true, &log));
        engine.register(rule("never", "/mp/", false, &log));

        let mut ex = exchange(Method::GET, "https://mp.weixin.qq.com/mp/x");
        assert!(matches!(engine.handle(&mut ex), Err(RuleError::Parse(_))));

        assert_eq!(*log.lock(), vec!["failing"]);
        assert!(!ex.body_replaced());
    }

    #[test]
    fn no_match_runs_nothing() {
        let engine = RuleEngine::new();
        let mut ex = exchange(Method::GET, "https://example.com/");
        assert_eq!(engine.handle(&mut ex).unwrap(), 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn predicate_method_constraint() {
        let predicate = RulePredicate::post(UrlMatch::contains("/wx/front_end_logger"));
        assert!(predicate.matches(&Method::POST, "https://mp.weixin.qq.com/wx/front_end_logger"));
        assert!(!predicate.matches(&Method::GET, "https://mp.weixin.qq.com/wx/front_end_logger"));
    }

    #[test]
    fn url_match_combinators() {
        let any = UrlMatch::AnyOf(vec![
            UrlMatch::all_of(&["mp.weixin.qq.com", "/s?__biz"]),
            UrlMatch::pattern(r"/s/[\w-]{22}(?:[?#]|$)"),
        ]);

        assert!(any.matches("https://mp.weixin.qq.com/s?__biz=MzA&mid=1"));
        assert!(any.matches("https://mp.weixin.qq.com/s/AbCdEfGhIjKlMnOpQrStUv"));
        assert!(!any.matches("https://mp.weixin.qq.com/s/short"));
        assert!(!any.matches("https://example.com/s?x=1"));
    }
}
