//! Local endpoints called by the injected scripts.

use serde::Deserialize;
use tracing::info;
use url::Url;
use wxbackup_storage::NewProfile;

use super::{now_secs, ContentRule, RuleContext, RulePredicate, UrlMatch};
use crate::error::RuleError;
use crate::exchange::Exchange;
use crate::pipeline::Record;

/// Landing page of a publisher's history.
fn history_url(biz: &str) -> String {
    format!("https://mp.weixin.qq.com/mp/profile_ext?action=home&__biz={biz}&scene=124#wechat_redirect")
}

fn reply_ok(exchange: &mut Exchange) {
    exchange.set_response_body("ok");
    exchange.set_header("content-type", "text/plain; charset=utf-8");
}

/// `GET /wx/profiles/next_link`: the history page of the profile visited
/// longest ago, as `{"data": url}`, or `{"data": null}` when every profile
/// was visited within the revisit interval.
pub struct NextLinkRule {
    ctx: RuleContext,
    predicate: RulePredicate,
}

impl NextLinkRule {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            predicate: RulePredicate::get(UrlMatch::contains("/wx/profiles/next_link")),
        }
    }
}

impl ContentRule for NextLinkRule {
    fn name(&self) -> &'static str {
        "next_link"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let interval = i64::try_from(self.ctx.revisit_interval.as_secs()).unwrap_or(i64::MAX);
        let opened_before = now_secs().saturating_sub(interval);

        let link = self
            .ctx
            .db
            .next_profile_to_visit(opened_before)?
            .map(|profile| history_url(&profile.biz));
        info!(link = link.as_deref().unwrap_or("none"), "Next history link");

        let body = serde_json::to_vec(&serde_json::json!({ "data": link }))?;
        exchange.set_response_body(body);
        exchange.set_header("content-type", "application/json");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirstPost {
    link: String,
    /// Unix milliseconds.
    #[serde(default)]
    publish_at: i64,
}

/// `POST /wx/profiles/first_post`: records the oldest article seen at the end
/// of a history page as the publisher's first publish time.
pub struct FirstPostRule {
    ctx: RuleContext,
    predicate: RulePredicate,
}

impl FirstPostRule {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            predicate: RulePredicate::post(UrlMatch::contains("/wx/profiles/first_post")),
        }
    }
}

impl ContentRule for FirstPostRule {
    fn name(&self) -> &'static str {
        "first_post"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let post: FirstPost = serde_json::from_slice(exchange.request_body())?;
        let link = Url::parse(&post.link)?;
        let biz = link
            .query_pairs()
            .find(|(name, _)| name == "__biz")
            .map(|(_, value)| value.into_owned())
            .filter(|biz| !biz.is_empty())
            .ok_or_else(|| RuleError::Parse(format!("first_post link without __biz: {link}")))?;

        let mut profile = NewProfile::new(biz.clone());
        profile.first_publish_at = post.publish_at / 1000;
        self.ctx.pipeline.submit(Record::Profile(profile))?;
        info!(biz = %biz, first_publish_at = post.publish_at / 1000, "First post recorded");

        reply_ok(exchange);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FrontendMessage {
    #[serde(default)]
    message: String,
}

/// `POST /wx/front_end_logger`: logs a message from an injected script.
pub struct FrontendLoggerRule {
    predicate: RulePredicate,
}

impl FrontendLoggerRule {
    pub fn new() -> Self {
        Self {
            predicate: RulePredicate::post(UrlMatch::contains("/wx/front_end_logger")),
        }
    }
}

impl Default for FrontendLoggerRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRule for FrontendLoggerRule {
    fn name(&self) -> &'static str {
        "front_end_logger"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let message: FrontendMessage = serde_json::from_slice(exchange.request_body())?;
        info!(target: "wxbackup::frontend", "{}", message.message);
        reply_ok(exchange);
        Ok(())
    }
}
