use tracing::{debug, warn};
use wxbackup_storage::NewProfile;

use super::{now_secs, script, ContentRule, RuleContext, RulePredicate, UrlMatch};
use crate::error::RuleError;
use crate::exchange::Exchange;
use crate::extract::{parse_inline_msg_list, parse_profile_page, ListStats};
use crate::pipeline::Record;

/// Publisher history page: stores the profile and its listed articles, then
/// injects the auto-advance script.
pub struct ProfileRule {
    ctx: RuleContext,
    predicate: RulePredicate,
}

impl ProfileRule {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            predicate: RulePredicate::get(UrlMatch::all_of(&["/mp/profile_ext", "action=home"])),
        }
    }

    /// Scroll limit for the injected script, Unix milliseconds.
    ///
    /// Profiles whose first article is known only need the recent window;
    /// others are scrolled to the beginning.
    fn min_time_ms(&self, biz: &str) -> Result<i64, RuleError> {
        let known = self
            .ctx
            .db
            .get_profile(biz)?
            .is_some_and(|p| p.first_publish_at > 0);
        if !known {
            return Ok(0);
        }
        let window = i64::try_from(self.ctx.scripts.history_window.as_secs()).unwrap_or(i64::MAX);
        Ok(now_secs().saturating_sub(window).saturating_mul(1000))
    }
}

impl ContentRule for ProfileRule {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let text = exchange.response_text().into_owned();
        let page = parse_profile_page(&text);

        let summaries = page
            .msg_list
            .as_deref()
            .map(parse_inline_msg_list)
            .transpose();

        let stats = summaries
            .as_ref()
            .ok()
            .and_then(|s| s.as_deref())
            .map(ListStats::from_summaries)
            .unwrap_or_default();

        let min_time_ms = if page.biz.is_empty() {
            warn!(url = %exchange.url(), "Profile page without __biz, profile not stored");
            0
        } else {
            // Needs the stored profile as it was before this visit.
            let min_time_ms = self.min_time_ms(&page.biz)?;
            self.ctx.pipeline.submit(Record::Profile(NewProfile {
                biz: page.biz.clone(),
                title: page.title.clone(),
                headimg: page.headimg.clone(),
                username: page.username.clone(),
                description: page.description.clone(),
                max_day_pub_count: stats.max_day_count,
                opened_history_at: Some(now_secs()),
                first_publish_at: 0,
                latest_publish_at: stats.latest_publish_at,
            }))?;
            min_time_ms
        };

        let summaries = summaries?.unwrap_or_default();
        debug!(biz = %page.biz, articles = summaries.len(), "Captured profile page");
        for summary in &summaries {
            self.ctx
                .pipeline
                .submit(Record::Article(summary.to_new_article()))?;
        }

        if page.invalid {
            warn!(biz = %page.biz, "Account is no longer available, skipping script");
            return Ok(());
        }

        let script = self.ctx.scripts.profile_script(min_time_ms);
        exchange.set_response_body(script::inject(&text, &script));
        exchange.set_header("content-type", "text/html; charset=utf-8");
        Ok(())
    }
}
