use tracing::{debug, info, warn};

use super::{script, ContentRule, RuleContext, RulePredicate, UrlMatch};
use crate::error::RuleError;
use crate::exchange::Exchange;
use crate::extract::{parse_article, ArticlePage};
use crate::pipeline::Record;

/// Article page: stores the article, or marks it failed when the page shows
/// it was removed, then injects the auto-advance script.
pub struct ArticleRule {
    ctx: RuleContext,
    predicate: RulePredicate,
}

impl ArticleRule {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            predicate: RulePredicate::get(UrlMatch::AnyOf(vec![
                UrlMatch::pattern(r"mp\.weixin\.qq\.com(?::\d+)?/s\?(?:[^#]*&)?__biz="),
                UrlMatch::contains("/mp/appmsg/show"),
                UrlMatch::pattern(r"mp\.weixin\.qq\.com(?::\d+)?/s/[\w-]{22}(?:[?#]|$)"),
            ])),
        }
    }
}

impl ContentRule for ArticleRule {
    fn name(&self) -> &'static str {
        "article"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let text = exchange.response_text().into_owned();

        match parse_article(exchange.url(), &text)? {
            ArticlePage::Invalid(key) if key.is_complete() => {
                info!(key = %key, "Article is unavailable, marking failed");
                self.ctx.pipeline.submit(Record::ArticleFailed(key))?;
            }
            ArticlePage::Invalid(_) => {
                warn!(url = %exchange.url(), "Unavailable article without a key, nothing stored");
            }
            ArticlePage::Parsed(article) => {
                debug!(key = %article.key, title = %article.title, "Captured article");
                self.ctx.pipeline.submit(Record::Article(article))?;
            }
        }

        let script = self.ctx.scripts.article_script();
        exchange.set_response_body(script::inject(&text, &script));
        exchange.set_header("content-type", "text/html; charset=utf-8");
        Ok(())
    }
}
