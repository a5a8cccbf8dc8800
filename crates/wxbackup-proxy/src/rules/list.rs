use tracing::debug;
use wxbackup_storage::NewProfile;

use super::{ContentRule, RuleContext, RulePredicate, UrlMatch};
use crate::error::RuleError;
use crate::exchange::Exchange;
use crate::extract::{parse_general_msg_list, ListStats};
use crate::pipeline::Record;

/// Paginated history (`action=getmsg`): stores listed articles. The last page
/// also fixes the publisher's first publish time.
pub struct MsgListRule {
    ctx: RuleContext,
    predicate: RulePredicate,
}

impl MsgListRule {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            predicate: RulePredicate::get(UrlMatch::all_of(&["/mp/profile_ext", "action=getmsg"])),
        }
    }
}

impl ContentRule for MsgListRule {
    fn name(&self) -> &'static str {
        "msg_list"
    }

    fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    fn handle(&self, exchange: &mut Exchange) -> Result<(), RuleError> {
        let list = parse_general_msg_list(&exchange.response_text())?;
        debug!(
            articles = list.summaries.len(),
            can_continue = list.can_continue,
            "Captured history page"
        );

        for summary in &list.summaries {
            self.ctx
                .pipeline
                .submit(Record::Article(summary.to_new_article()))?;
        }

        let Some(biz) = list.summaries.first().map(|s| s.key.biz.clone()) else {
            return Ok(());
        };
        let stats = ListStats::from_summaries(&list.summaries);

        let mut profile = NewProfile::new(biz);
        profile.latest_publish_at = stats.latest_publish_at;
        if !list.can_continue {
            profile.first_publish_at = stats.oldest_publish_at;
        }
        self.ctx.pipeline.submit(Record::Profile(profile))?;

        Ok(())
    }
}
