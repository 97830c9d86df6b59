use crate::actions::{Action, ActionContext, CycleSummary, DISPATCH_ACTION};
use crate::logging::ndjson::RelayEvent;
use crate::store::Direction;
use anyhow::Result;
use serde_json::json;

/// Turns unprocessed inbound rows into activations of the consumer each row names.
pub struct Dispatch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: Vec<i64>,
    /// Rows addressed to a consumer with no slot yet. They stay unprocessed.
    pub waiting: Vec<i64>,
}

impl Action for Dispatch {
    fn name(&self) -> &'static str {
        DISPATCH_ACTION
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<CycleSummary> {
        let report = dispatch_inbound(ctx)?;
        Ok(CycleSummary {
            action: DISPATCH_ACTION,
            handled: report.dispatched.len(),
            detail: json!({
                "dispatched": report.dispatched,
                "waiting": report.waiting
            }),
        })
    }
}

/// One dispatch cycle.
///
/// Payload write, activation and the processed mark are three separate statements.
/// A crash between them re-activates the consumer on the next cycle, so delivery is
/// at least once and consumers dedupe by `message_id`.
pub fn dispatch_inbound(ctx: &ActionContext<'_>) -> Result<DispatchReport> {
    let store = ctx.store;
    let mut report = DispatchReport::default();

    for row in store.unprocessed(Direction::Inbound)? {
        if !store.set_action_payload(&row.action, row.payload.as_deref())? {
            tracing::warn!(
                message_id = row.message_id,
                action = %row.action,
                "no activation slot for consumer; message left for a later cycle"
            );
            report.waiting.push(row.message_id);
            continue;
        }
        store.activate_action(&row.action)?;
        store.mark_processed(row.message_id)?;

        tracing::info!(message_id = row.message_id, action = %row.action, "dispatched message");
        ctx.record(RelayEvent {
            event: "message_dispatched",
            action: DISPATCH_ACTION,
            message_id: Some(row.message_id),
            detail: json!({ "consumer": row.action }),
        })?;
        report.dispatched.push(row.message_id);
    }

    Ok(report)
}
