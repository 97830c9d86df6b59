use crate::actions::{Action, ActionContext, CycleSummary, OUTBOUND_ACTION};
use crate::error::RelayError;
use crate::logging::ndjson::RelayEvent;
use crate::store::{Direction, MessageRow};
use crate::transport::{OutboundDocument, SemaphoreProtocol};
use anyhow::Result;
use chrono::Utc;
use serde_json::json;

/// Writes unprocessed outbound rows as file pairs for the recipient to collect.
pub struct OutboundEmission;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub emitted: Vec<i64>,
}

impl Action for OutboundEmission {
    fn name(&self) -> &'static str {
        OUTBOUND_ACTION
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<CycleSummary> {
        let report = emit_outbound(ctx)?;
        Ok(CycleSummary {
            action: OUTBOUND_ACTION,
            handled: report.emitted.len(),
            detail: json!({ "emitted": report.emitted }),
        })
    }
}

pub fn emit_outbound(ctx: &ActionContext<'_>) -> Result<EmitReport> {
    emit_outbound_at(ctx, Utc::now().timestamp())
}

/// One emission cycle stamping every file with `sent` (epoch seconds).
///
/// Per row: message file, then semaphore, then the store update. A row whose files
/// could not be written stays unprocessed and is retried next cycle.
pub fn emit_outbound_at(ctx: &ActionContext<'_>, sent: i64) -> Result<EmitReport> {
    let rows = ctx.store.unprocessed(Direction::Outbound)?;
    let mut report = EmitReport::default();
    if rows.is_empty() {
        return Ok(report);
    }

    let protocol = SemaphoreProtocol::from_config(&ctx.config.file);
    let mut failures = Vec::new();
    for row in &rows {
        match emit_row(ctx, &protocol, row, sent) {
            Ok(()) => report.emitted.push(row.message_id),
            Err(e) => {
                tracing::warn!(message_id = row.message_id, error = %format!("{e:#}"), "outbound message not emitted");
                failures.push(format!("message {}: {e:#}", row.message_id));
            }
        }
    }

    if !failures.is_empty() {
        return Err(RelayError::CycleFailed {
            action: OUTBOUND_ACTION,
            failures,
        }
        .into());
    }
    Ok(report)
}

fn emit_row(
    ctx: &ActionContext<'_>,
    protocol: &SemaphoreProtocol,
    row: &MessageRow,
    sent: i64,
) -> Result<()> {
    let doc = OutboundDocument::from_row(row, sent)?;
    let encoded = doc.encode()?;
    let pair = protocol.write_pair(&ctx.config.file.outbound, &doc.base_name(), encoded.as_bytes())?;

    ctx.store.mark_sent(row.message_id, sent)?;
    tracing::info!(
        message_id = row.message_id,
        recipient = %doc.recipient,
        path = %pair.message.display(),
        "emitted outbound message"
    );
    ctx.record(RelayEvent {
        event: "message_emitted",
        action: OUTBOUND_ACTION,
        message_id: Some(row.message_id),
        detail: json!({ "base_name": pair.base_name, "sent": sent }),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing;
    use crate::store::NewOutboundMessage;
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    fn enqueue(store: &crate::store::MessageStore, id: i64, recipient: &str, payload: Value) {
        store
            .insert_outbound(&NewOutboundMessage {
                message_id: id,
                recipient: recipient.to_string(),
                sender: "Relay".to_string(),
                sender_id: id,
                action: "Consume".to_string(),
                payload,
            })
            .unwrap();
    }

    #[test]
    fn emits_pair_and_marks_row_sent() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        testing::make_dirs(&cfg);
        let store = testing::store();
        enqueue(&store, 1, "UnitTest", json!({"k": "v"}));

        let report = emit_outbound_at(&ActionContext::new(&store, &cfg), 1_700_000_500).unwrap();
        assert_eq!(report.emitted, vec![1]);

        let raw = fs::read_to_string(cfg.file.outbound.join("UnitTest_1.json")).unwrap();
        assert!(cfg.file.outbound.join("UnitTest_1.smp").exists());
        let mut doc: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["sent"], 1_700_000_500);
        doc.as_object_mut().unwrap().remove("sent");
        assert_eq!(
            doc,
            json!({
                "message_id": 1,
                "recipient": "UnitTest",
                "sender": "Relay",
                "sender_id": 1,
                "action": "Consume",
                "payload": "{\"k\": \"v\"}"
            })
        );

        let row = store.get_message(1).unwrap().unwrap();
        assert!(row.processed);
        assert_eq!(row.sent, Some(1_700_000_500));
    }

    #[test]
    fn no_rows_means_no_side_effects() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        testing::make_dirs(&cfg);
        let store = testing::store();

        let slots_before = store.list_actions().unwrap();

        let report = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap();
        assert!(report.emitted.is_empty());
        assert_eq!(fs::read_dir(&cfg.file.outbound).unwrap().count(), 0);
        assert!(
            store
                .list_messages(crate::store::MessageFilter::default())
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.list_actions().unwrap(), slots_before);
    }

    #[test]
    fn write_failure_leaves_row_unprocessed() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        let store = testing::store();
        enqueue(&store, 2, "Peer", Value::Null);

        let err = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::CycleFailed { .. })
        ));
        assert!(!store.get_message(2).unwrap().unwrap().processed);

        testing::make_dirs(&cfg);
        let report = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap();
        assert_eq!(report.emitted, vec![2]);
    }

    #[test]
    fn unsafe_recipient_fails_only_that_row() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        testing::make_dirs(&cfg);
        let store = testing::store();
        enqueue(&store, 3, "../escape", json!(1));
        enqueue(&store, 4, "Peer", json!(2));

        assert!(emit_outbound(&ActionContext::new(&store, &cfg)).is_err());
        assert!(!store.get_message(3).unwrap().unwrap().processed);
        assert!(store.get_message(4).unwrap().unwrap().processed);
        assert!(cfg.file.outbound.join("Peer_4.json").exists());
    }

    #[test]
    fn uncollected_pair_with_same_name_is_not_overwritten() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        testing::make_dirs(&cfg);
        let store = testing::store();
        let waiting = cfg.file.outbound.join("Peer_5.json");
        fs::write(&waiting, "earlier").unwrap();
        fs::write(cfg.file.outbound.join("Peer_5.smp"), "").unwrap();
        enqueue(&store, 5, "Peer", json!(5));

        let err = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap_err();
        assert!(format!("{err}").contains("uncollected pair"));
        assert!(!store.get_message(5).unwrap().unwrap().processed);
        assert_eq!(fs::read_to_string(&waiting).unwrap(), "earlier");

        // Once the recipient collects the earlier pair the row goes out.
        fs::remove_file(&waiting).unwrap();
        fs::remove_file(cfg.file.outbound.join("Peer_5.smp")).unwrap();
        let report = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap();
        assert_eq!(report.emitted, vec![5]);
        assert!(store.get_message(5).unwrap().unwrap().processed);
    }

    #[test]
    fn inbound_rows_are_not_emitted() {
        let tmp = tempdir().unwrap();
        let cfg = testing::config_in(tmp.path());
        testing::make_dirs(&cfg);
        let store = testing::store();
        store
            .insert_inbound(&crate::store::NewInboundMessage {
                message_id: 9,
                sender: "Peer".to_string(),
                sender_id: 9,
                action: "Consume".to_string(),
                payload: Value::Null,
                sent: 1,
            })
            .unwrap();

        let report = emit_outbound(&ActionContext::new(&store, &cfg)).unwrap();
        assert!(report.emitted.is_empty());
        assert!(!store.get_message(9).unwrap().unwrap().processed);
    }
}
