use crate::actions::{Action, ActionContext, CycleSummary, INBOUND_ACTION};
use crate::error::RelayError;
use crate::logging::ndjson::RelayEvent;
use crate::store::NewInboundMessage;
use crate::transport::codec;
use crate::transport::{FilePair, SemaphoreProtocol};
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;

/// Drains the inbound directory into the store, then archives each pair.
pub struct InboundIngestion;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: Vec<i64>,
    /// Pairs whose `message_id` was already stored; archived without a new row.
    pub duplicates: Vec<i64>,
    /// Archive moves from an earlier cycle that were finished this cycle.
    pub resumed_archives: usize,
}

enum PairOutcome {
    Inserted(i64),
    Duplicate(i64),
}

impl Action for InboundIngestion {
    fn name(&self) -> &'static str {
        INBOUND_ACTION
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<CycleSummary> {
        let report = ingest_inbound(ctx)?;
        Ok(CycleSummary {
            action: INBOUND_ACTION,
            handled: report.ingested.len() + report.duplicates.len(),
            detail: json!({
                "ingested": report.ingested,
                "duplicates": report.duplicates,
                "resumed_archives": report.resumed_archives
            }),
        })
    }
}

/// One ingestion cycle.
///
/// An orphaned semaphore anywhere in the directory aborts the cycle before any row is
/// written. Other per-pair failures leave that pair in place, the remaining pairs are
/// still ingested, and the cycle returns [`RelayError::CycleFailed`].
pub fn ingest_inbound(ctx: &ActionContext<'_>) -> Result<IngestReport> {
    let file = &ctx.config.file;
    let protocol = SemaphoreProtocol::from_config(file);
    let scan = protocol.scan(&file.inbound, &file.archive)?;

    let mut report = IngestReport::default();
    let mut failures = Vec::new();

    for pair in &scan.interrupted {
        match protocol.archive_pair(pair, &file.archive) {
            Ok(_) => {
                tracing::info!(base_name = %pair.base_name, "finished interrupted archive move");
                report.resumed_archives += 1;
            }
            Err(e) => failures.push(format!("{}: {e:#}", pair.base_name)),
        }
    }

    for pair in &scan.ready {
        match ingest_pair(ctx, &protocol, pair) {
            Ok(PairOutcome::Inserted(id)) => report.ingested.push(id),
            Ok(PairOutcome::Duplicate(id)) => report.duplicates.push(id),
            Err(e) => {
                tracing::warn!(base_name = %pair.base_name, error = %format!("{e:#}"), "inbound pair failed");
                failures.push(format!("{}: {e:#}", pair.base_name));
            }
        }
    }

    if !failures.is_empty() {
        return Err(RelayError::CycleFailed {
            action: INBOUND_ACTION,
            failures,
        }
        .into());
    }
    Ok(report)
}

fn ingest_pair(
    ctx: &ActionContext<'_>,
    protocol: &SemaphoreProtocol,
    pair: &FilePair,
) -> Result<PairOutcome> {
    let limit = ctx.config.runtime.max_message_bytes;
    let size = fs::metadata(&pair.message)
        .with_context(|| format!("stat message file {}", pair.message.display()))?
        .len();
    if size > limit {
        return Err(RelayError::MalformedMessage {
            path: pair.message.clone(),
            reason: format!("{size} bytes exceeds max_message_bytes {limit}"),
        }
        .into());
    }

    let raw = fs::read(&pair.message)
        .with_context(|| format!("read message file {}", pair.message.display()))?;
    let doc = codec::decode_inbound(&raw, &pair.message)?;
    let message_id = doc.message_id;

    let inserted = ctx.store.insert_inbound(&NewInboundMessage {
        message_id,
        sender: doc.sender,
        sender_id: doc.sender_id,
        action: doc.action,
        payload: doc.payload,
        sent: doc.sent,
    })?;

    // The row is committed; only now may the files leave the inbound directory.
    let archived = protocol.archive_pair(pair, &ctx.config.file.archive)?;

    let event = if inserted {
        tracing::info!(message_id, base_name = %pair.base_name, "ingested inbound message");
        "message_ingested"
    } else {
        tracing::warn!(message_id, base_name = %pair.base_name, "message_id already stored; archived without insert");
        "message_duplicate"
    };
    ctx.record(RelayEvent {
        event,
        action: INBOUND_ACTION,
        message_id: Some(message_id),
        detail: json!({
            "base_name": pair.base_name,
            "archived_to": archived.message
        }),
    })?;

    Ok(if inserted {
        PairOutcome::Inserted(message_id)
    } else {
        PairOutcome::Duplicate(message_id)
    })
}
