use crate::actions::{Action, ActionContext, BOOTSTRAP_ACTION, CycleSummary};
use crate::logging::ndjson::RelayEvent;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;

/// One-shot: create the inbound, outbound and archive directories, then disable itself.
pub struct DirectoryBootstrap;

impl Action for DirectoryBootstrap {
    fn name(&self) -> &'static str {
        BOOTSTRAP_ACTION
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<CycleSummary> {
        let created = bootstrap_directories(ctx)?;
        Ok(CycleSummary {
            action: BOOTSTRAP_ACTION,
            handled: created.len(),
            detail: json!({ "directories": created }),
        })
    }
}

pub fn bootstrap_directories(ctx: &ActionContext<'_>) -> Result<Vec<PathBuf>> {
    let file = &ctx.config.file;
    let dirs = vec![
        file.inbound.clone(),
        file.outbound.clone(),
        file.archive.clone(),
    ];
    for dir in &dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create messaging directory {}", dir.display()))?;
    }
    ctx.store.deactivate_action(BOOTSTRAP_ACTION)?;
    tracing::info!(
        inbound = %file.inbound.display(),
        outbound = %file.outbound.display(),
        archive = %file.archive.display(),
        "messaging directories ready"
    );
    ctx.record(RelayEvent {
        event: "directories_ready",
        action: BOOTSTRAP_ACTION,
        message_id: None,
        detail: json!({ "directories": dirs }),
    })?;
    Ok(dirs)
}
