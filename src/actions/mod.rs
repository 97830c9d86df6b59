//! Relay components as scheduler actions.
//!
//! Every component is a step function: one call is one cycle, nothing loops or keeps
//! state between calls. Whether a cycle body runs is gated by the component's
//! `active` flag in the `actions` table, the same slot that dispatch flips for
//! downstream consumers.

pub mod bootstrap;
pub mod dispatch;
pub mod inbound;
pub mod outbound;

use crate::config::RelayConfig;
use crate::logging::ndjson::{self, RelayEvent};
use crate::store::MessageStore;
use anyhow::Result;
use serde_json::Value;
use std::path::Path;

pub const BOOTSTRAP_ACTION: &str = "io_file_bootstrap";
pub const INBOUND_ACTION: &str = "io_file_inbound";
pub const DISPATCH_ACTION: &str = "io_check_msg_table";
pub const OUTBOUND_ACTION: &str = "io_file_outbound";

/// Everything a cycle may touch, passed explicitly.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub store: &'a MessageStore,
    pub config: &'a RelayConfig,
    pub event_log: Option<&'a Path>,
}

impl<'a> ActionContext<'a> {
    pub fn new(store: &'a MessageStore, config: &'a RelayConfig) -> Self {
        Self {
            store,
            config,
            event_log: None,
        }
    }

    pub fn with_event_log(mut self, path: Option<&'a Path>) -> Self {
        self.event_log = path;
        self
    }

    pub(crate) fn record(&self, ev: RelayEvent<'_>) -> Result<()> {
        match self.event_log {
            Some(path) => ndjson::mirror_event(path, &ev),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub action: &'static str,
    pub handled: usize,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The action is disabled; the body did not run.
    Skipped,
    Ran(CycleSummary),
}

pub trait Action {
    fn name(&self) -> &'static str;

    /// Run one cycle.
    fn execute(&self, ctx: &ActionContext<'_>) -> Result<CycleSummary>;
}

/// Run one cycle of `action` if it is currently enabled.
pub fn run_action(action: &dyn Action, ctx: &ActionContext<'_>) -> Result<CycleOutcome> {
    if !ctx.store.is_action_active(action.name())? {
        return Ok(CycleOutcome::Skipped);
    }
    action.execute(ctx).map(CycleOutcome::Ran)
}

/// Built-in components in the order they should run within a tick.
pub fn builtin_actions() -> Vec<Box<dyn Action>> {
    vec![
        Box::new(bootstrap::DirectoryBootstrap) as Box<dyn Action>,
        Box::new(inbound::InboundIngestion),
        Box::new(dispatch::Dispatch),
        Box::new(outbound::OutboundEmission),
    ]
}

/// Create enabled slots for the built-in components. Existing flags are left as they
/// are, so a bootstrap that already disabled itself stays disabled.
pub fn register_builtin_actions(store: &MessageStore) -> Result<()> {
    for action in builtin_actions() {
        if store.register_action(action.name(), true)? {
            tracing::debug!(action = action.name(), "registered relay action");
        }
    }
    Ok(())
}
