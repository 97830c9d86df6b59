//! A small tick driver for running relay actions from the command line.
//!
//! Actions never loop on their own; this drives them one tick at a time, one action
//! at a time, so no action's cycles overlap.

use crate::actions::{self, Action, ActionContext, CycleOutcome, CycleSummary};
use crate::logging::ndjson::RelayEvent;
use anyhow::{Result, bail};
use serde_json::json;
use std::thread;
use std::time::Duration;

pub struct Scheduler {
    actions: Vec<Box<dyn Action>>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub ran: Vec<CycleSummary>,
    pub skipped: Vec<&'static str>,
    pub failures: Vec<(&'static str, anyhow::Error)>,
}

impl TickReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub interval: Duration,
    /// Stop after this many ticks; `None` runs until the process is stopped.
    pub max_cycles: Option<u64>,
    /// Return an error as soon as a tick has a failed action.
    pub fail_fast: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_cycles: None,
            fail_fast: false,
        }
    }
}

impl Scheduler {
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn with_builtin_actions() -> Self {
        Self::new(actions::builtin_actions())
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Run every enabled action once, in registration order. A failing action does
    /// not stop the ones after it.
    pub fn tick(&self, ctx: &ActionContext<'_>) -> TickReport {
        let mut report = TickReport::default();
        for action in &self.actions {
            match actions::run_action(action.as_ref(), ctx) {
                Ok(CycleOutcome::Ran(summary)) => report.ran.push(summary),
                Ok(CycleOutcome::Skipped) => report.skipped.push(action.name()),
                Err(e) => {
                    tracing::error!(action = action.name(), error = %format!("{e:#}"), "action cycle failed");
                    if let Err(log_err) = ctx.record(RelayEvent {
                        event: "action_failed",
                        action: action.name(),
                        message_id: None,
                        detail: json!({ "error": format!("{e:#}") }),
                    }) {
                        tracing::warn!(error = %log_err, "could not mirror relay event");
                    }
                    report.failures.push((action.name(), e));
                }
            }
        }
        report
    }

    pub fn run(&self, ctx: &ActionContext<'_>, opts: &RunOptions) -> Result<u64> {
        let mut cycles = 0u64;
        loop {
            let report = self.tick(ctx);
            cycles += 1;
            let handled: usize = report.ran.iter().map(|s| s.handled).sum();
            if handled > 0 {
                tracing::info!(cycle = cycles, handled, "tick complete");
            } else {
                tracing::debug!(cycle = cycles, "idle tick");
            }

            if opts.fail_fast
                && let Some((action, err)) = report.failures.into_iter().next()
            {
                bail!("{action} failed on cycle {cycles}: {err:#}");
            }
            if opts.max_cycles.is_some_and(|max| cycles >= max) {
                return Ok(cycles);
            }
            thread::sleep(opts.interval);
        }
    }
}
