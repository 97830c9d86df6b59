use crate::actions::{self, ActionContext, bootstrap};
use crate::config::{self, RelayConfig};
use crate::scheduler::{RunOptions, Scheduler};
use crate::store::{Direction, MessageFilter, MessageStore, NewOutboundMessage};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Loaded configuration plus an open store.
pub struct RelayEnv {
    pub config: RelayConfig,
    pub store: MessageStore,
}

impl RelayEnv {
    pub fn open(config_path: Option<PathBuf>, state_db: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => config::default_config_path(
                &std::env::current_dir().context("resolve current directory")?,
            ),
        };
        let config = config::load_relay_config(&config_path)?;
        let db = state_db.unwrap_or_else(|| config.state_db_path());
        let store = MessageStore::open(&db)?;
        Ok(Self { config, store })
    }

    pub fn context(&self) -> ActionContext<'_> {
        ActionContext::new(&self.store, &self.config)
    }
}

#[derive(Debug, Clone)]
pub struct RunCommand {
    pub once: bool,
    pub interval_ms: u64,
    pub max_cycles: Option<u64>,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SendCommand {
    pub recipient: String,
    pub action: String,
    pub payload: Option<String>,
    pub message_id: Option<i64>,
    pub sender_id: Option<i64>,
}

pub fn init(env: &RelayEnv) -> Result<()> {
    actions::register_builtin_actions(&env.store)?;
    let dirs = bootstrap::bootstrap_directories(&env.context())?;
    for dir in dirs {
        println!("ready: {}", dir.display());
    }
    Ok(())
}

pub fn run(env: &RelayEnv, cmd: RunCommand) -> Result<()> {
    actions::register_builtin_actions(&env.store)?;
    let ctx = env.context().with_event_log(cmd.log.as_deref());
    let opts = RunOptions {
        interval: Duration::from_millis(cmd.interval_ms),
        max_cycles: if cmd.once { Some(1) } else { cmd.max_cycles },
        fail_fast: cmd.once,
    };
    let scheduler = Scheduler::with_builtin_actions();
    tracing::info!(actions = ?scheduler.action_names(), "relay started");
    let cycles = scheduler.run(&ctx, &opts)?;
    tracing::info!(cycles, "relay stopped");
    Ok(())
}

/// Enqueue an outbound message. Returns its `message_id`.
pub fn send(env: &RelayEnv, cmd: SendCommand) -> Result<i64> {
    let payload = match cmd.payload.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("parse --payload as JSON")?,
        None => serde_json::Value::Null,
    };
    let message_id = match cmd.message_id {
        Some(id) => id,
        None => env.store.next_message_id()?,
    };
    env.store.insert_outbound(&NewOutboundMessage {
        message_id,
        recipient: cmd.recipient,
        sender: env.config.runtime.participant.clone(),
        sender_id: cmd.sender_id.unwrap_or(message_id),
        action: cmd.action,
        payload,
    })?;
    println!("queued message {message_id}");
    Ok(message_id)
}

pub fn list_messages(env: &RelayEnv, direction: Option<Direction>, unprocessed: bool) -> Result<()> {
    let rows = env.store.list_messages(MessageFilter {
        direction,
        unprocessed_only: unprocessed,
    })?;
    if rows.is_empty() {
        println!("No messages");
        return Ok(());
    }
    for row in rows {
        println!(
            "{} {} from={} to={} action={} processed={} payload={}",
            row.message_id,
            row.direction,
            row.sender,
            row.recipient.as_deref().unwrap_or("-"),
            row.action,
            row.processed,
            row.payload.as_deref().unwrap_or("null")
        );
    }
    Ok(())
}

pub fn register(env: &RelayEnv, action: &str) -> Result<()> {
    if env.store.register_action(action, false)? {
        println!("registered {action}");
    } else {
        println!("{action} already registered");
    }
    Ok(())
}

pub fn list_actions(env: &RelayEnv) -> Result<()> {
    for slot in env.store.list_actions()? {
        println!(
            "{} active={} payload={}",
            slot.action,
            slot.active,
            slot.payload.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
