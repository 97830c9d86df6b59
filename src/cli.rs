use crate::commands::{self, RelayEnv, RunCommand, SendCommand};
use crate::store::Direction;
use anyhow::{Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "msgrelay", version)]
#[command(
    about = "Store-and-forward relay between semaphore-gated message directories and a SQLite message store",
    long_about = "msgrelay ingests message files from an inbound directory into a SQLite message store, activates the consumer each message names, and writes queued outbound messages as file pairs for their recipients."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  msgrelay init --config relay/config.toml
  msgrelay run --config relay/config.toml --interval-ms 500
  msgrelay send --recipient Billing --action ProcessInvoice --payload '{\"id\": 7}'
  msgrelay messages --direction inbound --unprocessed
  msgrelay completion zsh > ~/.zsh/completions/_msgrelay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Relay config file (default: .msgrelay/config.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to message store DB (default: [database].path, then $XDG_STATE_HOME/msgrelay/state.db)"
    )]
    state_db: Option<PathBuf>,
}

impl StoreArgs {
    fn open(self) -> Result<RelayEnv> {
        RelayEnv::open(self.config, self.state_db)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Create the message store, register relay actions and create messaging directories")]
    Init {
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(
        about = "Run relay cycles",
        long_about = "Run inbound ingestion, dispatch and outbound emission repeatedly. Each tick runs every enabled action once."
    )]
    #[command(after_long_help = "Examples:
  msgrelay run
  msgrelay run --once
  msgrelay run --interval-ms 250 --max-cycles 100 --log relay.ndjson")]
    Run {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, help = "Run a single tick and fail if any action failed")]
        once: bool,
        #[arg(
            long,
            default_value_t = 1000,
            value_name = "MS",
            help = "Pause between ticks"
        )]
        interval_ms: u64,
        #[arg(long, value_name = "N", help = "Stop after N ticks")]
        max_cycles: Option<u64>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON relay event log to file")]
        log: Option<PathBuf>,
    },
    #[command(about = "Queue an outbound message")]
    #[command(arg_required_else_help = true)]
    Send {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, value_name = "NAME", help = "Recipient participant")]
        recipient: String,
        #[arg(long, value_name = "ACTION", help = "Consumer to activate at the recipient")]
        action: String,
        #[arg(long, value_name = "JSON", help = "Message payload as JSON (default: null)")]
        payload: Option<String>,
        #[arg(long, value_name = "ID", help = "Explicit message ID (default: next free ID)")]
        message_id: Option<i64>,
        #[arg(long, value_name = "ID", help = "Sender correlation ID (default: message ID)")]
        sender_id: Option<i64>,
    },
    #[command(about = "List stored messages")]
    Messages {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(
            long,
            value_name = "DIRECTION",
            value_parser = ["inbound", "outbound"],
            help = "Only show one direction"
        )]
        direction: Option<String>,
        #[arg(long, help = "Only show unprocessed messages")]
        unprocessed: bool,
    },
    #[command(about = "Register a consumer activation slot")]
    #[command(arg_required_else_help = true)]
    Register {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(value_name = "ACTION", help = "Consumer name")]
        action: String,
    },
    #[command(about = "List consumer activation slots")]
    Actions {
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(
        about = "Generate shell completion script",
        long_about = "Generate shell completion script for your shell. Redirect output to your shell completion directory."
    )]
    #[command(arg_required_else_help = true)]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(about = "Generate a man page")]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { store } => commands::init(&store.open()?),
        Commands::Run {
            store,
            once,
            interval_ms,
            max_cycles,
            log,
        } => commands::run(
            &store.open()?,
            RunCommand {
                once,
                interval_ms,
                max_cycles,
                log,
            },
        ),
        Commands::Send {
            store,
            recipient,
            action,
            payload,
            message_id,
            sender_id,
        } => commands::send(
            &store.open()?,
            SendCommand {
                recipient,
                action,
                payload,
                message_id,
                sender_id,
            },
        )
        .map(|_| ()),
        Commands::Messages {
            store,
            direction,
            unprocessed,
        } => {
            let direction = direction
                .as_deref()
                .map(|d| d.parse::<Direction>().map_err(|e| anyhow!(e)))
                .transpose()?;
            commands::list_messages(&store.open()?, direction, unprocessed)
        }
        Commands::Register { store, action } => commands::register(&store.open()?, &action),
        Commands::Actions { store } => commands::list_actions(&store.open()?),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Man { output } => {
            let man = clap_mangen::Man::new(Cli::command());
            match output {
                Some(path) => {
                    let mut bytes = Vec::new();
                    man.render(&mut bytes)?;
                    fs::write(path, bytes)?;
                }
                None => {
                    man.render(&mut io::stdout())?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send_arguments() {
        let cli = Cli::try_parse_from([
            "msgrelay",
            "send",
            "--recipient",
            "UnitTest",
            "--action",
            "Consume",
            "--payload",
            "{\"k\": \"v\"}",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                recipient, payload, ..
            } => {
                assert_eq!(recipient, "UnitTest");
                assert_eq!(payload.as_deref(), Some("{\"k\": \"v\"}"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
