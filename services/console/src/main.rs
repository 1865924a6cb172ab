//! Marquee admin console command-line entry point.
//!
//! # Purpose
//! Runs one console command against the REST API (or, with `--offline`, an
//! in-memory backend seeded with demo data) and prints the result as JSON on
//! stdout. Toasts for settled mutations go to stderr.
mod observability;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marquee_cache::MutationOutcome;
use marquee_client::{
    ClientConfig, Console, HttpRemote, InMemoryRemote, RemoteSource, Toast, ToastLevel,
    ToastQueue, seed_demo,
};
use marquee_common::{Event, ListParams, Operator, TicketStatus, User};
use serde::Serialize;
use serde_json::{Value, json};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "marquee-console")]
#[command(about = "Admin console for events, tickets and wallets")]
struct Cli {
    /// YAML file with client settings
    #[arg(long, env = "MARQUEE_CLIENT_CONFIG")]
    config: Option<String>,

    /// Serve requests from seeded demo data instead of the API
    #[arg(long)]
    offline: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List events
    Events {
        #[arg(long, default_value = "1")]
        page: u32,
    },
    /// Ticket requests of an event
    Tickets {
        #[arg(long)]
        event: String,
    },
    /// Revenue of an event
    Revenue {
        #[arg(long)]
        event: String,
    },
    /// Approve or decline a ticket request
    TicketStatus {
        #[arg(long)]
        event: String,
        #[arg(long)]
        ticket: String,
        #[arg(long)]
        status: TicketStatus,
    },
    /// List wallet users
    Users {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
    },
    /// Add funds to a user's wallet
    TopUp {
        #[arg(long)]
        user: String,
        #[arg(long)]
        amount: i64,
    },
    /// Wallet history of a user
    Transactions {
        #[arg(long)]
        user: String,
    },
    /// List operators
    Ops {
        #[arg(long, default_value = "1")]
        page: u32,
    },
    /// Delete an operator
    DeleteOp {
        #[arg(long)]
        id: String,
    },
    /// Send a push notification to a group
    Notify {
        #[arg(long)]
        group: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    observability::init_observability(cli.verbose);

    let config = ClientConfig::from_env_or_yaml(cli.config.as_deref()).context("client config")?;
    let remote = build_remote(&config, cli.offline).await?;
    tracing::debug!(backend = remote.backend_name(), base_url = %config.base_url, "console ready");

    let (queue, mut toasts) = ToastQueue::channel(config.notification_queue_depth);
    let console = Console::new(&config, remote, Arc::new(queue));

    let (output, committed) = run(&console, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    drain_toasts(&mut toasts);
    Ok(if committed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn build_remote(config: &ClientConfig, offline: bool) -> Result<Arc<dyn RemoteSource>> {
    if offline {
        let remote = InMemoryRemote::new();
        seed_demo(&remote).await.context("seed demo data")?;
        return Ok(Arc::new(remote));
    }
    Ok(Arc::new(HttpRemote::new(config)?))
}

/// Run one command. The flag is false when a mutation was rolled back.
async fn run(console: &Console, command: Command) -> Result<(Value, bool)> {
    let output = match command {
        Command::Events { page } => {
            serde_json::to_value(console.list::<Event>(&console.params(page)).await?)?
        }
        Command::Tickets { event } => serde_json::to_value(console.event_tickets(&event).await?)?,
        Command::Revenue { event } => serde_json::to_value(console.event_revenue(&event).await?)?,
        Command::TicketStatus {
            event,
            ticket,
            status,
        } => return settled(console.set_ticket_status(&event, &ticket, status).await?),
        Command::Users { search, page } => {
            let mut params: ListParams = console.params(page);
            if let Some(search) = search {
                params = params.with_search(search);
            }
            serde_json::to_value(console.list::<User>(&params).await?)?
        }
        Command::TopUp { user, amount } => {
            return settled(console.top_up_wallet(&user, amount).await?);
        }
        Command::Transactions { user } => serde_json::to_value(console.transactions(&user).await?)?,
        Command::Ops { page } => {
            serde_json::to_value(console.collection::<Operator>().list(&console.params(page)).await?)?
        }
        Command::DeleteOp { id } => {
            return settled(console.collection::<Operator>().delete(&id).await?);
        }
        Command::Notify { group, title, body } => {
            return settled(console.send_notification(&group, &title, &body).await?);
        }
    };
    Ok((output, true))
}

fn settled<T: Serialize>(outcome: MutationOutcome<T>) -> Result<(Value, bool)> {
    Ok(match outcome {
        MutationOutcome::Committed(data) => (json!({ "committed": true, "data": data }), true),
        MutationOutcome::RolledBack(error) => (
            json!({ "committed": false, "error": error.to_string() }),
            false,
        ),
    })
}

fn drain_toasts(toasts: &mut mpsc::Receiver<Toast>) {
    while let Ok(toast) = toasts.try_recv() {
        let level = match toast.level {
            ToastLevel::Success => "ok",
            ToastLevel::Error => "error",
        };
        eprintln!("[{level}] {toast}");
    }
}
