//! Murmur CLI - conversations and notifications from the terminal

mod cli;
mod commands;
mod config;
mod error;
mod session_store;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::{run_login, run_logout, run_status};
use crate::commands::common::Context;
use crate::commands::conversations::run_conversations;
use crate::commands::history::run_history;
use crate::commands::notifications::run_notifications;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "murmur=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::new(cli.config.as_deref(), cli.state)?;

    match cli.command {
        Commands::Login { username, password } => {
            run_login(&ctx, &username, password).await?;
        }
        Commands::Logout => run_logout(&ctx).await?,
        Commands::Status => run_status(&ctx).await?,
        Commands::Conversations { refresh, json } => run_conversations(&ctx, refresh, json).await?,
        Commands::Notifications {
            refresh,
            mark_all_read,
            json,
        } => run_notifications(&ctx, refresh, mark_all_read, json).await?,
        Commands::History {
            thread_id,
            pages,
            json,
        } => run_history(&ctx, thread_id, pages, json).await?,
        Commands::Watch { thread } => run_watch(&ctx, thread).await?,
    }

    Ok(())
}
