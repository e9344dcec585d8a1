//! HandReceipt CLI - queue custody transfers offline and sync them later.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::list::{run_history, run_list};
use crate::commands::manage::{run_acknowledge, run_cancel};
use crate::commands::requests::run_requests;
use crate::commands::scan::run_scan;
use crate::commands::stats::run_stats;
use crate::commands::sync::{run_sync, run_sync_watch};
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

    // `handreceipt=info` also covers the `handreceipt_core` target.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("handreceipt=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
        Commands::Config { command } => run_config(command, profile),
        Commands::Auth { command } => run_auth(command, profile),
        command => {
            let ctx = Context::load(profile, cli.db_path)?;
            run_engine_command(&ctx, command).await
        }
    }
}

async fn run_engine_command(ctx: &Context, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Scan { payload, to, json } => run_scan(ctx, payload.as_deref(), &to, json).await,
        Commands::List {
            property,
            state,
            json,
        } => run_list(ctx, property.as_deref(), &state, json).await,
        Commands::History { json } => run_history(ctx, json).await,
        Commands::Cancel { id } => run_cancel(ctx, &id).await,
        Commands::Acknowledge { id } => run_acknowledge(ctx, &id).await,
        Commands::Sync {
            watch,
            interval,
            json,
        } => {
            if watch {
                run_sync_watch(ctx, interval).await
            } else {
                run_sync(ctx, json).await
            }
        }
        Commands::Stats { json } => run_stats(ctx, json).await,
        Commands::Requests { command } => run_requests(ctx, command).await,
        Commands::Completions { .. } | Commands::Config { .. } | Commands::Auth { .. } => Ok(()),
    }
}

