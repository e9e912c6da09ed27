//! notecal CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use notecal_core::{TracingConfig, init_tracing};

use notecal_cli::cli::{Cli, Command, ConfigAction};
use notecal_cli::commands;
use notecal_cli::config::ClientConfig;
use notecal_cli::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        let debug = TracingConfig::cli_debug();
        let directive = debug.default_directive();
        debug.with_env_filter(directive)
    } else {
        TracingConfig::cli()
    };
    if let Err(e) = init_tracing(tracing_config.with_format(cli.log_format.into())) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let (config, config_path) = match cli.config {
        Some(path) => (ClientConfig::load_from(&path)?, path),
        None => (ClientConfig::load()?, ClientConfig::default_path()),
    };

    match cli.command {
        Command::Auth {
            client_id,
            client_secret,
            credentials_file,
            force,
        } => commands::auth::google(client_id, client_secret, credentials_file, force, &config).await,
        Command::Logout => commands::logout::run(&config).await,
        Command::Status { check } => commands::status::run(check, &config).await,
        Command::Events { date } => commands::events::run(date, &config).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Path => commands::config::path(&config, &config_path),
        },
    }
}
