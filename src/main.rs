mod cli;
mod commands;
mod config;
mod modules;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use converge::Direction;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "rowcloud", &mut io::stdout());
        return Ok(());
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: Config::load(cli.config.as_deref())?,
    };
    log::trace!("verbosity {}", ctx.verbose);

    match cli.command {
        Command::Modules(args) => commands::modules::list(&ctx, &args),
        Command::Install(args) => commands::modules::install(&ctx, args).await,
        Command::Uninstall { modules, yes } => {
            commands::modules::uninstall(&ctx, &modules, yes).await
        }
        Command::Apply(args) => commands::engine::run(&ctx, Direction::Apply, args).await,
        Command::Sync(args) => commands::engine::run(&ctx, Direction::Sync, args).await,
        Command::Sql { statement, json } => commands::sql::run(&ctx, &statement, json),
        Command::Audit { limit, table, json } => {
            commands::sql::audit(&ctx, limit, table.as_deref(), json)
        }
        Command::Completions { .. } => Ok(()),
    }
}
