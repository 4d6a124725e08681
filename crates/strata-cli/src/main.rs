mod commands;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_config::{AppConfig, ConfigLoader, LogConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Ordered, exactly-once schema migrations for SQLite")]
struct Cli {
    /// Config file (defaults to strata.yml / strata.toml in the working
    /// directory or ~/.config/strata)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `database.path`
    #[arg(long, global = true, env = "STRATA_DATABASE")]
    database: Option<PathBuf>,

    /// Migrations directory, overrides `migrations.directory`
    #[arg(long, global = true, env = "STRATA_MIGRATIONS")]
    migrations: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply or revert migrations
    Migrate {
        #[command(subcommand)]
        direction: MigrateCommand,
    },
    /// Show every known migration and whether it is applied
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations up to and including KEY (default: all)
    Up {
        #[arg(long, value_name = "KEY")]
        to: Option<u64>,
    },
    /// Revert applied migrations above KEY (default: only the latest).
    /// `--to 0` reverts everything.
    Down {
        #[arg(long, value_name = "KEY")]
        to: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current migration");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = tokio::task::spawn_blocking(move || run(cli.command, &config, cancel)).await;
    match outcome {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: migration task panicked: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("failed to load config")?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(migrations) = &cli.migrations {
        config.migrations.directory = Some(migrations.clone());
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(command: Command, config: &AppConfig, cancel: Arc<AtomicBool>) -> Result<()> {
    let store = commands::open_store(config)?;
    let migrations = commands::load_migrations(config)?;
    let runner = commands::runner(&store, migrations, config, cancel)?;

    match command {
        Command::Migrate {
            direction: MigrateCommand::Up { to },
        } => commands::migrate_up(&runner, to),
        Command::Migrate {
            direction: MigrateCommand::Down { to },
        } => commands::migrate_down(&runner, to),
        Command::Status { json } => commands::status(&runner, json),
    }
}
