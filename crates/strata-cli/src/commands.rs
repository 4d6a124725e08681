use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use strata_common::OrdinalKey;
use strata_config::AppConfig;
use strata_db::{Migration, MigrationRunner, SqliteStore, catalog, source};
use tracing::info;

use crate::report;

pub fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let db = &config.database;
    SqliteStore::open(&db.path, Duration::from_millis(db.busy_timeout_ms))
        .with_context(|| format!("failed to open {}", db.path.display()))
}

/// Authored migrations from the configured directory, or the built-in
/// catalog when none is configured.
pub fn load_migrations(config: &AppConfig) -> Result<Vec<Migration>> {
    match &config.migrations.directory {
        Some(dir) => source::load_dir(dir)
            .with_context(|| format!("failed to load migrations from {}", dir.display())),
        None => {
            info!("no migrations directory configured, using built-in catalog");
            Ok(catalog::builtin()?)
        }
    }
}

pub fn runner<'a>(
    store: &'a SqliteStore,
    migrations: Vec<Migration>,
    config: &AppConfig,
    cancel: Arc<AtomicBool>,
) -> Result<MigrationRunner<'a>> {
    Ok(MigrationRunner::new(store, migrations)?
        .with_ledger_table(config.database.ledger_table.clone())
        .with_cancel_flag(cancel))
}

pub fn migrate_up(runner: &MigrationRunner<'_>, to: Option<u64>) -> Result<()> {
    let report = runner.migrate_up(to.map(OrdinalKey::new))?;
    report::print_report(&report);
    Ok(())
}

/// Without a target only the most recently applied migration is reverted.
pub fn migrate_down(runner: &MigrationRunner<'_>, to: Option<u64>) -> Result<()> {
    let target = match to {
        Some(key) => OrdinalKey::new(key),
        None => {
            let applied = runner.verify()?;
            applied
                .iter()
                .rev()
                .nth(1)
                .map(|e| e.key)
                .unwrap_or(OrdinalKey::ZERO)
        }
    };
    let report = runner.migrate_down(target)?;
    report::print_report(&report);
    Ok(())
}

pub fn status(runner: &MigrationRunner<'_>, json: bool) -> Result<()> {
    let rows = runner.status()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize status")?
        );
    } else {
        report::print_status(&rows);
    }
    Ok(())
}
