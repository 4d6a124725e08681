use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_common::{DEFAULT_LEDGER_TABLE, Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. `:memory:` opens a throwaway in-memory database.
    pub path: PathBuf,
    /// Name of the table that records applied migrations.
    pub ledger_table: String,
    /// How long to wait on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.db"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory of authored migration files. When unset the built-in
    /// catalog is used.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.database.ledger_table) {
            return Err(Error::Config(format!(
                "ledger_table must be a plain SQL identifier, got {:?}",
                self.database.ledger_table
            )));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path cannot be empty".into()));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.database.ledger_table, DEFAULT_LEDGER_TABLE);
        assert_eq!(config.log.level, "info");
        assert!(config.migrations.directory.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_ledger_table_with_sql_in_it() {
        let mut config = AppConfig::default();
        config.database.ledger_table = "ledger; DROP TABLE stories".into();
        assert!(config.validate().is_err());

        config.database.ledger_table = "1ledger".into();
        assert!(config.validate().is_err());

        config.database.ledger_table = "_ledger_v2".into();
        assert!(config.validate().is_ok());
    }
}
