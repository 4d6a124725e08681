use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{Error, OrdinalKey, Result};
use tracing::debug;

use crate::schema::quote_ident;
use crate::store::{SchemaStore, Value};

/// A row of the applied-migrations table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub key: OrdinalKey,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Persistent record of which migrations have been applied.
///
/// Nothing is cached: every call reads or writes the ledger table directly,
/// so a fresh runner always sees what the database says.
pub struct AppliedLedger<'a> {
    store: &'a dyn SchemaStore,
    table: String,
}

impl<'a> AppliedLedger<'a> {
    pub fn new(store: &'a dyn SchemaStore, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it is absent. A single
    /// `CREATE TABLE IF NOT EXISTS`, so racing runners cannot clobber it.
    pub fn bootstrap(&self) -> Result<()> {
        self.store
            .execute_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    ordinal_key INTEGER PRIMARY KEY NOT NULL,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                quote_ident(&self.table)
            ))
            .map_err(|e| Error::Database(format!("ledger bootstrap failed: {e}")))
    }

    pub fn is_applied(&self, key: OrdinalKey) -> Result<bool> {
        let rows = self.store.query(
            &format!(
                "SELECT 1 FROM {} WHERE ordinal_key = ?1",
                quote_ident(&self.table)
            ),
            &[key_value(key)?],
        )?;
        Ok(!rows.is_empty())
    }

    pub fn record_applied(
        &self,
        key: OrdinalKey,
        name: &str,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        debug!("ledger: record {key}_{name}");
        self.store
            .execute(
                &format!(
                    "INSERT INTO {} (ordinal_key, name, applied_at) VALUES (?1, ?2, ?3)",
                    quote_ident(&self.table)
                ),
                &[
                    key_value(key)?,
                    Value::Text(name.to_string()),
                    Value::Text(applied_at.to_rfc3339()),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to record {key}: {e}")))?;
        Ok(())
    }

    pub fn remove_applied(&self, key: OrdinalKey) -> Result<()> {
        debug!("ledger: remove {key}");
        let removed = self
            .store
            .execute(
                &format!(
                    "DELETE FROM {} WHERE ordinal_key = ?1",
                    quote_ident(&self.table)
                ),
                &[key_value(key)?],
            )
            .map_err(|e| Error::Database(format!("failed to remove {key}: {e}")))?;
        if removed == 0 {
            return Err(Error::LedgerInconsistency {
                unit: key.to_string(),
                detail: "not recorded as applied".into(),
            });
        }
        Ok(())
    }

    /// All entries, ascending by key.
    pub fn list_applied(&self) -> Result<Vec<LedgerEntry>> {
        let rows = self.store.query(
            &format!(
                "SELECT ordinal_key, name, applied_at FROM {} ORDER BY ordinal_key ASC",
                quote_ident(&self.table)
            ),
            &[],
        )?;
        rows.into_iter().map(parse_entry).collect()
    }

    pub fn latest(&self) -> Result<Option<OrdinalKey>> {
        Ok(self.list_applied()?.last().map(|e| e.key))
    }
}

fn key_value(key: OrdinalKey) -> Result<Value> {
    i64::try_from(key.get())
        .map(Value::Integer)
        .map_err(|_| Error::Database(format!("ordinal key {key} does not fit in the ledger")))
}

fn parse_entry(row: Vec<Value>) -> Result<LedgerEntry> {
    match row.as_slice() {
        [Value::Integer(key), Value::Text(name), Value::Text(applied_at)] if *key >= 0 => {
            Ok(LedgerEntry {
                key: OrdinalKey::new(*key as u64),
                name: name.clone(),
                applied_at: parse_datetime(applied_at)?,
            })
        }
        other => Err(Error::LedgerInconsistency {
            unit: "ledger".into(),
            detail: format!("malformed ledger row: {other:?}"),
        }),
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by hand with datetime('now') look like "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|e| Error::Database(format!("bad applied_at {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn bootstrap_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let ledger = AppliedLedger::new(&store, "schema_migrations");
        ledger.bootstrap().unwrap();
        ledger.record_applied(OrdinalKey::new(1), "a", Utc::now()).unwrap();
        ledger.bootstrap().unwrap();

        assert!(store.table_exists("schema_migrations").unwrap());
        assert_eq!(ledger.list_applied().unwrap().len(), 1);
    }

    #[test]
    fn records_list_in_ascending_key_order() {
        let store = SqliteStore::in_memory().unwrap();
        let ledger = AppliedLedger::new(&store, "schema_migrations");
        ledger.bootstrap().unwrap();

        for key in [20240102000000u64, 3, 20240101000000] {
            ledger
                .record_applied(OrdinalKey::new(key), &format!("m{key}"), Utc::now())
                .unwrap();
        }

        let keys: Vec<u64> = ledger
            .list_applied()
            .unwrap()
            .iter()
            .map(|e| e.key.get())
            .collect();
        assert_eq!(keys, vec![3, 20240101000000, 20240102000000]);
        assert_eq!(ledger.latest().unwrap(), Some(OrdinalKey::new(20240102000000)));
    }

    #[test]
    fn duplicate_record_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let ledger = AppliedLedger::new(&store, "schema_migrations");
        ledger.bootstrap().unwrap();
        ledger.record_applied(OrdinalKey::new(1), "a", Utc::now()).unwrap();
        assert!(ledger.record_applied(OrdinalKey::new(1), "a", Utc::now()).is_err());
    }

    #[test]
    fn remove_and_is_applied() {
        let store = SqliteStore::in_memory().unwrap();
        let ledger = AppliedLedger::new(&store, "applied");
        ledger.bootstrap().unwrap();
        let key = OrdinalKey::new(5);

        assert!(!ledger.is_applied(key).unwrap());
        ledger.record_applied(key, "five", Utc::now()).unwrap();
        assert!(ledger.is_applied(key).unwrap());

        ledger.remove_applied(key).unwrap();
        assert!(!ledger.is_applied(key).unwrap());
        assert!(matches!(
            ledger.remove_applied(key),
            Err(Error::LedgerInconsistency { .. })
        ));
    }

    #[test]
    fn applied_at_round_trips() {
        let store = SqliteStore::in_memory().unwrap();
        let ledger = AppliedLedger::new(&store, "schema_migrations");
        ledger.bootstrap().unwrap();

        let at = DateTime::parse_from_rfc3339("2024-03-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ledger.record_applied(OrdinalKey::new(1), "a", at).unwrap();
        assert_eq!(ledger.list_applied().unwrap()[0].applied_at, at);
    }

    #[test]
    fn sqlite_datetime_format_is_accepted() {
        let parsed = parse_datetime("2024-03-01 12:30:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }
}
