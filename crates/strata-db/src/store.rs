use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, params, params_from_iter};
use strata_common::{Error, Result};
use tracing::{debug, info};

pub use rusqlite::types::Value;

/// The database a migration runs against.
///
/// Transactions are explicit: the runner calls `begin`, executes a unit
/// and its ledger write, then `commit` or `rollback`. Every call in between
/// must land on the same underlying connection.
pub trait SchemaStore {
    /// Execute a single data-definition statement.
    fn execute_ddl(&self, statement: &str) -> Result<()>;

    /// Execute a parameterized statement, returning the number of rows changed.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a query and return every row as owned values.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    fn table_exists(&self, name: &str) -> Result<bool>;

    /// Column names of `table` in declaration order. Empty if the table
    /// does not exist.
    fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Column sets a foreign key may reference: the primary key followed by
    /// each unique index, columns in key order.
    fn unique_keys(&self, table: &str) -> Result<Vec<Vec<String>>>;
}

/// SQLite-backed [`SchemaStore`]. SQLite runs DDL inside transactions, so a
/// migration and its ledger row commit or roll back together.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        if db_path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }
        info!("opening schema store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("schema store lock poisoned".into()))
    }
}

impl SchemaStore for SqliteStore {
    fn execute_ddl(&self, statement: &str) -> Result<()> {
        debug!("ddl: {statement}");
        let conn = self.connection()?;
        conn.execute_batch(statement)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.connection()?;
        conn.execute(sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let width = stmt.column_count();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| Error::Database(format!("query failed: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))
    }

    fn begin(&self) -> Result<()> {
        let conn = self.connection()?;
        // IMMEDIATE takes the write lock up front; a second runner blocks
        // here until the busy timeout.
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
    }

    fn commit(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("COMMIT")
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to check table {name}: {e}")))
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to list columns of {table}: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read column row: {e}")))
    }

    fn unique_keys(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let conn = self.connection()?;
        let names = |sql: &str, arg: &str| -> rusqlite::Result<Vec<String>> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![arg], |row| row.get::<_, String>(0))?;
            rows.collect()
        };
        let fail =
            |e: rusqlite::Error| Error::Database(format!("failed to list keys of {table}: {e}"));

        let mut keys = Vec::new();
        let primary = names(
            "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
            table,
        )
        .map_err(fail)?;
        if !primary.is_empty() {
            keys.push(primary);
        }

        let indexes = names(
            "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND partial = 0",
            table,
        )
        .map_err(fail)?;
        for index in indexes {
            let columns = names("SELECT name FROM pragma_index_info(?1) ORDER BY seqno", &index)
                .map_err(fail)?;
            keys.push(columns);
        }
        Ok(keys)
    }
}
