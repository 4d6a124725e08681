pub mod catalog;
pub mod ledger;
pub mod migrations;
pub mod ops;
pub mod runner;
pub mod schema;
pub mod source;
pub mod store;

pub use ledger::{AppliedLedger, LedgerEntry};
pub use migrations::Migration;
pub use ops::SchemaOp;
pub use runner::{
    DEFAULT_LEDGER_TABLE, Direction, MigrationReport, MigrationRunner, Transition, UnitState,
    UnitStatus,
};
pub use schema::{ColumnSpec, ColumnType, ForeignKeySpec, IndexSpec, ReferentialAction, TableSpec};
pub use store::{SchemaStore, SqliteStore};
