use strata_common::{Error, OrdinalKey, Result, UnitId};
use tracing::{debug, warn};

use crate::ops::SchemaOp;
use crate::schema::ColumnSpec;
use crate::store::SchemaStore;

/// Migration system for tracking and applying database schema changes.
///
/// Each migration has an ordinal key, a name, a forward action and an
/// optional reverse action. Migrations are applied in key order by
/// [`crate::MigrationRunner`] and tracked in the ledger table.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub version: OrdinalKey,
    pub name: String,
    up: Vec<SchemaOp>,
    down: Option<Vec<SchemaOp>>,
}

impl Migration {
    /// An irreversible migration.
    pub fn new(version: u64, name: impl Into<String>, up: Vec<SchemaOp>) -> Self {
        Self {
            version: OrdinalKey::new(version),
            name: name.into(),
            up,
            down: None,
        }
    }

    pub fn with_down(mut self, down: Vec<SchemaOp>) -> Self {
        self.down = Some(down);
        self
    }

    /// A migration whose reverse action is derived by inverting `ops` in
    /// reverse order. Fails if any op has no inverse.
    pub fn change(version: u64, name: impl Into<String>, ops: Vec<SchemaOp>) -> Result<Self> {
        let id = UnitId::new(OrdinalKey::new(version), name);
        let down = ops
            .iter()
            .rev()
            .map(|op| {
                op.inverse().ok_or_else(|| {
                    Error::Config(format!(
                        "migration {id}: {} cannot be reversed automatically",
                        op.describe()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version: id.key,
            name: id.name,
            up: ops,
            down: Some(down),
        })
    }

    pub fn id(&self) -> UnitId {
        UnitId::new(self.version, self.name.clone())
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub fn up_ops(&self) -> &[SchemaOp] {
        &self.up
    }

    pub fn down_ops(&self) -> Option<&[SchemaOp]> {
        self.down.as_deref()
    }

    /// Run the forward action. The caller owns the enclosing transaction and
    /// must roll it back if this returns an error.
    pub fn apply(&self, store: &dyn SchemaStore) -> Result<()> {
        self.run(store, &self.up)
    }

    /// Run the reverse action. Irreversible migrations fail without touching
    /// the store.
    pub fn revert(&self, store: &dyn SchemaStore) -> Result<()> {
        match &self.down {
            Some(down) => self.run(store, down),
            None => Err(Error::Irreversible { unit: self.id() }),
        }
    }

    fn run(&self, store: &dyn SchemaStore, ops: &[SchemaOp]) -> Result<()> {
        for op in ops {
            debug!("{}: {}", self.id(), op.describe());
            self.check_references(store, op)?;

            for statement in op.statements() {
                match store.execute_ddl(&statement.sql) {
                    Ok(()) => {}
                    Err(e) if statement.best_effort => {
                        warn!("{}: ignoring index error: {}", self.id(), store_message(e));
                    }
                    Err(e) => {
                        return Err(Error::DdlExecution {
                            unit: self.id(),
                            message: store_message(e),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// SQLite accepts a `REFERENCES` clause naming a table that does not
    /// exist, so the target is checked here before the DDL runs.
    fn check_references(&self, store: &dyn SchemaStore, op: &SchemaOp) -> Result<()> {
        let (table, columns): (&str, Vec<&ColumnSpec>) = match op {
            SchemaOp::CreateTable(spec) => {
                (spec.name.as_str(), spec.foreign_keys().map(|(c, _)| c).collect())
            }
            SchemaOp::AddColumn { table, column } => (table.as_str(), vec![column]),
            _ => return Ok(()),
        };

        for column in columns {
            let Some(fk) = &column.references else {
                continue;
            };
            // Self-references are satisfied by the table being created.
            if fk.table.eq_ignore_ascii_case(table) {
                continue;
            }
            let fail = |message: String| Error::ForeignKey {
                unit: self.id(),
                table: table.to_string(),
                message,
            };

            if !store.table_exists(&fk.table).map_err(|e| fail(store_message(e)))? {
                return Err(fail(format!(
                    "{}.{} references missing table {}",
                    table, column.name, fk.table
                )));
            }
            let existing = store
                .table_columns(&fk.table)
                .map_err(|e| fail(store_message(e)))?;
            if let Some(missing) = fk
                .key
                .iter()
                .find(|k| !existing.iter().any(|c| c.eq_ignore_ascii_case(k)))
            {
                return Err(fail(format!(
                    "{}.{} references missing column {}.{}",
                    table, column.name, fk.table, missing
                )));
            }

            // SQLite only reports a parent key that is neither the primary key
            // nor a unique index once rows are written.
            let keys = store
                .unique_keys(&fk.table)
                .map_err(|e| fail(store_message(e)))?;
            if !keys.iter().any(|key| same_columns(key, &fk.key)) {
                return Err(fail(format!(
                    "{}.{} references {}({}), which is not a primary key or unique index",
                    table,
                    column.name,
                    fk.table,
                    fk.key.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Column sets are compared unordered and case-insensitively, the way
/// SQLite matches a parent key to an index.
fn same_columns(key: &[String], referenced: &[String]) -> bool {
    key.len() == referenced.len()
        && referenced
            .iter()
            .all(|r| key.iter().any(|k| k.eq_ignore_ascii_case(r)))
}

fn store_message(e: Error) -> String {
    match e {
        Error::Database(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, ForeignKeySpec, IndexSpec, TableSpec};
    use crate::store::SqliteStore;

    fn stories_table() -> TableSpec {
        TableSpec::new("stories")
            .primary_key("id")
            .index(IndexSpec::on(["name"]).unique())
            .column(ColumnSpec::new("name", ColumnType::String).size(255).not_null())
    }

    fn texts_table() -> TableSpec {
        TableSpec::new("texts")
            .primary_key("id")
            .column(ColumnSpec::foreign_key("story_id", "stories").not_null())
            .column(ColumnSpec::new("text", ColumnType::String))
    }

    #[test]
    fn apply_and_revert_change_migration() {
        let store = SqliteStore::in_memory().unwrap();
        let m = Migration::change(1, "stories", vec![SchemaOp::create_table(stories_table())])
            .unwrap();
        assert!(m.is_reversible());
        assert_eq!(m.down_ops().unwrap(), &[SchemaOp::drop_table("stories")]);

        m.apply(&store).unwrap();
        assert!(store.table_exists("stories").unwrap());

        m.revert(&store).unwrap();
        assert!(!store.table_exists("stories").unwrap());
    }

    #[test]
    fn change_rejects_non_invertible_ops() {
        let err = Migration::change(1, "cleanup", vec![SchemaOp::drop_table("stories")])
            .unwrap_err();
        assert!(err.to_string().contains("cannot be reversed"));
    }

    #[test]
    fn revert_without_down_is_irreversible() {
        let store = SqliteStore::in_memory().unwrap();
        let m = Migration::new(4, "seed", vec![SchemaOp::create_table(stories_table())]);
        m.apply(&store).unwrap();

        let err = m.revert(&store).unwrap_err();
        assert!(matches!(err, Error::Irreversible { ref unit } if unit.to_string() == "4_seed"));
        assert!(store.table_exists("stories").unwrap());
    }

    #[test]
    fn foreign_key_to_missing_table_fails_before_ddl() {
        let store = SqliteStore::in_memory().unwrap();
        let m = Migration::new(2, "texts", vec![SchemaOp::create_table(texts_table())]);

        let err = m.apply(&store).unwrap_err();
        match err {
            Error::ForeignKey { unit, table, message } => {
                assert_eq!(unit.to_string(), "2_texts");
                assert_eq!(table, "texts");
                assert!(message.contains("missing table stories"));
            }
            other => panic!("expected foreign key error, got {other:?}"),
        }
        assert!(!store.table_exists("texts").unwrap());
    }

    #[test]
    fn foreign_key_to_missing_column_fails() {
        let store = SqliteStore::in_memory().unwrap();
        store.execute_ddl("CREATE TABLE stories (uuid TEXT)").unwrap();
        let m = Migration::new(2, "texts", vec![SchemaOp::create_table(texts_table())]);

        let err = m.apply(&store).unwrap_err();
        assert!(err.to_string().contains("missing column stories.id"));
    }

    #[test]
    fn foreign_key_to_non_key_column_fails() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_ddl("CREATE TABLE stories (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let by_name = || {
            TableSpec::new("texts").primary_key("id").column(
                ColumnSpec::new("story_name", ColumnType::String)
                    .references(ForeignKeySpec::to("stories").key(["name"])),
            )
        };

        let m = Migration::new(2, "texts", vec![SchemaOp::create_table(by_name())]);
        let err = m.apply(&store).unwrap_err();
        assert!(matches!(err, Error::ForeignKey { .. }), "got {err:?}");
        assert!(err.to_string().contains("not a primary key or unique index"));
        assert!(!store.table_exists("texts").unwrap());

        store
            .execute_ddl("CREATE UNIQUE INDEX stories_name_index ON stories (name)")
            .unwrap();
        m.apply(&store).unwrap();
        store
            .execute("INSERT INTO stories (name) VALUES ('a')", &[])
            .unwrap();
        store
            .execute("INSERT INTO texts (story_name) VALUES ('a')", &[])
            .unwrap();
    }

    #[test]
    fn foreign_key_target_matches_case_insensitively() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_ddl("CREATE TABLE stories (id INTEGER PRIMARY KEY)")
            .unwrap();
        let m = Migration::new(
            2,
            "texts",
            vec![SchemaOp::create_table(
                TableSpec::new("texts")
                    .primary_key("id")
                    .column(ColumnSpec::foreign_key("story_id", "Stories")),
            )],
        );
        m.apply(&store).unwrap();
        assert!(store.table_exists("texts").unwrap());
    }

    #[test]
    fn foreign_key_within_same_migration_is_satisfied() {
        let store = SqliteStore::in_memory().unwrap();
        let m = Migration::new(
            1,
            "both",
            vec![
                SchemaOp::create_table(stories_table()),
                SchemaOp::create_table(texts_table()),
            ],
        );
        m.apply(&store).unwrap();
        assert!(store.table_exists("texts").unwrap());
    }

    #[test]
    fn ignore_index_errors_skips_failing_index() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_ddl("CREATE TABLE other (name TEXT); CREATE INDEX stories_name_index ON other (name)")
            .unwrap();

        let strict = Migration::new(1, "strict", vec![SchemaOp::create_table(stories_table())]);
        let err = strict.apply(&store).unwrap_err();
        assert!(matches!(err, Error::DdlExecution { .. }));
        // Not transactional on its own: the table statement ran before the index failed.
        store.execute_ddl("DROP TABLE stories").unwrap();

        let lenient = Migration::new(
            1,
            "lenient",
            vec![SchemaOp::create_table(stories_table().ignore_index_errors())],
        );
        lenient.apply(&store).unwrap();
        assert!(store.table_exists("stories").unwrap());
    }

    #[test]
    fn ddl_error_names_the_migration() {
        let store = SqliteStore::in_memory().unwrap();
        let m = Migration::new(9, "broken", vec![SchemaOp::sql("CREATE TABLE (")]);
        let err = m.apply(&store).unwrap_err();
        assert_eq!(err.unit().map(|u| u.to_string()).as_deref(), Some("9_broken"));
        assert!(err.to_string().starts_with("migration 9_broken failed:"));
    }
}
