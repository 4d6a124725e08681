use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSpec, IndexSpec, TableSpec, quote_ident};

/// One schema change inside a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOp {
    CreateTable(TableSpec),
    DropTable { name: String },
    CreateIndex { table: String, index: IndexSpec },
    DropIndex { name: String },
    AddColumn { table: String, column: ColumnSpec },
    DropColumn { table: String, column: String },
    RenameTable { from: String, to: String },
    /// Opaque SQL. Never invertible and invisible to the consistency check.
    Sql(String),
}

/// A generated statement. Best-effort statements may fail without failing
/// the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub best_effort: bool,
}

impl Statement {
    fn required(sql: String) -> Self {
        Self {
            sql,
            best_effort: false,
        }
    }
}

impl SchemaOp {
    pub fn create_table(table: TableSpec) -> Self {
        SchemaOp::CreateTable(table)
    }

    pub fn drop_table(name: impl Into<String>) -> Self {
        SchemaOp::DropTable { name: name.into() }
    }

    pub fn create_index(table: impl Into<String>, index: IndexSpec) -> Self {
        SchemaOp::CreateIndex {
            table: table.into(),
            index,
        }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        SchemaOp::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn sql(sql: impl Into<String>) -> Self {
        SchemaOp::Sql(sql.into())
    }

    pub fn statements(&self) -> Vec<Statement> {
        match self {
            SchemaOp::CreateTable(table) => {
                let mut out = vec![Statement::required(table.create_sql())];
                out.extend(table.indexes.iter().map(|index| Statement {
                    sql: index.create_sql(&table.name),
                    best_effort: table.ignore_index_errors,
                }));
                out
            }
            SchemaOp::DropTable { name } => {
                vec![Statement::required(format!("DROP TABLE {}", quote_ident(name)))]
            }
            SchemaOp::CreateIndex { table, index } => {
                vec![Statement::required(index.create_sql(table))]
            }
            SchemaOp::DropIndex { name } => {
                vec![Statement::required(format!("DROP INDEX {}", quote_ident(name)))]
            }
            SchemaOp::AddColumn { table, column } => vec![Statement::required(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                column.definition_sql()
            ))],
            SchemaOp::DropColumn { table, column } => vec![Statement::required(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            ))],
            SchemaOp::RenameTable { from, to } => vec![Statement::required(format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            ))],
            SchemaOp::Sql(sql) => vec![Statement::required(sql.clone())],
        }
    }

    /// The op that undoes this one, if it can be derived without knowing
    /// the prior schema.
    pub fn inverse(&self) -> Option<SchemaOp> {
        match self {
            SchemaOp::CreateTable(table) => Some(SchemaOp::drop_table(&table.name)),
            SchemaOp::CreateIndex { table, index } => Some(SchemaOp::DropIndex {
                name: index.resolved_name(table),
            }),
            SchemaOp::AddColumn { table, column } => Some(SchemaOp::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            SchemaOp::RenameTable { from, to } => Some(SchemaOp::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),
            SchemaOp::DropTable { .. }
            | SchemaOp::DropIndex { .. }
            | SchemaOp::DropColumn { .. }
            | SchemaOp::Sql(_) => None,
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            SchemaOp::CreateTable(table) => format!("create_table {}", table.name),
            SchemaOp::DropTable { name } => format!("drop_table {name}"),
            SchemaOp::CreateIndex { table, index } => {
                format!("create_index {}", index.resolved_name(table))
            }
            SchemaOp::DropIndex { name } => format!("drop_index {name}"),
            SchemaOp::AddColumn { table, column } => {
                format!("add_column {table}.{}", column.name)
            }
            SchemaOp::DropColumn { table, column } => format!("drop_column {table}.{column}"),
            SchemaOp::RenameTable { from, to } => format!("rename_table {from} -> {to}"),
            SchemaOp::Sql(_) => "sql".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn create_table_emits_index_statements_after_table() {
        let op = SchemaOp::create_table(
            TableSpec::new("stories")
                .ignore_index_errors()
                .primary_key("id")
                .index(IndexSpec::on(["name"]).unique())
                .column(ColumnSpec::new("name", ColumnType::String)),
        );
        let stmts = op.statements();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.starts_with("CREATE TABLE \"stories\""));
        assert!(!stmts[0].best_effort);
        assert!(stmts[1].sql.starts_with("CREATE UNIQUE INDEX"));
        assert!(stmts[1].best_effort);
    }

    #[test]
    fn invertible_ops_round_trip_through_inverse() {
        let rename = SchemaOp::RenameTable {
            from: "a".into(),
            to: "b".into(),
        };
        assert_eq!(rename.inverse().and_then(|op| op.inverse()), Some(rename));

        let index = SchemaOp::create_index("stories", IndexSpec::on(["name"]));
        assert_eq!(
            index.inverse(),
            Some(SchemaOp::DropIndex {
                name: "stories_name_index".into()
            })
        );

        let add = SchemaOp::add_column("texts", ColumnSpec::new("lang", ColumnType::Text));
        assert_eq!(
            add.inverse(),
            Some(SchemaOp::DropColumn {
                table: "texts".into(),
                column: "lang".into()
            })
        );
    }

    #[test]
    fn destructive_ops_have_no_inverse() {
        assert!(SchemaOp::drop_table("stories").inverse().is_none());
        assert!(SchemaOp::sql("DELETE FROM stories").inverse().is_none());
    }

    #[test]
    fn ops_deserialize_from_tagged_yaml() {
        let ops: Vec<SchemaOp> = crate::source::from_yaml(
            r#"
- create_table:
    name: stories
    columns:
      - { name: id, type: integer, primary_key: true, nullable: false }
- create_index:
    table: stories
    index: { columns: [id], unique: true }
- sql: "UPDATE stories SET id = id"
"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].describe(), "create_table stories");
        assert_eq!(ops[1].describe(), "create_index stories_id_index");
        assert!(matches!(&ops[2], SchemaOp::Sql(s) if s.starts_with("UPDATE")));
    }
}
