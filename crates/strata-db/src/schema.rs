//! Declarative table, column, index and foreign-key descriptions, plus the
//! SQLite DDL generated from them.
//!
//! These are plain values: building a [`TableSpec`] touches no database.
//! A [`crate::SchemaOp`] carries them into a migration, and the migration
//! turns them into statements when it is applied.

use serde::{Deserialize, Serialize};

/// Size used for `String` columns that do not declare one.
pub const DEFAULT_STRING_SIZE: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    String,
    Text,
    DateTime,
    Boolean,
    Float,
    Blob,
}

impl ColumnType {
    fn sql(self, size: Option<u32>) -> String {
        match self {
            ColumnType::Integer => "integer".to_string(),
            ColumnType::String => format!("varchar({})", size.unwrap_or(DEFAULT_STRING_SIZE)),
            ColumnType::Text => "text".to_string(),
            ColumnType::DateTime => "timestamp".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Float => "double precision".to_string(),
            ColumnType::Blob => "blob".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    fn sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// The target of a foreign-key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub table: String,
    #[serde(default = "default_key")]
    pub key: Vec<String>,
    #[serde(default)]
    pub on_delete: Option<ReferentialAction>,
}

fn default_key() -> Vec<String> {
    vec!["id".to_string()]
}

impl ForeignKeySpec {
    /// Reference `table(id)`.
    pub fn to(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: default_key(),
            on_delete: None,
        }
    }

    pub fn key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    fn sql(&self) -> String {
        let key = self
            .key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("REFERENCES {}({key})", quote_ident(&self.table));
        if let Some(action) = self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Raw SQL default expression, e.g. `CURRENT_TIMESTAMP` or `'draft'`.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub references: Option<ForeignKeySpec>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            size: None,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    /// Auto-incrementing integer primary key.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            nullable: false,
            primary_key: true,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    /// Integer column referencing `table(id)`.
    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            references: Some(ForeignKeySpec::to(table)),
            ..Self::new(name, ColumnType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn references(mut self, fk: ForeignKeySpec) -> Self {
        self.references = Some(fk);
        self
    }

    /// Column definition as it appears inside `CREATE TABLE` or
    /// `ALTER TABLE ... ADD COLUMN`.
    pub fn definition_sql(&self) -> String {
        let mut sql = format!(
            "{} {}",
            quote_ident(&self.name),
            self.column_type.sql(self.size)
        );
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.column_type == ColumnType::Integer {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some(fk) = &self.references {
            sql.push(' ');
            sql.push_str(&fk.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or `<table>_<col>[_<col>...]_index`.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{table}_{}_index", self.columns.join("_")),
        }
    }

    pub fn create_sql(&self, table: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX {} ON {} ({columns})",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(&self.resolved_name(table)),
            quote_ident(table),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Index statements are best-effort: a failing one is logged and skipped.
    #[serde(default)]
    pub ignore_index_errors: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            ignore_index_errors: false,
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(self, name: impl Into<String>) -> Self {
        self.column(ColumnSpec::primary_key(name))
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn ignore_index_errors(mut self) -> Self {
        self.ignore_index_errors = true;
        self
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnSpec, &ForeignKeySpec)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
    }

    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.definition_sql()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE {} (\n{columns}\n)", quote_ident(&self.name))
    }
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
