//! Built-in migrations, used when no migrations directory is configured.

use strata_common::Result;

use crate::migrations::Migration;
use crate::ops::SchemaOp;
use crate::schema::{ColumnSpec, ColumnType, IndexSpec, TableSpec};

/// `stories` with a unique index on `name`, and `texts` whose rows each
/// belong to a story.
pub fn stories_create_table() -> Result<Migration> {
    let stories = TableSpec::new("stories")
        .ignore_index_errors()
        .primary_key("id")
        .index(IndexSpec::on(["name"]).unique())
        .column(
            ColumnSpec::new("name", ColumnType::String)
                .size(255)
                .not_null(),
        )
        .column(ColumnSpec::new("created_at", ColumnType::DateTime))
        .column(ColumnSpec::new("updated_at", ColumnType::DateTime));

    let texts = TableSpec::new("texts")
        .ignore_index_errors()
        .primary_key("id")
        .column(ColumnSpec::foreign_key("story_id", "stories").not_null())
        .column(ColumnSpec::new("text", ColumnType::String))
        .column(ColumnSpec::new("created_at", ColumnType::DateTime).not_null())
        .column(ColumnSpec::new("updated_at", ColumnType::DateTime));

    Migration::change(
        1,
        "stories_create_table",
        vec![SchemaOp::create_table(stories), SchemaOp::create_table(texts)],
    )
}

pub fn builtin() -> Result<Vec<Migration>> {
    Ok(vec![stories_create_table()?])
}
