//! Loading migrations from authored files.
//!
//! A migrations directory holds one file per migration named
//! `<key>_<name>.yml` (or `.yaml` / `.toml`), e.g. `001_stories_create_table.yml`.
//! The key comes from the numeric filename prefix unless the file sets
//! `version` explicitly. A file declares either `up` (plus an optional
//! `down`) or `change`, whose reverse is derived automatically:
//!
//! ```yaml
//! change:
//!   - create_table:
//!       name: stories
//!       ignore_index_errors: true
//!       columns:
//!         - { name: id, type: integer, primary_key: true, nullable: false }
//!         - { name: name, type: string, size: 255, nullable: false }
//!       indexes:
//!         - { columns: [name], unique: true }
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use strata_common::{Error, OrdinalKey, Result};
use tracing::{debug, info};

use crate::migrations::Migration;
use crate::ops::SchemaOp;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationFile {
    #[serde(default)]
    version: Option<OrdinalKey>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    up: Option<Vec<SchemaOp>>,
    #[serde(default)]
    down: Option<Vec<SchemaOp>>,
    #[serde(default)]
    change: Option<Vec<SchemaOp>>,
}

/// Load every migration file in `dir`, sorted by key. Files with other
/// extensions are skipped. Duplicate keys are left for the runner to reject.
pub fn load_dir(dir: &Path) -> Result<Vec<Migration>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Config(format!(
            "failed to read migrations directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || !is_migration_file(&path) {
            debug!("skipping {}", path.display());
            continue;
        }
        migrations.push(load_file(&path)?);
    }

    migrations.sort_by_key(|m| m.version);
    info!(
        "loaded {} migration(s) from {}",
        migrations.len(),
        dir.display()
    );
    Ok(migrations)
}

fn is_migration_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml" | "toml")
    )
}

pub fn load_file(path: &Path) -> Result<Migration> {
    let contents = std::fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config(format!("bad migration filename: {}", path.display())))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let file: MigrationFile = match ext {
        "yml" | "yaml" => from_yaml(&contents)
            .map_err(|e| Error::Config(format!("{}: YAML parse error: {e}", path.display())))?,
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: TOML parse error: {e}", path.display())))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported migration extension: {other}"
            )));
        }
    };

    build(stem, file).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse YAML with enum variants written as single-key maps
/// (`- create_table: {...}`) rather than `!create_table` tags.
pub(crate) fn from_yaml<T: DeserializeOwned>(contents: &str) -> serde_yaml::Result<T> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(
        contents,
    ))
}

fn build(stem: &str, file: MigrationFile) -> Result<Migration> {
    let (prefix_key, stem_name) = split_stem(stem);
    let version = file.version.or(prefix_key).ok_or_else(|| {
        Error::Config("no numeric filename prefix and no explicit version".into())
    })?;
    let name = file.name.unwrap_or_else(|| stem_name.to_string());

    match (file.change, file.up, file.down) {
        (Some(ops), None, None) => Migration::change(version.get(), name, ops),
        (None, Some(up), down) => {
            let migration = Migration::new(version.get(), name, up);
            Ok(match down {
                Some(down) => migration.with_down(down),
                None => migration,
            })
        }
        (Some(_), _, _) => Err(Error::Config(
            "`change` cannot be combined with `up` or `down`".into(),
        )),
        (None, None, _) => Err(Error::Config("missing `up` or `change`".into())),
    }
}

/// `"001_stories_create_table"` -> `(Some(1), "stories_create_table")`.
fn split_stem(stem: &str) -> (Option<OrdinalKey>, &str) {
    match stem.split_once('_') {
        Some((prefix, rest)) => match prefix.parse() {
            Ok(key) => (Some(key), rest),
            Err(_) => (None, stem),
        },
        None => (stem.parse().ok(), stem),
    }
}
