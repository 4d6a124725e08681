use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CANDIDATE_NAMES: [&str; 3] = ["strata.yml", "strata.yaml", "strata.toml"];

/// Locates and parses the strata config file.
///
/// Lookup order: an explicit path, then `strata.{yml,yaml,toml}` in the
/// working directory, then the same names under the user config directory
/// (`~/.config/strata` on Linux). No file at all yields the defaults.
pub struct ConfigLoader {
    search_dirs: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(dir) = dirs::config_dir() {
            search_dirs.push(dir.join("strata"));
        }
        Self { search_dirs }
    }

    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Load the config from `explicit` if given, otherwise from the first
    /// candidate file found in the search directories.
    pub fn load(&self, explicit: Option<&Path>) -> Result<AppConfig> {
        let config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match self.find() {
                Some(path) => Self::load_from(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    AppConfig::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn find(&self) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .flat_map(|dir| CANDIDATE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }

    pub fn load_from(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("config loaded from {}", path.display());
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_dirs(vec![dir.path().to_path_buf()]);
        let config = loader.load(None).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn loads_partial_yaml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("strata.yml"),
            "database:\n  path: app.db\nmigrations:\n  directory: db/migrations\n",
        )
        .unwrap();

        let loader = ConfigLoader::with_dirs(vec![dir.path().to_path_buf()]);
        let config = loader.load(None).unwrap();
        assert_eq!(config.database.path, PathBuf::from("app.db"));
        assert_eq!(config.database.ledger_table, "schema_migrations");
        assert_eq!(
            config.migrations.directory,
            Some(PathBuf::from("db/migrations"))
        );
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[database]\nledger_table = \"applied\"\nbusy_timeout_ms = 250\n\n[log]\njson = true\n",
        )
        .unwrap();

        let config = ConfigLoader::with_dirs(vec![]).load(Some(&path)).unwrap();
        assert_eq!(config.database.ledger_table, "applied");
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(config.log.json);
    }

    #[test]
    fn rejects_unknown_extension_and_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(ConfigLoader::load_from(&path).is_err());

        let path = dir.path().join("strata.yml");
        std::fs::write(&path, "database:\n  ledger_table: \"bad name\"\n").unwrap();
        let err = ConfigLoader::with_dirs(vec![]).load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("ledger_table"));
    }
}
