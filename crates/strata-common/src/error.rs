use thiserror::Error;

use crate::types::{OrdinalKey, UnitId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("duplicate ordinal key {key}: {first} and {second}")]
    DuplicateOrdinalKey {
        key: OrdinalKey,
        first: String,
        second: String,
    },

    #[error("migration {unit} failed: {message}")]
    DdlExecution { unit: UnitId, message: String },

    #[error("migration {unit} failed: foreign key on {table}: {message}")]
    ForeignKey {
        unit: UnitId,
        table: String,
        message: String,
    },

    #[error("migration {unit} is irreversible")]
    Irreversible { unit: UnitId },

    #[error("ledger inconsistency at {unit}: {detail}")]
    LedgerInconsistency { unit: String, detail: String },

    #[error("unknown migration target: {0}")]
    UnknownTarget(OrdinalKey),

    #[error("cancelled after {completed} migration(s)")]
    Cancelled { completed: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The migration this error is attributed to, when there is one.
    pub fn unit(&self) -> Option<&UnitId> {
        match self {
            Error::DdlExecution { unit, .. }
            | Error::ForeignKey { unit, .. }
            | Error::Irreversible { unit } => Some(unit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::types::{OrdinalKey, UnitId};

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::DdlExecution {
            unit: UnitId::new(OrdinalKey::new(2), "create_texts"),
            message: "near \"(\": syntax error".into(),
        };
        assert_eq!(
            e.to_string(),
            "migration 2_create_texts failed: near \"(\": syntax error"
        );

        let e = Error::Irreversible {
            unit: UnitId::new(OrdinalKey::new(7), "seed"),
        };
        assert_eq!(e.to_string(), "migration 7_seed is irreversible");

        let e = Error::DuplicateOrdinalKey {
            key: OrdinalKey::new(3),
            first: "3_a".into(),
            second: "3_b".into(),
        };
        assert_eq!(e.to_string(), "duplicate ordinal key 3: 3_a and 3_b");
    }

    #[test]
    fn unit_is_exposed_for_execution_errors_only() {
        let e = Error::ForeignKey {
            unit: UnitId::new(OrdinalKey::new(2), "texts"),
            table: "texts".into(),
            message: "stories does not exist".into(),
        };
        assert_eq!(e.unit().map(|u| u.to_string()).as_deref(), Some("2_texts"));
        assert!(Error::Cancelled { completed: 1 }.unit().is_none());
    }
}
