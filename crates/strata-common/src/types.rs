use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Table that records applied migrations unless configured otherwise.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Totally ordered identifier of a migration. Either a plain sequence number
/// (`1`, `2`, ...) or a timestamp such as `20240101120000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrdinalKey(u64);

impl OrdinalKey {
    /// The key that sorts before every real migration. Migrating down to it
    /// reverts everything.
    pub const ZERO: OrdinalKey = OrdinalKey(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for OrdinalKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrdinalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrdinalKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Identity of a migration as reported in logs and errors: `<key>_<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub key: OrdinalKey,
    pub name: String,
}

impl UnitId {
    pub fn new(key: OrdinalKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.key, self.name)
    }
}
