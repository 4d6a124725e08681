use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{Error, OrdinalKey, Result, UnitId};
use tracing::{error, info, warn};

use crate::ledger::{AppliedLedger, LedgerEntry};
use crate::migrations::Migration;
use crate::ops::SchemaOp;
use crate::store::SchemaStore;

pub use strata_common::DEFAULT_LEDGER_TABLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Lifecycle of a migration as seen by the runner.
///
/// `Pending -> Applying -> Applied | Failed` and
/// `Applied -> Reverting -> Pending | RevertFailed`. Failed states are never
/// retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Applying,
    Applied,
    Failed,
    Reverting,
    RevertFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub unit: UnitId,
    pub state: UnitState,
}

/// What a successful `migrate_up` / `migrate_down` changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub direction: Direction,
    pub transitions: Vec<Transition>,
}

impl MigrationReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            transitions: Vec::new(),
        }
    }

    fn push(&mut self, unit: UnitId, state: UnitState) {
        self.transitions.push(Transition { unit, state });
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitStatus {
    pub unit: UnitId,
    pub state: UnitState,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
    /// Not applied, but older than the latest applied migration. `migrate_up`
    /// never picks these up.
    pub out_of_order: bool,
}

/// Applies and reverts an ordered set of migrations against one store.
///
/// Each migration runs in its own transaction together with its ledger
/// write, so a migration is either applied and recorded or neither. A batch
/// stops at the first failure; earlier migrations stay applied.
///
/// The runner assumes it is the only writer. Concurrent runners are
/// serialized by the store's write lock, not by anything here.
pub struct MigrationRunner<'a> {
    store: &'a dyn SchemaStore,
    units: Vec<Migration>,
    ledger_table: String,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> MigrationRunner<'a> {
    /// Sorts `units` by key. Two units sharing a key, or a unit using key
    /// 0 (reserved as the "before first" revert target), is a configuration
    /// error, reported before anything touches the store.
    pub fn new(store: &'a dyn SchemaStore, mut units: Vec<Migration>) -> Result<Self> {
        units.sort_by_key(|u| u.version);
        if let Some(first) = units.first().filter(|u| u.version == OrdinalKey::ZERO) {
            return Err(Error::Config(format!(
                "migration {}: key 0 is reserved for reverting everything",
                first.id()
            )));
        }
        if let Some(pair) = units.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(Error::DuplicateOrdinalKey {
                key: pair[0].version,
                first: pair[0].id().to_string(),
                second: pair[1].id().to_string(),
            });
        }

        Ok(Self {
            store,
            units,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            cancel: None,
        })
    }

    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Checked between migrations; once set, the batch halts with
    /// [`Error::Cancelled`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn units(&self) -> &[Migration] {
        &self.units
    }

    pub fn ledger(&self) -> AppliedLedger<'a> {
        AppliedLedger::new(self.store, self.ledger_table.clone())
    }

    fn find(&self, key: OrdinalKey) -> Option<&Migration> {
        self.units
            .binary_search_by_key(&key, |u| u.version)
            .ok()
            .map(|i| &self.units[i])
    }

    /// Bootstrap the ledger and check it against the known migrations and
    /// the live schema. Returns the ledger entries, ascending.
    ///
    /// Every recorded key must name a known migration, and every table the
    /// recorded migrations leave behind must exist. Nothing is repaired.
    pub fn verify(&self) -> Result<Vec<LedgerEntry>> {
        let ledger = self.ledger();
        ledger.bootstrap()?;
        let applied = ledger.list_applied()?;

        let mut expected: BTreeMap<String, UnitId> = BTreeMap::new();
        for entry in &applied {
            let unit = self.find(entry.key).ok_or_else(|| Error::LedgerInconsistency {
                unit: format!("{}_{}", entry.key, entry.name),
                detail: "recorded as applied but no such migration is known".into(),
            })?;
            if unit.name != entry.name {
                warn!(
                    "ledger names {} as {:?}, known as {:?}",
                    entry.key, entry.name, unit.name
                );
            }

            for op in unit.up_ops() {
                match op {
                    SchemaOp::CreateTable(spec) => {
                        expected.insert(spec.name.clone(), unit.id());
                    }
                    SchemaOp::DropTable { name } => {
                        expected.remove(name);
                    }
                    SchemaOp::RenameTable { from, to } => {
                        if let Some(creator) = expected.remove(from) {
                            expected.insert(to.clone(), creator);
                        }
                    }
                    _ => {}
                }
            }
        }

        for (table, creator) in expected {
            if !self.store.table_exists(&table)? {
                return Err(Error::LedgerInconsistency {
                    unit: creator.to_string(),
                    detail: format!("recorded as applied but table {table} does not exist"),
                });
            }
        }

        Ok(applied)
    }

    /// Apply every pending migration with a key above the latest applied one
    /// and at most `target` (all of them when `None`), in ascending order.
    pub fn migrate_up(&self, target: Option<OrdinalKey>) -> Result<MigrationReport> {
        if let Some(target) = target {
            self.check_target(target, false)?;
        }
        let applied = self.verify()?;
        let latest = applied.last().map(|e| e.key);
        let recorded: HashSet<OrdinalKey> = applied.iter().map(|e| e.key).collect();

        if let Some(latest) = latest {
            for unit in &self.units {
                if unit.version < latest && !recorded.contains(&unit.version) {
                    warn!(
                        "{} is older than latest applied {latest} and will not be applied",
                        unit.id()
                    );
                }
            }
        }

        let pending: Vec<&Migration> = self
            .units
            .iter()
            .filter(|u| latest.is_none_or(|l| u.version > l))
            .filter(|u| target.is_none_or(|t| u.version <= t))
            .collect();

        if pending.is_empty() {
            info!("schema is up to date");
        }

        let ledger = self.ledger();
        let mut report = MigrationReport::new(Direction::Up);
        for unit in pending {
            self.check_cancelled(report.len())?;
            self.apply_one(&ledger, unit)?;
            report.push(unit.id(), UnitState::Applied);
        }
        Ok(report)
    }

    /// Revert applied migrations with a key above `target`, newest first.
    /// [`OrdinalKey::ZERO`] reverts everything.
    pub fn migrate_down(&self, target: OrdinalKey) -> Result<MigrationReport> {
        self.check_target(target, true)?;
        let applied = self.verify()?;

        let ledger = self.ledger();
        let mut report = MigrationReport::new(Direction::Down);
        for entry in applied.iter().rev().filter(|e| e.key > target) {
            self.check_cancelled(report.len())?;
            let unit = self.find(entry.key).ok_or_else(|| Error::LedgerInconsistency {
                unit: entry.key.to_string(),
                detail: "no such migration is known".into(),
            })?;
            self.revert_one(&ledger, unit)?;
            report.push(unit.id(), UnitState::Pending);
        }

        if report.is_empty() {
            info!("nothing to revert");
        }
        Ok(report)
    }

    /// Per-migration view of the ledger, ascending by key.
    pub fn status(&self) -> Result<Vec<UnitStatus>> {
        let ledger = self.ledger();
        ledger.bootstrap()?;
        let applied = ledger.list_applied()?;
        let latest = applied.last().map(|e| e.key);
        let by_key: HashMap<OrdinalKey, &LedgerEntry> =
            applied.iter().map(|e| (e.key, e)).collect();

        Ok(self
            .units
            .iter()
            .map(|unit| {
                let entry = by_key.get(&unit.version);
                UnitStatus {
                    unit: unit.id(),
                    state: if entry.is_some() {
                        UnitState::Applied
                    } else {
                        UnitState::Pending
                    },
                    applied_at: entry.map(|e| e.applied_at),
                    reversible: unit.is_reversible(),
                    out_of_order: entry.is_none() && latest.is_some_and(|l| unit.version < l),
                }
            })
            .collect())
    }

    fn apply_one(&self, ledger: &AppliedLedger<'_>, unit: &Migration) -> Result<()> {
        let id = unit.id();
        info!(state = ?UnitState::Applying, "applying {id}");

        self.store.begin().map_err(|e| attribute(&id, e))?;
        let result = unit
            .apply(self.store)
            .and_then(|()| ledger.record_applied(unit.version, &unit.name, Utc::now()))
            .and_then(|()| self.store.commit());

        match result {
            Ok(()) => {
                info!(state = ?UnitState::Applied, "applied {id}");
                Ok(())
            }
            Err(e) => Err(self.abort(&id, UnitState::Failed, e)),
        }
    }

    fn revert_one(&self, ledger: &AppliedLedger<'_>, unit: &Migration) -> Result<()> {
        let id = unit.id();
        if !unit.is_reversible() {
            error!(state = ?UnitState::RevertFailed, "{id} has no reverse action");
            return Err(Error::Irreversible { unit: id });
        }
        info!(state = ?UnitState::Reverting, "reverting {id}");

        self.store.begin().map_err(|e| attribute(&id, e))?;
        let result = unit
            .revert(self.store)
            .and_then(|()| ledger.remove_applied(unit.version))
            .and_then(|()| self.store.commit());

        match result {
            Ok(()) => {
                info!(state = ?UnitState::Pending, "reverted {id}");
                Ok(())
            }
            Err(e) => Err(self.abort(&id, UnitState::RevertFailed, e)),
        }
    }

    /// Roll back the open transaction and return the error to surface.
    fn abort(&self, id: &UnitId, state: UnitState, e: Error) -> Error {
        if let Err(rollback) = self.store.rollback() {
            warn!("rollback after {id} failed: {rollback}");
        }
        let e = attribute(id, e);
        error!(state = ?state, "{e}");
        e
    }

    fn check_target(&self, target: OrdinalKey, allow_zero: bool) -> Result<()> {
        if (allow_zero && target == OrdinalKey::ZERO) || self.find(target).is_some() {
            Ok(())
        } else {
            Err(Error::UnknownTarget(target))
        }
    }

    fn check_cancelled(&self, completed: usize) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => {
                warn!("cancelled after {completed} migration(s)");
                Err(Error::Cancelled { completed })
            }
            _ => Ok(()),
        }
    }
}

/// Tie a store-level error to the migration it happened in.
fn attribute(id: &UnitId, e: Error) -> Error {
    match e {
        Error::Database(message) => Error::DdlExecution {
            unit: id.clone(),
            message,
        },
        other => other,
    }
}
