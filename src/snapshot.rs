//! Whole-database export and import in storage representation.
//!
//! A [`Snapshot`] holds every registered table as a mapping from identifier to
//! stored record. Restoring assigns fresh identifiers and rewrites foreign keys
//! to match, so a snapshot can be loaded into any empty database with the same
//! registry. No serialization format is imposed: the types are plain serde.

use crate::connection::WriteOptions;
use crate::descriptor::FieldKind;
use crate::entity::EntityDef;
use crate::error::{Error, Result};
use crate::kernel::Executor;
use crate::store::{count_rows, Store};
use crate::value::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Stored records of every table, keyed by table name then identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tables: BTreeMap<String, BTreeMap<i64, Record>>,
}

impl Snapshot {
    pub fn table(&self, name: &str) -> Option<&BTreeMap<i64, Record>> {
        self.tables.get(name)
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Old identifier to new identifier, per table, produced by a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    tables: BTreeMap<String, BTreeMap<i64, i64>>,
}

impl IdMap {
    pub fn get(&self, table: &str, old: i64) -> Option<i64> {
        self.tables.get(table)?.get(&old).copied()
    }

    fn insert(&mut self, table: &str, old: i64, new: i64) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(old, new);
    }
}

impl<X: Executor> Store<X> {
    /// Reads every registered table.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        for def in self.registry().entities() {
            let mut rows = BTreeMap::new();
            for row in self.connection().get_all(def.table(), &[], None)? {
                let record = row.into_record();
                let id = record
                    .get(def.identifier())
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        Error::Snapshot(format!("{} row without an identifier", def.table()))
                    })?;
                rows.insert(id, record);
            }
            debug!(table = def.table(), rows = rows.len(), "table captured");
            snapshot.tables.insert(def.table().to_string(), rows);
        }
        Ok(snapshot)
    }

    /// Loads `snapshot` into this store's tables, which must all be empty.
    ///
    /// Tables are filled in registration order and rows in ascending
    /// identifier order, so a foreign key may only point at a table registered
    /// earlier or at a lower identifier of its own table.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<IdMap> {
        let registry = self.registry();
        if let Some(unknown) = snapshot
            .tables
            .keys()
            .find(|table| !registry.entities().iter().any(|d| d.table() == table.as_str()))
        {
            return Err(Error::Snapshot(format!("table {unknown} is not registered")));
        }
        for def in registry.entities() {
            if count_rows(self.connection(), def, None)? != 0 {
                return Err(Error::Snapshot(format!("table {} is not empty", def.table())));
            }
        }

        let mut ids = IdMap::default();
        for def in registry.entities() {
            let Some(rows) = snapshot.table(def.table()) else {
                continue;
            };
            let options = WriteOptions {
                commit: true,
                id_key: Some(def.identifier().to_string()),
            };
            for (old, record) in rows {
                let record = self.remap(def, record, &ids)?;
                let created = self
                    .connection()
                    .insert_with(def.table(), &record, &options)?;
                let new = created
                    .get(def.identifier())
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::InsertFailed {
                        table: def.table().to_string(),
                    })?;
                ids.insert(def.table(), *old, new);
            }
        }
        info!(records = snapshot.len(), "snapshot restored");
        Ok(ids)
    }

    /// Drops the identifier and rewrites foreign keys to restored ids.
    fn remap(&self, def: &EntityDef, record: &Record, ids: &IdMap) -> Result<Record> {
        let mut out = record.clone();
        out.remove(def.identifier());
        for (name, field) in def.fields() {
            let FieldKind::ForeignKey { references } = field.kind() else {
                continue;
            };
            let Some(old) = out.get(name).and_then(Value::as_i64) else {
                continue;
            };
            let target = self.registry().lookup(references).ok_or_else(|| {
                Error::Snapshot(format!("{}.{name} references unknown entity {references}", def.name()))
            })?;
            let new = ids.get(target.table(), old).ok_or_else(|| {
                Error::Snapshot(format!(
                    "{}.{name} = {old} has no matching {} row",
                    def.table(),
                    target.table()
                ))
            })?;
            out.insert(name.to_string(), Value::Integer(new));
        }
        Ok(out)
    }
}
