//! Entity-level access: typed inserts and queries over a [`Connection`],
//! driven by the definitions in a [`SchemaRegistry`].

use crate::config::StoreConfig;
use crate::connection::{quote_identifier, Backend, Connection, Filter, WriteOptions};
use crate::descriptor::FieldValue;
use crate::entity::{Entity, EntityDef, SchemaRegistry};
use crate::error::{Error, Result};
use crate::kernel::Executor;
use crate::value::{Params, Record, Row};
use tracing::{debug, info};

/// A connection plus the entities stored through it.
#[derive(Debug)]
pub struct Store<X: Executor = Backend> {
    connection: Connection<X>,
    registry: SchemaRegistry,
}

impl Store<Backend> {
    /// Opens `locator` and creates every registered table that is missing.
    pub fn open(locator: &str, registry: SchemaRegistry) -> Result<Self> {
        Self::bootstrap(Connection::connect(locator)?, registry)
    }

    pub fn open_with_config(config: &StoreConfig, registry: SchemaRegistry) -> Result<Self> {
        Self::bootstrap(Connection::from_config(config)?, registry)
    }
}

impl<X: Executor> Store<X> {
    /// Wraps an open connection, creating the registered tables.
    pub fn bootstrap(connection: Connection<X>, registry: SchemaRegistry) -> Result<Self> {
        // registration order; the description map is sorted by table name
        for def in registry.entities() {
            connection.create_table(def.table(), &def.describe(), connection.if_not_exists())?;
        }
        info!(entities = ?registry, "store ready");
        Ok(Self {
            connection,
            registry,
        })
    }

    pub fn connection(&self) -> &Connection<X> {
        &self.connection
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn write_options(&self, def: &EntityDef) -> WriteOptions {
        WriteOptions {
            commit: self.connection.defaults().commit,
            id_key: Some(def.identifier().to_string()),
        }
    }

    fn materialize<E: Entity>(def: &EntityDef, row: Row) -> Result<E> {
        E::from_record(&def.normalize(row.into_record())?)
    }

    /// Stores `entity` under a fresh identifier and returns it as stored.
    /// Any identifier already set on `entity` is ignored.
    pub fn insert<E: Entity>(&self, entity: &E) -> Result<E> {
        let def = self.registry.definition::<E>()?;
        let mut record = def.denormalize(&entity.to_record())?;
        record.remove(def.identifier());
        let created = self
            .connection
            .insert_with(def.table(), &record, &self.write_options(def))?;
        E::from_record(&def.normalize(created)?)
    }

    /// Looks an entity up by identifier.
    pub fn fetch<E: Entity>(&self, id: i64) -> Result<Option<E>> {
        let def = self.registry.definition::<E>()?;
        self.find(&identifier_filter(def, id))
    }

    /// First entity matching `filter`.
    pub fn find<E: Entity>(&self, filter: &Filter) -> Result<Option<E>> {
        let def = self.registry.definition::<E>()?;
        self.connection
            .get_one_or_none(def.table(), &[], Some(filter))?
            .map(|row| Self::materialize(def, row))
            .transpose()
    }

    /// Every entity matching `filter`, or every entity when it is `None`.
    pub fn all<E: Entity>(&self, filter: Option<&Filter>) -> Result<Vec<E>> {
        let def = self.registry.definition::<E>()?;
        self.connection
            .get_all(def.table(), &[], filter)?
            .into_iter()
            .map(|row| Self::materialize(def, row))
            .collect()
    }

    pub fn count<E: Entity>(&self, filter: Option<&Filter>) -> Result<i64> {
        let def = self.registry.definition::<E>()?;
        count_rows(&self.connection, def, filter)
    }

    pub fn delete<E: Entity>(&self, filter: &Filter) -> Result<usize> {
        let def = self.registry.definition::<E>()?;
        self.connection.delete(def.table(), filter)
    }

    /// Updates some fields of the entity with identifier `id`.
    pub fn change<E: Entity>(&self, id: i64, fields: &[(&str, FieldValue)]) -> Result<()> {
        let def = self.registry.definition::<E>()?;
        let mut stored = Record::new();
        for (name, value) in fields {
            stored.insert(name.to_string(), def.denormalize_field(name, value)?);
        }
        debug!(entity = def.name(), id, fields = stored.len(), "changing entity");
        self.connection.change(
            def.table(),
            def.identifier(),
            &identifier_filter(def, id),
            &stored,
        )
    }

    pub fn close(self) -> Result<()> {
        info!("closing store");
        self.connection.close()
    }
}

/// `"<identifier>" = :<identifier>`, bound to `id`.
fn identifier_filter(def: &EntityDef, id: i64) -> Filter {
    let key = def.identifier();
    Filter::new(format!("{} = :{key}", quote_identifier(key))).bind(key, id)
}

pub(crate) fn count_rows<X: Executor>(
    connection: &Connection<X>,
    def: &EntityDef,
    filter: Option<&Filter>,
) -> Result<i64> {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(def.table()));
    let params = match filter {
        Some(filter) => {
            sql.push_str(&format!(" WHERE {}", filter.clause));
            filter.params.clone()
        }
        None => Params::new(),
    };
    sql.push(';');
    connection
        .fetch_one_or_none(&sql, &params)?
        .and_then(|row| row.values().first().and_then(|v| v.as_i64()))
        .ok_or(Error::Conversion {
            expected: "row count",
            found: "no rows",
        })
}
