//! Declarative entities: a table described by an explicit list of typed
//! fields, and the conversion between its rows and domain records.

use crate::connection::is_plain_identifier;
use crate::descriptor::{FieldType, FieldValue, FromField, StorageEnum};
use crate::error::{Error, Result};
use crate::schema::{SchemaDescription, TableSchema};
use crate::value::{Record, Value};
use std::any::{type_name, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The validated field list of an entity and the table it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    name: String,
    table: String,
    fields: Vec<(String, FieldType)>,
    identifier: usize,
}

/// Collects fields for an [`EntityDef`]; checked when built.
#[derive(Debug, Clone)]
pub struct EntityDefBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<(String, FieldType)>,
}

impl EntityDefBuilder {
    /// Overrides the table name, which otherwise is the entity name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldType) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn build(self) -> Result<EntityDef> {
        let schema_error = |msg: String| Err(Error::Schema(msg));
        if self.fields.is_empty() {
            return schema_error(format!("no fields in {}", self.name));
        }
        for (idx, (name, _)) in self.fields.iter().enumerate() {
            if !is_plain_identifier(name) {
                return schema_error(format!("{}: {name:?} is not a valid field name", self.name));
            }
            if self.fields[..idx].iter().any(|(other, _)| other == name) {
                return schema_error(format!("{}: field {name} is declared twice", self.name));
            }
        }
        let identifiers: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, (_, field))| field.is_identifier())
            .map(|(idx, _)| idx)
            .collect();
        let &[identifier] = identifiers.as_slice() else {
            return schema_error(format!(
                "{} must declare exactly one identifier, found {}",
                self.name,
                identifiers.len()
            ));
        };

        Ok(EntityDef {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            fields: self.fields,
            identifier,
        })
    }
}

impl EntityDef {
    pub fn builder(name: impl Into<String>) -> EntityDefBuilder {
        EntityDefBuilder {
            name: name.into(),
            table: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared fields, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, field)| field)
    }

    /// Name of the identifier field.
    pub fn identifier(&self) -> &str {
        &self.fields[self.identifier].0
    }

    /// `{column: ddl}` for this entity's table.
    pub fn describe(&self) -> TableSchema {
        self.fields
            .iter()
            .map(|(name, field)| (name.as_str(), field.ddl()))
            .collect()
    }

    fn expect_field(&self, name: &str) -> Result<&FieldType> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn normalize_field(&self, name: &str, value: Value) -> Result<FieldValue> {
        self.expect_field(name)?.normalize(value)
    }

    pub fn denormalize_field(&self, name: &str, value: &FieldValue) -> Result<Value> {
        self.expect_field(name)?.denormalize(value)
    }

    /// Builds a domain record from a storage row. Declared fields are
    /// normalized (absent ones become null); other keys are kept as they are
    /// in [`EntityRecord::extra`].
    pub fn normalize(&self, mut row: Record) -> Result<EntityRecord> {
        let mut values = BTreeMap::new();
        for (name, field) in &self.fields {
            let stored = row.remove(name).unwrap_or(Value::Null);
            values.insert(name.clone(), field.normalize(stored)?);
        }
        Ok(EntityRecord { values, extra: row })
    }

    /// Storage row for the declared fields of a domain record.
    pub fn denormalize(&self, record: &EntityRecord) -> Result<Record> {
        self.fields
            .iter()
            .map(|(name, field)| {
                let value = record.values.get(name).unwrap_or(&FieldValue::Null);
                Ok((name.clone(), field.denormalize(value)?))
            })
            .collect()
    }
}

/// Domain values of one entity instance, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecord {
    values: BTreeMap<String, FieldValue>,
    /// Keys of the storage row that are not declared fields, unconverted.
    pub extra: Record,
}

impl EntityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Raw domain value; `None` if the field was never set.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Typed value of a field; an unset field reads as null.
    pub fn get<T: FromField>(&self, name: &str) -> Result<T> {
        T::from_field(self.values.get(name).unwrap_or(&FieldValue::Null))
    }

    pub fn get_enum<E: StorageEnum>(&self, name: &str) -> Result<Option<E>> {
        self.values
            .get(name)
            .unwrap_or(&FieldValue::Null)
            .to_enum::<E>()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// A domain type stored in its own table.
pub trait Entity: Sized + 'static {
    /// Field list and table name. Called once, at registration.
    fn definition() -> Result<EntityDef>;

    fn from_record(record: &EntityRecord) -> Result<Self>;

    fn to_record(&self) -> EntityRecord;
}

/// Schema-wide description for a set of entity definitions.
pub fn database_description<'a>(defs: impl IntoIterator<Item = &'a EntityDef>) -> SchemaDescription {
    defs.into_iter()
        .map(|def| (def.table().to_string(), def.describe()))
        .collect()
}

/// The entities one database is made of.
///
/// Built explicitly and handed to [`crate::store::Store`], so independent
/// schemas can coexist in one process.
#[derive(Default, Clone)]
pub struct SchemaRegistry {
    entities: Vec<EntityDef>,
    by_type: HashMap<TypeId, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `E`, validating its definition. Registering a type twice is a
    /// no-op; two entities sharing a table name is a schema error.
    pub fn register<E: Entity>(&mut self) -> Result<&mut Self> {
        if self.by_type.contains_key(&TypeId::of::<E>()) {
            return Ok(self);
        }
        let def = E::definition()?;
        if let Some(clash) = self.entities.iter().find(|d| d.table() == def.table()) {
            return Err(Error::Schema(format!(
                "{} and {} both use table {}",
                clash.name(),
                def.name(),
                def.table()
            )));
        }
        self.by_type.insert(TypeId::of::<E>(), self.entities.len());
        self.entities.push(def);
        Ok(self)
    }

    /// Builder-style [`SchemaRegistry::register`].
    pub fn with<E: Entity>(mut self) -> Result<Self> {
        self.register::<E>()?;
        Ok(self)
    }

    pub fn definition<E: Entity>(&self) -> Result<&EntityDef> {
        self.by_type
            .get(&TypeId::of::<E>())
            .map(|idx| &self.entities[*idx])
            .ok_or_else(|| Error::UnknownEntity(type_name::<E>().to_string()))
    }

    /// Looks a definition up by entity name or table name.
    pub fn lookup(&self, name: &str) -> Option<&EntityDef> {
        self.entities
            .iter()
            .find(|d| d.name() == name)
            .or_else(|| self.entities.iter().find(|d| d.table() == name))
    }

    /// Definitions in registration order.
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    pub fn database_description(&self) -> SchemaDescription {
        database_description(&self.entities)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entities.iter().map(EntityDef::name))
            .finish()
    }
}
