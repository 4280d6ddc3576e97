//! Table descriptions handed to `CREATE TABLE`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column definitions of one table, in declaration order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Column type and constraints, e.g. `VARCHAR(50) NOT NULL`.
    pub ddl: String,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, ddl: impl Into<String>) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.into(),
            ddl: ddl.into(),
        });
        self
    }

    /// DDL fragment of the named column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.ddl.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<N: Into<String>, D: Into<String>> FromIterator<(N, D)> for TableSchema {
    fn from_iter<I: IntoIterator<Item = (N, D)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |schema, (name, ddl)| schema.with_column(name, ddl))
    }
}

/// Table name to its columns; everything needed to create a database.
pub type SchemaDescription = BTreeMap<String, TableSchema>;
