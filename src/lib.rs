//! Embedded SQLite persistence for a personal-finance / investment-game domain.
//!
//! # Intention
//!
//! - Give application code typed, declarative entities backed by SQLite
//!   tables, with storage-side conversion for enums, dates and money.
//! - Make one database usable from many threads without sharing the native
//!   handle: a single worker owns it and serves requests in arrival order.
//!
//! # Architectural Boundaries
//!
//! - [`kernel`] owns the native handle and nothing else; it may only be used
//!   from the thread that opened it.
//! - [`actor`] is the only way a kernel is shared between threads.
//! - [`connection`] builds SQL from table and column names; values are always
//!   bound, never spliced.
//! - [`descriptor`], [`entity`] and [`store`] map between stored rows and
//!   domain records. No business rules live in this crate.

pub mod actor;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod kernel;
pub mod locator;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;

pub use actor::{Actor, ActorState};
pub use config::StoreConfig;
pub use connection::{Backend, Connection, Filter, WriteOptions};
pub use descriptor::{
    EnumDomain, EnumMember, FieldKind, FieldType, FieldValue, FromField, StorageEnum,
};
pub use entity::{database_description, Entity, EntityDef, EntityRecord, SchemaRegistry};
pub use error::{Error, Result};
pub use kernel::{ExecutionResult, Executor, Fetch, Kernel, Request, Rows};
pub use locator::{Locator, Target};
pub use schema::{ColumnDefinition, SchemaDescription, TableSchema};
pub use snapshot::{IdMap, Snapshot};
pub use store::Store;
pub use value::{Params, Record, Replacements, Row, Value};
