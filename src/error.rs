//! Error type shared by every layer of the store.
//!
//! Driver errors are carried unchanged in [`Error::Sqlite`]; everything else is
//! raised by the mapping layer itself. Thread-affinity violations are not
//! represented here: they panic (see [`crate::kernel::Kernel`]).

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Error reported by SQLite, passed through untouched.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An insert completed without changing any row.
    #[error("no rows were inserted into {table}")]
    InsertFailed { table: String },

    /// A stored enum name that matches no member.
    #[error("{value:?} is not a member of {enum_name}")]
    InvalidEnumValue {
        enum_name: &'static str,
        value: String,
    },

    /// An entity definition that cannot be turned into a table.
    #[error("schema error: {0}")]
    Schema(String),

    /// A value whose shape does not fit the column's descriptor.
    #[error("cannot convert {found} to {expected}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("missing parameter :{0}")]
    MissingParameter(String),

    #[error("parameter :{0} is bound more than once")]
    ParameterConflict(String),

    #[error("{entity} has no field named {field:?}")]
    UnknownField { entity: String, field: String },

    #[error("entity {0} is not registered")]
    UnknownEntity(String),

    #[error("invalid database locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// The actor's handle became unusable; every later command fails.
    #[error("storage worker is poisoned: {0}")]
    Poisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage worker is no longer running")]
    WorkerGone,

    #[error("storage worker panicked")]
    WorkerPanicked,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
