//! The storage kernel: one SQLite handle, one owning thread, one statement at a
//! time.
//!
//! Everything above this module talks to storage through [`Executor`], which
//! both [`Kernel`] (direct mode) and [`crate::actor::Actor`] (concurrent mode)
//! implement.

use crate::error::Result;
use crate::locator::Target;
use crate::value::{Replacements, Value};
use rusqlite::{CachedStatement, Connection};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, info, trace};

/// How many result rows a statement is expected to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fetch {
    /// No rows are read back.
    #[default]
    None,
    /// At most the first row.
    One,
    /// Every matching row.
    All,
}

/// A single statement together with everything needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub statement: String,
    pub replacements: Replacements,
    pub fetch: Fetch,
    pub commit: bool,
}

impl Request {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            replacements: Replacements::None,
            fetch: Fetch::None,
            commit: false,
        }
    }

    pub fn with_replacements(mut self, replacements: impl Into<Replacements>) -> Self {
        self.replacements = replacements.into();
        self
    }

    pub fn with_fetch(mut self, fetch: Fetch) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }
}

/// Rows read back by a statement, shaped by its [`Fetch`] mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Rows {
    #[default]
    None,
    One(Option<Vec<Value>>),
    All(Vec<Vec<Value>>),
}

/// What every executed statement reports back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    /// Rowid of the most recent successful insert on this handle.
    pub last_insert_id: i64,
    /// Result column labels; empty for statements that return no rows.
    pub columns: Vec<String>,
    pub rows: Rows,
    /// Rows changed by a data-modifying statement, 0 for queries.
    pub affected: usize,
}

/// Something that runs [`Request`]s against a single SQLite handle.
pub trait Executor {
    fn execute(&self, request: Request) -> Result<ExecutionResult>;

    /// Release the handle. Consumes the executor, so it happens exactly once.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// A SQLite handle bound to the thread that opened it.
///
/// Every call checks the calling thread against the owner and panics on a
/// mismatch: a foreign caller means the concurrency discipline was bypassed,
/// which is a bug, not a condition to recover from. The mutex is never
/// contended; it only lets a kernel sit inside types shared between threads.
pub struct Kernel {
    conn: Mutex<Connection>,
    owner: ThreadId,
    target: Target,
}

impl Kernel {
    /// Opens (or creates) the database and binds it to the current thread.
    pub fn open(target: &Target) -> Result<Self> {
        let conn = match target {
            Target::Memory => Connection::open_in_memory()?,
            Target::File(path) => Connection::open(path)?,
        };
        let owner = thread::current().id();
        info!(target = %target, ?owner, "opened storage kernel");
        Ok(Self {
            conn: Mutex::new(conn),
            owner,
            target: target.clone(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&Target::Memory)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn assert_owner(&self) {
        let caller = thread::current().id();
        assert!(
            caller == self.owner,
            "thread mismatch: storage kernel for {} is owned by {:?} but was called from {:?}",
            self.target,
            self.owner,
            caller
        );
    }

    fn handle(&self) -> MutexGuard<'_, Connection> {
        self.assert_owner();
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one statement.
    pub fn run(&self, request: &Request) -> Result<ExecutionResult> {
        let conn = self.handle();
        debug!(
            statement = %request.statement,
            fetch = ?request.fetch,
            commit = request.commit,
            "executing statement"
        );

        // A write that is not committed right away starts a transaction, which
        // stays open until a later statement asks for a commit.
        if !request.commit && conn.is_autocommit() && is_write(&request.statement) {
            conn.execute_batch("BEGIN")?;
        }

        let (columns, rows, affected) = {
            let mut stmt = conn.prepare_cached(&request.statement)?;
            bind(&mut stmt, &request.replacements)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_owned)
                .collect();

            if columns.is_empty() {
                let affected = stmt.raw_execute()?;
                let rows = match request.fetch {
                    Fetch::None => Rows::None,
                    Fetch::One => Rows::One(None),
                    Fetch::All => Rows::All(Vec::new()),
                };
                (columns, rows, affected)
            } else {
                let rows = read_rows(&mut stmt, columns.len(), request.fetch)?;
                (columns, rows, 0)
            }
        };

        if request.commit && !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }

        Ok(ExecutionResult {
            last_insert_id: conn.last_insert_rowid(),
            columns,
            rows,
            affected,
        })
    }
}

impl Executor for Kernel {
    fn execute(&self, request: Request) -> Result<ExecutionResult> {
        self.run(&request)
    }

    fn close(self) -> Result<()> {
        self.assert_owner();
        let target = self.target;
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, err)| err)?;
        info!(target = %target, "closed storage kernel");
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("target", &self.target)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

fn is_write(statement: &str) -> bool {
    let keyword = statement
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("");
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

fn bind(stmt: &mut CachedStatement<'_>, replacements: &Replacements) -> Result<()> {
    let expected = stmt.parameter_count();
    trace!(expected, given = replacements.len(), "binding parameters");
    match replacements {
        Replacements::None if expected == 0 => Ok(()),
        Replacements::None => Err(rusqlite::Error::InvalidParameterCount(0, expected).into()),
        Replacements::Positional(values) => {
            if values.len() != expected {
                return Err(rusqlite::Error::InvalidParameterCount(values.len(), expected).into());
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)?;
            }
            Ok(())
        }
        Replacements::Named(params) => {
            for idx in 1..=expected {
                let name = stmt
                    .parameter_name(idx)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("?{idx}"));
                // parameter names keep their sigil (`:id`, `@id`, `$id`)
                let value = params
                    .get(name.get(1..).unwrap_or_default())
                    .filter(|_| !name.starts_with('?'))
                    .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                stmt.raw_bind_parameter(idx, value)?;
            }
            Ok(())
        }
    }
}

fn read_rows(stmt: &mut CachedStatement<'_>, width: usize, fetch: Fetch) -> Result<Rows> {
    let mut rows = stmt.raw_query();
    let read = |row: &rusqlite::Row<'_>| -> Result<Vec<Value>> {
        (0..width)
            .map(|idx| row.get::<_, Value>(idx).map_err(Into::into))
            .collect()
    };
    Ok(match fetch {
        Fetch::None => {
            rows.next()?;
            Rows::None
        }
        Fetch::One => Rows::One(rows.next()?.map(read).transpose()?),
        Fetch::All => {
            let mut all = Vec::new();
            while let Some(row) = rows.next()? {
                all.push(read(row)?);
            }
            Rows::All(all)
        }
    })
}
