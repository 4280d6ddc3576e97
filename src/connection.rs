//! Table-oriented query API on top of an [`Executor`].
//!
//! Table and column names are always quoted; values are always bound. The
//! only caller-written SQL is the `WHERE` clause of a [`Filter`], whose values
//! travel as named parameters.

use crate::actor::Actor;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kernel::{ExecutionResult, Executor, Fetch, Kernel, Request, Rows};
use crate::locator::Locator;
use crate::schema::{SchemaDescription, TableSchema};
use crate::value::{Params, Record, Replacements, Row, Value};
use std::sync::Arc;
use tracing::info;

/// Either concurrency mode, picked at runtime from a [`Locator`].
#[derive(Debug)]
pub enum Backend {
    /// A bare kernel, usable only from the thread that opened it.
    Direct(Kernel),
    /// A kernel on its own worker thread, shareable across threads.
    Threadsafe(Actor),
}

impl Backend {
    pub fn open(locator: &Locator) -> Result<Self> {
        if locator.threadsafe {
            Actor::spawn(&locator.target).map(Backend::Threadsafe)
        } else {
            Kernel::open(&locator.target).map(Backend::Direct)
        }
    }
}

impl Executor for Backend {
    fn execute(&self, request: Request) -> Result<ExecutionResult> {
        match self {
            Backend::Direct(kernel) => kernel.execute(request),
            Backend::Threadsafe(actor) => actor.execute(request),
        }
    }

    fn close(self) -> Result<()> {
        match self {
            Backend::Direct(kernel) => kernel.close(),
            Backend::Threadsafe(actor) => actor.close(),
        }
    }
}

/// A `WHERE` clause plus the named parameters it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub clause: String,
    pub params: Params,
}

impl Filter {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Params::new(),
        }
    }

    /// Binds `:name` in the clause.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params = self.params.with_value(name, value);
        self
    }
}

/// Control flags for writes, kept apart from the data being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Commit right after the statement.
    pub commit: bool,
    /// Key under which `insert` reports the assigned rowid; `None` to skip.
    pub id_key: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            commit: true,
            id_key: Some("id".to_string()),
        }
    }
}

/// A database connection
#[derive(Debug)]
pub struct Connection<X: Executor = Backend> {
    executor: X,
    defaults: WriteOptions,
    if_not_exists: bool,
}

impl Connection<Backend> {
    /// Opens the database named by a locator string such as
    /// `sqlite:////srv/game.db?threadsafe=true`.
    pub fn connect(locator: &str) -> Result<Self> {
        Self::open(&Locator::parse(locator)?)
    }

    pub fn open(locator: &Locator) -> Result<Self> {
        let backend = Backend::open(locator)?;
        info!(%locator, "database connection opened");
        Ok(Self::new(backend))
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let connection = Self::connect(&config.database_url)?;
        Ok(connection
            .with_defaults(WriteOptions {
                id_key: Some(config.id_key.clone()),
                ..WriteOptions::default()
            })
            .with_if_not_exists(config.if_not_exists))
    }
}

impl<X: Executor> Connection<X> {
    pub fn new(executor: X) -> Self {
        Self {
            executor,
            defaults: WriteOptions::default(),
            if_not_exists: true,
        }
    }

    /// Options used by writes that do not take explicit ones.
    pub fn with_defaults(mut self, defaults: WriteOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Whether [`Connection::create_tables`] and store bootstrap add
    /// `IF NOT EXISTS`.
    pub fn with_if_not_exists(mut self, if_not_exists: bool) -> Self {
        self.if_not_exists = if_not_exists;
        self
    }

    pub fn if_not_exists(&self) -> bool {
        self.if_not_exists
    }

    pub fn defaults(&self) -> &WriteOptions {
        &self.defaults
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Runs arbitrary SQL, optionally committing afterwards.
    pub fn execute(
        &self,
        sql: &str,
        replacements: impl Into<Replacements>,
        commit: bool,
    ) -> Result<ExecutionResult> {
        self.executor.execute(
            Request::new(sql)
                .with_replacements(replacements)
                .with_commit(commit),
        )
    }

    /// First row of an arbitrary query, or `None` if it matches nothing.
    pub fn fetch_one_or_none(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        let result = self.executor.execute(
            Request::new(sql)
                .with_replacements(params.clone())
                .with_fetch(Fetch::One),
        )?;
        Ok(into_rows(result).into_iter().next())
    }

    /// Every row of an arbitrary query.
    pub fn fetch_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let result = self.executor.execute(
            Request::new(sql)
                .with_replacements(params.clone())
                .with_fetch(Fetch::All),
        )?;
        Ok(into_rows(result))
    }

    pub fn create_table(&self, name: &str, schema: &TableSchema, if_not_exists: bool) -> Result<()> {
        self.execute(&create_table_sql(name, schema, if_not_exists), Replacements::None, true)?;
        Ok(())
    }

    pub fn create_tables(&self, description: &SchemaDescription) -> Result<()> {
        for (name, schema) in description {
            self.create_table(name, schema, self.if_not_exists)?;
        }
        Ok(())
    }

    /// Inserts one row using the connection's default options.
    pub fn insert(&self, table: &str, fields: &Record) -> Result<Record> {
        self.insert_with(table, fields, &self.defaults)
    }

    /// Inserts one row and returns it, plus the assigned rowid under
    /// `options.id_key`.
    pub fn insert_with(&self, table: &str, fields: &Record, options: &WriteOptions) -> Result<Record> {
        let values: Vec<Value> = fields.values().cloned().collect();
        let result = self.execute(
            &insert_sql(table, fields.keys().map(String::as_str)),
            values,
            options.commit,
        )?;
        if result.affected == 0 {
            return Err(Error::InsertFailed {
                table: table.to_string(),
            });
        }

        let mut created = fields.clone();
        if let Some(key) = &options.id_key {
            created.insert(key.clone(), Value::Integer(result.last_insert_id));
        }
        Ok(created)
    }

    /// First matching row, or `None`. An empty column list selects `*`.
    pub fn get_one_or_none(
        &self,
        table: &str,
        columns: &[&str],
        filter: Option<&Filter>,
    ) -> Result<Option<Row>> {
        let params = filter.map(|f| f.params.clone()).unwrap_or_default();
        self.fetch_one_or_none(&select_sql(table, columns, filter), &params)
    }

    /// Every matching row, in whatever order SQLite returns them unless the
    /// filter says otherwise.
    pub fn get_all(&self, table: &str, columns: &[&str], filter: Option<&Filter>) -> Result<Vec<Row>> {
        let params = filter.map(|f| f.params.clone()).unwrap_or_default();
        self.fetch_all(&select_sql(table, columns, filter), &params)
    }

    /// Deletes matching rows and returns how many there were.
    pub fn delete(&self, table: &str, filter: &Filter) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {};", quote_identifier(table), filter.clause);
        let result = self.execute(&sql, filter.params.clone(), self.defaults.commit)?;
        Ok(result.affected)
    }

    /// Updates the named fields of the rows matched by `filter`.
    ///
    /// `key_param` is the filter parameter that selects the row(s); it must
    /// be bound and must not be one of the fields being changed.
    pub fn change(&self, table: &str, key_param: &str, filter: &Filter, fields: &Record) -> Result<()> {
        if !filter.params.contains(key_param) {
            return Err(Error::MissingParameter(key_param.to_string()));
        }
        if fields.is_empty() {
            return Ok(());
        }

        let mut params = filter.params.clone();
        for (name, value) in fields {
            if !is_plain_identifier(name) {
                return Err(Error::InvalidIdentifier(name.clone()));
            }
            if name == key_param || params.contains(name) {
                return Err(Error::ParameterConflict(name.clone()));
            }
            params = params.with_value(name, value.clone());
        }

        let sql = update_sql(table, fields.keys().map(String::as_str), &filter.clause);
        self.execute(&sql, params, self.defaults.commit)?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.executor.close()
    }
}

fn into_rows(result: ExecutionResult) -> Vec<Row> {
    let columns: Arc<[String]> = result.columns.into();
    match result.rows {
        Rows::All(rows) => rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect(),
        Rows::One(Some(values)) => vec![Row::new(columns, values)],
        Rows::One(None) | Rows::None => Vec::new(),
    }
}

/// Wraps a table or column name in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `[A-Za-z_][A-Za-z0-9_]*`: usable unquoted, and as a `:name` parameter.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn create_table_sql(name: &str, schema: &TableSchema, if_not_exists: bool) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.ddl))
        .collect::<Vec<_>>()
        .join(", ");
    let exists = if if_not_exists { " IF NOT EXISTS" } else { "" };
    format!("CREATE TABLE{exists} {} ({columns});", quote_identifier(name))
}

fn insert_sql<'a>(table: &str, columns: impl Iterator<Item = &'a str>) -> String {
    let columns: Vec<String> = columns.map(quote_identifier).collect();
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES;", quote_identifier(table));
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders});",
        quote_identifier(table),
        columns.join(", ")
    )
}

fn select_sql(table: &str, columns: &[&str], filter: Option<&Filter>) -> String {
    let columns = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let condition = filter
        .map(|f| format!(" WHERE {}", f.clause))
        .unwrap_or_default();
    format!("SELECT {columns} FROM {}{condition};", quote_identifier(table))
}

fn update_sql<'a>(table: &str, columns: impl Iterator<Item = &'a str>, clause: &str) -> String {
    let assignments = columns
        .map(|c| format!("{} = :{c}", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {clause};",
        quote_identifier(table)
    )
}
