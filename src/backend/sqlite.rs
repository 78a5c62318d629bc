//! SQLite implementation of the executor's transaction and connection interfaces.
//!
//! This backend is not lazy: rows are materialized when a query runs, so a
//! stream never holds the prepared statement and the statement is finalized as
//! soon as the command drops. Closing a cursor early releases the buffered rows
//! but saves no reads.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Statement, params_from_iter};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{MapperError, Result, Row, Value};
use crate::executor::{Command, CommandOptions, Connection, RowStream, Transaction};

/// Label of a driver-generated key when the statement names no key column.
pub const GENERATED_KEY_COLUMN: &str = "GENERATED_KEY";

fn to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Numeric(d) => SqlValue::Text(d.to_string()),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => SqlValue::Text(ts.to_rfc3339()),
        Value::Uuid(u) => SqlValue::Text(u.to_string()),
        Value::Bytea(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(MapperError::Conversion {
                value: value.to_string(),
                target: "SQL parameter".to_string(),
            });
        }
    })
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(f) => Value::Real(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(bytes) => Value::Bytea(bytes),
    }
}

fn bind_values(params: &[Value]) -> Result<Vec<SqlValue>> {
    params.iter().map(to_sql).collect()
}

/// Rows read eagerly from one query.
#[derive(Debug)]
struct BufferedRows {
    columns: Arc<[String]>,
    rows: VecDeque<Row>,
}

impl RowStream for BufferedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

struct SqliteCommand<'c> {
    connection: &'c rusqlite::Connection,
    statement: Statement<'c>,
    inserted: usize,
}

impl<'c> Command<'c> for SqliteCommand<'c> {
    fn execute_update(&mut self, params: &[Value]) -> Result<usize> {
        let values = bind_values(params)?;
        let count = self
            .statement
            .execute(params_from_iter(values))
            .map_err(MapperError::execution)?;
        self.inserted = count;
        Ok(count)
    }

    /// SQLite reports only the last rowid; a multi-row insert is assumed to
    /// have received consecutive rowids ending there.
    fn generated_keys(&mut self, key_columns: &[String]) -> Result<Vec<Row>> {
        if self.inserted == 0 {
            return Ok(Vec::new());
        }
        let label = key_columns.first().map_or(GENERATED_KEY_COLUMN, String::as_str);
        let columns: Arc<[String]> = Arc::from(vec![label.to_string()]);
        let last = self.connection.last_insert_rowid();
        let first = last - (self.inserted as i64) + 1;
        Ok((first..=last)
            .map(|id| Row::new(Arc::clone(&columns), vec![Value::Integer(id)]))
            .collect())
    }

    fn query(self: Box<Self>, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let mut statement = self.statement;
        let columns: Arc<[String]> = statement.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let values = bind_values(params)?;

        let mut rows = VecDeque::new();
        let mut cursor = statement.query(params_from_iter(values)).map_err(MapperError::execution)?;
        while let Some(row) = cursor.next().map_err(MapperError::execution)? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                let cell: SqlValue = row.get(i).map_err(MapperError::execution)?;
                cells.push(from_sql(cell));
            }
            rows.push_back(Row::new(Arc::clone(&columns), cells));
        }
        Ok(Box::new(BufferedRows { columns, rows }))
    }
}

/// One open SQLite database.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(MapperError::execution)?;
        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(MapperError::execution)?;
        Ok(Self { conn })
    }

    /// File database when `path` is set, otherwise in memory.
    pub fn open_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(&'c mut self, sql: &str, options: &CommandOptions) -> Result<Box<dyn Command<'c> + 'c>> {
        let connection: &'c rusqlite::Connection = &self.conn;
        if let Some(seconds) = options.timeout.filter(|t| *t > 0) {
            connection
                .busy_timeout(Duration::from_secs(u64::from(seconds)))
                .map_err(MapperError::execution)?;
        }
        let statement = connection.prepare(sql).map_err(MapperError::execution)?;
        Ok(Box::new(SqliteCommand {
            connection,
            statement,
            inserted: 0,
        }))
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(MapperError::execution)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

/// Transaction over a single connection.
///
/// With auto-commit off, a transaction is opened lazily before the first
/// statement and again after every commit or rollback.
#[derive(Debug)]
pub struct SqliteTransaction {
    connection: SqliteConnection,
    auto_commit: bool,
    timeout: Option<u32>,
}

impl SqliteTransaction {
    pub fn new(connection: SqliteConnection, auto_commit: bool) -> Self {
        Self {
            connection,
            auto_commit,
            timeout: None,
        }
    }

    /// Seconds; caps every statement timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteConnection::open_in_memory()?, false))
    }

    fn finish(&mut self, verb: &str) -> Result<()> {
        if self.connection.in_transaction() {
            tracing::debug!("{verb} transaction");
            self.connection.execute_script(verb)?;
        }
        Ok(())
    }
}

impl Transaction for SqliteTransaction {
    fn connection(&mut self) -> Result<&mut dyn Connection> {
        if !self.auto_commit && !self.connection.in_transaction() {
            self.connection.execute_script("BEGIN")?;
        }
        Ok(&mut self.connection)
    }

    fn timeout(&self) -> Option<u32> {
        self.timeout
    }

    fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }
}
