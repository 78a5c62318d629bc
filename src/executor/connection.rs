use crate::core::{Result, Row, Value};

/// Hints applied to a prepared command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Seconds.
    pub timeout: Option<u32>,
    pub fetch_size: Option<u32>,
    pub return_generated_keys: bool,
    pub key_columns: Vec<String>,
}

/// Forward-only stream of result rows.
///
/// A stream owns what it reads from, so other commands may run on the same
/// connection while it is open (nested selects under a cursor).
pub trait RowStream {
    fn columns(&self) -> &[String];
    fn next_row(&mut self) -> Result<Option<Row>>;
}

/// A prepared command. Dropping it releases the underlying statement.
pub trait Command<'c> {
    fn execute_update(&mut self, params: &[Value]) -> Result<usize>;

    /// Keys generated by the last `execute_update`, one row per inserted row.
    fn generated_keys(&mut self, key_columns: &[String]) -> Result<Vec<Row>>;

    fn query(self: Box<Self>, params: &[Value]) -> Result<Box<dyn RowStream>>;
}

pub trait Connection: Send {
    fn prepare<'c>(&'c mut self, sql: &str, options: &CommandOptions) -> Result<Box<dyn Command<'c> + 'c>>;

    /// Runs a batch of raw statements without parameters.
    fn execute_script(&mut self, sql: &str) -> Result<()>;
}

/// Unit of work owning one connection.
pub trait Transaction: Send {
    fn connection(&mut self) -> Result<&mut dyn Connection>;

    /// Seconds left for statements in this transaction.
    fn timeout(&self) -> Option<u32>;

    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}
