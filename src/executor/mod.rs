/// Executor module - turns mapped statements into commands and results
///
/// Structure:
/// - connection: consumed transaction/connection/command interfaces
/// - simple: the statement executor (updates, queries, cursors, key generation)
/// - keygen: writing generated keys back into parameter objects
/// - assembler: raw rows to structured values
/// - cursor: lazy single-pass results
use std::ops::ControlFlow;

use crate::core::Value;

pub mod assembler;
pub mod connection;
pub mod cursor;
pub mod keygen;
pub mod simple;

pub use assembler::{DefaultResultAssembler, NestedQueryLoader, ResultAssembler};
pub use connection::{Command, CommandOptions, Connection, RowStream, Transaction};
pub use cursor::Cursor;
pub use keygen::ParameterShape;
pub use simple::SimpleExecutor;

/// Paging window applied while rows are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub const NO_ROW_OFFSET: usize = 0;
    pub const NO_ROW_LIMIT: usize = usize::MAX;

    pub const fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub const fn is_default(&self) -> bool {
        self.offset == Self::NO_ROW_OFFSET && self.limit == Self::NO_ROW_LIMIT
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self::new(Self::NO_ROW_OFFSET, Self::NO_ROW_LIMIT)
    }
}

/// Receives query results one at a time; `Break` stops the query early.
pub trait ResultHandler {
    fn handle_result(&mut self, value: Value) -> ControlFlow<()>;
}

impl<F> ResultHandler for F
where
    F: FnMut(Value) -> ControlFlow<()>,
{
    fn handle_result(&mut self, value: Value) -> ControlFlow<()> {
        self(value)
    }
}

/// Outcome of one flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub statement: String,
    pub sql: String,
    pub update_counts: Vec<usize>,
}
