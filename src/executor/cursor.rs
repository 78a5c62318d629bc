use std::sync::Arc;

use super::RowBounds;
use super::connection::RowStream;
use super::simple::SimpleExecutor;
use crate::core::{MapperError, Result, Row, Value};
use crate::mapping::MappedStatement;

/// Single-pass query result; assembly is lazy, row reads depend on the backend.
///
/// Values are assembled like a list result, one at a time: consecutive rows
/// sharing a row key fold into one value, and `select=` mappings run through
/// the executor the cursor borrows.
pub struct Cursor<'a> {
    executor: &'a mut SimpleExecutor,
    stream: Option<Box<dyn RowStream>>,
    statement: Arc<MappedStatement>,
    bounds: RowBounds,
    /// First row of the next value, read while closing the previous one.
    lookahead: Option<Row>,
    /// Rows read from the stream so far, skipped ones included.
    position: usize,
    returned: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        executor: &'a mut SimpleExecutor,
        stream: Box<dyn RowStream>,
        statement: Arc<MappedStatement>,
        bounds: RowBounds,
    ) -> Self {
        Self {
            executor,
            stream: Some(stream),
            statement,
            bounds,
            lookahead: None,
            position: 0,
            returned: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Number of values handed out so far.
    pub const fn current_index(&self) -> usize {
        self.returned
    }

    pub fn close(&mut self) {
        self.lookahead = None;
        if self.stream.take().is_some() {
            tracing::debug!(statement = %self.statement.id, rows = self.returned, "cursor closed");
        }
    }

    /// Next row past the offset, the held-back one first.
    fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.lookahead.take() {
            return Ok(Some(row));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        while let Some(row) = stream.next_row()? {
            self.position += 1;
            if self.position > self.bounds.offset {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Next assembled value; `CursorClosed` once closed.
    pub fn fetch(&mut self) -> Result<Option<Value>> {
        if !self.is_open() {
            return Err(MapperError::CursorClosed);
        }
        if self.returned >= self.bounds.limit {
            self.close();
            return Ok(None);
        }
        let registry = Arc::clone(self.executor.registry());
        let assembler = Arc::clone(registry.assembler());
        loop {
            let Some(first) = self.next_row()? else {
                self.close();
                return Ok(None);
            };
            let key = assembler.group_key(&registry, &self.statement, &first)?;
            let mut group = vec![first];
            if let Some(key) = key {
                while let Some(row) = self.next_row()? {
                    if assembler.group_key(&registry, &self.statement, &row)?.as_deref() == Some(key.as_str()) {
                        group.push(row);
                    } else {
                        self.lookahead = Some(row);
                        break;
                    }
                }
            }

            let mut values = assembler.materialize_list(&registry, &self.statement, &group, &mut *self.executor)?;
            // A run whose columns were all null assembles to nothing
            if values.is_empty() {
                continue;
            }
            self.returned += 1;
            return Ok(Some(values.swap_remove(0)));
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.is_open() {
            return None;
        }
        self.fetch().transpose()
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("statement", &self.statement.id)
            .field("open", &self.is_open())
            .field("returned", &self.returned)
            .finish()
    }
}
