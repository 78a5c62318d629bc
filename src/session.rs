use indexmap::IndexMap;
use std::sync::Arc;

use crate::binding::Mapper;
use crate::core::{MapperError, Result, Value};
use crate::executor::{BatchResult, Cursor, ParameterShape, ResultHandler, RowBounds, SimpleExecutor, Transaction};
use crate::registry::StatementRegistry;

/// Wraps a collection parameter so templates can reach it as
/// `collection`, `list` or `array`.
fn wrap_collection(parameter: &Value) -> Value {
    match parameter {
        Value::Array(items) => Value::object([
            ("collection", Value::Array(items.clone())),
            ("list", Value::Array(items.clone())),
            ("array", Value::Array(items.clone())),
        ]),
        other => other.clone(),
    }
}

/// Reverses [`wrap_collection`] so keys written into elements reach the caller.
fn unwrap_collection(original: &Value, wrapped: Value) -> Value {
    if !matches!(original, Value::Array(_)) {
        return wrapped;
    }
    match wrapped {
        Value::Object(mut record) => record.shift_remove("collection").unwrap_or_default(),
        other => other,
    }
}

/// A unit of work: statement-level operations over one transaction.
pub struct Session {
    registry: Arc<StatementRegistry>,
    executor: SimpleExecutor,
    dirty: bool,
}

impl Session {
    pub fn new(registry: Arc<StatementRegistry>, transaction: Box<dyn Transaction>) -> Self {
        let executor = SimpleExecutor::new(Arc::clone(&registry), transaction);
        Self {
            registry,
            executor,
            dirty: false,
        }
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        &self.registry
    }

    /// True once a write ran since the last commit or rollback.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// At most one value; more than one row is an error.
    pub fn select_one(&mut self, id: &str, parameter: &Value) -> Result<Option<Value>> {
        let mut list = self.select_list(id, parameter, RowBounds::default())?;
        match list.len() {
            0 => Ok(None),
            1 => Ok(list.pop()),
            n => Err(MapperError::TooManyResults(n)),
        }
    }

    pub fn select_list(&mut self, id: &str, parameter: &Value, bounds: RowBounds) -> Result<Vec<Value>> {
        let statement = self.registry.statement(id)?;
        self.executor.query(&statement, &wrap_collection(parameter), bounds)
    }

    pub fn select_map(
        &mut self,
        id: &str,
        parameter: &Value,
        key_property: &str,
        bounds: RowBounds,
    ) -> Result<IndexMap<String, Value>> {
        let statement = self.registry.statement(id)?;
        self.executor
            .query_map(&statement, &wrap_collection(parameter), key_property, bounds)
    }

    /// Lazily fetched rows; the session stays borrowed until the cursor is dropped.
    pub fn select_cursor(&mut self, id: &str, parameter: &Value, bounds: RowBounds) -> Result<Cursor<'_>> {
        let statement = self.registry.statement(id)?;
        self.executor
            .query_cursor(statement, &wrap_collection(parameter), bounds)
    }

    pub fn select_with_handler(
        &mut self,
        id: &str,
        parameter: &Value,
        bounds: RowBounds,
        handler: &mut dyn ResultHandler,
    ) -> Result<()> {
        let statement = self.registry.statement(id)?;
        self.executor
            .query_with_handler(&statement, &wrap_collection(parameter), bounds, handler)
    }

    pub fn insert(&mut self, id: &str, parameter: &mut Value) -> Result<usize> {
        self.update(id, parameter)
    }

    /// Runs a write statement; generated keys land in `parameter`.
    pub fn update(&mut self, id: &str, parameter: &mut Value) -> Result<usize> {
        self.write(id, parameter, ParameterShape::Plain)
    }

    pub(crate) fn write(&mut self, id: &str, parameter: &mut Value, shape: ParameterShape) -> Result<usize> {
        let statement = self.registry.statement(id)?;
        self.dirty = true;
        let mut wrapped = wrap_collection(parameter);
        let count = self.executor.update(&statement, &mut wrapped, shape)?;
        *parameter = unwrap_collection(parameter, wrapped);
        Ok(count)
    }

    pub fn delete(&mut self, id: &str, parameter: &mut Value) -> Result<usize> {
        self.update(id, parameter)
    }

    pub fn flush_statements(&mut self) -> Result<Vec<BatchResult>> {
        self.executor.flush_statements()
    }

    /// Runs raw SQL outside any mapped statement.
    pub fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.executor.execute_script(sql)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.executor.commit()?;
        self.dirty = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.executor.rollback()?;
        self.dirty = false;
        Ok(())
    }

    /// Dispatcher for the interface registered under `name`.
    pub fn mapper(&mut self, name: &str) -> Result<Mapper<'_>> {
        let interface = self.registry.mapper(name)?;
        Ok(Mapper::new(self, interface))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("executor", &self.executor)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_parameter_wrapping() {
        let items = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let wrapped = wrap_collection(&items);
        assert_eq!(wrapped.get("collection"), Some(&items));
        assert_eq!(wrapped.get("list"), Some(&items));
        assert_eq!(wrapped.get("array"), Some(&items));

        let scalar = Value::Integer(3);
        assert_eq!(wrap_collection(&scalar), scalar);
    }

    #[test]
    fn test_unwrap_returns_collection_entry() {
        let original = Value::Array(vec![Value::Null]);
        let filled = Value::Array(vec![Value::Integer(7)]);
        let wrapped = Value::object([("collection", filled.clone()), ("list", original.clone())]);
        assert_eq!(unwrap_collection(&original, wrapped), filled);

        let object = Value::object([("id", Value::Integer(1))]);
        assert_eq!(unwrap_collection(&object, object.clone()), object);
    }
}
