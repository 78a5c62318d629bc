use indexmap::IndexMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use super::connection::{CommandOptions, Transaction};
use super::cursor::Cursor;
use super::keygen::{ParameterShape, assign_driver_keys, assign_select_key};
use super::{BatchResult, NestedQueryLoader, ResultHandler, RowBounds};
use crate::core::{Result, Row, Value};
use crate::mapping::{BoundSql, CacheKey, KeyGenerator, MappedStatement};
use crate::registry::StatementRegistry;

/// Type label printed next to each bind value in the statement log.
fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "Integer",
        Value::Real(_) => "Double",
        Value::Numeric(_) => "Decimal",
        Value::Text(_) => "String",
        Value::Boolean(_) => "Boolean",
        Value::Date(_) => "Date",
        Value::Timestamp(_) | Value::TimestampTz(_) => "Timestamp",
        Value::Uuid(_) => "Uuid",
        Value::Bytea(_) => "Bytes",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn log_bound_sql(statement: &MappedStatement, bound: &BoundSql) {
    let sql = bound.sql.split_whitespace().collect::<Vec<_>>().join(" ");
    tracing::debug!(statement = %statement.id, "==>  Preparing: {sql}");
    let parameters = bound
        .parameters
        .iter()
        .map(|p| match &p.value {
            Value::Null => "null".to_string(),
            v => format!("{v}({})", type_label(v)),
        })
        .collect::<Vec<_>>()
        .join(", ");
    tracing::debug!(statement = %statement.id, "==> Parameters: {parameters}");
}

/// Executes one statement per call against a single transaction.
pub struct SimpleExecutor {
    registry: Arc<StatementRegistry>,
    transaction: Box<dyn Transaction>,
}

impl SimpleExecutor {
    pub fn new(registry: Arc<StatementRegistry>, transaction: Box<dyn Transaction>) -> Self {
        Self { registry, transaction }
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        &self.registry
    }

    /// Statement timeout, capped by what is left of the transaction's.
    fn command_options(&self, statement: &MappedStatement) -> CommandOptions {
        let settings = self.registry.settings();
        let mut timeout = statement.timeout.or(settings.default_statement_timeout);
        if let Some(remaining) = self.transaction.timeout() {
            if timeout.is_none_or(|t| t == 0 || remaining < t) {
                timeout = Some(remaining);
            }
        }
        CommandOptions {
            timeout,
            fetch_size: statement.fetch_size.or(settings.default_fetch_size),
            return_generated_keys: statement.key_generator == KeyGenerator::Driver,
            key_columns: statement.key_columns.clone(),
        }
    }

    fn flush_cache_if_required(&self, statement: &MappedStatement) {
        if !statement.flush_cache {
            return;
        }
        if let Some(cache) = statement.cache_namespace.as_deref().and_then(|ns| self.registry.cache_for(ns)) {
            tracing::trace!(cache = cache.id(), statement = %statement.id, "clearing cache");
            cache.clear();
        }
    }

    fn run_key_statement(&mut self, key_statement_id: &str, parameter: &mut Value) -> Result<()> {
        let key_statement = self.registry.statement(key_statement_id)?;
        let results = self.query(&key_statement, parameter, RowBounds::default())?;
        assign_select_key(&key_statement, parameter, results)
    }

    /// Runs an insert/update/delete, writing generated keys back into `parameter`.
    pub fn update(&mut self, statement: &MappedStatement, parameter: &mut Value, shape: ParameterShape) -> Result<usize> {
        self.flush_cache_if_required(statement);

        if let KeyGenerator::Statement {
            key_statement_id,
            execute_before: true,
        } = &statement.key_generator
        {
            self.run_key_statement(key_statement_id, parameter)?;
        }

        let bound = statement.bound_sql(parameter)?;
        log_bound_sql(statement, &bound);
        let options = self.command_options(statement);

        let (count, keys) = {
            let connection = self.transaction.connection()?;
            let mut command = connection.prepare(&bound.sql, &options)?;
            let count = command.execute_update(&bound.values())?;
            let keys = if options.return_generated_keys {
                command.generated_keys(&statement.key_columns)?
            } else {
                Vec::new()
            };
            (count, keys)
        };
        tracing::debug!(statement = %statement.id, "<==    Updates: {count}");

        match &statement.key_generator {
            KeyGenerator::Driver => assign_driver_keys(statement, parameter, shape, &keys)?,
            KeyGenerator::Statement {
                key_statement_id,
                execute_before: false,
            } => self.run_key_statement(key_statement_id, parameter)?,
            _ => {}
        }
        Ok(count)
    }

    fn read_rows(&mut self, statement: &MappedStatement, bound: &BoundSql, bounds: RowBounds) -> Result<Vec<Row>> {
        let options = self.command_options(statement);
        let connection = self.transaction.connection()?;
        let command = connection.prepare(&bound.sql, &options)?;
        let mut stream = command.query(&bound.values())?;
        let mut rows = Vec::new();
        let mut skipped = 0;
        while rows.len() < bounds.limit {
            let Some(row) = stream.next_row()? else { break };
            if skipped < bounds.offset {
                skipped += 1;
                continue;
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Runs a select and assembles every row within `bounds`.
    pub fn query(&mut self, statement: &MappedStatement, parameter: &Value, bounds: RowBounds) -> Result<Vec<Value>> {
        self.flush_cache_if_required(statement);
        let bound = statement.bound_sql(parameter)?;

        let cache = statement
            .cache_namespace
            .as_deref()
            .filter(|_| statement.use_cache)
            .and_then(|ns| self.registry.cache_for(ns));
        let key = cache.as_ref().map(|_| {
            let mut parts = vec![
                statement.id.clone(),
                bounds.offset.to_string(),
                bounds.limit.to_string(),
                bound.sql.clone(),
            ];
            parts.extend(bound.parameters.iter().map(|p| p.value.to_string()));
            CacheKey::new(parts)
        });
        if let (Some(cache), Some(key)) = (&cache, &key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(statement = %statement.id, cache = cache.id(), "cache hit");
                return Ok(hit);
            }
        }

        log_bound_sql(statement, &bound);
        let rows = self.read_rows(statement, &bound, bounds)?;
        tracing::debug!(statement = %statement.id, "<==      Total: {}", rows.len());

        let registry = Arc::clone(&self.registry);
        let assembler = Arc::clone(registry.assembler());
        let values = assembler.materialize_list(&registry, statement, &rows, self)?;

        if let (Some(cache), Some(key)) = (cache, key) {
            cache.put(key, values.clone());
        }
        Ok(values)
    }

    /// Like [`query`](Self::query) but keyed by the display form of `key_property`.
    pub fn query_map(
        &mut self,
        statement: &MappedStatement,
        parameter: &Value,
        key_property: &str,
        bounds: RowBounds,
    ) -> Result<IndexMap<String, Value>> {
        self.flush_cache_if_required(statement);
        let bound = statement.bound_sql(parameter)?;
        log_bound_sql(statement, &bound);
        let rows = self.read_rows(statement, &bound, bounds)?;
        tracing::debug!(statement = %statement.id, "<==      Total: {}", rows.len());
        let registry = Arc::clone(&self.registry);
        let assembler = Arc::clone(registry.assembler());
        assembler.materialize_map(&registry, statement, &rows, key_property, self)
    }

    /// Feeds assembled values to `handler` until it breaks.
    pub fn query_with_handler(
        &mut self,
        statement: &MappedStatement,
        parameter: &Value,
        bounds: RowBounds,
        handler: &mut dyn ResultHandler,
    ) -> Result<()> {
        for value in self.query(statement, parameter, bounds)? {
            if handler.handle_result(value) == ControlFlow::Break(()) {
                break;
            }
        }
        Ok(())
    }

    /// Opens a lazy cursor. The cursor borrows the executor until dropped and
    /// uses it for the nested selects of its values.
    pub fn query_cursor(
        &mut self,
        statement: Arc<MappedStatement>,
        parameter: &Value,
        bounds: RowBounds,
    ) -> Result<Cursor<'_>> {
        self.flush_cache_if_required(&statement);
        let bound = statement.bound_sql(parameter)?;
        log_bound_sql(&statement, &bound);
        let options = self.command_options(&statement);
        let stream = {
            let connection = self.transaction.connection()?;
            let command = connection.prepare(&bound.sql, &options)?;
            command.query(&bound.values())?
        };
        Ok(Cursor::new(self, stream, statement, bounds))
    }

    /// Nothing is batched by this executor.
    pub fn flush_statements(&mut self) -> Result<Vec<BatchResult>> {
        Ok(Vec::new())
    }

    pub fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.transaction.connection()?.execute_script(sql)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.transaction.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.transaction.rollback()
    }
}

impl NestedQueryLoader for SimpleExecutor {
    fn load(&mut self, statement_id: &str, parameter: &Value) -> Result<Vec<Value>> {
        let statement = self.registry.statement(statement_id)?;
        self.query(&statement, parameter, RowBounds::default())
    }
}

impl std::fmt::Debug for SimpleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleExecutor").finish_non_exhaustive()
    }
}
