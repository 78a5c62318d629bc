use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{MapperError, Record, Result, Row, Value, get_property, set_property};
use crate::mapping::{AutoMapping, MappedStatement, MappingKind, ResultMapping, ResultShape, ValueType};
use crate::registry::StatementRegistry;

/// Runs the statements behind `select=` mappings.
pub trait NestedQueryLoader {
    fn load(&mut self, statement_id: &str, parameter: &Value) -> Result<Vec<Value>>;
}

/// Builds structured values from raw rows according to a statement's result shape.
pub trait ResultAssembler: Send + Sync {
    fn materialize_list(
        &self,
        registry: &StatementRegistry,
        statement: &MappedStatement,
        rows: &[Row],
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<Vec<Value>>;

    /// Keys each assembled value by the display form of `key_property`.
    fn materialize_map(
        &self,
        registry: &StatementRegistry,
        statement: &MappedStatement,
        rows: &[Row],
        key_property: &str,
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<IndexMap<String, Value>> {
        let values = self.materialize_list(registry, statement, rows, loader)?;
        let mut map = IndexMap::with_capacity(values.len());
        for value in values {
            let key = get_property(&value, key_property)?;
            map.insert(key.to_string(), value);
        }
        Ok(map)
    }

    /// Key of the top-level value `row` contributes to, or `None` when the
    /// statement's shape never folds several rows into one value.
    ///
    /// Cursors feed [`materialize_list`](Self::materialize_list) one run of
    /// consecutive rows sharing a key at a time.
    fn group_key(&self, registry: &StatementRegistry, statement: &MappedStatement, row: &Row) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
enum ChildSlot {
    One(Option<Box<Node>>),
    #[default]
    Empty,
    Many(IndexMap<String, Node>),
}

/// A partially assembled value with its nested children still grouped by row key.
#[derive(Debug)]
struct Node {
    value: Value,
    children: IndexMap<String, ChildSlot>,
}

impl Node {
    fn new(value: Value) -> Self {
        Self {
            value,
            children: IndexMap::new(),
        }
    }

    fn into_value(self) -> Result<Value> {
        let Self { mut value, children } = self;
        if !matches!(value, Value::Object(_)) {
            return Ok(value);
        }
        for (property, slot) in children {
            let child = match slot {
                ChildSlot::One(Some(node)) => node.into_value()?,
                ChildSlot::One(None) | ChildSlot::Empty => continue,
                ChildSlot::Many(nodes) => Value::Array(
                    nodes
                        .into_values()
                        .map(Node::into_value)
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            set_property(&mut value, &property, child)?;
        }
        Ok(value)
    }
}

struct Context<'a> {
    registry: &'a StatementRegistry,
    statement_id: &'a str,
    /// True when the top shape groups nested result shapes.
    nested: bool,
}

fn prefixed(prefix: Option<&str>, column: &str) -> String {
    match prefix {
        Some(p) => format!("{p}{column}"),
        None => column.to_string(),
    }
}

fn combine_prefix(outer: Option<&str>, inner: Option<&str>) -> Option<String> {
    match (outer, inner) {
        (None, None) => None,
        (Some(o), None) => Some(o.to_string()),
        (None, Some(i)) => Some(i.to_string()),
        (Some(o), Some(i)) => Some(format!("{o}{i}")),
    }
}

/// `user_name` to `userName`.
fn camel_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper = false;
    for c in column.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn column_value(row: &Row, column: &str, value_type: Option<&ValueType>) -> Result<Value> {
    let value = row.get(column).cloned().unwrap_or_default();
    match value_type {
        Some(t) => t.coerce(value),
        None => Ok(value),
    }
}

/// Default assembler over the dynamic value tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResultAssembler;

impl DefaultResultAssembler {
    fn first_shape<'s>(&self, statement: &'s MappedStatement, rows: &[Row]) -> Result<Option<&'s Arc<ResultShape>>> {
        match statement.result_shapes.first() {
            Some(shape) => Ok(Some(shape)),
            None if statement.kind.is_select() || !rows.is_empty() => {
                Err(MapperError::NoResultShape(statement.id.clone()))
            }
            None => Ok(None),
        }
    }

    fn discriminated(
        &self,
        ctx: &Context<'_>,
        shape: Arc<ResultShape>,
        row: &Row,
        prefix: Option<&str>,
    ) -> Result<Arc<ResultShape>> {
        let mut current = shape;
        let mut visited = HashSet::new();
        while let Some(discriminator) = &current.discriminator {
            if !visited.insert(current.id.clone()) {
                break;
            }
            let value = column_value(
                row,
                &prefixed(prefix, &discriminator.column),
                discriminator.value_type.as_ref(),
            )?;
            let Some(case_id) = discriminator.cases.get(&value.to_string()) else {
                break;
            };
            let next = ctx.registry.result_shape(case_id)?;
            if next.id == current.id {
                break;
            }
            current = next;
        }
        Ok(current)
    }

    fn should_auto_map(&self, ctx: &Context<'_>, shape: &ResultShape) -> bool {
        match shape.auto_mapping {
            Some(enabled) => enabled,
            None if ctx.nested => ctx.registry.settings().auto_mapping == AutoMapping::Full,
            None => ctx.registry.settings().auto_mapping != AutoMapping::None,
        }
    }

    fn nested_select_value(
        &self,
        ctx: &Context<'_>,
        mapping: &ResultMapping,
        select: &str,
        row: &Row,
        prefix: Option<&str>,
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<Value> {
        let parameter = if mapping.composites.is_empty() {
            let column = mapping.column.as_deref().unwrap_or_default();
            column_value(row, &prefixed(prefix, column), None)?
        } else {
            let mut record = Record::new();
            for (property, column) in &mapping.composites {
                record.insert(property.clone(), column_value(row, &prefixed(prefix, column), None)?);
            }
            if record.values().all(Value::is_null) {
                Value::Null
            } else {
                Value::Object(record)
            }
        };
        if parameter.is_null() {
            return Ok(Value::Null);
        }
        tracing::trace!(statement = ctx.statement_id, nested = select, "loading nested select");
        let mut results = loader.load(select, &parameter)?;
        if mapping.kind == MappingKind::Collection || mapping.of_type.is_some() {
            return Ok(Value::Array(results));
        }
        match results.len() {
            0 => Ok(Value::Null),
            1 => Ok(results.remove(0)),
            n => Err(MapperError::TooManyResults(n)),
        }
    }

    /// Constructor arguments, auto-mapped columns and plain property mappings.
    /// Returns the value and whether any column carried data.
    fn plain_row_value(
        &self,
        ctx: &Context<'_>,
        shape: &ResultShape,
        row: &Row,
        prefix: Option<&str>,
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<(Value, bool)> {
        if shape.result_type.is_scalar() && shape.mappings.is_empty() && shape.constructor_mappings.is_empty() {
            let raw = match prefix {
                Some(p) => row
                    .iter()
                    .find(|(label, _)| label.to_ascii_uppercase().starts_with(&p.to_ascii_uppercase()))
                    .map(|(_, v)| v.clone()),
                None => row.first().cloned(),
            };
            let value = shape.result_type.coerce(raw.unwrap_or_default())?;
            let found = !value.is_null();
            return Ok((value, found));
        }

        let mut record = Value::Object(Record::new());
        let mut found = false;

        for mapping in &shape.constructor_mappings {
            let Some(property) = &mapping.property else { continue };
            let value = match &mapping.nested_select {
                Some(select) => self.nested_select_value(ctx, mapping, select, row, prefix, loader)?,
                None => {
                    let column = mapping.column.as_deref().unwrap_or_default();
                    column_value(row, &prefixed(prefix, column), mapping.value_type.as_ref())?
                }
            };
            found |= !value.is_null();
            set_property(&mut record, property, value)?;
        }

        if self.should_auto_map(ctx, shape) {
            let settings = ctx.registry.settings();
            let upper_prefix = prefix.map(str::to_ascii_uppercase);
            for (label, value) in row.iter() {
                let column = match &upper_prefix {
                    Some(p) if label.to_ascii_uppercase().starts_with(p.as_str()) => &label[p.len()..],
                    Some(_) => continue,
                    None => label,
                };
                if column.is_empty() || shape.maps_column(column) || value.is_null() {
                    continue;
                }
                let property = if settings.map_underscore_to_camel_case {
                    camel_case(column)
                } else {
                    column.to_string()
                };
                if shape.maps_property(&property) {
                    continue;
                }
                found = true;
                if let Some(record) = record.as_object_mut() {
                    record.insert(property, value.clone());
                }
            }
        }

        for mapping in &shape.mappings {
            if mapping.nested_result_map.is_some() {
                continue;
            }
            let Some(property) = &mapping.property else { continue };
            let value = match &mapping.nested_select {
                Some(select) => self.nested_select_value(ctx, mapping, select, row, prefix, loader)?,
                None => match &mapping.column {
                    Some(column) => column_value(row, &prefixed(prefix, column), mapping.value_type.as_ref())?,
                    None => continue,
                },
            };
            if value.is_null() {
                continue;
            }
            found = true;
            set_property(&mut record, property, value)?;
        }

        Ok((record, found))
    }

    fn row_key(&self, shape: &ResultShape, row: &Row, prefix: Option<&str>) -> String {
        let mut key = shape.id.clone();
        let mut columns = shape
            .id_mappings()
            .into_iter()
            .filter_map(|m| m.column.as_deref())
            .peekable();
        if columns.peek().is_some() {
            for column in columns {
                let column = prefixed(prefix, column);
                let value = row.get(&column).cloned().unwrap_or_default();
                key.push_str(&format!(":{column}={value}"));
            }
        } else {
            let upper_prefix = prefix.map(str::to_ascii_uppercase);
            for (label, value) in row.iter() {
                if upper_prefix
                    .as_deref()
                    .is_none_or(|p| label.to_ascii_uppercase().starts_with(p))
                {
                    key.push_str(&format!(":{label}={value}"));
                }
            }
        }
        key
    }

    fn build_node(
        &self,
        ctx: &Context<'_>,
        shape: &ResultShape,
        row: &Row,
        prefix: Option<&str>,
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<Option<Node>> {
        let (value, found) = self.plain_row_value(ctx, shape, row, prefix, loader)?;
        let mut node = Node::new(value);
        let found_nested = self.merge_nested(ctx, shape, row, prefix, &mut node, loader)?;
        Ok((found || found_nested).then_some(node))
    }

    /// Folds the nested result shapes of `row` into `node`.
    fn merge_nested(
        &self,
        ctx: &Context<'_>,
        shape: &ResultShape,
        row: &Row,
        prefix: Option<&str>,
        node: &mut Node,
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<bool> {
        let mut found = false;
        for mapping in shape.mappings.iter().filter(|m| m.result_set.is_none()) {
            let (Some(nested_id), Some(property)) = (&mapping.nested_result_map, &mapping.property) else {
                continue;
            };
            let nested_prefix = combine_prefix(prefix, mapping.column_prefix.as_deref());
            let nested_prefix = nested_prefix.as_deref();
            let is_collection = mapping.kind == MappingKind::Collection || mapping.of_type.is_some();
            if is_collection {
                node.children
                    .entry(property.clone())
                    .or_insert_with(|| ChildSlot::Many(IndexMap::new()));
            }

            let columns_present = mapping.not_null_columns.is_empty()
                || mapping
                    .not_null_columns
                    .iter()
                    .any(|c| row.get(&prefixed(nested_prefix, c)).is_some_and(|v| !v.is_null()));
            if !columns_present {
                continue;
            }

            let nested = ctx.registry.result_shape(nested_id)?;
            let nested = self.discriminated(ctx, nested, row, nested_prefix)?;
            let key = self.row_key(&nested, row, nested_prefix);
            let slot = node.children.entry(property.clone()).or_default();

            match slot {
                ChildSlot::Many(nodes) => {
                    if let Some(existing) = nodes.get_mut(&key) {
                        found |= self.merge_nested(ctx, &nested, row, nested_prefix, existing, loader)?;
                    } else if let Some(child) = self.build_node(ctx, &nested, row, nested_prefix, loader)? {
                        nodes.insert(key, child);
                        found = true;
                    }
                }
                ChildSlot::One(Some(existing)) => {
                    found |= self.merge_nested(ctx, &nested, row, nested_prefix, existing, loader)?;
                }
                ChildSlot::One(None) | ChildSlot::Empty => {
                    let child = self.build_node(ctx, &nested, row, nested_prefix, loader)?;
                    found |= child.is_some();
                    *slot = ChildSlot::One(child.map(Box::new));
                }
            }
        }
        Ok(found)
    }
}

impl ResultAssembler for DefaultResultAssembler {
    fn materialize_list(
        &self,
        registry: &StatementRegistry,
        statement: &MappedStatement,
        rows: &[Row],
        loader: &mut dyn NestedQueryLoader,
    ) -> Result<Vec<Value>> {
        let Some(shape) = self.first_shape(statement, rows)? else {
            return Ok(Vec::new());
        };
        let ctx = Context {
            registry,
            statement_id: &statement.id,
            nested: shape.has_nested_result_maps,
        };

        if !shape.has_nested_result_maps {
            let mut values = Vec::with_capacity(rows.len());
            for row in rows {
                let shape = self.discriminated(&ctx, Arc::clone(shape), row, None)?;
                let (value, found) = self.plain_row_value(&ctx, &shape, row, None, loader)?;
                values.push(if found || value.is_scalar() { value } else { Value::Null });
            }
            return Ok(values);
        }

        let mut objects: IndexMap<String, Node> = IndexMap::new();
        for row in rows {
            let shape = self.discriminated(&ctx, Arc::clone(shape), row, None)?;
            let key = self.row_key(&shape, row, None);
            if let Some(existing) = objects.get_mut(&key) {
                self.merge_nested(&ctx, &shape, row, None, existing, loader)?;
            } else if let Some(node) = self.build_node(&ctx, &shape, row, None, loader)? {
                objects.insert(key, node);
            }
        }
        objects.into_values().map(Node::into_value).collect()
    }

    fn group_key(&self, registry: &StatementRegistry, statement: &MappedStatement, row: &Row) -> Result<Option<String>> {
        let Some(shape) = self.first_shape(statement, std::slice::from_ref(row))? else {
            return Ok(None);
        };
        if !shape.has_nested_result_maps {
            return Ok(None);
        }
        let ctx = Context {
            registry,
            statement_id: &statement.id,
            nested: true,
        };
        let shape = self.discriminated(&ctx, Arc::clone(shape), row, None)?;
        Ok(Some(self.row_key(&shape, row, None)))
    }
}
