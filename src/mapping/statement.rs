use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::parameter_map::ParameterMap;
use super::result_shape::ResultShape;
use super::sql_source::{BoundParameter, BoundSql, SqlSource, parameter_value};
use super::types::ValueType;
use crate::core::{MapperError, Result, Value};

/// Suffix of the sub-statement registered for `<selectKey>`.
pub const SELECT_KEY_SUFFIX: &str = "!key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
    Flush,
}

impl CommandKind {
    pub const fn is_select(self) -> bool {
        matches!(self, Self::Select)
    }
}

impl FromStr for CommandKind {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Self::Select),
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "FLUSH" => Ok(Self::Flush),
            _ => Err(MapperError::UnknownCommandKind(s.to_string())),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Flush => "FLUSH",
        };
        f.write_str(name)
    }
}

/// Where generated keys come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyGenerator {
    #[default]
    None,
    /// Keys reported by the driver after the insert.
    Driver,
    /// A registered `<id>!key` statement, run before or after the main one.
    Statement {
        key_statement_id: String,
        execute_before: bool,
    },
}

/// A compiled, immutable statement definition.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    pub id: String,
    pub resource: String,
    pub kind: CommandKind,
    pub sql_source: Arc<dyn SqlSource>,
    pub fetch_size: Option<u32>,
    pub timeout: Option<u32>,
    pub parameter_type: Option<ValueType>,
    pub parameter_map: Option<Arc<ParameterMap>>,
    pub result_shapes: Vec<Arc<ResultShape>>,
    pub flush_cache: bool,
    pub use_cache: bool,
    pub result_ordered: bool,
    pub key_generator: KeyGenerator,
    pub key_properties: Vec<String>,
    pub key_columns: Vec<String>,
    pub database_id: Option<String>,
    /// Namespace whose cache this statement reads and flushes.
    pub cache_namespace: Option<String>,
}

impl MappedStatement {
    /// A statement with the defaults of its command kind.
    pub fn new(id: impl Into<String>, kind: CommandKind, sql_source: Arc<dyn SqlSource>) -> Self {
        Self {
            id: id.into(),
            resource: String::new(),
            kind,
            sql_source,
            fetch_size: None,
            timeout: None,
            parameter_type: None,
            parameter_map: None,
            result_shapes: Vec::new(),
            flush_cache: !kind.is_select(),
            use_cache: kind.is_select(),
            result_ordered: false,
            key_generator: KeyGenerator::None,
            key_properties: Vec::new(),
            key_columns: Vec::new(),
            database_id: None,
            cache_namespace: None,
        }
    }

    pub fn namespace(&self) -> &str {
        self.id.rsplit_once('.').map_or("", |(ns, _)| ns)
    }

    /// Produces the executable SQL. A legacy parameter map supplies the bind
    /// values when the template itself declares none.
    pub fn bound_sql(&self, parameter: &Value) -> Result<BoundSql> {
        let mut bound = self.sql_source.bound_sql(parameter)?;
        let legacy = self
            .parameter_map
            .as_deref()
            .filter(|map| bound.parameters.is_empty() && !map.mappings.is_empty());
        if let Some(map) = legacy {
            for mapping in &map.mappings {
                let value = parameter_value(parameter, &mapping.property)?;
                let value = match &mapping.value_type {
                    Some(value_type) => value_type.coerce(value)?,
                    None => value,
                };
                bound.parameters.push(BoundParameter {
                    property: mapping.property.clone(),
                    value,
                });
            }
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::parameter_map::{ParameterMapping, ParameterMode};
    use crate::mapping::sql_source::TextSqlSource;

    fn source(sql: &str) -> Arc<dyn SqlSource> {
        Arc::new(TextSqlSource::parse("t", sql).unwrap())
    }

    #[test]
    fn test_command_kind_parsing() {
        assert_eq!("select".parse::<CommandKind>().unwrap(), CommandKind::Select);
        assert_eq!("DELETE".parse::<CommandKind>().unwrap(), CommandKind::Delete);
        assert!(matches!(
            "merge".parse::<CommandKind>(),
            Err(MapperError::UnknownCommandKind(_))
        ));
    }

    #[test]
    fn test_cache_defaults_follow_kind() {
        let select = MappedStatement::new("ns.find", CommandKind::Select, source("SELECT 1"));
        assert!(select.use_cache && !select.flush_cache);
        let update = MappedStatement::new("ns.touch", CommandKind::Update, source("UPDATE t SET a = 1"));
        assert!(!update.use_cache && update.flush_cache);
        assert_eq!(update.namespace(), "ns");
    }

    #[test]
    fn test_parameter_map_drives_bare_markers() {
        let mut statement = MappedStatement::new("ns.add", CommandKind::Insert, source("INSERT INTO t VALUES (?, ?)"));
        statement.parameter_map = Some(Arc::new(ParameterMap {
            id: "ns.addParams".into(),
            parameter_type: None,
            mappings: ["a", "b"]
                .into_iter()
                .map(|p| ParameterMapping {
                    property: p.to_string(),
                    value_type: None,
                    jdbc_type: None,
                    mode: ParameterMode::In,
                    result_map: None,
                })
                .collect(),
        }));
        let param = Value::object([("b", Value::Integer(2)), ("a", Value::Integer(1))]);
        let bound = statement.bound_sql(&param).unwrap();
        assert_eq!(bound.values(), vec![Value::Integer(1), Value::Integer(2)]);
    }
}
