use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_till1, take_until},
    character::complete::{char, one_of},
    combinator::{map, not, recognize},
    multi::many0,
    sequence::{delimited, terminated},
};
use std::fmt;
use std::sync::Arc;

use super::types::ValueType;
use crate::core::{MapperError, Result, Value, get_property};
use crate::parser::markup::{Element, Node};

/// Name under which a statement can refer to its whole parameter object.
pub const PARAMETER_OBJECT_KEY: &str = "_parameter";

/// One ordered bind value of a [`BoundSql`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub property: String,
    pub value: Value,
}

/// Final SQL text plus its positional bind values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundSql {
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
}

impl BoundSql {
    pub fn values(&self) -> Vec<Value> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }
}

/// Turns a parameter object into executable SQL. Must be deterministic and
/// free of side effects.
pub trait SqlSource: Send + Sync + fmt::Debug {
    fn bound_sql(&self, parameter: &Value) -> Result<BoundSql>;
}

/// Builds a [`SqlSource`] from a statement's (already spliced) markup.
pub trait LanguageDriver: Send + Sync {
    fn create_sql_source(
        &self,
        statement_id: &str,
        script: &Element,
        parameter_type: Option<&ValueType>,
    ) -> Result<Arc<dyn SqlSource>>;
}

/// `#{property,javaType=..,jdbcType=..}` inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterExpression {
    pub property: String,
    pub value_type: Option<ValueType>,
    pub jdbc_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Bind(ParameterExpression),
    Substitute(String),
}

fn parse_expression(inner: &str) -> ParameterExpression {
    let mut parts = inner.split(',');
    let property = parts.next().unwrap_or_default().trim().to_string();
    let mut expression = ParameterExpression {
        property,
        value_type: None,
        jdbc_type: None,
    };
    for option in parts {
        let Some((key, value)) = option.split_once('=') else { continue };
        match key.trim() {
            "javaType" => expression.value_type = Some(ValueType::resolve(value)),
            "jdbcType" => expression.jdbc_type = Some(value.trim().to_string()),
            _ => {}
        }
    }
    expression
}

fn bind(input: &str) -> IResult<&str, Segment> {
    map(delimited(tag("#{"), take_until("}"), char('}')), |inner: &str| {
        Segment::Bind(parse_expression(inner))
    })(input)
}

fn substitute(input: &str) -> IResult<&str, Segment> {
    map(delimited(tag("${"), take_until("}"), char('}')), |inner: &str| {
        Segment::Substitute(inner.trim().to_string())
    })(input)
}

fn text(input: &str) -> IResult<&str, Segment> {
    map(
        alt((
            take_till1(|c| c == '#' || c == '$'),
            recognize(terminated(one_of("#$"), not(char('{')))),
        )),
        |s: &str| Segment::Text(s.to_string()),
    )(input)
}

/// Text up to the next `$`, or a lone `$`.
fn variable_free_text(input: &str) -> IResult<&str, &str> {
    alt((take_till1(|c| c == '$'), recognize(char('$'))))(input)
}

/// Replaces every `${name}` that `lookup` resolves. Other text, unknown names
/// and unterminated markers are kept as written.
pub fn replace_variables(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        if let Ok((tail, Segment::Substitute(name))) = substitute(rest) {
            match lookup(&name) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[..rest.len() - tail.len()]),
            }
            rest = tail;
            continue;
        }
        match variable_free_text(rest) {
            Ok((tail, chunk)) => {
                out.push_str(chunk);
                rest = tail;
            }
            Err(_) => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    many0(alt((bind, substitute, text)))(input)
}

/// Static SQL template with `#{}` bind markers and `${}` substitutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSqlSource {
    segments: Vec<Segment>,
}

impl TextSqlSource {
    pub fn parse(statement_id: &str, template: &str) -> Result<Self> {
        let (rest, raw) = segments(template.trim()).map_err(|e| MapperError::MalformedTemplate {
            statement: statement_id.to_string(),
            message: e.to_string(),
        })?;
        if !rest.is_empty() {
            return Err(MapperError::MalformedTemplate {
                statement: statement_id.to_string(),
                message: format!("unterminated parameter marker near '{rest}'"),
            });
        }

        // Merge consecutive text runs produced by lone '#' / '$'
        let mut merged: Vec<Segment> = Vec::with_capacity(raw.len());
        for segment in raw {
            match (merged.last_mut(), segment) {
                (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
                (_, segment) => merged.push(segment),
            }
        }
        Ok(Self { segments: merged })
    }

    pub fn parameter_expressions(&self) -> impl Iterator<Item = &ParameterExpression> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Bind(e) => Some(e),
            _ => None,
        })
    }
}

/// Looks up a template name in the parameter object.
///
/// A scalar (or null) parameter object answers to every name.
pub fn parameter_value(parameter: &Value, name: &str) -> Result<Value> {
    if name == PARAMETER_OBJECT_KEY || parameter.is_scalar() {
        return Ok(parameter.clone());
    }
    match name.strip_prefix("_parameter.") {
        Some(rest) => get_property(parameter, rest),
        None => get_property(parameter, name),
    }
}

impl SqlSource for TextSqlSource {
    fn bound_sql(&self, parameter: &Value) -> Result<BoundSql> {
        let mut bound = BoundSql::default();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => bound.sql.push_str(text),
                Segment::Substitute(name) => {
                    let value = parameter_value(parameter, name)?;
                    if !value.is_null() {
                        bound.sql.push_str(&value.to_string());
                    }
                }
                Segment::Bind(expression) => {
                    let value = parameter_value(parameter, &expression.property)?;
                    let value = match &expression.value_type {
                        Some(value_type) => value_type.coerce(value)?,
                        None => value,
                    };
                    bound.sql.push('?');
                    bound.parameters.push(BoundParameter {
                        property: expression.property.clone(),
                        value,
                    });
                }
            }
        }
        Ok(bound)
    }
}

/// Default language driver: plain text statements only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLanguageDriver;

impl LanguageDriver for TextLanguageDriver {
    fn create_sql_source(
        &self,
        statement_id: &str,
        script: &Element,
        _parameter_type: Option<&ValueType>,
    ) -> Result<Arc<dyn SqlSource>> {
        let mut template = String::new();
        for node in &script.children {
            match node {
                Node::Text(text) => template.push_str(text),
                Node::Element(e) => {
                    return Err(MapperError::UnsupportedElement {
                        statement: statement_id.to_string(),
                        element: e.name.clone(),
                    });
                }
            }
        }
        Ok(Arc::new(TextSqlSource::parse(statement_id, &template)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_markers_become_placeholders() {
        let source = TextSqlSource::parse(
            "ns.find",
            "  SELECT * FROM users WHERE id = #{id} AND name = #{ name , jdbcType=VARCHAR }\n",
        )
        .unwrap();
        let param = Value::object([("id", Value::Integer(3)), ("name", Value::from("ann"))]);
        let bound = source.bound_sql(&param).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM users WHERE id = ? AND name = ?");
        assert_eq!(bound.values(), vec![Value::Integer(3), Value::from("ann")]);
        assert_eq!(bound.parameters[1].property, "name");
    }

    #[test]
    fn test_replace_variables_keeps_bind_markers() {
        let lookup = |name: &str| (name == "alias").then(|| "u".to_string());
        assert_eq!(
            replace_variables("${ alias }.id = #{id} AND ${other} = 1$", lookup),
            "u.id = #{id} AND ${other} = 1$"
        );
    }

    #[test]
    fn test_scalar_parameter_answers_any_name() {
        let source = TextSqlSource::parse("ns.del", "DELETE FROM t WHERE id = #{whatever}").unwrap();
        let bound = source.bound_sql(&Value::Integer(3)).unwrap();
        assert_eq!(bound.values(), vec![Value::Integer(3)]);

        let bound = source.bound_sql(&Value::Null).unwrap();
        assert_eq!(bound.values(), vec![Value::Null]);
    }

    #[test]
    fn test_substitution_and_java_type() {
        let source =
            TextSqlSource::parse("ns.q", "SELECT * FROM ${table} WHERE n = #{n,javaType=int} -- 100$ #tag")
                .unwrap();
        let param = Value::object([("table", Value::from("items")), ("n", Value::from("7"))]);
        let bound = source.bound_sql(&param).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM items WHERE n = ? -- 100$ #tag");
        assert_eq!(bound.values(), vec![Value::Integer(7)]);
    }

    #[test]
    fn test_missing_property_lists_available() {
        let source = TextSqlSource::parse("ns.q", "SELECT #{missing}").unwrap();
        let param = Value::object([("a", Value::Integer(1))]);
        assert!(matches!(
            source.bound_sql(&param),
            Err(MapperError::ParameterNotFound { .. })
        ));
    }

    #[test]
    fn test_unterminated_marker_is_rejected() {
        assert!(TextSqlSource::parse("ns.q", "SELECT #{oops").is_err());
    }

    #[test]
    fn test_driver_rejects_dynamic_elements() {
        let mut script = Element::new("select");
        script.children.push(Node::Text("SELECT 1".to_string()));
        script.children.push(Node::Element(Element::new("if")));
        let err = TextLanguageDriver
            .create_sql_source("ns.q", &script, None)
            .unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedElement { element, .. } if element == "if"));
    }
}
