use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use super::apply_namespace;
use super::markup::{Element, Node};
use crate::core::{Dependency, MapperError, Result};
use crate::mapping::{
    CommandKind, KeyGenerator, MappedStatement, ResultShape, SELECT_KEY_SUFFIX, ValueType, replace_variables,
};
use crate::registry::{PendingStatement, Progress, StatementRegistry};

/// Nesting limit for `<include>`; deeper chains are taken as a cycle.
const MAX_INCLUDE_DEPTH: usize = 32;

type Variables = HashMap<String, String>;

/// Ok(value) when ready, Err(dependency) when something is not registered yet.
type Resolution<T> = std::result::Result<T, Dependency>;

/// Replaces `${name}` with known variables; unknown names are left alone.
fn substitute(text: &str, variables: &Variables) -> String {
    if variables.is_empty() {
        return text.to_string();
    }
    replace_variables(text, |name| variables.get(name).cloned())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

struct Splicer<'a> {
    registry: &'a StatementRegistry,
    namespace: &'a str,
    statement_id: &'a str,
}

impl Splicer<'_> {
    /// Copy of `element` with every `<include>` replaced by its fragment's content.
    fn splice(&self, element: &Element, variables: &Variables, included: bool, depth: usize) -> Result<Resolution<Element>> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(MapperError::MalformedTemplate {
                statement: self.statement_id.to_string(),
                message: "include nesting too deep; fragments may include each other".to_string(),
            });
        }
        let substituting = included && !variables.is_empty();
        let mut out = Element::new(element.name.clone());
        out.attributes = element
            .attributes
            .iter()
            .map(|(k, v)| {
                let v = if substituting { substitute(v, variables) } else { v.clone() };
                (k.clone(), v)
            })
            .collect();

        for child in &element.children {
            match child {
                Node::Text(text) => {
                    let text = if substituting { substitute(text, variables) } else { text.clone() };
                    out.children.push(Node::Text(text));
                }
                Node::Element(include) if include.name == "include" => {
                    match self.include(include, variables, depth)? {
                        Ok(fragment) => out.children.extend(fragment.children),
                        Err(dependency) => return Ok(Err(dependency)),
                    }
                }
                Node::Element(nested) => match self.splice(nested, variables, included, depth)? {
                    Ok(spliced) => out.children.push(Node::Element(spliced)),
                    Err(dependency) => return Ok(Err(dependency)),
                },
            }
        }
        Ok(Ok(out))
    }

    fn include(&self, include: &Element, variables: &Variables, depth: usize) -> Result<Resolution<Element>> {
        let refid = substitute(include.required_attr("refid")?, variables);
        let id = apply_namespace(self.namespace, &refid, true)?;
        let Some(fragment) = self.registry.sql_fragment(&id)? else {
            return Ok(Err(Dependency::Fragment(id)));
        };
        let mut local = variables.clone();
        let mut declared = HashSet::new();
        for (name, value) in include.properties() {
            if !declared.insert(name.clone()) {
                return Err(MapperError::Duplicate {
                    collection: "include properties",
                    id: name,
                });
            }
            local.insert(name, substitute(&value, variables));
        }
        self.splice(fragment, &local, true, depth + 1)
    }
}

/// True when `element` belongs to the pass described by `required`.
///
/// With an active database id only matching statements register in the
/// first pass; the variant-free pass skips ids already held by a variant.
fn database_id_matches(
    registry: &StatementRegistry,
    id: &str,
    database_id: Option<&str>,
    required: Option<&str>,
) -> bool {
    if let Some(required) = required {
        return database_id == Some(required);
    }
    if database_id.is_some() {
        return false;
    }
    match registry.statement(id) {
        Ok(previous) => previous.database_id.is_none(),
        Err(_) => true,
    }
}

fn statement_id(pending: &PendingStatement) -> Result<String> {
    apply_namespace(&pending.namespace, pending.element.required_attr("id")?, false)
}

fn result_shape_ids(pending: &PendingStatement) -> Result<Vec<String>> {
    split_list(pending.element.attr("resultMap"))
        .iter()
        .map(|id| apply_namespace(&pending.namespace, id, true))
        .collect()
}

fn splice_statement(registry: &StatementRegistry, pending: &PendingStatement, id: &str) -> Result<Resolution<Element>> {
    let splicer = Splicer {
        registry,
        namespace: &pending.namespace,
        statement_id: id,
    };
    splicer.splice(&pending.element, &Variables::new(), false, 0)
}

/// First missing dependency of a statement, or None when it can be built.
pub(crate) fn statement_blocker(registry: &StatementRegistry, pending: &PendingStatement) -> Result<Option<Dependency>> {
    let id = statement_id(pending)?;
    if !database_id_matches(
        registry,
        &id,
        pending.element.attr("databaseId"),
        pending.required_database_id.as_deref(),
    ) {
        return Ok(None);
    }
    if let Some(target) = registry.unresolved_cache_ref(&pending.namespace) {
        return Ok(Some(Dependency::CacheRef(target.to_string())));
    }
    if let Err(dependency) = splice_statement(registry, pending, &id)? {
        return Ok(Some(dependency));
    }
    if let Some(map) = pending.element.attr("parameterMap") {
        let map = apply_namespace(&pending.namespace, map, true)?;
        if registry.parameter_map(&map)?.is_none() {
            return Ok(Some(Dependency::ParameterMap(map)));
        }
    }
    for shape in result_shape_ids(pending)? {
        if !registry.has_result_shape(&shape) {
            return Ok(Some(Dependency::ResultShape(shape)));
        }
    }
    Ok(None)
}

/// Registers `<id>!key` from the matching `<selectKey>` child, if any.
/// Returns whether the key statement runs before the main one.
fn build_select_key(
    registry: &mut StatementRegistry,
    pending: &PendingStatement,
    parent_id: &str,
    script: &Element,
) -> Result<Option<bool>> {
    let key_id = format!("{parent_id}{SELECT_KEY_SUFFIX}");
    let mut passes = vec![registry.settings().database_id.clone()];
    if passes[0].is_some() {
        passes.push(None);
    }
    for required in passes {
        for select_key in script.elements_named("selectKey") {
            let database_id = select_key.attr("databaseId");
            let matches = match required.as_deref() {
                Some(required) => database_id == Some(required),
                None => database_id.is_none() && !registry.has_statement(&key_id),
            };
            if !matches {
                continue;
            }
            let execute_before = match select_key.attr("order").unwrap_or("AFTER").to_ascii_uppercase().as_str() {
                "BEFORE" => true,
                "AFTER" => false,
                other => {
                    return Err(MapperError::InvalidAttribute {
                        attribute: "order".to_string(),
                        value: other.to_string(),
                    });
                }
            };
            let lang = select_key.attr("lang").or_else(|| pending.element.attr("lang"));
            let driver = registry.language_driver(lang)?;
            let parameter_type = pending.element.attr("parameterType").map(ValueType::resolve);
            let sql_source = driver.create_sql_source(&key_id, select_key, parameter_type.as_ref())?;

            let mut key = MappedStatement::new(key_id.clone(), CommandKind::Select, sql_source);
            key.resource = pending.resource.clone();
            key.parameter_type = parameter_type;
            key.flush_cache = false;
            key.use_cache = false;
            key.key_properties = split_list(select_key.attr("keyProperty"));
            key.key_columns = split_list(select_key.attr("keyColumn"));
            key.database_id = database_id.map(str::to_string);
            if let Some(result_type) = select_key.attr("resultType") {
                let shape = ResultShape::inline(format!("{key_id}-Inline"), ValueType::resolve(result_type));
                key.result_shapes = vec![Arc::new(shape)];
            }
            registry.add_statement(key)?;
            return Ok(Some(execute_before));
        }
    }
    Ok(None)
}

/// Builds and registers one statement, or reports what it waits on.
pub(crate) fn build_statement(registry: &mut StatementRegistry, pending: &PendingStatement) -> Result<Progress> {
    let id = statement_id(pending)?;
    let element = &pending.element;
    let database_id = element.attr("databaseId");
    if !database_id_matches(registry, &id, database_id, pending.required_database_id.as_deref()) {
        return Ok(Progress::Done);
    }
    if let Some(dependency) = statement_blocker(registry, pending)? {
        tracing::debug!(statement = %id, waiting_on = %dependency, "statement deferred");
        return Ok(Progress::Blocked(dependency));
    }

    let kind = CommandKind::from_str(&element.name)?;
    let script = match splice_statement(registry, pending, &id)? {
        Ok(script) => script,
        Err(dependency) => return Ok(Progress::Blocked(dependency)),
    };

    let key_before = build_select_key(registry, pending, &id, &script)?;
    let mut body = script;
    body.children
        .retain(|n| !matches!(n, Node::Element(e) if e.name == "selectKey"));

    let parameter_type = element.attr("parameterType").map(ValueType::resolve);
    let driver = registry.language_driver(element.attr("lang"))?;
    let sql_source = driver.create_sql_source(&id, &body, parameter_type.as_ref())?;

    let mut statement = MappedStatement::new(id.clone(), kind, sql_source);
    statement.resource = pending.resource.clone();
    statement.fetch_size = element.attr_u32("fetchSize")?;
    statement.timeout = element.attr_u32("timeout")?;
    statement.parameter_type = parameter_type;
    statement.parameter_map = match element.attr("parameterMap") {
        Some(map) => registry.parameter_map(&apply_namespace(&pending.namespace, map, true)?)?,
        None => None,
    };
    statement.result_shapes = if element.attr("resultMap").is_some() {
        result_shape_ids(pending)?
            .iter()
            .map(|shape| registry.result_shape(shape))
            .collect::<Result<_>>()?
    } else if let Some(result_type) = element.attr("resultType") {
        let shape = ResultShape::inline(format!("{id}-Inline"), ValueType::resolve(result_type));
        vec![Arc::new(shape)]
    } else {
        Vec::new()
    };
    statement.flush_cache = element.attr_bool("flushCache")?.unwrap_or(!kind.is_select());
    statement.use_cache = element.attr_bool("useCache")?.unwrap_or(kind.is_select());
    statement.result_ordered = element.attr_bool("resultOrdered")?.unwrap_or(false);
    statement.key_properties = split_list(element.attr("keyProperty"));
    statement.key_columns = split_list(element.attr("keyColumn"));
    statement.database_id = database_id.map(str::to_string);
    statement.cache_namespace = registry.cache_owner(&pending.namespace).map(str::to_string);

    let key_id = format!("{id}{SELECT_KEY_SUFFIX}");
    statement.key_generator = if registry.has_statement(&key_id) {
        KeyGenerator::Statement {
            key_statement_id: key_id,
            execute_before: key_before.unwrap_or_else(|| select_key_runs_before(element)),
        }
    } else {
        let use_generated_keys = element
            .attr_bool("useGeneratedKeys")?
            .unwrap_or(registry.settings().use_generated_keys && kind == CommandKind::Insert);
        if use_generated_keys {
            KeyGenerator::Driver
        } else {
            KeyGenerator::None
        }
    };

    registry.add_statement(statement)?;
    Ok(Progress::Done)
}

fn select_key_runs_before(element: &Element) -> bool {
    element
        .first_named("selectKey")
        .and_then(|k| k.attr("order"))
        .is_some_and(|order| order.eq_ignore_ascii_case("BEFORE"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known_and_unknown_variables() {
        let mut vars = Variables::new();
        vars.insert("alias".into(), "t1".into());
        assert_eq!(substitute("${alias}.id, ${other}", &vars), "t1.id, ${other}");
        assert_eq!(substitute("no vars ${", &vars), "no vars ${");
        assert_eq!(substitute("${alias}", &Variables::new()), "${alias}");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("id, version,")), vec!["id", "version"]);
        assert!(split_list(None).is_empty());
    }
}
