use crate::core::{MapperError, Result, Row, Value, get_property, set_property};
use crate::mapping::MappedStatement;

/// Keys under which a wrapped collection parameter may be found, in lookup order.
const COLLECTION_KEYS: [&str; 3] = ["collection", "list", "array"];

fn key_error(statement: &MappedStatement, message: impl Into<String>) -> MapperError {
    MapperError::KeyGeneration {
        statement: statement.id.clone(),
        message: message.into(),
    }
}

/// How a statement's parameter object was put together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParameterShape {
    /// Passed as given by the caller.
    #[default]
    Plain,
    /// A bag of named method arguments plus their `paramN` aliases.
    Named,
}

/// The argument of a named bag that receives undotted key properties: the
/// bag's only distinct value. Several distinct values are ambiguous.
fn sole_bag_argument<'p>(statement: &MappedStatement, parameter: &'p mut Value) -> Result<&'p mut Value> {
    let key = {
        let Some(bag) = parameter.as_object() else {
            return Ok(parameter);
        };
        let mut distinct: Vec<&Value> = Vec::new();
        for value in bag.values() {
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        if distinct.len() != 1 {
            return Err(key_error(
                statement,
                format!(
                    "cannot tell which parameter receives keys {:?}; prefix them with one of {:?}",
                    statement.key_properties,
                    bag.keys().collect::<Vec<_>>()
                ),
            ));
        }
        bag.keys().next().cloned().unwrap_or_default()
    };
    parameter
        .as_object_mut()
        .and_then(|bag| bag.get_mut(&key))
        .ok_or_else(|| key_error(statement, format!("missing '{key}' parameter")))
}

/// The objects that receive generated keys: the elements of a collection
/// parameter, or the parameter itself.
fn key_targets<'p>(statement: &MappedStatement, parameter: &'p mut Value) -> Result<Vec<&'p mut Value>> {
    let wrapped = parameter
        .as_object()
        .and_then(|record| COLLECTION_KEYS.iter().find(|k| record.contains_key(**k)))
        .copied();
    let target = match wrapped {
        Some(key) => parameter
            .as_object_mut()
            .and_then(|record| record.get_mut(key))
            .ok_or_else(|| key_error(statement, format!("missing '{key}' parameter")))?,
        None => parameter,
    };
    match target {
        Value::Array(items) => Ok(items.iter_mut().collect()),
        Value::Object(_) => Ok(vec![target]),
        Value::Null => Ok(Vec::new()),
        other => Err(key_error(
            statement,
            format!("cannot assign keys {:?} to scalar parameter {other}", statement.key_properties),
        )),
    }
}

/// Copies driver-generated keys into the parameter, one key row per target.
///
/// In a named bag, dotted key properties (`user.id`) address an argument by
/// name; undotted ones go to the bag's single argument.
pub fn assign_driver_keys(
    statement: &MappedStatement,
    parameter: &mut Value,
    shape: ParameterShape,
    rows: &[Row],
) -> Result<()> {
    if statement.key_properties.is_empty() || rows.is_empty() {
        return Ok(());
    }
    let targets = match shape {
        ParameterShape::Named if statement.key_properties.iter().all(|p| p.contains('.')) => vec![parameter],
        ParameterShape::Named => key_targets(statement, sole_bag_argument(statement, parameter)?)?,
        ParameterShape::Plain => key_targets(statement, parameter)?,
    };
    for (target, row) in targets.into_iter().zip(rows) {
        if row.len() < statement.key_properties.len() {
            return Err(key_error(
                statement,
                format!(
                    "too many key properties {:?}; the driver returned {} column(s)",
                    statement.key_properties,
                    row.len()
                ),
            ));
        }
        for (i, property) in statement.key_properties.iter().enumerate() {
            let value = statement
                .key_columns
                .get(i)
                .and_then(|column| row.get(column))
                .or_else(|| row.values.get(i))
                .cloned()
                .unwrap_or_default();
            set_property(target, property, value)?;
        }
    }
    Ok(())
}

/// Writes the single result of a key statement into the parameter.
pub fn assign_select_key(statement: &MappedStatement, parameter: &mut Value, mut results: Vec<Value>) -> Result<()> {
    if statement.key_properties.is_empty() || parameter.is_null() {
        return Ok(());
    }
    let result = match results.len() {
        0 => return Err(key_error(statement, "SelectKey returned no data.")),
        1 => results.remove(0),
        _ => return Err(key_error(statement, "SelectKey returned more than one value.")),
    };
    if let [property] = statement.key_properties.as_slice() {
        let value = match result.get(property) {
            Some(v) => v.clone(),
            None => result,
        };
        return set_property(parameter, property, value);
    }
    for (i, property) in statement.key_properties.iter().enumerate() {
        let source = statement.key_columns.get(i).unwrap_or(property);
        let value = get_property(&result, source)?;
        set_property(parameter, property, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CommandKind, TextSqlSource};
    use std::sync::Arc;

    fn insert(properties: &[&str]) -> MappedStatement {
        let source = Arc::new(TextSqlSource::parse("ns.insert", "INSERT INTO t VALUES (1)").unwrap());
        let mut ms = MappedStatement::new("ns.insert", CommandKind::Insert, source);
        ms.key_properties = properties.iter().map(ToString::to_string).collect();
        ms
    }

    fn key_row(id: i64) -> Row {
        Row::new(Arc::from(vec!["GENERATED_KEY".to_string()]), vec![Value::Integer(id)])
    }

    #[test]
    fn test_driver_keys_fill_single_object() {
        let ms = insert(&["id"]);
        let mut param = Value::object([("name", Value::from("a")), ("id", Value::Null)]);
        assign_driver_keys(&ms, &mut param, ParameterShape::Plain, &[key_row(10)]).unwrap();
        assert_eq!(param.get("id"), Some(&Value::Integer(10)));
    }

    #[test]
    fn test_driver_keys_fill_wrapped_collection_in_order() {
        let ms = insert(&["id"]);
        let items = Value::Array(vec![Value::object([("n", Value::Integer(1))]), Value::object([("n", Value::Integer(2))])]);
        let mut param = Value::object([("collection", items.clone()), ("list", items)]);
        assign_driver_keys(&ms, &mut param, ParameterShape::Plain, &[key_row(5), key_row(6)]).unwrap();
        let filled = param.get("collection").and_then(Value::as_array).unwrap();
        assert_eq!(filled[0].get("id"), Some(&Value::Integer(5)));
        assert_eq!(filled[1].get("id"), Some(&Value::Integer(6)));
    }

    #[test]
    fn test_driver_keys_reject_scalar_parameter() {
        let ms = insert(&["id"]);
        let mut param = Value::Integer(3);
        let err = assign_driver_keys(&ms, &mut param, ParameterShape::Plain, &[key_row(1)]).unwrap_err();
        assert!(matches!(err, MapperError::KeyGeneration { .. }));
    }

    #[test]
    fn test_driver_keys_reach_the_sole_named_argument() {
        let ms = insert(&["id"]);
        let user = Value::object([("name", Value::from("a"))]);
        let mut bag = Value::object([("user", user.clone()), ("param1", user)]);
        assign_driver_keys(&ms, &mut bag, ParameterShape::Named, &[key_row(4)]).unwrap();
        assert_eq!(bag.get("user").and_then(|u| u.get("id")), Some(&Value::Integer(4)));
        assert_eq!(bag.get("id"), None);
    }

    #[test]
    fn test_driver_keys_over_several_named_arguments() {
        let ms = insert(&["id"]);
        let user = Value::object([("name", Value::from("a"))]);
        let mut bag = Value::object([
            ("user", user.clone()),
            ("tenant", Value::from("t1")),
            ("param1", user),
            ("param2", Value::from("t1")),
        ]);
        let err = assign_driver_keys(&ms, &mut bag, ParameterShape::Named, &[key_row(4)]).unwrap_err();
        assert!(matches!(err, MapperError::KeyGeneration { .. }));

        let ms = insert(&["user.id"]);
        assign_driver_keys(&ms, &mut bag, ParameterShape::Named, &[key_row(5)]).unwrap();
        assert_eq!(bag.get("user").and_then(|u| u.get("id")), Some(&Value::Integer(5)));
    }

    #[test]
    fn test_select_key_needs_exactly_one_result() {
        let ms = insert(&["id"]);
        let mut param = Value::object([("id", Value::Null)]);
        assert!(assign_select_key(&ms, &mut param, vec![]).is_err());
        assert!(assign_select_key(&ms, &mut param, vec![Value::Integer(1), Value::Integer(2)]).is_err());
        assign_select_key(&ms, &mut param, vec![Value::Integer(42)]).unwrap();
        assert_eq!(param.get("id"), Some(&Value::Integer(42)));
    }

    #[test]
    fn test_select_key_multiple_properties_by_column() {
        let mut ms = insert(&["id", "version"]);
        ms.key_columns = vec!["ID".into(), "VER".into()];
        let mut param = Value::object([("id", Value::Null)]);
        let result = Value::object([("ID", Value::Integer(3)), ("VER", Value::Integer(9))]);
        assign_select_key(&ms, &mut param, vec![result]).unwrap();
        assert_eq!(param.get("id"), Some(&Value::Integer(3)));
        assert_eq!(param.get("version"), Some(&Value::Integer(9)));
    }
}
