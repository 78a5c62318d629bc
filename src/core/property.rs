use nom::{
    IResult,
    bytes::complete::take_till,
    character::complete::char,
    combinator::{consumed, opt},
    sequence::{delimited, pair},
};

use super::error::{MapperError, Result};
use super::value::{Record, Value};

/// `name` or `name[index]`, returned together with the text it spans.
fn path_segment(input: &str) -> IResult<&str, (&str, (&str, Option<&str>))> {
    consumed(pair(
        take_till(|c| c == '.' || c == '['),
        opt(delimited(char('['), take_till(|c| c == ']'), opt(char(']')))),
    ))(input)
}

/// One step of a property path such as `orders[2].lines[0].sku`.
///
/// `orders[2].lines[0].sku` tokenizes to `name = "orders"`, `index = "2"`,
/// `children = "lines[0].sku"`; iterating continues with the children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyTokenizer<'a> {
    name: &'a str,
    indexed_name: &'a str,
    index: Option<&'a str>,
    children: Option<&'a str>,
}

impl<'a> PropertyTokenizer<'a> {
    pub fn new(full_name: &'a str) -> Self {
        let (rest, (indexed_name, (name, index))) =
            path_segment(full_name).unwrap_or(("", (full_name, (full_name, None))));
        Self {
            name,
            indexed_name,
            index,
            children: rest.split_once('.').map(|(_, children)| children),
        }
    }

    pub const fn name(&self) -> &'a str {
        self.name
    }

    pub const fn index(&self) -> Option<&'a str> {
        self.index
    }

    pub const fn indexed_name(&self) -> &'a str {
        self.indexed_name
    }

    pub const fn children(&self) -> Option<&'a str> {
        self.children
    }

    /// All segments of a path, outermost first.
    pub fn segments(full_name: &'a str) -> impl Iterator<Item = PropertyTokenizer<'a>> {
        std::iter::successors(Some(Self::new(full_name)), |t| t.children.map(Self::new))
    }
}

fn not_found(name: &str, record: &Record) -> MapperError {
    MapperError::ParameterNotFound {
        name: name.to_string(),
        available: record.keys().cloned().collect(),
    }
}

fn index_into<'v>(value: &'v Value, index: &str, path: &str) -> Result<&'v Value> {
    match value {
        Value::Array(items) => index
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .ok_or_else(|| MapperError::PropertyPath(path.to_string())),
        Value::Object(record) => record.get(index).ok_or_else(|| not_found(index, record)),
        Value::Null => Ok(value),
        _ => Err(MapperError::PropertyPath(path.to_string())),
    }
}

fn index_into_mut<'v>(value: &'v mut Value, index: &str, path: &str) -> Result<&'v mut Value> {
    if value.is_null() {
        *value = Value::Object(Record::new());
    }
    match value {
        Value::Array(items) => index
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get_mut(i))
            .ok_or_else(|| MapperError::PropertyPath(path.to_string())),
        Value::Object(record) => Ok(record.entry(index.to_string()).or_insert(Value::Null)),
        _ => Err(MapperError::PropertyPath(path.to_string())),
    }
}

/// Reads `path` from `root`. A null anywhere along the way reads as null.
pub fn get_property(root: &Value, path: &str) -> Result<Value> {
    let mut current = root;
    for token in PropertyTokenizer::segments(path) {
        if !token.name().is_empty() {
            current = match current {
                Value::Object(record) => record
                    .get(token.name())
                    .ok_or_else(|| not_found(token.name(), record))?,
                Value::Null => return Ok(Value::Null),
                _ => return Err(MapperError::PropertyPath(path.to_string())),
            };
        }
        if let Some(index) = token.index() {
            current = index_into(current, index, path)?;
        }
    }
    Ok(current.clone())
}

/// True when every segment of `path` exists in `root`.
pub fn has_property(root: &Value, path: &str) -> bool {
    matches!(get_property(root, path), Ok(_))
}

/// Writes `value` at `path`, creating intermediate objects as needed.
pub fn set_property(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let token = PropertyTokenizer::new(path);
    let mut slot = root;
    if !token.name().is_empty() {
        if slot.is_null() {
            *slot = Value::Object(Record::new());
        }
        let record = slot
            .as_object_mut()
            .ok_or_else(|| MapperError::PropertyPath(path.to_string()))?;
        slot = record.entry(token.name().to_string()).or_insert(Value::Null);
    }
    if let Some(index) = token.index() {
        slot = index_into_mut(slot, index, path)?;
    }
    match token.children() {
        Some(rest) => set_property(slot, rest, value),
        None => {
            *slot = value;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Value {
        Value::object([
            ("id", Value::Integer(7)),
            (
                "lines",
                Value::Array(vec![
                    Value::object([("sku", Value::from("A-1"))]),
                    Value::object([("sku", Value::from("B-2"))]),
                ]),
            ),
            ("customer", Value::Null),
        ])
    }

    #[test]
    fn test_tokenizer_splits_name_index_and_children() {
        let t = PropertyTokenizer::new("lines[1].sku");
        assert_eq!(t.name(), "lines");
        assert_eq!(t.index(), Some("1"));
        assert_eq!(t.indexed_name(), "lines[1]");
        assert_eq!(t.children(), Some("sku"));

        let names: Vec<_> = PropertyTokenizer::segments("a.b[x].c").map(|t| t.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let keyed = PropertyTokenizer::new("prices[1.5].amount");
        assert_eq!(keyed.index(), Some("1.5"));
        assert_eq!(keyed.children(), Some("amount"));
        assert_eq!(PropertyTokenizer::new("id").children(), None);
    }

    #[test]
    fn test_get_nested_and_indexed() {
        let v = order();
        assert_eq!(get_property(&v, "lines[1].sku").unwrap(), Value::from("B-2"));
        assert_eq!(get_property(&v, "customer.name").unwrap(), Value::Null);
    }

    #[test]
    fn test_get_missing_lists_available() {
        let err = get_property(&order(), "total").unwrap_err();
        match err {
            MapperError::ParameterNotFound { name, available } => {
                assert_eq!(name, "total");
                assert_eq!(available, vec!["id", "lines", "customer"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut v = order();
        set_property(&mut v, "customer.address.city", Value::from("Oslo")).unwrap();
        set_property(&mut v, "lines[0].qty", Value::Integer(3)).unwrap();
        assert_eq!(get_property(&v, "customer.address.city").unwrap(), Value::from("Oslo"));
        assert_eq!(get_property(&v, "lines[0].qty").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_set_on_scalar_fails() {
        let mut v = Value::Integer(1);
        assert!(set_property(&mut v, "id", Value::Integer(2)).is_err());
    }
}
