// Module declarations
pub mod error;
pub mod value;
pub mod row;
pub mod property;

// Re-exports for convenience
pub use error::{Dependency, ErrorKind, MapperError, Result, UnresolvedElement};
pub use value::{Record, Value};
pub use row::Row;
pub use property::{PropertyTokenizer, get_property, has_property, set_property};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        id: Option<i64>,
        username: String,
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::Real(3.5).to_string(), "3.5");
        assert_eq!(Value::Text("hello".to_string()).to_string(), "hello");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Bytea(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(
            Value::object([("a", Value::Integer(1))]).to_string(),
            "{\"a\":1}"
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(42).as_int(), Some(42));
        assert_eq!(Value::Text("hello".to_string()).as_int(), None);
        assert_eq!(Value::Text("hello".to_string()).as_text(), Some("hello"));
        assert_eq!(Value::Boolean(false).as_bool(), Some(false));
        assert!(Value::Integer(1).is_scalar());
        assert!(!Value::Array(vec![]).is_scalar());
    }

    #[test]
    fn test_value_serde_round_trip_through_struct() {
        let user = User {
            id: None,
            username: "test".to_string(),
        };
        let value = Value::from_serialize(&user).unwrap();
        assert_eq!(value.get("username"), Some(&Value::from("test")));
        assert_eq!(value.get("id"), Some(&Value::Null));

        let mut value = value;
        set_property(&mut value, "id", Value::Integer(3)).unwrap();
        let back: User = value.deserialize_into().unwrap();
        assert_eq!(back.id, Some(3));
    }

    #[test]
    fn test_row_lookup_ignores_case() {
        let columns: Arc<[String]> = Arc::from(vec!["ID".to_string(), "Name".to_string()]);
        let row = Row::new(columns, vec![Value::Integer(1), Value::from("x")]);
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get("NAME"), Some(&Value::from("x")));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            MapperError::StatementNotBound("ns.x".into()).kind(),
            ErrorKind::Binding
        );
        assert_eq!(
            MapperError::Duplicate { collection: "Mapped Statements", id: "ns.x".into() }.kind(),
            ErrorKind::Definition
        );
        assert_eq!(MapperError::CursorClosed.kind(), ErrorKind::Execution);
    }
}
