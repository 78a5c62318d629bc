use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::str::FromStr;
use uuid::Uuid;

use crate::core::{MapperError, Result, Value};

/// Declared type of a result, parameter or mapped property, resolved from
/// a type alias (`int`, `string`, `map`, ...) or a free-form type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Integer,
    Long,
    Double,
    Boolean,
    String,
    Decimal,
    Date,
    Timestamp,
    Uuid,
    Bytes,
    /// Untyped record of every column.
    Map,
    /// A named structured type; assembled as an object.
    Object(String),
}

impl ValueType {
    pub fn resolve(alias: &str) -> Self {
        match alias.trim().to_ascii_lowercase().as_str() {
            "int" | "_int" | "integer" | "_integer" | "short" | "_short" | "byte" | "_byte"
            | "i32" | "i16" | "i8" => Self::Integer,
            "long" | "_long" | "i64" | "biginteger" => Self::Long,
            "double" | "_double" | "float" | "_float" | "f64" | "f32" => Self::Double,
            "boolean" | "_boolean" | "bool" => Self::Boolean,
            "string" | "str" | "char" | "_char" | "character" => Self::String,
            "decimal" | "bigdecimal" | "numeric" => Self::Decimal,
            "date" | "localdate" => Self::Date,
            "timestamp" | "localdatetime" | "datetime" => Self::Timestamp,
            "uuid" => Self::Uuid,
            "bytes" | "byte[]" | "_byte[]" | "blob" => Self::Bytes,
            "map" | "hashmap" | "linkedhashmap" | "record" => Self::Map,
            _ => Self::Object(alias.trim().to_string()),
        }
    }

    /// True for types a single column maps onto directly.
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::Map | Self::Object(_))
    }

    fn name(&self) -> &str {
        match self {
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Bytes => "bytes",
            Self::Map => "map",
            Self::Object(name) => name,
        }
    }

    const fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Integer | Self::Long, Value::Integer(_))
                | (Self::Double, Value::Real(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::String, Value::Text(_))
                | (Self::Decimal, Value::Numeric(_))
                | (Self::Date, Value::Date(_))
                | (Self::Timestamp, Value::Timestamp(_) | Value::TimestampTz(_))
                | (Self::Uuid, Value::Uuid(_))
                | (Self::Bytes, Value::Bytea(_))
        )
    }

    /// Converts a raw column or argument value into this type. Null stays null.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() || !self.is_scalar() {
            return Ok(value);
        }
        let fail = |v: &Value| MapperError::Conversion {
            value: v.to_string(),
            target: self.name().to_string(),
        };
        if self.accepts(&value) {
            return Ok(value);
        }
        let coerced = match (self, &value) {
            (Self::Integer | Self::Long, Value::Real(r)) => Value::Integer(r.trunc() as i64),
            (Self::Integer | Self::Long, Value::Numeric(d)) => {
                Value::Integer(d.trunc().to_i64().ok_or_else(|| fail(&value))?)
            }
            (Self::Integer | Self::Long, Value::Boolean(b)) => Value::Integer(i64::from(*b)),
            (Self::Integer | Self::Long, Value::Text(s)) => {
                Value::Integer(s.trim().parse().map_err(|_| fail(&value))?)
            }
            (Self::Double, Value::Integer(i)) => Value::Real(*i as f64),
            (Self::Double, Value::Numeric(d)) => Value::Real(d.to_f64().ok_or_else(|| fail(&value))?),
            (Self::Double, Value::Text(s)) => Value::Real(s.trim().parse().map_err(|_| fail(&value))?),
            (Self::Boolean, Value::Integer(i)) => Value::Boolean(*i != 0),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "y" => Value::Boolean(true),
                "false" | "f" | "0" | "no" | "n" => Value::Boolean(false),
                _ => return Err(fail(&value)),
            },
            (Self::String, Value::Bytea(b)) => {
                Value::Text(String::from_utf8(b.clone()).map_err(|_| fail(&value))?)
            }
            (Self::String, other) => Value::Text(other.to_string()),
            (Self::Decimal, Value::Integer(i)) => Value::Numeric(Decimal::from(*i)),
            (Self::Decimal, Value::Real(r)) => {
                Value::Numeric(Decimal::from_f64(*r).ok_or_else(|| fail(&value))?)
            }
            (Self::Decimal, Value::Text(s)) => {
                Value::Numeric(Decimal::from_str(s.trim()).map_err(|_| fail(&value))?)
            }
            (Self::Date, Value::Text(s)) => {
                Value::Date(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| fail(&value))?)
            }
            (Self::Date, Value::Timestamp(t)) => Value::Date(t.date()),
            (Self::Timestamp, Value::Text(s)) => Value::Timestamp(
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f"))
                    .map_err(|_| fail(&value))?,
            ),
            (Self::Uuid, Value::Text(s)) => Value::Uuid(Uuid::parse_str(s.trim()).map_err(|_| fail(&value))?),
            (Self::Bytes, Value::Text(s)) => Value::Bytea(s.as_bytes().to_vec()),
            _ => return Err(fail(&value)),
        };
        Ok(coerced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_aliases() {
        assert_eq!(ValueType::resolve("int"), ValueType::Integer);
        assert_eq!(ValueType::resolve("_long"), ValueType::Long);
        assert_eq!(ValueType::resolve("HashMap"), ValueType::Map);
        assert_eq!(
            ValueType::resolve("com.example.User"),
            ValueType::Object("com.example.User".to_string())
        );
    }

    #[test]
    fn test_coerce_scalars() {
        assert_eq!(ValueType::Integer.coerce(Value::from("42")).unwrap(), Value::Integer(42));
        assert_eq!(ValueType::Boolean.coerce(Value::Integer(0)).unwrap(), Value::Boolean(false));
        assert_eq!(ValueType::String.coerce(Value::Integer(5)).unwrap(), Value::from("5"));
        assert_eq!(ValueType::Long.coerce(Value::Null).unwrap(), Value::Null);
        assert_eq!(
            ValueType::Date.coerce(Value::from("2024-02-29")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(ValueType::Integer.coerce(Value::from("abc")).is_err());
    }

    #[test]
    fn test_object_types_pass_through() {
        let record = Value::object([("a", Value::Integer(1))]);
        assert_eq!(ValueType::Map.coerce(record.clone()).unwrap(), record);
    }
}
