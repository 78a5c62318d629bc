use indexmap::IndexMap;
use std::collections::VecDeque;

use crate::core::Value;
use crate::executor::BatchResult;

/// What a dispatched mapper call hands back, shaped by its declared return kind.
///
/// Cursor-returning methods go through [`Mapper::call_cursor`](super::Mapper::call_cursor) instead.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Void,
    Int(i32),
    Long(i64),
    Bool(bool),
    One(Option<Value>),
    List(Vec<Value>),
    Array(Vec<Value>),
    Deque(VecDeque<Value>),
    Map(IndexMap<String, Value>),
    Flushed(Vec<BatchResult>),
}

impl MethodResult {
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(l) => Some(*l),
            Self::Int(i) => Some(*i as i64),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Materialized values as one `Value`; flush results yield `None`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Void => Some(Value::Null),
            Self::Int(i) => Some(Value::from(i)),
            Self::Long(l) => Some(Value::Integer(l)),
            Self::Bool(b) => Some(Value::Boolean(b)),
            Self::One(v) => Some(v.unwrap_or_default()),
            Self::List(items) | Self::Array(items) => Some(Value::Array(items)),
            Self::Deque(items) => Some(Value::Array(items.into())),
            Self::Map(entries) => Some(Value::Object(entries)),
            Self::Flushed(_) => None,
        }
    }
}
