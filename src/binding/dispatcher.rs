use std::sync::Arc;

use super::interface::MapperInterface;
use super::result::MethodResult;
use crate::core::{Result, Value};
use crate::executor::{Cursor, ResultHandler, RowBounds};
use crate::session::Session;

/// One call argument, matched against the declared parameter slots.
pub enum Arg<'a> {
    Value(Value),
    RowBounds(RowBounds),
    Handler(&'a mut dyn ResultHandler),
}

impl Arg<'_> {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Arg<'_> {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<RowBounds> for Arg<'_> {
    fn from(bounds: RowBounds) -> Self {
        Self::RowBounds(bounds)
    }
}

impl std::fmt::Debug for Arg<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::RowBounds(b) => f.debug_tuple("RowBounds").field(b).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Dispatches method calls of one registered interface through a session.
pub struct Mapper<'s> {
    session: &'s mut Session,
    interface: Arc<MapperInterface>,
}

impl<'s> Mapper<'s> {
    pub(crate) fn new(session: &'s mut Session, interface: Arc<MapperInterface>) -> Self {
        Self { session, interface }
    }

    pub fn interface(&self) -> &MapperInterface {
        &self.interface
    }

    /// Calls `method`. Generated keys are written back into `args`.
    pub fn call(&mut self, method: &str, args: &mut [Arg<'_>]) -> Result<MethodResult> {
        let binding = self.session.registry().mapper_method(&self.interface.name, method)?;
        binding.execute(self.session, args)
    }

    /// Calls a method declared to return a cursor. The mapper stays borrowed
    /// until the cursor is dropped.
    pub fn call_cursor(&mut self, method: &str, args: &mut [Arg<'_>]) -> Result<Cursor<'_>> {
        let binding = self.session.registry().mapper_method(&self.interface.name, method)?;
        binding.execute_cursor(self.session, args)
    }
}
