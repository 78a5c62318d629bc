use std::collections::VecDeque;

use super::dispatcher::Arg;
use super::interface::{CollectionKind, MapperInterface, MethodDecl, ParamKind, ReturnKind};
use super::param_names::ParamNameResolver;
use super::result::MethodResult;
use crate::core::{MapperError, Result, Value};
use crate::executor::{Cursor, ParameterShape, RowBounds};
use crate::mapping::CommandKind;
use crate::registry::StatementRegistry;
use crate::session::Session;

/// The statement a method resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCommand {
    pub name: String,
    pub kind: CommandKind,
}

/// True when `interface` is `target` or inherits from it.
fn is_assignable(registry: &StatementRegistry, target: &str, interface: &str) -> bool {
    if target == interface {
        return true;
    }
    registry
        .mapper(interface)
        .map(|m| m.extends.iter().any(|parent| is_assignable(registry, target, parent)))
        .unwrap_or(false)
}

/// Statement id for `method`, searching parent interfaces that inherit the declaration.
fn resolve_statement(registry: &StatementRegistry, interface: &str, method: &str, declaring: &str) -> Option<String> {
    let id = format!("{interface}.{method}");
    if registry.has_statement(&id) {
        return Some(id);
    }
    if interface == declaring {
        return None;
    }
    let mapper = registry.mapper(interface).ok()?;
    mapper
        .extends
        .iter()
        .filter(|parent| is_assignable(registry, declaring, parent))
        .find_map(|parent| resolve_statement(registry, parent, method, declaring))
}

/// Interface that declares `method`, searching `interface` and its parents.
fn find_method(registry: &StatementRegistry, interface: &MapperInterface, method: &str) -> Option<(String, MethodDecl)> {
    if let Some(found) = interface.declared_method(method) {
        return Some((interface.name.clone(), found.clone()));
    }
    interface.extends.iter().find_map(|parent| {
        let parent = registry.mapper(parent).ok()?;
        find_method(registry, &parent, method)
    })
}

impl SqlCommand {
    pub fn resolve(registry: &StatementRegistry, interface: &MapperInterface, method: &MethodDecl, declaring: &str) -> Result<Self> {
        match resolve_statement(registry, &interface.name, &method.name, declaring) {
            Some(name) => {
                let statement = registry.statement(&name)?;
                Ok(Self {
                    name: statement.id.clone(),
                    kind: statement.kind,
                })
            }
            None if method.flush => Ok(Self {
                name: String::new(),
                kind: CommandKind::Flush,
            }),
            None => Err(MapperError::StatementNotBound(format!("{}.{}", interface.name, method.name))),
        }
    }
}

/// Parameter and return analysis of one method, done once per binding.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: String,
    pub returns: ReturnKind,
    pub map_key: Option<String>,
    pub param_kinds: Vec<ParamKind>,
    pub row_bounds_index: Option<usize>,
    pub result_handler_index: Option<usize>,
    pub param_names: ParamNameResolver,
}

fn unique_index(method: &MethodDecl, kind: ParamKind, label: &'static str) -> Result<Option<usize>> {
    let mut found = None;
    for (index, param) in method.params.iter().enumerate() {
        if param.kind != kind {
            continue;
        }
        if found.is_some() {
            return Err(MapperError::DuplicateControlParameter {
                method: method.name.clone(),
                kind: label,
            });
        }
        found = Some(index);
    }
    Ok(found)
}

impl MethodSignature {
    pub fn new(method: &MethodDecl, use_actual_param_name: bool) -> Result<Self> {
        if method.returns == ReturnKind::Map && method.map_key.is_none() {
            return Err(MapperError::MissingMapKey {
                method: method.name.clone(),
            });
        }
        Ok(Self {
            name: method.name.clone(),
            returns: method.returns,
            map_key: method.map_key.clone(),
            param_kinds: method.params.iter().map(|p| p.kind).collect(),
            row_bounds_index: unique_index(method, ParamKind::RowBounds, "RowBounds")?,
            result_handler_index: unique_index(method, ParamKind::ResultHandler, "ResultHandler")?,
            param_names: ParamNameResolver::new(&method.params, use_actual_param_name),
        })
    }

    pub const fn has_result_handler(&self) -> bool {
        self.result_handler_index.is_some()
    }

    fn check_args(&self, args: &[Arg<'_>]) -> Result<()> {
        if args.len() != self.param_kinds.len() {
            return Err(MapperError::ArgumentCount {
                method: self.name.clone(),
                expected: self.param_kinds.len(),
                actual: args.len(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(&self.param_kinds).enumerate() {
            let expected = match (arg, kind) {
                (Arg::Value(_), ParamKind::Value)
                | (Arg::RowBounds(_), ParamKind::RowBounds)
                | (Arg::Handler(_), ParamKind::ResultHandler) => continue,
                (_, ParamKind::Value) => "value",
                (_, ParamKind::RowBounds) => "row bounds",
                (_, ParamKind::ResultHandler) => "result handler",
            };
            return Err(MapperError::ArgumentKind {
                method: self.name.clone(),
                index,
                expected,
            });
        }
        Ok(())
    }

    /// The statement's parameter object built from the value slots.
    pub fn convert_args_to_param(&self, args: &[Arg<'_>]) -> Value {
        let values: Vec<Value> = args.iter().map(|a| a.as_value().cloned().unwrap_or_default()).collect();
        self.param_names.named_params(&values)
    }

    pub fn row_bounds(&self, args: &[Arg<'_>]) -> RowBounds {
        match self.row_bounds_index.and_then(|i| args.get(i)) {
            Some(Arg::RowBounds(bounds)) => *bounds,
            _ => RowBounds::default(),
        }
    }

    /// Copies values changed during execution (generated keys) back into the argument slots.
    fn write_back(&self, args: &mut [Arg<'_>], param: &Value) {
        if self.param_names.is_empty() {
            return;
        }
        if self.param_names.is_passthrough() && self.param_names.len() == 1 {
            let slot = self.param_names.bag_keys().next().map(|(slot, _, _)| slot);
            if let Some(Arg::Value(value)) = slot.and_then(|s| args.get_mut(s)) {
                *value = param.clone();
            }
            return;
        }
        let Some(bag) = param.as_object() else { return };
        for (slot, name, generic) in self.param_names.bag_keys() {
            let Some(Arg::Value(original)) = args.get_mut(slot) else { continue };
            let changed = [name, generic.as_str()]
                .into_iter()
                .filter_map(|key| bag.get(key))
                .find(|v| **v != *original);
            if let Some(value) = changed {
                *original = value.clone();
            }
        }
    }
}

/// A method bound to its statement, reused across calls.
#[derive(Debug, Clone)]
pub struct MapperMethod {
    pub command: SqlCommand,
    pub signature: MethodSignature,
}

impl MapperMethod {
    pub fn new(registry: &StatementRegistry, interface: &MapperInterface, method: &str) -> Result<Self> {
        let (declaring, decl) = find_method(registry, interface, method).ok_or_else(|| MapperError::UnknownMethod {
            interface: interface.name.clone(),
            method: method.to_string(),
        })?;
        let command = SqlCommand::resolve(registry, interface, &decl, &declaring)?;
        let signature = MethodSignature::new(&decl, registry.settings().use_actual_param_name)?;
        Ok(Self { command, signature })
    }

    pub fn execute(&self, session: &mut Session, args: &mut [Arg<'_>]) -> Result<MethodResult> {
        self.signature.check_args(args)?;
        let name = self.command.name.as_str();
        match self.command.kind {
            CommandKind::Insert | CommandKind::Update | CommandKind::Delete => {
                let mut param = self.signature.convert_args_to_param(args);
                let shape = if self.signature.param_names.builds_bag() {
                    ParameterShape::Named
                } else {
                    ParameterShape::Plain
                };
                let count = session.write(name, &mut param, shape)?;
                self.signature.write_back(args, &param);
                self.row_count_result(count)
            }
            CommandKind::Select => self.execute_select(session, args),
            CommandKind::Flush => Ok(MethodResult::Flushed(session.flush_statements()?)),
        }
    }

    fn row_count_result(&self, count: usize) -> Result<MethodResult> {
        let conversion = || MapperError::Conversion {
            value: count.to_string(),
            target: self.signature.returns.to_string(),
        };
        match self.signature.returns {
            ReturnKind::Void => Ok(MethodResult::Void),
            ReturnKind::Int { .. } => Ok(MethodResult::Int(i32::try_from(count).map_err(|_| conversion())?)),
            ReturnKind::Long { .. } => Ok(MethodResult::Long(i64::try_from(count).map_err(|_| conversion())?)),
            ReturnKind::Bool { .. } => Ok(MethodResult::Bool(count > 0)),
            _ => Err(self.unsupported_return()),
        }
    }

    fn unsupported_return(&self) -> MapperError {
        MapperError::UnsupportedReturnType {
            statement: self.command.name.clone(),
            return_kind: self.signature.returns.to_string(),
        }
    }

    /// Runs a select declared to return a cursor.
    pub fn execute_cursor<'s>(&self, session: &'s mut Session, args: &mut [Arg<'_>]) -> Result<Cursor<'s>> {
        self.signature.check_args(args)?;
        if self.command.kind != CommandKind::Select || self.signature.returns != ReturnKind::Cursor {
            return Err(self.unsupported_return());
        }
        let param = self.signature.convert_args_to_param(args);
        let bounds = self.signature.row_bounds(args);
        session.select_cursor(&self.command.name, &param, bounds)
    }

    fn execute_select(&self, session: &mut Session, args: &mut [Arg<'_>]) -> Result<MethodResult> {
        let name = self.command.name.as_str();
        let param = self.signature.convert_args_to_param(args);
        let bounds = self.signature.row_bounds(args);
        let returns = self.signature.returns;

        if let (true, Some(index)) = (returns.is_void(), self.signature.result_handler_index) {
            let statement = session.registry().statement(name)?;
            if statement.result_shapes.is_empty() {
                return Err(MapperError::NoResultShape(statement.id.clone()));
            }
            if let Some(Arg::Handler(handler)) = args.get_mut(index) {
                session.select_with_handler(name, &param, bounds, &mut **handler)?;
            }
            return Ok(MethodResult::Void);
        }

        match returns {
            ReturnKind::Many(collection) => {
                let items = session.select_list(name, &param, bounds)?;
                Ok(match collection {
                    CollectionKind::List => MethodResult::List(items),
                    CollectionKind::Array => MethodResult::Array(items),
                    CollectionKind::Deque => MethodResult::Deque(VecDeque::from(items)),
                })
            }
            ReturnKind::Map => {
                let key = self.signature.map_key.as_deref().ok_or_else(|| MapperError::MissingMapKey {
                    method: self.signature.name.clone(),
                })?;
                Ok(MethodResult::Map(session.select_map(name, &param, key, bounds)?))
            }
            ReturnKind::Cursor => Err(self.unsupported_return()),
            _ => {
                let value = session.select_one(name, &param)?.filter(|v| !v.is_null());
                self.single_result(value)
            }
        }
    }

    fn single_result(&self, value: Option<Value>) -> Result<MethodResult> {
        let returns = self.signature.returns;
        let Some(value) = value else {
            return if returns.is_nullable() {
                Ok(if returns.is_void() { MethodResult::Void } else { MethodResult::One(None) })
            } else {
                Err(MapperError::NullForNonNullable {
                    statement: self.command.name.clone(),
                    return_kind: returns.to_string(),
                })
            };
        };
        let conversion = |value: &Value| MapperError::Conversion {
            value: value.to_string(),
            target: returns.to_string(),
        };
        match returns {
            ReturnKind::Void => Ok(MethodResult::Void),
            ReturnKind::Int { .. } => value
                .as_int()
                .and_then(|i| i32::try_from(i).ok())
                .map(MethodResult::Int)
                .ok_or_else(|| conversion(&value)),
            ReturnKind::Long { .. } => value.as_int().map(MethodResult::Long).ok_or_else(|| conversion(&value)),
            ReturnKind::Bool { .. } => match &value {
                Value::Boolean(b) => Ok(MethodResult::Bool(*b)),
                Value::Integer(i) => Ok(MethodResult::Bool(*i != 0)),
                other => Err(conversion(other)),
            },
            _ => Ok(MethodResult::One(Some(value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::interface::ParamDecl;

    #[test]
    fn test_map_return_without_key_fails_at_construction() {
        let method = MethodDecl::new("byId", vec![ParamDecl::value()], ReturnKind::Map);
        assert!(matches!(
            MethodSignature::new(&method, true),
            Err(MapperError::MissingMapKey { .. })
        ));
        assert!(MethodSignature::new(&method.with_map_key("id"), true).is_ok());
    }

    #[test]
    fn test_second_control_parameter_of_a_kind_is_rejected() {
        let method = MethodDecl::new(
            "page",
            vec![ParamDecl::row_bounds(), ParamDecl::value(), ParamDecl::row_bounds()],
            ReturnKind::Many(CollectionKind::List),
        );
        match MethodSignature::new(&method, true) {
            Err(MapperError::DuplicateControlParameter { kind, .. }) => assert_eq!(kind, "RowBounds"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_argument_checks() {
        let method = MethodDecl::new(
            "page",
            vec![ParamDecl::value(), ParamDecl::row_bounds()],
            ReturnKind::Many(CollectionKind::List),
        );
        let signature = MethodSignature::new(&method, true).unwrap();
        assert!(matches!(
            signature.check_args(&[Arg::Value(Value::Integer(1))]),
            Err(MapperError::ArgumentCount { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            signature.check_args(&[Arg::Value(Value::Integer(1)), Arg::Value(Value::Null)]),
            Err(MapperError::ArgumentKind { index: 1, .. })
        ));
        let args = [Arg::Value(Value::Integer(1)), Arg::RowBounds(RowBounds::new(2, 5))];
        assert!(signature.check_args(&args).is_ok());
        assert_eq!(signature.row_bounds(&args), RowBounds::new(2, 5));
        assert_eq!(signature.convert_args_to_param(&args), Value::Integer(1));
    }

    #[test]
    fn test_write_back_prefers_changed_bag_entry() {
        let method = MethodDecl::new(
            "insert",
            vec![ParamDecl::tagged("user"), ParamDecl::tagged("tenant")],
            ReturnKind::Int { nullable: false },
        );
        let signature = MethodSignature::new(&method, true).unwrap();
        let user = Value::object([("id", Value::Null)]);
        let mut args = [Arg::Value(user.clone()), Arg::Value(Value::from("t1"))];
        let mut param = signature.convert_args_to_param(&args);
        crate::core::set_property(&mut param, "user.id", Value::Integer(9)).unwrap();
        signature.write_back(&mut args, &param);
        assert_eq!(args[0].as_value().and_then(|v| v.get("id")), Some(&Value::Integer(9)));
        assert_eq!(args[1].as_value(), Some(&Value::from("t1")));
    }
}
