use std::collections::BTreeMap;

use super::interface::{ParamDecl, ParamKind};
use crate::core::{Record, Value};

/// Prefix of the positional aliases added to every parameter bag.
pub const GENERIC_NAME_PREFIX: &str = "param";

/// Stable names for the non-control parameters of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamNameResolver {
    /// Argument slot to name, control slots omitted.
    names: BTreeMap<usize, String>,
    has_tag: bool,
}

impl ParamNameResolver {
    pub fn new(params: &[ParamDecl], use_actual_param_name: bool) -> Self {
        let mut names = BTreeMap::new();
        let mut has_tag = false;
        for (index, param) in params.iter().enumerate() {
            if param.kind != ParamKind::Value {
                continue;
            }
            let name = match &param.tag {
                Some(tag) => {
                    has_tag = true;
                    tag.clone()
                }
                None => param
                    .source_name
                    .clone()
                    .filter(|_| use_actual_param_name)
                    .unwrap_or_else(|| names.len().to_string()),
            };
            names.insert(index, name);
        }
        Self { names, has_tag }
    }

    pub fn names(&self) -> Vec<&str> {
        self.names.values().map(String::as_str).collect()
    }

    /// Turns per-slot arguments into the statement's parameter object.
    ///
    /// A lone untagged argument is passed through as is; anything else becomes
    /// a bag keyed by name plus `param1..paramN`, never overwriting a name.
    pub fn named_params(&self, args: &[Value]) -> Value {
        if args.is_empty() || self.names.is_empty() {
            return Value::Null;
        }
        if !self.has_tag && self.names.len() == 1 {
            return self
                .names
                .keys()
                .next()
                .and_then(|&slot| args.get(slot))
                .cloned()
                .unwrap_or_default();
        }
        let mut bag = Record::new();
        for (i, (&slot, name)) in self.names.iter().enumerate() {
            let value = args.get(slot).cloned().unwrap_or_default();
            bag.insert(name.clone(), value.clone());
            let generic = format!("{GENERIC_NAME_PREFIX}{}", i + 1);
            if !self.names.values().any(|n| *n == generic) {
                bag.insert(generic, value);
            }
        }
        Value::Object(bag)
    }

    /// Slot and bag keys for each named parameter, used to copy values back.
    pub fn bag_keys(&self) -> impl Iterator<Item = (usize, &str, String)> + '_ {
        self.names
            .iter()
            .enumerate()
            .map(|(i, (&slot, name))| (slot, name.as_str(), format!("{GENERIC_NAME_PREFIX}{}", i + 1)))
    }

    /// True when [`named_params`](Self::named_params) returns a bag for a full argument list.
    pub fn builds_bag(&self) -> bool {
        !self.names.is_empty() && (self.has_tag || self.names.len() > 1)
    }

    pub const fn is_passthrough(&self) -> bool {
        !self.has_tag
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
