use std::fmt;

/// Role of a declared method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamKind {
    #[default]
    Value,
    /// Paging window (offset/limit); excluded from SQL binding.
    RowBounds,
    /// Per-row callback; excluded from SQL binding.
    ResultHandler,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamDecl {
    /// Explicit name tag.
    pub tag: Option<String>,
    /// Source-level name, when the declaration carries one.
    pub source_name: Option<String>,
    pub kind: ParamKind,
}

impl ParamDecl {
    pub fn value() -> Self {
        Self::default()
    }

    pub fn tagged(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            ..Self::default()
        }
    }

    pub fn named(source_name: &str) -> Self {
        Self {
            source_name: Some(source_name.to_string()),
            ..Self::default()
        }
    }

    pub fn row_bounds() -> Self {
        Self {
            kind: ParamKind::RowBounds,
            ..Self::default()
        }
    }

    pub fn result_handler() -> Self {
        Self {
            kind: ParamKind::ResultHandler,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    #[default]
    List,
    Array,
    Deque,
}

/// Declared return type of a mapper method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    #[default]
    Void,
    Int { nullable: bool },
    Long { nullable: bool },
    Bool { nullable: bool },
    /// A single row (or scalar), possibly absent.
    One { nullable: bool },
    Many(CollectionKind),
    Map,
    Cursor,
}

impl ReturnKind {
    pub const fn is_void(self) -> bool {
        matches!(self, Self::Void)
    }

    pub const fn is_nullable(self) -> bool {
        match self {
            Self::Void | Self::Many(_) | Self::Map | Self::Cursor => true,
            Self::Int { nullable } | Self::Long { nullable } | Self::Bool { nullable } | Self::One { nullable } => {
                nullable
            }
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Int { nullable: false } => f.write_str("int"),
            Self::Int { nullable: true } => f.write_str("Integer"),
            Self::Long { nullable: false } => f.write_str("long"),
            Self::Long { nullable: true } => f.write_str("Long"),
            Self::Bool { nullable: false } => f.write_str("boolean"),
            Self::Bool { nullable: true } => f.write_str("Boolean"),
            Self::One { nullable: false } => f.write_str("value"),
            Self::One { nullable: true } => f.write_str("Option<value>"),
            Self::Many(CollectionKind::List) => f.write_str("List"),
            Self::Many(CollectionKind::Array) => f.write_str("Array"),
            Self::Many(CollectionKind::Deque) => f.write_str("Deque"),
            Self::Map => f.write_str("Map"),
            Self::Cursor => f.write_str("Cursor"),
        }
    }
}

/// One method of a mapper interface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub returns: ReturnKind,
    /// Property whose value keys a `Map` result.
    pub map_key: Option<String>,
    /// Marks a statement-less flush method.
    pub flush: bool,
}

impl MethodDecl {
    pub fn new(name: &str, params: Vec<ParamDecl>, returns: ReturnKind) -> Self {
        Self {
            name: name.to_string(),
            params,
            returns,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_map_key(mut self, key: &str) -> Self {
        self.map_key = Some(key.to_string());
        self
    }

    pub fn flush(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flush: true,
            ..Self::default()
        }
    }
}

/// A mapper-shaped interface: its name doubles as the statement namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapperInterface {
    pub name: String,
    pub extends: Vec<String>,
    pub methods: Vec<MethodDecl>,
}

impl MapperInterface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn extending(mut self, parent: &str) -> Self {
        self.extends.push(parent.to_string());
        self
    }

    #[must_use]
    pub fn method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    pub fn declared_method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}
