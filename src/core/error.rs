use std::fmt;
use thiserror::Error;

/// The three failure classes the mapper distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Build time: a mapping unit or element could not be registered.
    Definition,
    /// Call time: a method or parameter could not be bound.
    Binding,
    /// Runtime: the data engine failed.
    Execution,
}

/// Something a deferred element is still waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    ParentShape(String),
    NestedShape(String),
    ResultShape(String),
    CacheRef(String),
    Fragment(String),
    ParameterMap(String),
}

impl Dependency {
    pub fn id(&self) -> &str {
        match self {
            Self::ParentShape(id)
            | Self::NestedShape(id)
            | Self::ResultShape(id)
            | Self::CacheRef(id)
            | Self::Fragment(id)
            | Self::ParameterMap(id) => id,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentShape(id) => write!(f, "parent result shape '{id}'"),
            Self::NestedShape(id) => write!(f, "nested result shape '{id}'"),
            Self::ResultShape(id) => write!(f, "result shape '{id}'"),
            Self::CacheRef(ns) => write!(f, "cache of namespace '{ns}'"),
            Self::Fragment(id) => write!(f, "SQL fragment '{id}'"),
            Self::ParameterMap(id) => write!(f, "parameter map '{id}'"),
        }
    }
}

/// An element left in a pending queue after the final resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedElement {
    pub kind: &'static str,
    pub id: String,
    pub waiting_on: Dependency,
}

impl fmt::Display for UnresolvedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' waiting on {}", self.kind, self.id, self.waiting_on)
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("\n  - {i}"))
        .collect::<String>()
}

fn join_inline<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum MapperError {
    // Definition errors
    #[error("Mapping unit '{resource}' is not well-formed: {message}")]
    Markup { resource: String, message: String },
    #[error("Mapper's namespace cannot be empty ({0})")]
    EmptyNamespace(String),
    #[error("Mapping unit '{resource}' declares namespace '{declared}' but was loaded as '{expected}'")]
    NamespaceMismatch { resource: String, declared: String, expected: String },
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
    #[error("Invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute { attribute: String, value: String },
    #[error("{collection} collection already contains value for '{id}'")]
    Duplicate { collection: &'static str, id: String },
    #[error("'{id}' is ambiguous in {collection} collection (try using the full name including the namespace, or rename one of the entries): {candidates:?}")]
    Ambiguous { collection: &'static str, id: String, candidates: Vec<String> },
    #[error("Unknown command kind '{0}'")]
    UnknownCommandKind(String),
    #[error("Dots are not allowed in element names, please remove it from '{0}'")]
    DottedId(String),
    #[error("Method '{method}' cannot have multiple {kind} parameters")]
    DuplicateControlParameter { method: String, kind: &'static str },
    #[error("Malformed result shape '{id}': {message}")]
    MalformedShape { id: String, message: String },
    #[error("Malformed SQL template in '{statement}': {message}")]
    MalformedTemplate { statement: String, message: String },
    #[error("Unsupported element <{element}> in statement '{statement}'")]
    UnsupportedElement { statement: String, element: String },
    #[error("Unknown language driver '{0}'")]
    UnknownLanguage(String),
    #[error("Unresolved elements after final pass:{}", join_lines(.0))]
    Unresolved(Vec<UnresolvedElement>),
    #[error("Error parsing mapping unit '{resource}':{}", join_lines(.errors))]
    Unit { resource: String, errors: Vec<MapperError> },
    #[error("{}", join_inline(.0))]
    Aggregate(Vec<MapperError>),

    // Binding errors
    #[error("Type interface '{0}' is not known to the registry")]
    UnknownMapper(String),
    #[error("Method '{method}' is not declared on '{interface}'")]
    UnknownMethod { interface: String, method: String },
    #[error("Invalid bound statement (not found): {0}")]
    StatementNotBound(String),
    #[error("Mapped statements collection does not contain value for '{0}'")]
    StatementNotFound(String),
    #[error("Result shape '{0}' is not registered")]
    ShapeNotFound(String),
    #[error("Parameter '{name}' not found. Available parameters are {available:?}")]
    ParameterNotFound { name: String, available: Vec<String> },
    #[error("Mapper method '{method}' returns a map but declares no map key")]
    MissingMapKey { method: String },
    #[error("Mapper method '{statement}' attempted to return null from a method with a non-nullable return type ({return_kind})")]
    NullForNonNullable { statement: String, return_kind: String },
    #[error("Mapper method '{statement}' has an unsupported return type: {return_kind}")]
    UnsupportedReturnType { statement: String, return_kind: String },
    #[error("Method '{method}' expects {expected} arguments, got {actual}")]
    ArgumentCount { method: String, expected: usize, actual: usize },
    #[error("Argument {index} of '{method}' must be a {expected}")]
    ArgumentKind { method: String, index: usize, expected: &'static str },
    #[error("Statement '{0}' needs a result shape (resultMap or resultType) to produce rows")]
    NoResultShape(String),
    #[error("Expected one result (or null) to be returned by selectOne(), but found: {0}")]
    TooManyResults(usize),
    #[error("Cannot convert {value} to {target}")]
    Conversion { value: String, target: String },
    #[error("Invalid property path '{0}'")]
    PropertyPath(String),

    // Execution errors
    #[error("{0}")]
    Execution(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Error generating keys for '{statement}': {message}")]
    KeyGeneration { statement: String, message: String },
    #[error("Cursor already closed")]
    CursorClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MapperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Markup { .. }
            | Self::EmptyNamespace(_)
            | Self::NamespaceMismatch { .. }
            | Self::MissingAttribute { .. }
            | Self::InvalidAttribute { .. }
            | Self::Duplicate { .. }
            | Self::Ambiguous { .. }
            | Self::UnknownCommandKind(_)
            | Self::DottedId(_)
            | Self::DuplicateControlParameter { .. }
            | Self::MalformedShape { .. }
            | Self::MalformedTemplate { .. }
            | Self::UnsupportedElement { .. }
            | Self::UnknownLanguage(_)
            | Self::Unresolved(_)
            | Self::Unit { .. }
            | Self::Aggregate(_)
            | Self::Config(_) => ErrorKind::Definition,
            Self::UnknownMapper(_)
            | Self::UnknownMethod { .. }
            | Self::StatementNotBound(_)
            | Self::StatementNotFound(_)
            | Self::ShapeNotFound(_)
            | Self::ParameterNotFound { .. }
            | Self::MissingMapKey { .. }
            | Self::NullForNonNullable { .. }
            | Self::UnsupportedReturnType { .. }
            | Self::ArgumentCount { .. }
            | Self::ArgumentKind { .. }
            | Self::NoResultShape(_)
            | Self::TooManyResults(_)
            | Self::Conversion { .. }
            | Self::PropertyPath(_) => ErrorKind::Binding,
            Self::Execution(_)
            | Self::KeyGeneration { .. }
            | Self::CursorClosed
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Execution,
        }
    }

    /// Wraps a driver error without adding any context of our own.
    pub fn execution<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Execution(Box::new(err))
    }

    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
