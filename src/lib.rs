// sqlmapper - declarative SQL mapping in Rust
// Mapping units in, typed calls and assembled results out

// Clippy configuration - allow non-critical warnings
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::wildcard_enum_match_arm)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::type_complexity)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

// Values, rows, property paths and errors
pub mod core;

// Settings (defaults < file < environment)
pub mod config;

// Compiled definitions: statements, result shapes, caches
pub mod mapping;

// Mapping-unit parsing
pub mod parser;

// Statement registry and deferred resolution
pub mod registry;

// Mapper interfaces, parameter naming and call dispatch
pub mod binding;

// Statement execution, key generation and result assembly
pub mod executor;

// Connection providers (SQLite)
pub mod backend;

// Unit of work over one transaction
pub mod session;

// Re-export commonly used types for convenience
pub use binding::{Arg, Mapper, MapperInterface, MethodDecl, MethodResult, ParamDecl, ReturnKind};
pub use config::Settings;
pub use core::{ErrorKind, MapperError, Result, Row, Value};
pub use executor::{ResultHandler, RowBounds};
pub use mapping::{CommandKind, MappedStatement};
pub use parser::MappingUnit;
pub use registry::{RegistryBuilder, StatementRegistry};
pub use session::Session;
