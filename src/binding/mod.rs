// Module declarations
pub mod dispatcher;
pub mod interface;
pub mod method;
pub mod param_names;
pub mod result;

// Re-exports for convenience
pub use dispatcher::{Arg, Mapper};
pub use interface::{CollectionKind, MapperInterface, MethodDecl, ParamDecl, ParamKind, ReturnKind};
pub use method::{MapperMethod, MethodSignature, SqlCommand};
pub use param_names::{GENERIC_NAME_PREFIX, ParamNameResolver};
pub use result::MethodResult;
