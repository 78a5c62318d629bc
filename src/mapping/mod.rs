// Module declarations
pub mod cache;
pub mod parameter_map;
pub mod result_shape;
pub mod sql_source;
pub mod statement;
pub mod types;

// Re-exports for convenience
pub use cache::{Cache, CacheConfig, CacheFactory, CacheKey, DefaultCacheFactory, PerpetualCache};
pub use parameter_map::{ParameterMap, ParameterMapping, ParameterMode};
pub use result_shape::{AutoMapping, Discriminator, MappingKind, ResultMapping, ResultShape};
pub use sql_source::{
    BoundParameter, BoundSql, LanguageDriver, SqlSource, TextLanguageDriver, TextSqlSource, replace_variables,
};
pub use statement::{CommandKind, KeyGenerator, MappedStatement, SELECT_KEY_SUFFIX};
pub use types::ValueType;
