/// Backend module - concrete connection providers for the executor
pub mod sqlite;

pub use sqlite::{GENERATED_KEY_COLUMN, SqliteConnection, SqliteTransaction};
