//! SQLite persistence for saved article ids.

mod saved;
mod schema;
mod types;

pub use schema::Database;
pub use types::DatabaseError;
