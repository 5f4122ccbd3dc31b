// Database module
// SQLite for tenants, keywords, sessions and chat logs; LanceDB for vectors

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
