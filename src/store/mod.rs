//! Server persistence layer — jobs, tasks, and results behind the `Store` trait.

pub mod libsql_store;
pub mod migrations;
pub mod traits;

pub use libsql_store::LibSqlStore;
pub use traits::Store;
