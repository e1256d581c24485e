//! # Database Operations
//!
//! Connection pooling and schema bootstrap for the relational event store.

pub mod connection;
pub mod schema;

pub use connection::DatabaseConnection;
pub use schema::Schema;
