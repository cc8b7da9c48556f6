//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Data models (check-ins, follow edges, cached profiles/addresses)

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
