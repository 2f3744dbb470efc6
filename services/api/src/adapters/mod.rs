//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the core's service ports.

pub mod store;

pub use store::PgStore;
