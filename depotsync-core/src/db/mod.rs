//! Inventory store backing the local working copy
//!
//! This module provides a small SQLite store with:
//! - Schema migrations
//! - Operation routing from the [`crate::ops::Operation`] registry

pub mod schema;
pub mod store;

pub use store::Store;
