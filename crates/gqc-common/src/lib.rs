//! Glider QC common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the gqc crates:
//! - Ordinal flag scales and the worst-flag merge algebra
//! - Run identity for provenance attributes
//! - Schema versioning
//! - The unified error taxonomy

pub mod error;
pub mod flag;
pub mod id;
pub mod schema;

pub use error::{Error, Result};
pub use flag::{merge_into, worse, worst_of, FlagScale, FlagValue};
pub use id::RunId;
pub use schema::SCHEMA_VERSION;
