//! `docintel-core`: identifiers and error primitives shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod hash;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use hash::ContentHash;
pub use id::{BatchId, JobId, TenantId, UserId};
