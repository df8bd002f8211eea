//! Infrastructure layer: config, storage adapters, external services, job engine.

pub mod analysis;
pub mod config;
pub mod jobs;
pub mod object_store;
pub mod secrets;
pub mod store;
