//! Document analysis domain: job records, quota state, polling backoff, batches.
//!
//! ## Design
//!
//! - Job records are tenant-scoped and move through a one-directional state machine
//! - Quota state is a per-tenant counting semaphore (pure state, no IO)
//! - Backoff policy is capped exponential, shared by polling and quota waits
//! - Batch types describe per-file, partial-success outcomes
//!
//! Everything here is deterministic; storage and scheduling live in `docintel-infra`.

pub mod backoff;
pub mod batch;
pub mod job;
pub mod quota;

pub use backoff::BackoffPolicy;
pub use batch::{BatchFile, BatchRecord, BatchStatus, FileOutcome};
pub use job::{JobRecord, JobStatus, NewJob, OrchestrationProgress, TransitionError, object_key};
pub use quota::{AcquireDecision, DEFAULT_QUOTA_LIMIT, QuotaState};
