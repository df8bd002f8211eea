//! Document job engine: admission control, orchestration, batching, intake.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped and driven by one orchestration task each
//! - Per-tenant quota is a single-writer actor, persisted on every mutation
//! - Every orchestration step is persisted, so any process can resume a job
//! - Quota slots are released on every exit path, including panics and aborts
//!
//! ## Components
//!
//! - `QuotaController`: per-tenant admission gate
//! - `DeduplicationIndex`: recent-submission lookup by content hash
//! - `StatusPoller`: classifies analysis poll results
//! - `JobOrchestrator`: the per-job state machine
//! - `BatchDispatcher`: bounded-wave fan-out of record creation
//! - `DocumentService`: facade used by the HTTP layer

pub mod batch;
pub mod dedup;
pub mod intake;
pub mod orchestrator;
pub mod poller;
pub mod quota;

pub use batch::{BatchDispatch, BatchDispatcher};
pub use dedup::DeduplicationIndex;
pub use intake::{
    BatchReceipt, DependencyHealth, DocumentLink, DocumentService, HealthReport, IntakeError,
    ServiceComponents, ServiceSettings, SubmissionReceipt,
};
pub use orchestrator::{
    FieldExtractor, JobOrchestrator, OrchestratorConfig, OrchestratorError, RawFieldsExtractor,
};
pub use poller::{PollOutcome, StatusPoller};
pub use quota::{QuotaController, QuotaError};
