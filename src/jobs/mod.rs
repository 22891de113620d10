//! Job definitions, the in-memory registry, and the per-kind managers.

pub mod batch;
pub mod custom;
pub mod model;
pub mod registry;

pub use batch::{BatchJobManager, BatchJobUpdate, BatchRunner};
pub use custom::{
    CustomJob, CustomJobManager, CustomJobTypes, CustomJobUpdate, CustomJobView, CustomRunner,
    FnJob, JOB_STATUS_SYNC,
};
pub use model::{
    ExternalJobStatus, FieldUpdate, JobDefinition, JobKey, JobKind, JobPayload, RunOutcome,
    TaskLog,
};
pub use registry::{JobHandler, JobRegistry, JobSummary, RegistryEntry, ScheduledJob};
