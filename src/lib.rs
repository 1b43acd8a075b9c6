// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod classify;
pub mod companies;
pub mod config;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::classify::{Classifier, ClassifierProfile, ClassifyOutcome};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{BatchReport, CycleMode, CycleReport, Pipeline};
pub use crate::reconcile::{reconcile, ReconcileError, ReconcileReport};
pub use crate::retry::{RetryError, RetryPolicy};
pub use crate::scheduler::{RunTotals, Scheduler, SchedulerSettings, SchedulerStatus};
pub use crate::store::{ClassifiedItem, QueueItem, ResultStore, WorkQueue};
