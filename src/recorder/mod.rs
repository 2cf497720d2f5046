pub mod executor;
pub mod lifecycle;
pub mod retention;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::{CaptureExecutor, CaptureOutcome, SkipReason};
pub use retention::RetentionService;
pub use scheduler::{CaptureScheduler, RecoveryReport, ScheduleAction};
