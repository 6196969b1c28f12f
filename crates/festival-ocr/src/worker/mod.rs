use std::any::Any;

pub mod batch;
pub mod poll;

pub use batch::{BatchProcessor, BatchSettings, CycleReport, RecordOutcome};
pub use poll::PollLoop;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
