mod backoff;
mod queue;

pub use backoff::backoff_ms;
pub use queue::{CommandQueue, EnqueueOutcome, QueueLimits};
