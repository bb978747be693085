// Scheduler module: the wait loop and the store-then-broker publisher

pub mod engine;
pub mod publisher;

pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine, SchedulerHandle};
pub use publisher::{Advance, Publisher};
