//! Scheduling
//!
//! Preemptive round-robin over a fixed-capacity ready ring. The running
//! process is a distinguished reference held by the scheduler, never a queue
//! entry; the scheduler is the only component that writes it.

pub mod queue;
pub mod scheduler;

pub use queue::{ReadyQueue, READY_QUEUE_CAPACITY};
pub use scheduler::{Scheduler, SCHEDULE_DIVIDER};
