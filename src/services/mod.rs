//! Background services

pub mod scheduler;

pub use scheduler::{SchedulerHandle, SyncScheduler};
