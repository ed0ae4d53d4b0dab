//! Tracked tasks organised into named, nested groups.

pub mod registry;
pub mod snapshot;

pub use registry::{
    GroupScope, InterruptOutcome, InterruptToken, Interrupted, Registration, TaskError, TaskGroup,
    TaskHandle, TaskRegistry,
};
pub use snapshot::{TaskGroupSnapshot, TaskId, TaskRecord};
