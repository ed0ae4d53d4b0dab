//! Suite lifecycle harness.
//!
//! Prepares a test suite's runtime configuration from a seed, times the
//! suite against a budget, and at teardown interrupts background tasks
//! the suite leaked, found by task-group ancestry.

pub mod config;
pub mod errors;
pub mod harness;
pub mod schema;
pub mod tasks;
pub mod testing;

pub use config::{ConfigStore, HarnessSettings, MemoryConfigStore};
pub use errors::{ErrorCategory, ErrorCode};
pub use harness::{
    HarnessError, HarnessResult, LifecycleCoordinator, ReapOutcome, SuiteHandle, SuiteReport,
    ThreadLeakReaper,
};
pub use tasks::{TaskGroup, TaskRegistry};
