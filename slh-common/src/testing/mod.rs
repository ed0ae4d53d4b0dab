//! Test support: structured JSONL logging and the `test_guard!` macro.

pub mod log;

pub use log::{
    SuiteTag, TestGuard, TestLogEntry, TestLogger, TestPhase, init_global_test_logging,
};
