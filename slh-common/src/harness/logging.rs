//! Per-suite log file with a non-blocking writer.
//!
//! The writer's worker thread keeps buffered lines until its guard drops,
//! so the guard lives in a [`LoggingShutdown`] reset step that teardown
//! runs in the logging stage.

use super::teardown::{ResetError, ResetStage, TeardownReset};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

/// Name of the background log writer thread.
pub const LOG_WRITER_THREAD: &str = "tracing-appender";

#[derive(Debug, Error)]
pub enum SuiteLogError {
    #[error("cannot create suite log in {}: {source}", dir.display())]
    Create {
        dir: PathBuf,
        #[source]
        source: InitError,
    },
}

/// Flushes and closes the suite log writer when reset.
#[derive(Debug)]
pub struct LoggingShutdown {
    guard: Mutex<Option<WorkerGuard>>,
}

impl LoggingShutdown {
    pub fn new(guard: WorkerGuard) -> Self {
        Self {
            guard: Mutex::new(Some(guard)),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl TeardownReset for LoggingShutdown {
    fn stage(&self) -> ResetStage {
        ResetStage::Logging
    }

    fn name(&self) -> &str {
        "suite-log-writer"
    }

    fn reset(&self) -> Result<(), ResetError> {
        // Dropping the guard blocks until buffered lines are written.
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if guard.is_some() {
            debug!("flushing suite log writer");
        }
        drop(guard);
        Ok(())
    }
}

/// Open `<dir>/<suite>.log` behind a non-blocking writer.
///
/// Install the returned writer into a subscriber; register the
/// shutdown step with the coordinator.
pub fn init_suite_file_logging(
    dir: &Path,
    suite: &str,
) -> Result<(NonBlocking, LoggingShutdown), SuiteLogError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_file_stem(suite))
        .filename_suffix("log")
        .build(dir)
        .map_err(|source| SuiteLogError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;

    let (writer, guard) = NonBlockingBuilder::default()
        .thread_name(LOG_WRITER_THREAD)
        .finish(appender);
    Ok((writer, LoggingShutdown::new(guard)))
}

fn log_file_stem(suite: &str) -> String {
    suite.replace("::", "_").replace(['/', '\\', ' '], "_")
}
