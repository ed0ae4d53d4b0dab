//! Suite lifecycle harness.
//!
//! [`LifecycleCoordinator`] drives one suite through setup, the per-test
//! loop, and teardown. Setup applies seeded config overrides and picks an
//! SSL posture; teardown resets collaborators, reaps leaked tasks, and
//! checks the suite against its time budget.

pub mod clock;
pub mod context;
pub mod coordinator;
pub mod injector;
pub mod logging;
pub mod reaper;
pub mod report;
pub mod ssl;
pub mod teardown;

pub use clock::{Clock, ClockToken, ManualClock, MonotonicClock, SuiteClock};
pub use context::{PendingInterrupt, SuiteContext, SuiteSeed};
pub use coordinator::{
    LifecycleCoordinator, LifecycleCoordinatorBuilder, LifecyclePhase, SuiteHandle, TestScope,
};
pub use injector::{ConfigInjector, ConfigOverride, OverrideCategory};
pub use logging::{LOG_WRITER_THREAD, LoggingShutdown, SuiteLogError, init_suite_file_logging};
pub use reaper::{
    DEFAULT_PROTECTED_PREFIXES, ReapError, ReapOutcome, ReapPlan, ReapReport, ReapTarget,
    ReaperPolicy, ThreadLeakReaper, plan_reap,
};
pub use report::{
    BudgetDiagnostic, SuiteOutcome, SuiteReport, TestOutcome, TestTally, report_schema,
};
pub use ssl::{ClientSocketFactory, RandomizedSsl, SslError, SslPosture, SslProvider, UrlScheme};
pub use teardown::{ResetError, ResetFailure, ResetStage, TeardownReset, reset_fn, run_resets};

use crate::config::{EnvError, StoreError};
use crate::errors::ErrorCode;
use std::fmt;
use thiserror::Error;

/// Which force flag fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortScope {
    Suite,
    Test,
}

impl fmt::Display for AbortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suite => f.write_str("suite"),
            Self::Test => f.write_str("test"),
        }
    }
}

/// Errors that stop a suite from going forward.
///
/// Only setup failures and assumption aborts reach callers; teardown
/// problems are recorded in the [`SuiteReport`] instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("suite setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("suite setup failed: {0}")]
    Ssl(#[from] SslError),

    #[error("invalid harness environment: {}", join_env_errors(.0))]
    Environment(Vec<EnvError>),

    #[error("assumption failed: {flag} == true ({scope} skipped)")]
    AssumptionAbort { flag: &'static str, scope: AbortScope },

    #[error("{hook} called while {phase}")]
    InvalidPhase {
        hook: &'static str,
        phase: LifecyclePhase,
    },
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarnessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::SetupStoreWrite,
            Self::Ssl(_) => ErrorCode::SetupSslProvider,
            Self::Environment(_) => ErrorCode::SetupEnvInvalid,
            Self::AssumptionAbort {
                scope: AbortScope::Suite,
                ..
            } => ErrorCode::AssumptionSuiteForced,
            Self::AssumptionAbort {
                scope: AbortScope::Test,
                ..
            } => ErrorCode::AssumptionTestForced,
            Self::InvalidPhase { .. } => ErrorCode::InternalInvalidPhase,
        }
    }

    /// A skip, not a failure.
    pub fn is_assumption(&self) -> bool {
        matches!(self, Self::AssumptionAbort { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
