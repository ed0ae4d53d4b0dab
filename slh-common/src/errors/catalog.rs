//! Error Catalog for the Suite Lifecycle Harness
//!
//! Each harness diagnostic carries a stable code (SLH-E001 through SLH-E599)
//! so suite reports and CI logs can be grepped and triaged without parsing
//! prose.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                                   |
//! |------------|-------------|-----------------------------------------------|
//! | E001-E099  | Setup       | Suite setup failed; no test ran               |
//! | E100-E199  | Assumption  | Suite or test skipped by a force flag         |
//! | E200-E299  | Teardown    | A teardown reset step failed (non-fatal)      |
//! | E300-E399  | Reap        | Thread-leak reaping failed (swallowed)        |
//! | E400-E499  | Budget      | Suite exceeded its fast-mode time budget      |
//! | E500-E599  | Internal    | Harness misuse or internal errors             |
//!
//! # Example
//!
//! ```rust
//! use slh_common::errors::catalog::ErrorCode;
//!
//! let entry = ErrorCode::BudgetExceeded.entry();
//! println!("{}", entry.format_full());
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every harness diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Setup Errors (E001-E099)
    // =========================================================================
    /// Writing a config override into the store failed
    SetupStoreWrite,
    /// The SSL posture provider failed
    SetupSslProvider,
    /// Harness environment variables are malformed
    SetupEnvInvalid,

    // =========================================================================
    // Assumption Aborts (E100-E199)
    // =========================================================================
    /// Suite-level force flag aborted the suite
    AssumptionSuiteForced,
    /// Test-level force flag skipped a test
    AssumptionTestForced,

    // =========================================================================
    // Teardown Errors (E200-E299)
    // =========================================================================
    /// A collaborator reset step failed
    TeardownResetFailed,
    /// A collaborator reset step panicked
    TeardownResetPanicked,
    /// Restoring the config store snapshot failed
    TeardownRestoreFailed,

    // =========================================================================
    // Reap Errors (E300-E399)
    // =========================================================================
    /// Enumerating live tasks failed
    ReapEnumerationFailed,
    /// Delivering an interrupt failed
    ReapInterruptFailed,
    /// No reference task group could be resolved for the reaping thread
    ReapNoReferenceGroup,

    // =========================================================================
    // Budget (E400-E499)
    // =========================================================================
    /// Suite passed but ran longer than its fast-mode budget
    BudgetExceeded,

    // =========================================================================
    // Internal (E500-E599)
    // =========================================================================
    /// Lifecycle hook called out of order
    InternalInvalidPhase,
    /// A thread or task could not be spawned
    InternalSpawnFailed,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::SetupStoreWrite => 1,
            Self::SetupSslProvider => 2,
            Self::SetupEnvInvalid => 3,

            Self::AssumptionSuiteForced => 100,
            Self::AssumptionTestForced => 101,

            Self::TeardownResetFailed => 200,
            Self::TeardownResetPanicked => 201,
            Self::TeardownRestoreFailed => 202,

            Self::ReapEnumerationFailed => 300,
            Self::ReapInterruptFailed => 301,
            Self::ReapNoReferenceGroup => 302,

            Self::BudgetExceeded => 400,

            Self::InternalInvalidPhase => 500,
            Self::InternalSpawnFailed => 501,
        }
    }

    /// Returns the formatted error code string (e.g., "SLH-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SLH-E{:03}", self.code_number())
    }

    /// Looks a code up by its formatted string, case-insensitively.
    #[must_use]
    pub fn from_code_string(code: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.code_string().eq_ignore_ascii_case(code.trim()))
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Setup,
            100..=199 => ErrorCategory::Assumption,
            200..=299 => ErrorCategory::Teardown,
            300..=399 => ErrorCategory::Reap,
            400..=499 => ErrorCategory::Budget,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::SetupStoreWrite => "Failed to write a suite config override",
            Self::SetupSslProvider => "SSL posture provider failed during suite setup",
            Self::SetupEnvInvalid => "Harness environment variables are malformed",
            Self::AssumptionSuiteForced => "Suite aborted by the suite-level force flag",
            Self::AssumptionTestForced => "Test skipped by the test-level force flag",
            Self::TeardownResetFailed => "A teardown reset step failed",
            Self::TeardownResetPanicked => "A teardown reset step panicked",
            Self::TeardownRestoreFailed => "Failed to restore the config store after the suite",
            Self::ReapEnumerationFailed => "Failed to enumerate live tasks for reaping",
            Self::ReapInterruptFailed => "Failed to deliver an interrupt to a leaked task",
            Self::ReapNoReferenceGroup => "Reaping thread has no task group to match against",
            Self::BudgetExceeded => "Suite exceeded its fast-mode time budget",
            Self::InternalInvalidPhase => "Lifecycle hook called in the wrong phase",
            Self::InternalSpawnFailed => "Failed to spawn a tracked task",
        }
    }

    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::SetupStoreWrite => &[
                "Check whether the key is pinned read-only in the store",
                "Rerun with the same SLH_SEED to reproduce the override set",
            ],
            Self::SetupSslProvider => &[
                "Check the provider's probabilities are within 0.0..=1.0",
                "Rerun with the same SLH_SEED to reproduce the posture",
            ],
            Self::SetupEnvInvalid => &[
                "Fix or unset the SLH_* variables listed in the error",
            ],
            Self::AssumptionSuiteForced => &[
                "Unset tests.force.assumption.failure.beforeclass to run the suite",
            ],
            Self::AssumptionTestForced => &[
                "Unset tests.force.assumption.failure.before to run the tests",
            ],
            Self::TeardownResetFailed => &[
                "Inspect the named reset step; later steps still ran",
            ],
            Self::TeardownResetPanicked => &[
                "The reset step panicked; fix it so teardown stays best-effort",
            ],
            Self::TeardownRestoreFailed => &[
                "Later suites may observe this suite's overrides; restore the store by hand",
            ],
            Self::ReapEnumerationFailed => &[
                "Reaping is best-effort; leaked tasks may survive into the next suite",
            ],
            Self::ReapInterruptFailed => &[
                "The task may not observe cooperative interrupts; make it check its token",
            ],
            Self::ReapNoReferenceGroup => &[
                "Attach the coordinator to the suite's task group so reaping can match ancestry",
            ],
            Self::BudgetExceeded => &[
                "Split the suite into smaller suites",
                "Move slow tests to nightly-only runs",
                "Mark the whole suite nightly-only",
            ],
            Self::InternalInvalidPhase => &[
                "Call hooks in order: suite_setup, before_test/after_test, suite_teardown",
            ],
            Self::InternalSpawnFailed => &[
                "Check OS thread limits and that async tasks are spawned inside a runtime",
            ],
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::SetupStoreWrite,
            Self::SetupSslProvider,
            Self::SetupEnvInvalid,
            Self::AssumptionSuiteForced,
            Self::AssumptionTestForced,
            Self::TeardownResetFailed,
            Self::TeardownResetPanicked,
            Self::TeardownRestoreFailed,
            Self::ReapEnumerationFailed,
            Self::ReapInterruptFailed,
            Self::ReapNoReferenceGroup,
            Self::BudgetExceeded,
            Self::InternalInvalidPhase,
            Self::InternalSpawnFailed,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Setup,
    Assumption,
    Teardown,
    Reap,
    Budget,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Setup => "Setup",
            Self::Assumption => "Assumption",
            Self::Teardown => "Teardown",
            Self::Reap => "Reap",
            Self::Budget => "Budget",
            Self::Internal => "Internal",
        }
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Setup => "Suite setup failed; the suite ran no tests",
            Self::Assumption => "A force flag skipped the suite or a test",
            Self::Teardown => "A teardown reset step failed; later steps still ran",
            Self::Reap => "Leaked-task reaping failed and was swallowed",
            Self::Budget => "A passing fast-mode suite ran past its time budget",
            Self::Internal => "Lifecycle hooks were called out of order",
        }
    }

    /// The code range this category owns, e.g. `"001-099"`.
    #[must_use]
    pub const fn code_range(&self) -> &'static str {
        match self {
            Self::Setup => "001-099",
            Self::Assumption => "100-199",
            Self::Teardown => "200-299",
            Self::Reap => "300-399",
            Self::Budget => "400-499",
            Self::Internal => "500-599",
        }
    }

    #[must_use]
    pub const fn all() -> &'static [ErrorCategory] {
        &[
            Self::Setup,
            Self::Assumption,
            Self::Teardown,
            Self::Reap,
            Self::Budget,
            Self::Internal,
        ]
    }

    /// Whether errors in this category stop forward progress of a suite.
    #[must_use]
    pub const fn halts_suite(&self) -> bool {
        matches!(self, Self::Setup | Self::Assumption)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "SLH-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
