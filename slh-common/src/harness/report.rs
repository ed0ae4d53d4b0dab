//! Serializable end-of-suite report.

use super::reaper::ReapOutcome;
use super::ssl::SslPosture;
use super::teardown::ResetFailure;
use crate::errors::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuiteOutcome {
    Passed,
    Failed,
    /// A force flag skipped the suite; not counted as pass or fail.
    Aborted,
    SetupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Tally of per-test outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TestTally {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestTally {
    pub fn record(&mut self, outcome: TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn run(&self) -> u32 {
        self.passed + self.failed
    }
}

/// A passing fast-mode suite that ran past its budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BudgetDiagnostic {
    pub code: String,
    pub elapsed_secs: u64,
    pub budget_secs: u64,
    pub message: String,
}

impl BudgetDiagnostic {
    pub fn new(suite: &str, elapsed_secs: u64, budget_secs: u64) -> Self {
        Self {
            code: ErrorCode::BudgetExceeded.code_string(),
            elapsed_secs,
            budget_secs,
            message: format!(
                "suite {suite} took {elapsed_secs}s, over its {budget_secs}s budget for fast runs; \
                 speed it up, split it, or mark it nightly-only"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SuiteReport {
    pub suite: String,
    /// Seed as `0x` hex, for replaying the run.
    pub seed: String,
    pub fast_mode: bool,
    pub outcome: SuiteOutcome,
    pub tests: TestTally,
    pub elapsed_ms: u64,
    pub budget_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslPosture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_exceeded: Option<BudgetDiagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reset_failures: Vec<ResetFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reap: Option<ReapOutcome>,
}

impl SuiteReport {
    /// Passed, even if over budget.
    pub fn passed(&self) -> bool {
        self.outcome == SuiteOutcome::Passed
    }

    /// Every catalog code raised during teardown.
    pub fn diagnostic_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.reset_failures.iter().map(|f| f.code.clone()).collect();
        if let Some(ReapOutcome::Failed { code, .. }) = &self.reap {
            codes.push(code.clone());
        }
        if let Some(diag) = &self.budget_exceeded {
            codes.push(diag.code.clone());
        }
        codes
    }
}

/// JSON schema for [`SuiteReport`].
pub fn report_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SuiteReport)
}
