//! Suite teardown reset steps.
//!
//! Each external collaborator the suite touched (client factories, fault
//! injection hooks, logging) registers a reset step. Steps run in stage
//! order; a failing or panicking step is recorded and the next one runs
//! anyway.

use crate::errors::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;
use tracing::{debug, error};

/// Fixed position of a reset step in teardown.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ResetStage {
    ClientFactory,
    FaultInjection,
    Logging,
    Other,
}

impl fmt::Display for ResetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClientFactory => "client-factory",
            Self::FaultInjection => "fault-injection",
            Self::Logging => "logging",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A reset step that did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ResetError {
    pub message: String,
}

impl ResetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A collaborator reset run at suite teardown.
pub trait TeardownReset: Send + Sync {
    fn stage(&self) -> ResetStage;

    fn name(&self) -> &str;

    fn reset(&self) -> Result<(), ResetError>;
}

struct FnReset<F> {
    stage: ResetStage,
    name: String,
    f: F,
}

impl<F> TeardownReset for FnReset<F>
where
    F: Fn() -> Result<(), ResetError> + Send + Sync,
{
    fn stage(&self) -> ResetStage {
        self.stage
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) -> Result<(), ResetError> {
        (self.f)()
    }
}

/// Wrap a closure as a reset step.
pub fn reset_fn<F>(stage: ResetStage, name: impl Into<String>, f: F) -> Box<dyn TeardownReset>
where
    F: Fn() -> Result<(), ResetError> + Send + Sync + 'static,
{
    Box::new(FnReset {
        stage,
        name: name.into(),
        f,
    })
}

/// Recorded in the suite report for every step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResetFailure {
    pub stage: ResetStage,
    pub step: String,
    pub code: String,
    pub message: String,
}

/// Run every step in stage order, isolating failures.
///
/// Steps within a stage keep their registration order.
pub fn run_resets(steps: &[Box<dyn TeardownReset>]) -> Vec<ResetFailure> {
    let mut ordered: Vec<&dyn TeardownReset> = steps.iter().map(AsRef::as_ref).collect();
    ordered.sort_by_key(|step| step.stage());

    let mut failures = Vec::new();
    for step in ordered {
        let outcome = catch_unwind(AssertUnwindSafe(|| step.reset()));
        let (code, message) = match outcome {
            Ok(Ok(())) => {
                debug!(stage = %step.stage(), step = step.name(), "reset step completed");
                continue;
            }
            Ok(Err(err)) => (ErrorCode::TeardownResetFailed, err.message),
            Err(payload) => (ErrorCode::TeardownResetPanicked, panic_message(payload.as_ref())),
        };
        error!(
            code = %code.code_string(),
            stage = %step.stage(),
            step = step.name(),
            error = %message,
            "reset step failed; continuing teardown"
        );
        failures.push(ResetFailure {
            stage: step.stage(),
            step: step.name().to_string(),
            code: code.code_string(),
            message,
        });
    }
    failures
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reset step panicked".to_string()
    }
}
