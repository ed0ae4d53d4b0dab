//! Leaked-task reaper.
//!
//! At suite teardown, background tasks the system under test left running
//! are found by task-group ancestry and interrupted by name. A task is
//! attributed to the suite when any group on its ancestry chain has the
//! suite's group name, so workers nested several groups deep are still
//! reached while tasks in unrelated sibling groups are not.
//!
//! Reaping is best-effort. Nothing here fails a suite: enumeration and
//! interrupt errors are logged with a catalog code and reported.

use super::context::SuiteContext;
use super::logging::LOG_WRITER_THREAD;
use crate::errors::ErrorCode;
use crate::tasks::{InterruptOutcome, TaskGroupSnapshot, TaskRecord, TaskRegistry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Task-name prefixes of runner-control tasks the reaper never touches.
pub const DEFAULT_PROTECTED_PREFIXES: &[&str] = &["SUITE", LOG_WRITER_THREAD];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReapError {
    #[error("failed to enumerate live tasks: {0}")]
    Enumeration(String),

    #[error("failed to interrupt {task}: {message}")]
    Interrupt { task: String, message: String },
}

/// Where the reaper gets live tasks from and sends interrupts to.
pub trait ReapTarget: Send + Sync {
    fn snapshot(&self) -> Result<TaskGroupSnapshot, ReapError>;

    /// Group name of the calling (suite runner) thread, if known.
    fn reference_group(&self) -> Option<String>;

    fn interrupt(&self, task: &TaskRecord) -> Result<InterruptOutcome, ReapError>;
}

impl ReapTarget for TaskRegistry {
    fn snapshot(&self) -> Result<TaskGroupSnapshot, ReapError> {
        Ok(TaskRegistry::snapshot(self))
    }

    fn reference_group(&self) -> Option<String> {
        TaskRegistry::current_group().map(|group| group.name().to_string())
    }

    fn interrupt(&self, task: &TaskRecord) -> Result<InterruptOutcome, ReapError> {
        Ok(TaskRegistry::interrupt(self, task.id))
    }
}

#[derive(Debug, Clone)]
pub struct ReaperPolicy {
    pub protected_prefixes: Vec<String>,
    /// Use this group instead of asking the target for the caller's group.
    pub reference_group: Option<String>,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            protected_prefixes: DEFAULT_PROTECTED_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            reference_group: None,
        }
    }
}

impl ReaperPolicy {
    pub fn is_protected(&self, task_name: &str) -> bool {
        is_protected(task_name, &self.protected_prefixes)
    }
}

fn is_protected(task_name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| task_name.starts_with(p.as_str()))
}

/// Which tasks an immediate reap would interrupt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReapPlan {
    pub reference_group: String,
    pub filter: String,
    pub scanned: usize,
    pub targets: Vec<TaskRecord>,
    /// Tasks that would have matched but carry a protected prefix.
    pub protected: Vec<TaskRecord>,
}

/// Select reap targets from `snapshot`. Pure; sends nothing.
///
/// Each task's ancestry is walked outward from its own group. The first
/// group named `reference_group` decides: the task is a target if its
/// name contains `filter`, and the walk stops either way, so a task is
/// considered at most once.
pub fn plan_reap(
    snapshot: &TaskGroupSnapshot,
    reference_group: &str,
    filter: &str,
    protected_prefixes: &[String],
) -> ReapPlan {
    let mut plan = ReapPlan {
        reference_group: reference_group.to_string(),
        filter: filter.to_string(),
        scanned: snapshot.len(),
        ..ReapPlan::default()
    };

    for task in &snapshot.tasks {
        let in_suite = task.depth_of(reference_group).is_some();
        if !in_suite || !task.name.contains(filter) {
            continue;
        }
        if is_protected(&task.name, protected_prefixes) {
            plan.protected.push(task.clone());
        } else {
            plan.targets.push(task.clone());
        }
    }
    plan
}

/// What an immediate reap did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReapReport {
    pub filter: String,
    pub reference_group: String,
    pub scanned: usize,
    pub interrupted: Vec<String>,
    /// Matched, but the task has no cancellation hook.
    pub unsupported: Vec<String>,
    /// Matched, but gone before the interrupt landed.
    pub vanished: Vec<String>,
    pub protected: Vec<String>,
    pub failed: Vec<String>,
}

/// Result of one [`ThreadLeakReaper::reap`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReapOutcome {
    /// Recorded for teardown; no task was touched.
    Deferred {
        filter: String,
        replaced: Option<String>,
    },
    Completed(ReapReport),
    /// Nothing to do.
    Skipped { reason: String },
    /// Swallowed error.
    Failed { code: String, message: String },
}

impl ReapOutcome {
    pub fn report(&self) -> Option<&ReapReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Finds and interrupts leaked tasks belonging to the current suite.
#[derive(Clone)]
pub struct ThreadLeakReaper {
    target: Arc<dyn ReapTarget>,
    policy: ReaperPolicy,
}

impl std::fmt::Debug for ThreadLeakReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLeakReaper")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ThreadLeakReaper {
    pub fn new(target: Arc<dyn ReapTarget>, policy: ReaperPolicy) -> Self {
        Self { target, policy }
    }

    pub fn policy(&self) -> &ReaperPolicy {
        &self.policy
    }

    /// Interrupt tasks whose name contains `filter`, now or at teardown.
    ///
    /// Deferred calls only record `filter` in the suite context, replacing
    /// any earlier request. An immediate call with no filter consumes the
    /// recorded request; an explicit filter leaves the request in place.
    pub fn reap(&self, ctx: &SuiteContext, filter: Option<&str>, immediate: bool) -> ReapOutcome {
        if !immediate {
            let Some(filter) = filter.filter(|f| !f.is_empty()) else {
                return skipped("deferred reap needs a non-empty filter");
            };
            let replaced = ctx.pending.request(filter);
            if let Some(previous) = &replaced {
                info!(filter, replaced = %previous, "replaced pending interrupt request");
            } else {
                debug!(filter, "recorded pending interrupt request");
            }
            return ReapOutcome::Deferred {
                filter: filter.to_string(),
                replaced,
            };
        }

        match filter {
            Some(filter) => self.reap_now(filter),
            None => self.reap_pending(ctx),
        }
    }

    /// Consume the pending request, if any, and reap with it.
    pub fn reap_pending(&self, ctx: &SuiteContext) -> ReapOutcome {
        match ctx.pending.take() {
            Some(filter) => self.reap_now(&filter),
            None => skipped("no pending interrupt request"),
        }
    }

    /// The plan an immediate reap would execute, without interrupting.
    pub fn plan(&self, filter: &str) -> Result<ReapPlan, ReapOutcome> {
        if filter.is_empty() {
            return Err(skipped("empty filter matches every task"));
        }
        let Some(reference) = self.reference_group() else {
            let code = ErrorCode::ReapNoReferenceGroup;
            warn!(code = %code.code_string(), filter, "no reference group; skipping reap");
            return Err(ReapOutcome::Failed {
                code: code.code_string(),
                message: code.message().to_string(),
            });
        };
        let snapshot = self.target.snapshot().map_err(|err| {
            let code = ErrorCode::ReapEnumerationFailed;
            error!(code = %code.code_string(), error = %err, "reap enumeration failed");
            ReapOutcome::Failed {
                code: code.code_string(),
                message: err.to_string(),
            }
        })?;
        Ok(plan_reap(
            &snapshot,
            &reference,
            filter,
            &self.policy.protected_prefixes,
        ))
    }

    fn reference_group(&self) -> Option<String> {
        self.policy
            .reference_group
            .clone()
            .or_else(|| self.target.reference_group())
    }

    fn reap_now(&self, filter: &str) -> ReapOutcome {
        let plan = match self.plan(filter) {
            Ok(plan) => plan,
            Err(outcome) => return outcome,
        };

        let mut report = ReapReport {
            filter: plan.filter.clone(),
            reference_group: plan.reference_group.clone(),
            scanned: plan.scanned,
            protected: plan.protected.iter().map(|t| t.name.clone()).collect(),
            ..ReapReport::default()
        };

        for task in &plan.targets {
            match self.target.interrupt(task) {
                Ok(InterruptOutcome::Delivered) => {
                    debug!(task = %task.id, name = %task.name, "interrupted leaked task");
                    report.interrupted.push(task.name.clone());
                }
                Ok(InterruptOutcome::Unsupported) => {
                    debug!(task = %task.id, name = %task.name, "task ignores interrupts");
                    report.unsupported.push(task.name.clone());
                }
                Ok(InterruptOutcome::Vanished) => report.vanished.push(task.name.clone()),
                Err(err) => {
                    warn!(
                        code = %ErrorCode::ReapInterruptFailed.code_string(),
                        task = %task.id,
                        error = %err,
                        "interrupt failed"
                    );
                    report.failed.push(task.name.clone());
                }
            }
        }

        info!(
            filter,
            reference_group = %report.reference_group,
            scanned = report.scanned,
            interrupted = report.interrupted.len(),
            protected = report.protected.len(),
            "reaped leaked tasks"
        );
        ReapOutcome::Completed(report)
    }
}

fn skipped(reason: &str) -> ReapOutcome {
    debug!(reason, "reap skipped");
    ReapOutcome::Skipped {
        reason: reason.to_string(),
    }
}
