//! Point-in-time view of live tasks and their group ancestry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry-assigned task identity; never reused within a registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One live task as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    /// Group names from the task's own group outward to the root.
    pub ancestry: Vec<String>,
}

impl TaskRecord {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        ancestry: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: TaskId(id),
            name: name.into(),
            ancestry: ancestry.into_iter().map(Into::into).collect(),
        }
    }

    /// The task's own (innermost) group.
    pub fn group(&self) -> Option<&str> {
        self.ancestry.first().map(String::as_str)
    }

    /// How many levels above the task's own group `group` sits, if at all.
    pub fn depth_of(&self, group: &str) -> Option<usize> {
        self.ancestry.iter().position(|g| g == group)
    }
}

/// Snapshot of every live task. Not kept across reaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskGroupSnapshot {
    pub tasks: Vec<TaskRecord>,
}

impl TaskGroupSnapshot {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
