//! Live registry of named tasks organised into nested task groups.
//!
//! Threads and tokio tasks spawned through a [`TaskGroup`] are recorded with
//! their group so the reaper can later find leaked ones by ancestry. An
//! entry disappears when its task exits, so snapshots only ever show live
//! tasks.

use super::snapshot::{TaskGroupSnapshot, TaskId, TaskRecord};
use crate::errors::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors raised while spawning tracked tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot spawn async task '{name}' outside a tokio runtime")]
    NoRuntime { name: String },
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Spawn { .. } | Self::NoRuntime { .. } => ErrorCode::InternalSpawnFailed,
        }
    }

    fn logged(self) -> Self {
        warn!(code = %self.code().code_string(), "{self}");
        self
    }
}

/// Returned by [`InterruptToken::sleep`] and [`InterruptToken::check`] once interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task interrupted")]
pub struct Interrupted;

/// What happened when an interrupt was sent to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterruptOutcome {
    /// Signal delivered; the task observes it on its own schedule.
    Delivered,
    /// The task has no cancellation hook; nothing was sent.
    Unsupported,
    /// The task exited between snapshot and interrupt.
    Vanished,
}

// Bounds the wait when an interrupt lands before the token is bound.
const PARK_SLICE: Duration = Duration::from_millis(50);

/// Cooperative interrupt flag handed to tracked threads.
///
/// Interrupting sets a sticky flag and unparks the owning thread, so a
/// thread blocked in [`InterruptToken::sleep`] wakes immediately.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    interrupted: AtomicBool,
    thread: OnceLock<Thread>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        if let Some(thread) = self.inner.thread.get() {
            thread.unpark();
        }
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Park for up to `timeout`, returning early with `Err` once interrupted.
    ///
    /// Wakes immediately on the thread the token was handed to; any other
    /// thread notices the interrupt on its next poll.
    pub fn sleep(&self, timeout: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout((deadline - now).min(PARK_SLICE));
        }
    }

    fn bind(&self, thread: Thread) {
        let _ = self.inner.thread.set(thread);
    }
}

#[derive(Debug)]
struct GroupNode {
    name: String,
    parent: Option<Arc<GroupNode>>,
}

impl GroupNode {
    fn ancestry(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        let mut cursor = self.parent.as_deref();
        while let Some(node) = cursor {
            names.push(node.name.clone());
            cursor = node.parent.as_deref();
        }
        names
    }
}

#[derive(Clone)]
enum InterruptHook {
    Thread(InterruptToken),
    Async(Arc<AbortSlot>),
    Unsupported,
}

/// Abort handle for a tokio task, filled in once the task is spawned.
///
/// An abort requested before the handle arrives is applied on arrival.
#[derive(Debug, Default)]
struct AbortSlot {
    state: Mutex<AbortState>,
}

#[derive(Debug, Default)]
struct AbortState {
    handle: Option<tokio::task::AbortHandle>,
    requested: bool,
}

impl AbortSlot {
    fn state(&self) -> MutexGuard<'_, AbortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort(&self) {
        let mut state = self.state();
        state.requested = true;
        if let Some(handle) = &state.handle {
            handle.abort();
        }
    }

    fn fill(&self, handle: tokio::task::AbortHandle) {
        let mut state = self.state();
        if state.requested {
            handle.abort();
        }
        state.handle = Some(handle);
    }
}

struct TaskEntry {
    name: String,
    group: Arc<GroupNode>,
    hook: InterruptHook,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

/// Shared registry of live tasks. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

thread_local! {
    static CURRENT_GROUP: RefCell<Option<TaskGroup>> = const { RefCell::new(None) };
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry for code that has no registry handle to hand.
    pub fn global() -> &'static TaskRegistry {
        static GLOBAL: OnceLock<TaskRegistry> = OnceLock::new();
        GLOBAL.get_or_init(TaskRegistry::new)
    }

    /// Create a top-level group.
    pub fn root_group(&self, name: impl Into<String>) -> TaskGroup {
        TaskGroup {
            node: Arc::new(GroupNode {
                name: name.into(),
                parent: None,
            }),
            registry: self.clone(),
        }
    }

    /// The group the calling thread runs in, if any.
    pub fn current_group() -> Option<TaskGroup> {
        CURRENT_GROUP.with(|current| current.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks().contains_key(&id)
    }

    /// Enumerate every live task with its ancestry, ordered by id.
    pub fn snapshot(&self) -> TaskGroupSnapshot {
        let tasks = self.tasks();
        let mut records: Vec<TaskRecord> = tasks
            .iter()
            .map(|(id, entry)| TaskRecord {
                id: *id,
                name: entry.name.clone(),
                ancestry: entry.group.ancestry(),
            })
            .collect();
        records.sort_by_key(|record| record.id);
        TaskGroupSnapshot::new(records)
    }

    /// Send one interrupt to `id`. Fire-and-forget: does not wait for the task.
    pub fn interrupt(&self, id: TaskId) -> InterruptOutcome {
        // Clone the hook out so no lock is held while signalling.
        let hook = match self.tasks().get(&id) {
            Some(entry) => entry.hook.clone(),
            None => return InterruptOutcome::Vanished,
        };
        match hook {
            InterruptHook::Thread(token) => {
                token.interrupt();
                InterruptOutcome::Delivered
            }
            InterruptHook::Async(slot) => {
                slot.abort();
                InterruptOutcome::Delivered
            }
            InterruptHook::Unsupported => InterruptOutcome::Unsupported,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, name: &str, group: &Arc<GroupNode>, hook: InterruptHook) -> Registration {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.tasks().insert(
            id,
            TaskEntry {
                name: name.to_string(),
                group: Arc::clone(group),
                hook,
            },
        );
        trace!(task = %id, name, group = %group.name, "registered task");
        Registration {
            registry: self.clone(),
            id,
        }
    }

    fn deregister(&self, id: TaskId) {
        self.tasks().remove(&id);
        trace!(task = %id, "deregistered task");
    }
}

/// Keeps a task listed in its registry until dropped.
pub struct Registration {
    registry: TaskRegistry,
    id: TaskId,
}

impl Registration {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// A named node in the task-group tree.
#[derive(Clone)]
pub struct TaskGroup {
    node: Arc<GroupNode>,
    registry: TaskRegistry,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("ancestry", &self.node.ancestry())
            .finish()
    }
}

impl TaskGroup {
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// This group's name followed by every ancestor's, outward to the root.
    pub fn ancestry(&self) -> Vec<String> {
        self.node.ancestry()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Create a nested group.
    pub fn child(&self, name: impl Into<String>) -> TaskGroup {
        TaskGroup {
            node: Arc::new(GroupNode {
                name: name.into(),
                parent: Some(Arc::clone(&self.node)),
            }),
            registry: self.registry.clone(),
        }
    }

    /// Make this the calling thread's current group until the scope drops.
    pub fn enter(&self) -> GroupScope {
        let previous = CURRENT_GROUP.with(|current| current.replace(Some(self.clone())));
        GroupScope {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Spawn a named OS thread in this group.
    ///
    /// The closure receives the thread's [`InterruptToken`]; the thread's
    /// current group is this group, so groups it creates nest below it.
    pub fn spawn_thread<F, T>(&self, name: impl Into<String>, f: F) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(InterruptToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let token = InterruptToken::new();
        let registration = self
            .registry
            .register(&name, &self.node, InterruptHook::Thread(token.clone()));
        let id = registration.id();
        let group = self.clone();
        let thread_token = token.clone();

        // On spawn failure the closure is dropped, and the registration with it.
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _registration = registration;
                thread_token.bind(thread::current());
                let _scope = group.enter();
                f(thread_token)
            })
            .map_err(|source| {
                TaskError::Spawn {
                    name: name.clone(),
                    source,
                }
                .logged()
            })?;

        debug!(task = %id, name = %name, group = %self.name(), "spawned tracked thread");
        Ok(TaskHandle {
            id,
            name,
            token,
            join,
        })
    }

    /// Spawn a named tokio task in this group; interrupting it aborts it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_async<F>(
        &self,
        name: impl Into<String>,
        future: F,
    ) -> Result<tokio::task::JoinHandle<F::Output>, TaskError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = name.into();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TaskError::NoRuntime { name: name.clone() }.logged())?;
        // The entry is interruptible from the moment it is listed.
        let slot = Arc::new(AbortSlot::default());
        let registration = self.registry.register(
            &name,
            &self.node,
            InterruptHook::Async(Arc::clone(&slot)),
        );
        let id = registration.id();

        let handle = runtime.spawn(async move {
            let _registration = registration;
            future.await
        });
        slot.fill(handle.abort_handle());

        debug!(task = %id, name = %name, group = %self.name(), "spawned tracked async task");
        Ok(handle)
    }

    /// List a task the registry did not spawn. Interrupting it is a no-op.
    pub fn adopt(&self, name: impl Into<String>) -> Registration {
        self.registry
            .register(&name.into(), &self.node, InterruptHook::Unsupported)
    }
}

/// Restores the thread's previous group when dropped. Not `Send`.
pub struct GroupScope {
    previous: Option<TaskGroup>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for GroupScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_GROUP.with(|current| *current.borrow_mut() = previous);
    }
}

/// Handle to a tracked thread.
pub struct TaskHandle<T> {
    id: TaskId,
    name: String,
    token: InterruptToken,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &InterruptToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> thread::Result<T> {
        self.join.join()
    }
}
