//! Tasks and Steps
//!
//! A [`Task`] is one unit of user-initiated work. It is executed as a series
//! of [`TaskStep`]s; every step run by a worker produces a [`TaskStepOutput`]
//! that names the steps to run next.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::SharedMemory;

/// Free-form key-value bag carried by tasks and steps
pub type StateMap = HashMap<String, serde_json::Value>;

/// Unique task identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing ID string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique step identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    /// Generate a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing ID string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task-scoped state shared by every step of a task.
///
/// Cloning the handle shares the underlying map, so a [`Task`] returned to
/// the caller observes what workers write during later steps.
#[derive(Clone, Debug, Default)]
pub struct ExtraState {
    inner: Arc<Mutex<StateMap>>,
}

impl ExtraState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing map
    pub fn from_map(map: StateMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    /// Read a key and deserialize it
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Raw JSON value for a key
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().get(key).cloned()
    }

    /// Serialize and store a value, returning the previous raw value
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<serde_json::Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.lock().insert(key.into(), value))
    }

    /// Remove a key, returning its raw value
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().remove(key)
    }

    /// Check whether a key is set
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Mutate the map under a single lock acquisition
    pub fn update<R>(&self, f: impl FnOnce(&mut StateMap) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> StateMap {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A unit of user-initiated work
#[derive(Clone, Debug)]
pub struct Task {
    pub task_id: TaskId,

    /// The original user request
    pub input: String,

    /// State shared across all steps of this task
    pub extra_state: ExtraState,

    /// Long-lived conversation memory (outlives the task)
    pub memory: SharedMemory,

    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with empty extra state
    pub fn new(input: impl Into<String>, memory: SharedMemory) -> Self {
        Self::with_state(input, memory, StateMap::new())
    }

    /// Create a task with pre-seeded extra state
    pub fn with_state(
        input: impl Into<String>,
        memory: SharedMemory,
        extra_state: StateMap,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            input: input.into(),
            extra_state: ExtraState::from_map(extra_state),
            memory,
            created_at: Utc::now(),
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id && self.input == other.input
    }
}

impl Eq for Task {}

/// One unit of execution within a task
#[derive(Clone, Debug)]
pub struct TaskStep {
    pub task_id: TaskId,
    pub step_id: StepId,

    /// Input driving this step (may be absent for derived steps)
    pub input: Option<String>,

    /// Step-local state, owned by this step and mutated only by the worker
    pub step_state: StateMap,

    pub memory: SharedMemory,

    /// IDs of steps linked after this one
    pub next_steps: BTreeSet<StepId>,

    /// IDs of steps linked before this one
    pub prev_steps: BTreeSet<StepId>,
}

impl TaskStep {
    /// First step of a task, inheriting its input and memory
    pub fn first(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            step_id: StepId::new(),
            input: Some(task.input.clone()),
            step_state: StateMap::new(),
            memory: Arc::clone(&task.memory),
            next_steps: BTreeSet::new(),
            prev_steps: BTreeSet::new(),
        }
    }

    /// Replace the step-local state
    pub fn with_state(mut self, step_state: StateMap) -> Self {
        self.step_state = step_state;
        self
    }

    /// Derive a successor step.
    ///
    /// Task, input, step state and memory carry over unless overridden; links
    /// are not copied.
    pub fn get_next_step(
        &self,
        step_id: StepId,
        input: Option<String>,
        step_state: Option<StateMap>,
    ) -> TaskStep {
        TaskStep {
            task_id: self.task_id.clone(),
            step_id,
            input: input.or_else(|| self.input.clone()),
            step_state: step_state.unwrap_or_else(|| self.step_state.clone()),
            memory: Arc::clone(&self.memory),
            next_steps: BTreeSet::new(),
            prev_steps: BTreeSet::new(),
        }
    }

    /// Successor with a fresh ID and everything else inherited
    pub fn next_step(&self) -> TaskStep {
        self.get_next_step(StepId::new(), None, None)
    }

    /// Record an edge from this step to `next`
    pub fn link_step(&mut self, next: &mut TaskStep) {
        self.next_steps.insert(next.step_id.clone());
        next.prev_steps.insert(self.step_id.clone());
    }
}

/// Response produced by a worker step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: StateMap,
}

impl AgentResponse {
    /// Create a response with no metadata
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            metadata: StateMap::new(),
        }
    }
}

impl std::fmt::Display for AgentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.response)
    }
}

/// Result of running one step
#[derive(Clone, Debug)]
pub struct TaskStepOutput {
    pub output: AgentResponse,

    /// The step that was executed
    pub task_step: TaskStep,

    /// True when this branch has no further work
    pub is_last: bool,

    /// Steps to run next, in order
    pub next_steps: Vec<TaskStep>,
}

impl TaskStepOutput {
    /// Bundle a step result
    pub fn new(
        output: AgentResponse,
        task_step: TaskStep,
        is_last: bool,
        next_steps: Vec<TaskStep>,
    ) -> Self {
        Self {
            output,
            task_step,
            is_last,
            next_steps,
        }
    }

    /// ID of the executed step
    pub fn step_id(&self) -> &StepId {
        &self.task_step.step_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChatMemoryBuffer;
    use serde_json::json;

    fn task() -> Task {
        Task::new("hello world", ChatMemoryBuffer::default().shared())
    }

    #[test]
    fn test_extra_state_is_shared_between_clones() {
        let task = task();
        let copy = task.clone();

        copy.extra_state.insert("counter", 3).unwrap();
        assert_eq!(task.extra_state.get::<i64>("counter").unwrap(), Some(3));

        task.extra_state.update(|map| map.insert("counter".into(), json!(4)));
        assert_eq!(copy.extra_state.get_value("counter"), Some(json!(4)));
    }

    #[test]
    fn test_extra_state_type_mismatch() {
        let state = ExtraState::new();
        state.insert("name", "not a number").unwrap();
        assert!(state.get::<i64>("name").is_err());
        assert_eq!(state.get::<i64>("missing").unwrap(), None);
    }

    #[test]
    fn test_next_step_inherits() {
        let task = task();
        let mut root = TaskStep::first(&task);
        root.step_state.insert("num".into(), json!("0"));

        let next = root.next_step();
        assert_eq!(next.task_id, root.task_id);
        assert_eq!(next.input.as_deref(), Some("hello world"));
        assert_eq!(next.step_state["num"], "0");
        assert_ne!(next.step_id, root.step_id);
        assert!(Arc::ptr_eq(&next.memory, &task.memory));
    }

    #[test]
    fn test_next_step_overrides() {
        let root = TaskStep::first(&task());
        let mut state = StateMap::new();
        state.insert("num".into(), json!("01"));

        let next =
            root.get_next_step(StepId::from_string("custom"), Some("refined".into()), Some(state));
        assert_eq!(next.step_id.as_str(), "custom");
        assert_eq!(next.input.as_deref(), Some("refined"));
        assert_eq!(next.step_state["num"], "01");
    }

    #[test]
    fn test_link_step() {
        let mut root = TaskStep::first(&task());
        let mut child = root.next_step();
        root.link_step(&mut child);

        assert!(root.next_steps.contains(&child.step_id));
        assert!(child.prev_steps.contains(&root.step_id));
    }

    #[test]
    fn test_task_equality_by_identity() {
        let task = task();
        let copy = task.clone();
        assert_eq!(task, copy);
        assert_ne!(task, Task::new("hello world", Arc::clone(&task.memory)));
    }
}
