//! Task Registry
//!
//! Process-scoped record of every task a runner knows about: the task itself,
//! its completed step outputs (append-only, in execution order) and the queue
//! of steps still waiting to run.
//!
//! Pending steps are handed out as clones and only leave the queue when
//! [`TaskState::complete_step`] records a successful output for them. A
//! failed or abandoned worker call therefore leaves the task exactly as it
//! was and the same wave can be issued again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{AgentError, Result};
use crate::task::{StepId, Task, TaskId, TaskStep, TaskStepOutput};

/// How successor steps enter the pending queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontierPolicy {
    /// Keep only the first successor (single reasoning thread)
    First,
    /// Enqueue every successor (branching)
    All,
}

/// Registry entry for a single task
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub task: Task,
    pub root_step_id: StepId,
    pub completed_steps: Vec<TaskStepOutput>,
    pub step_queue: VecDeque<TaskStep>,
    seen_step_ids: HashSet<StepId>,
    seq: u64,
}

impl TaskRecord {
    /// True once the latest completed output is terminal
    pub fn is_finished(&self) -> bool {
        self.completed_steps.last().is_some_and(|output| output.is_last)
    }
}

/// Registry of tasks keyed by ID
#[derive(Debug, Default)]
pub struct TaskState {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    next_seq: AtomicU64,
}

impl TaskState {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task with its first step as the only pending step
    pub fn insert(&self, task: Task, first_step: TaskStep) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = TaskRecord {
            root_step_id: first_step.step_id.clone(),
            seen_step_ids: HashSet::from([first_step.step_id.clone()]),
            step_queue: VecDeque::from([first_step]),
            completed_steps: Vec::new(),
            task: task.clone(),
            seq,
        };
        self.write().insert(task.task_id, record);
    }

    /// Check whether a task is registered
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.read().contains_key(task_id)
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of a registered task
    pub fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.with_record(task_id, |record| record.task.clone())
    }

    /// Copy of the full record
    pub fn get_record(&self, task_id: &TaskId) -> Result<TaskRecord> {
        self.with_record(task_id, TaskRecord::clone)
    }

    /// All tasks, in creation order
    pub fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.read();
        let mut records: Vec<_> = tasks.values().collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| record.task.clone()).collect()
    }

    /// Tasks whose latest output is terminal, in creation order
    pub fn completed_tasks(&self) -> Vec<Task> {
        let tasks = self.read();
        let mut records: Vec<_> = tasks.values().filter(|record| record.is_finished()).collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| record.task.clone()).collect()
    }

    /// Unregister a task and its step history
    pub fn remove(&self, task_id: &TaskId) -> Result<Task> {
        self.write()
            .remove(task_id)
            .map(|record| record.task)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))
    }

    /// Drop every task
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Pending steps, in queue order
    pub fn get_step_queue(&self, task_id: &TaskId) -> Result<Vec<TaskStep>> {
        self.with_record(task_id, |record| record.step_queue.iter().cloned().collect())
    }

    /// Completed step outputs, in execution order
    pub fn get_completed_steps(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.with_record(task_id, |record| record.completed_steps.clone())
    }

    /// Number of pending steps
    pub fn pending_len(&self, task_id: &TaskId) -> Result<usize> {
        self.with_record(task_id, |record| record.step_queue.len())
    }

    /// Most recent completed output, if any
    pub fn last_completed_step(&self, task_id: &TaskId) -> Result<Option<TaskStepOutput>> {
        self.with_record(task_id, |record| record.completed_steps.last().cloned())
    }

    /// The task and a copy of its front pending step
    pub fn pending_front(&self, task_id: &TaskId) -> Result<(Task, TaskStep)> {
        self.with_record(task_id, |record| {
            record
                .step_queue
                .front()
                .map(|step| (record.task.clone(), step.clone()))
                .ok_or_else(|| AgentError::NoPendingStep(task_id.clone()))
        })?
    }

    /// The task and a copy of a specific pending step
    pub fn pending_step(&self, task_id: &TaskId, step_id: &StepId) -> Result<(Task, TaskStep)> {
        self.with_record(task_id, |record| {
            record
                .step_queue
                .iter()
                .find(|step| &step.step_id == step_id)
                .map(|step| (record.task.clone(), step.clone()))
                .ok_or_else(|| AgentError::StepNotFound {
                    task_id: task_id.clone(),
                    step_id: step_id.clone(),
                })
        })?
    }

    /// The task and a snapshot of the whole frontier, in queue order
    pub fn frontier(&self, task_id: &TaskId) -> Result<(Task, Vec<TaskStep>)> {
        self.with_record(task_id, |record| {
            if record.step_queue.is_empty() {
                return Err(AgentError::NoPendingStep(task_id.clone()));
            }
            Ok((record.task.clone(), record.step_queue.iter().cloned().collect()))
        })?
    }

    /// Record a successful step output.
    ///
    /// Removes the executed step from the queue, enqueues its successors when
    /// the branch is not terminal and appends the output to the completed
    /// history. Successor IDs are checked before anything is changed.
    pub fn complete_step(
        &self,
        task_id: &TaskId,
        step_id: &StepId,
        output: TaskStepOutput,
        policy: FrontierPolicy,
    ) -> Result<TaskStepOutput> {
        let mut tasks = self.write();
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))?;

        let position = record
            .step_queue
            .iter()
            .position(|step| &step.step_id == step_id)
            .ok_or_else(|| AgentError::StepNotFound {
                task_id: task_id.clone(),
                step_id: step_id.clone(),
            })?;

        let mut fresh = HashSet::new();
        for next in &output.next_steps {
            if record.seen_step_ids.contains(&next.step_id) || !fresh.insert(next.step_id.clone()) {
                return Err(AgentError::DuplicateStep(next.step_id.clone()));
            }
        }

        record.step_queue.remove(position);
        record.seen_step_ids.extend(fresh);

        if !output.is_last {
            let successors = output.next_steps.iter().cloned();
            match policy {
                FrontierPolicy::First => record.step_queue.extend(successors.take(1)),
                FrontierPolicy::All => record.step_queue.extend(successors),
            }
        }

        record.completed_steps.push(output.clone());

        tracing::debug!(
            task_id = %task_id,
            step_id = %step_id,
            is_last = output.is_last,
            pending = record.step_queue.len(),
            completed = record.completed_steps.len(),
            "Recorded step output"
        );

        Ok(output)
    }

    fn with_record<R>(&self, task_id: &TaskId, f: impl FnOnce(&TaskRecord) -> R) -> Result<R> {
        self.read()
            .get(task_id)
            .map(f)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChatMemoryBuffer;
    use crate::task::AgentResponse;

    fn registered() -> (TaskState, Task, TaskStep) {
        let state = TaskState::new();
        let task = Task::new("hello world", ChatMemoryBuffer::default().shared());
        let step = TaskStep::first(&task);
        state.insert(task.clone(), step.clone());
        (state, task, step)
    }

    fn output(step: &TaskStep, is_last: bool, next_steps: Vec<TaskStep>) -> TaskStepOutput {
        TaskStepOutput::new(AgentResponse::new("ok"), step.clone(), is_last, next_steps)
    }

    #[test]
    fn test_unknown_task() {
        let state = TaskState::new();
        let missing = TaskId::new();
        assert!(matches!(state.get_task(&missing), Err(AgentError::TaskNotFound(_))));
        assert!(matches!(state.pending_front(&missing), Err(AgentError::TaskNotFound(_))));
    }

    #[test]
    fn test_complete_step_first_policy() {
        let (state, task, step) = registered();
        let next = vec![step.next_step(), step.next_step()];
        let first_id = next[0].step_id.clone();

        state
            .complete_step(
                &task.task_id,
                &step.step_id,
                output(&step, false, next),
                FrontierPolicy::First,
            )
            .unwrap();

        let record = state.get_record(&task.task_id).unwrap();
        assert_eq!(record.root_step_id, step.step_id);
        assert!(!record.is_finished());

        let queue = state.get_step_queue(&task.task_id).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].step_id, first_id);
        assert_eq!(state.get_completed_steps(&task.task_id).unwrap().len(), 1);
    }

    #[test]
    fn test_complete_step_all_policy() {
        let (state, task, step) = registered();
        let next = vec![step.next_step(), step.next_step()];

        state
            .complete_step(
                &task.task_id,
                &step.step_id,
                output(&step, false, next),
                FrontierPolicy::All,
            )
            .unwrap();

        assert_eq!(state.get_step_queue(&task.task_id).unwrap().len(), 2);
    }

    #[test]
    fn test_terminal_output_does_not_enqueue() {
        let (state, task, step) = registered();
        let next = vec![step.next_step()];

        state
            .complete_step(
                &task.task_id,
                &step.step_id,
                output(&step, true, next),
                FrontierPolicy::All,
            )
            .unwrap();

        assert!(state.get_step_queue(&task.task_id).unwrap().is_empty());
        assert_eq!(state.completed_tasks().len(), 1);
        assert!(matches!(state.pending_front(&task.task_id), Err(AgentError::NoPendingStep(_))));
    }

    #[test]
    fn test_duplicate_step_rejected_without_side_effects() {
        let (state, task, step) = registered();
        let next = step.get_next_step(step.step_id.clone(), None, None);

        let err = state
            .complete_step(
                &task.task_id,
                &step.step_id,
                output(&step, false, vec![next]),
                FrontierPolicy::All,
            )
            .unwrap_err();

        assert!(matches!(err, AgentError::DuplicateStep(_)));
        assert_eq!(state.get_step_queue(&task.task_id).unwrap().len(), 1);
        assert!(state.get_completed_steps(&task.task_id).unwrap().is_empty());
    }

    #[test]
    fn test_list_tasks_in_creation_order() {
        let state = TaskState::new();
        let memory = ChatMemoryBuffer::default().shared();
        let inputs = ["a", "b", "c", "d"];
        for input in inputs {
            let task = Task::new(input, std::sync::Arc::clone(&memory));
            let step = TaskStep::first(&task);
            state.insert(task, step);
        }

        let listed: Vec<_> = state.list_tasks().into_iter().map(|task| task.input).collect();
        assert_eq!(listed, inputs);

        state.reset();
        assert!(state.is_empty());
    }

    #[test]
    fn test_remove() {
        let (state, task, _) = registered();
        assert_eq!(state.remove(&task.task_id).unwrap(), task);
        assert!(!state.contains(&task.task_id));
        assert!(state.remove(&task.task_id).is_err());
    }
}
