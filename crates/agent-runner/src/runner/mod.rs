//! Runners
//!
//! Both runners drive tasks through an [`AgentWorker`] and record every step
//! in a [`TaskState`] registry:
//!
//! - [`AgentRunner`] keeps a single pending step per task and advances it one
//!   step per call.
//! - [`ParallelAgentRunner`] lets a step fan out into several successors and
//!   executes the whole frontier as one wave per call.
//!
//! Registry accessors, finalization and reset are shared through the
//! [`TaskRunner`] trait.

mod parallel;
mod sequential;

pub use parallel::ParallelAgentRunner;
pub use sequential::AgentRunner;

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::error::{AgentError, Result};
use crate::memory::{ChatMemoryBuffer, SharedMemory};
use crate::message::Message;
use crate::state::{FrontierPolicy, TaskState};
use crate::task::{AgentResponse, StateMap, StepId, Task, TaskId, TaskStep, TaskStepOutput};
use crate::worker::{AgentWorker, StepMode};

/// State and collaborators owned by a runner
pub struct RunnerCore {
    worker: Arc<dyn AgentWorker>,
    memory: SharedMemory,
    state: TaskState,
    config: RunnerConfig,
}

impl RunnerCore {
    /// Bundle a worker, its memory and config with an empty registry
    pub fn new(worker: Arc<dyn AgentWorker>, memory: SharedMemory, config: RunnerConfig) -> Self {
        Self {
            worker,
            memory,
            state: TaskState::new(),
            config,
        }
    }

    /// The worker every step goes through
    pub fn worker(&self) -> &dyn AgentWorker {
        self.worker.as_ref()
    }

    /// The task registry
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Memory shared with every task
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Active configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Create a task and register its first step
    pub(crate) fn create_task(&self, input: &str, extra_state: StateMap) -> Result<Task> {
        let task = Task::with_state(input, Arc::clone(&self.memory), extra_state);
        let first_step = self
            .worker
            .initialize_step(&task)
            .map_err(|source| AgentError::worker(&task.task_id, None, source))?;

        tracing::info!(task_id = %task.task_id, step_id = %first_step.step_id, "Created task");
        self.state.insert(task.clone(), first_step);
        Ok(task)
    }

    /// Run one pending step through a blocking worker entry point
    pub(crate) fn run_step(
        &self,
        task_id: &TaskId,
        step_id: Option<&StepId>,
        input: Option<&str>,
        mode: StepMode,
        policy: FrontierPolicy,
    ) -> Result<TaskStepOutput> {
        let (task, step) = self.checkout(task_id, step_id, input)?;
        let executed = step.step_id.clone();
        let result = mode.execute(self.worker(), step, &task);
        self.record(&task, &executed, result, policy)
    }

    /// Run one pending step through an async worker entry point
    pub(crate) async fn arun_step(
        &self,
        task_id: &TaskId,
        step_id: Option<&StepId>,
        input: Option<&str>,
        mode: StepMode,
        policy: FrontierPolicy,
    ) -> Result<TaskStepOutput> {
        let (task, step) = self.checkout(task_id, step_id, input)?;
        let executed = step.step_id.clone();
        let result = mode.aexecute(self.worker(), step, &task).await;
        self.record(&task, &executed, result, policy)
    }

    /// Copy a pending step out of the registry without dequeuing it
    fn checkout(
        &self,
        task_id: &TaskId,
        step_id: Option<&StepId>,
        input: Option<&str>,
    ) -> Result<(Task, TaskStep)> {
        let (task, mut step) = match step_id {
            Some(step_id) => self.state.pending_step(task_id, step_id)?,
            None => self.state.pending_front(task_id)?,
        };
        if let Some(input) = input {
            step.input = Some(input.to_owned());
        }

        tracing::debug!(task_id = %task_id, step_id = %step.step_id, "Running step");
        Ok((task, step))
    }

    /// Store a worker result, or wrap its error
    pub(crate) fn record(
        &self,
        task: &Task,
        step_id: &StepId,
        result: Result<TaskStepOutput>,
        policy: FrontierPolicy,
    ) -> Result<TaskStepOutput> {
        let output = result.map_err(|source| {
            tracing::warn!(
                task_id = %task.task_id,
                step_id = %step_id,
                error = %source,
                "Worker step failed"
            );
            AgentError::worker(&task.task_id, Some(step_id), source)
        })?;
        self.state.complete_step(&task.task_id, step_id, output, policy)
    }

    /// Fail once `executed` reaches the configured step budget
    pub(crate) fn check_step_budget(&self, executed: usize) -> Result<()> {
        match self.config.max_steps {
            Some(max) if executed >= max => Err(AgentError::MaxSteps(max)),
            _ => Ok(()),
        }
    }

    /// Check the output is terminal, finalize the task and return its response
    pub(crate) fn finalize_response(
        &self,
        task_id: &TaskId,
        step_output: Option<TaskStepOutput>,
    ) -> Result<AgentResponse> {
        let output = match step_output {
            Some(output) => output,
            None => self
                .state
                .last_completed_step(task_id)?
                .ok_or_else(|| AgentError::NoTerminalOutput(task_id.clone()))?,
        };
        if !output.is_last {
            return Err(AgentError::StepNotLast(output.task_step.step_id));
        }

        let task = self.state.get_task(task_id)?;
        self.worker
            .finalize_task(&task)
            .map_err(|source| AgentError::worker(task_id, None, source))?;

        if self.config.delete_task_on_finish {
            self.state.remove(task_id)?;
        }

        tracing::info!(task_id = %task_id, step_id = %output.task_step.step_id, "Finalized task");
        Ok(output.output)
    }

    /// Clear memory and the registry
    pub(crate) fn reset(&self) {
        self.memory.reset();
        self.state.reset();
        tracing::info!("Runner reset");
    }
}

/// Registry accessors and lifecycle operations shared by both runners
pub trait TaskRunner {
    fn core(&self) -> &RunnerCore;

    /// Register a new task and initialize its first step
    fn create_task(&self, input: &str) -> Result<Task> {
        self.core().create_task(input, StateMap::new())
    }

    /// Register a new task with pre-seeded extra state
    fn create_task_with_state(&self, input: &str, extra_state: StateMap) -> Result<Task> {
        self.core().create_task(input, extra_state)
    }

    /// All registered tasks, in creation order
    fn list_tasks(&self) -> Vec<Task> {
        self.core().state().list_tasks()
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.core().state().get_task(task_id)
    }

    fn delete_task(&self, task_id: &TaskId) -> Result<Task> {
        let task = self.core().state().remove(task_id)?;
        tracing::debug!(task_id = %task_id, "Deleted task");
        Ok(task)
    }

    /// Steps waiting to run, in queue order
    fn get_upcoming_steps(&self, task_id: &TaskId) -> Result<Vec<TaskStep>> {
        self.core().state().get_step_queue(task_id)
    }

    /// Completed step outputs, in execution order
    fn get_completed_steps(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.core().state().get_completed_steps(task_id)
    }

    fn get_completed_step(&self, task_id: &TaskId, step_id: &StepId) -> Result<TaskStepOutput> {
        self.get_completed_steps(task_id)?
            .into_iter()
            .find(|output| &output.task_step.step_id == step_id)
            .ok_or_else(|| AgentError::StepNotFound {
                task_id: task_id.clone(),
                step_id: step_id.clone(),
            })
    }

    /// Latest output of a task that has reached a terminal step
    fn get_task_output(&self, task_id: &TaskId) -> Result<TaskStepOutput> {
        self.core()
            .state()
            .last_completed_step(task_id)?
            .filter(|output| output.is_last)
            .ok_or_else(|| AgentError::NoTerminalOutput(task_id.clone()))
    }

    /// Tasks whose latest output is terminal
    fn get_completed_tasks(&self) -> Vec<Task> {
        self.core().state().completed_tasks()
    }

    /// Finish a task: check the output is terminal, let the worker clean up
    /// and surface the response.
    ///
    /// Without an explicit output the latest completed one is used.
    fn finalize_response(
        &self,
        task_id: &TaskId,
        step_output: Option<TaskStepOutput>,
    ) -> Result<AgentResponse> {
        self.core().finalize_response(task_id, step_output)
    }

    fn memory(&self) -> &SharedMemory {
        self.core().memory()
    }

    fn chat_history(&self) -> Vec<Message> {
        self.core().memory().get_all()
    }

    fn state(&self) -> &TaskState {
        self.core().state()
    }

    /// Clear the registry and the long-lived memory
    fn reset(&self) {
        self.core().reset();
    }
}

/// Builder for runners
pub struct RunnerBuilder<R> {
    worker: Option<Arc<dyn AgentWorker>>,
    memory: Option<SharedMemory>,
    config: RunnerConfig,
    runner: PhantomData<fn() -> R>,
}

impl<R> Default for RunnerBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> RunnerBuilder<R> {
    /// Empty builder with default config
    pub fn new() -> Self {
        Self {
            worker: None,
            memory: None,
            config: RunnerConfig::default(),
            runner: PhantomData,
        }
    }

    /// Worker to drive every task (required)
    pub fn worker<W: AgentWorker + 'static>(mut self, worker: W) -> Self {
        self.worker = Some(Arc::new(worker));
        self
    }

    /// Same as `worker`, for a worker that is already shared
    pub fn shared_worker(mut self, worker: Arc<dyn AgentWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Memory to share with every task (defaults to a fresh `ChatMemoryBuffer`)
    pub fn memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Replace the whole config
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn delete_task_on_finish(mut self, delete: bool) -> Self {
        self.config.delete_task_on_finish = delete;
        self
    }

    /// Stop `chat` after this many steps
    pub fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = Some(max);
        self
    }

    fn build_core(self) -> Result<RunnerCore> {
        let worker = self
            .worker
            .ok_or_else(|| AgentError::Config("Worker is required".into()))?;
        self.config.validate()?;

        let memory = self
            .memory
            .unwrap_or_else(|| ChatMemoryBuffer::new(self.config.memory_token_limit).shared());

        Ok(RunnerCore::new(worker, memory, self.config))
    }
}

impl<R: From<RunnerCore>> RunnerBuilder<R> {
    /// Validate the config and build the runner
    pub fn build(self) -> Result<R> {
        self.build_core().map(R::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAgentWorker;

    /// Hands back its own step as the successor
    struct RepeatStepWorker;

    impl AgentWorker for RepeatStepWorker {
        fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
            Ok(TaskStep::first(task))
        }

        fn run_step(&self, step: TaskStep, _task: &Task) -> Result<TaskStepOutput> {
            let again = step.get_next_step(step.step_id.clone(), None, None);
            Ok(TaskStepOutput::new(AgentResponse::new("again"), step, false, vec![again]))
        }
    }

    #[test]
    fn test_builder_requires_worker() {
        let result = AgentRunner::builder().build();
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = ParallelAgentRunner::builder()
            .worker(MockAgentWorker::new(2))
            .max_steps(0)
            .build();
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_builder_uses_given_memory() {
        let memory = ChatMemoryBuffer::default().shared();
        memory.put(Message::user("10"));

        let runner = AgentRunner::builder()
            .worker(MockAgentWorker::new(2))
            .memory(Arc::clone(&memory))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(runner.memory(), &memory));
        assert_eq!(runner.chat_history().len(), 1);
    }

    #[test]
    fn test_get_completed_step_and_task_output() {
        let runner = AgentRunner::new(MockAgentWorker::new(2));
        let task = runner.create_task("hello world").unwrap();

        let first = runner.run_step(&task.task_id).unwrap();
        assert!(matches!(
            runner.get_task_output(&task.task_id),
            Err(AgentError::NoTerminalOutput(_))
        ));
        assert!(runner.get_completed_tasks().is_empty());

        runner.run_step(&task.task_id).unwrap();
        let found = runner.get_completed_step(&task.task_id, first.step_id()).unwrap();
        assert_eq!(found.output.response, "counter: 1");
        assert_eq!(runner.get_task_output(&task.task_id).unwrap().output.response, "counter: 2");
        assert_eq!(runner.get_completed_tasks(), vec![task]);
    }

    #[test]
    fn test_finalize_rejects_non_terminal_output() {
        let runner = AgentRunner::new(MockAgentWorker::new(3));
        let task = runner.create_task("hello world").unwrap();
        let output = runner.run_step(&task.task_id).unwrap();

        let err = runner.finalize_response(&task.task_id, Some(output)).unwrap_err();
        assert!(matches!(err, AgentError::StepNotLast(_)));

        let err = runner.finalize_response(&task.task_id, None).unwrap_err();
        assert!(matches!(err, AgentError::StepNotLast(_)));
    }

    #[test]
    fn test_delete_task_on_finish() {
        let runner = AgentRunner::builder()
            .worker(MockAgentWorker::new(2))
            .delete_task_on_finish(true)
            .build()
            .unwrap();

        let response = runner.chat("hello world").unwrap();
        assert_eq!(response.to_string(), "counter: 2");
        assert!(runner.list_tasks().is_empty());
    }

    #[test]
    fn test_delete_task() {
        let runner = AgentRunner::new(MockAgentWorker::new(2));
        let task = runner.create_task("hello world").unwrap();

        assert_eq!(runner.delete_task(&task.task_id).unwrap(), task);
        assert!(matches!(runner.run_step(&task.task_id), Err(AgentError::TaskNotFound(_))));
    }

    #[test]
    fn test_duplicate_successor_rejected() {
        let runner = ParallelAgentRunner::new(RepeatStepWorker);
        let task = runner.create_task("hello world").unwrap();
        let pending = runner.get_upcoming_steps(&task.task_id).unwrap();

        let err = runner.run_step(&task.task_id, None).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateStep(ref id) if id == &pending[0].step_id));
        assert!(runner.get_completed_steps(&task.task_id).unwrap().is_empty());
        let upcoming = runner.get_upcoming_steps(&task.task_id).unwrap();
        assert_eq!(upcoming[0].step_id, pending[0].step_id);
    }
}
