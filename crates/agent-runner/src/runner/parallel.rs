//! Parallel (DAG) Runner
//!
//! A step may fan out into several successors that all belong to the same
//! task. Each call executes one wave: the frontier as it stood when the call
//! started. Successors produced during the wave are queued behind it, in the
//! order of the outputs that produced them, and run on the next call.
//!
//! Branches are never merged; each one is followed to its own terminal
//! output. They share the task's `extra_state`, while step IDs keep the
//! completed-step history collision free.

use std::sync::Arc;

use futures::future::join_all;

use super::{RunnerBuilder, RunnerCore, TaskRunner};
use crate::config::RunnerConfig;
use crate::error::{AgentError, Result};
use crate::memory::ChatMemoryBuffer;
use crate::state::FrontierPolicy;
use crate::task::{AgentResponse, StepId, TaskId, TaskStepOutput};
use crate::worker::{AgentWorker, StepMode};

/// Runner that executes the whole pending frontier per call
pub struct ParallelAgentRunner {
    core: RunnerCore,
}

impl ParallelAgentRunner {
    /// Create with default configuration and a fresh chat memory
    pub fn new<W: AgentWorker + 'static>(worker: W) -> Self {
        Self::from_config(Arc::new(worker), RunnerConfig::default())
    }

    /// Create with an explicit config and a memory sized by it
    pub fn from_config(worker: Arc<dyn AgentWorker>, config: RunnerConfig) -> Self {
        let memory = ChatMemoryBuffer::new(config.memory_token_limit).shared();
        Self {
            core: RunnerCore::new(worker, memory, config),
        }
    }

    /// Start a [`RunnerBuilder`]
    pub fn builder() -> RunnerBuilder<Self> {
        RunnerBuilder::new()
    }

    /// Run a single pending step, or the front of the queue when `step_id`
    /// is `None`. Its successors join the back of the queue.
    pub fn run_step(&self, task_id: &TaskId, step_id: Option<&StepId>) -> Result<TaskStepOutput> {
        self.core
            .run_step(task_id, step_id, None, StepMode::Run, FrontierPolicy::All)
    }

    /// Async [`ParallelAgentRunner::run_step`]
    pub async fn arun_step(
        &self,
        task_id: &TaskId,
        step_id: Option<&StepId>,
    ) -> Result<TaskStepOutput> {
        self.core
            .arun_step(task_id, step_id, None, StepMode::Run, FrontierPolicy::All)
            .await
    }

    /// Execute every step currently queued for the task, one after another.
    ///
    /// Outputs are returned and recorded in queue order. If a worker call
    /// fails the wave stops there: earlier outputs stay recorded, the failing
    /// step and the ones after it stay queued.
    pub fn run_steps_in_queue(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.run_wave(task_id, StepMode::Run)
    }

    /// Like `run_steps_in_queue`, through the worker's streaming entry point
    pub fn stream_steps_in_queue(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.run_wave(task_id, StepMode::Stream)
    }

    /// Execute every step currently queued for the task concurrently.
    ///
    /// Outputs are recorded in queue order once all calls have returned. A
    /// failing branch does not undo the others: successful outputs are
    /// recorded, failed steps stay queued and the first error is returned.
    pub async fn arun_steps_in_queue(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.arun_wave(task_id, StepMode::Run).await
    }

    /// Like `arun_steps_in_queue`, through the worker's streaming entry point
    pub async fn astream_steps_in_queue(&self, task_id: &TaskId) -> Result<Vec<TaskStepOutput>> {
        self.arun_wave(task_id, StepMode::Stream).await
    }

    fn run_wave(&self, task_id: &TaskId, mode: StepMode) -> Result<Vec<TaskStepOutput>> {
        let (task, frontier) = self.core.state().frontier(task_id)?;
        tracing::debug!(task_id = %task_id, frontier = frontier.len(), "Running wave");

        let mut outputs = Vec::with_capacity(frontier.len());
        for step in frontier {
            let step_id = step.step_id.clone();
            let result = mode.execute(self.core.worker(), step, &task);
            outputs.push(self.core.record(&task, &step_id, result, FrontierPolicy::All)?);
        }
        Ok(outputs)
    }

    async fn arun_wave(&self, task_id: &TaskId, mode: StepMode) -> Result<Vec<TaskStepOutput>> {
        let (task, frontier) = self.core.state().frontier(task_id)?;
        tracing::debug!(task_id = %task_id, frontier = frontier.len(), "Running wave concurrently");

        let worker = self.core.worker();
        let task_ref = &task;
        let results = join_all(frontier.into_iter().map(|step| async move {
            let step_id = step.step_id.clone();
            (step_id, mode.aexecute(worker, step, task_ref).await)
        }))
        .await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (step_id, result) in results {
            match self.core.record(&task, &step_id, result, FrontierPolicy::All) {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outputs),
        }
    }

    /// Create a task and run waves until no branch has work left.
    ///
    /// The last terminal output of the final wave is finalized and returned.
    pub fn chat(&self, input: &str) -> Result<AgentResponse> {
        let task = self.create_task(input)?;
        let mut executed = 0;
        let mut terminal = None;

        while self.has_pending(&task.task_id)? {
            self.core.check_step_budget(executed)?;
            let outputs = self.run_steps_in_queue(&task.task_id)?;
            executed += outputs.len();
            terminal = outputs.into_iter().rev().find(|output| output.is_last).or(terminal);
        }

        let output = terminal.ok_or_else(|| AgentError::NoTerminalOutput(task.task_id.clone()))?;
        self.finalize_response(&task.task_id, Some(output))
    }

    /// Async [`ParallelAgentRunner::chat`]
    pub async fn achat(&self, input: &str) -> Result<AgentResponse> {
        let task = self.create_task(input)?;
        let mut executed = 0;
        let mut terminal = None;

        while self.has_pending(&task.task_id)? {
            self.core.check_step_budget(executed)?;
            let outputs = self.arun_steps_in_queue(&task.task_id).await?;
            executed += outputs.len();
            terminal = outputs.into_iter().rev().find(|output| output.is_last).or(terminal);
        }

        let output = terminal.ok_or_else(|| AgentError::NoTerminalOutput(task.task_id.clone()))?;
        self.finalize_response(&task.task_id, Some(output))
    }

    fn has_pending(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self.core.state().pending_len(task_id)? > 0)
    }
}

impl From<RunnerCore> for ParallelAgentRunner {
    fn from(core: RunnerCore) -> Self {
        Self { core }
    }
}

impl TaskRunner for ParallelAgentRunner {
    fn core(&self) -> &RunnerCore {
        &self.core
    }
}
