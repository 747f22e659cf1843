//! Sequential Runner
//!
//! Drives one step per task at a time. When a worker proposes several
//! successors only the first is kept: this runner models a single reasoning
//! thread.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;

use super::{RunnerBuilder, RunnerCore, TaskRunner};
use crate::config::RunnerConfig;
use crate::error::{AgentError, Result};
use crate::memory::ChatMemoryBuffer;
use crate::message::Message;
use crate::state::FrontierPolicy;
use crate::task::{AgentResponse, TaskId, TaskStepOutput};
use crate::worker::{AgentWorker, StepMode};

/// Runner that advances a task one step per call
pub struct AgentRunner {
    core: RunnerCore,
}

impl AgentRunner {
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

    /// Run the task's pending step
    pub fn run_step(&self, task_id: &TaskId) -> Result<TaskStepOutput> {
        self.core.run_step(task_id, None, None, StepMode::Run, FrontierPolicy::First)
    }

    /// Run the task's pending step with its input replaced
    pub fn run_step_with_input(&self, task_id: &TaskId, input: &str) -> Result<TaskStepOutput> {
        self.core
            .run_step(task_id, None, Some(input), StepMode::Run, FrontierPolicy::First)
    }

    /// Async [`AgentRunner::run_step`]
    pub async fn arun_step(&self, task_id: &TaskId) -> Result<TaskStepOutput> {
        self.core
            .arun_step(task_id, None, None, StepMode::Run, FrontierPolicy::First)
            .await
    }

    /// Async [`AgentRunner::run_step_with_input`]
    pub async fn arun_step_with_input(
        &self,
        task_id: &TaskId,
        input: &str,
    ) -> Result<TaskStepOutput> {
        self.core
            .arun_step(task_id, None, Some(input), StepMode::Run, FrontierPolicy::First)
            .await
    }

    /// Run the pending step, giving up after `timeout`.
    ///
    /// On timeout nothing is recorded and the step stays pending, so the call
    /// can be repeated. Side effects the worker already made on
    /// `extra_state` or memory are not undone.
    pub async fn arun_step_with_timeout(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<TaskStepOutput> {
        match tokio::time::timeout(timeout, self.arun_step(task_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(task_id = %task_id, ?timeout, "Step timed out");
                Err(AgentError::Timeout(timeout))
            }
        }
    }

    /// Run the pending step through the worker's streaming entry point
    pub fn stream_step(&self, task_id: &TaskId) -> Result<TaskStepOutput> {
        self.core
            .run_step(task_id, None, None, StepMode::Stream, FrontierPolicy::First)
    }

    /// Async [`AgentRunner::stream_step`]
    pub async fn astream_step(&self, task_id: &TaskId) -> Result<TaskStepOutput> {
        self.core
            .arun_step(task_id, None, None, StepMode::Stream, FrontierPolicy::First)
            .await
    }

    /// Create a task and drive it to its terminal step
    pub fn chat(&self, input: &str) -> Result<AgentResponse> {
        let task = self.create_task(input)?;
        let mut executed = 0;
        loop {
            self.core.check_step_budget(executed)?;
            let output = self.run_step(&task.task_id)?;
            executed += 1;
            if output.is_last {
                return self.finalize_response(&task.task_id, Some(output));
            }
        }
    }

    /// Replace the memory contents with `history`, then chat
    pub fn chat_with_history(&self, input: &str, history: Vec<Message>) -> Result<AgentResponse> {
        self.memory().set(history);
        self.chat(input)
    }

    /// Async [`AgentRunner::chat`]
    pub async fn achat(&self, input: &str) -> Result<AgentResponse> {
        let task = self.create_task(input)?;
        let mut executed = 0;
        loop {
            self.core.check_step_budget(executed)?;
            let output = self.arun_step(&task.task_id).await?;
            executed += 1;
            if output.is_last {
                return self.finalize_response(&task.task_id, Some(output));
            }
        }
    }

    /// Create a task and yield each step output as it is produced.
    ///
    /// The task is finalized right before its terminal output is yielded.
    /// The stream ends after the terminal output or the first error.
    pub fn stream_chat(
        &self,
        input: &str,
    ) -> Result<impl Stream<Item = Result<TaskStepOutput>> + '_> {
        let task = self.create_task(input)?;
        Ok(stream::try_unfold(Some((task.task_id, 0)), move |pending| async move {
            match pending {
                Some((task_id, executed)) => self.stream_next(task_id, executed).await,
                None => Ok(None),
            }
        }))
    }

    async fn stream_next(
        &self,
        task_id: TaskId,
        executed: usize,
    ) -> Result<Option<(TaskStepOutput, Option<(TaskId, usize)>)>> {
        self.core.check_step_budget(executed)?;
        let output = self.astream_step(&task_id).await?;
        if output.is_last {
            self.finalize_response(&task_id, Some(output.clone()))?;
            return Ok(Some((output, None)));
        }
        Ok(Some((output, Some((task_id, executed + 1)))))
    }
}

impl From<RunnerCore> for AgentRunner {
    fn from(core: RunnerCore) -> Self {
        Self { core }
    }
}

impl TaskRunner for AgentRunner {
    fn core(&self) -> &RunnerCore {
        &self.core
    }
}
