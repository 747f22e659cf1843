//! Agent Worker Strategy
//!
//! A worker decides what a step does: it builds the first step of a task and
//! turns each step into an output plus the steps that follow it. Runners work
//! exclusively through this trait, so any strategy can be swapped in at
//! construction time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runner::AgentRunner;
//!
//! let runner = AgentRunner::new(MyWorker::default());
//! let response = runner.chat("hello world")?;
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::task::{Task, TaskStep, TaskStepOutput};

/// Strategy trait for agent workers
///
/// Steps are handed over by value and must come back inside the output as
/// `task_step`, with any `step_state` changes applied. Task-scoped bookkeeping
/// lives in `task.extra_state`, which every step of the task can see.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    /// Build the first step of a task. Called exactly once per task.
    fn initialize_step(&self, task: &Task) -> Result<TaskStep>;

    /// Run a step.
    ///
    /// `is_last` on the returned output is trusted unconditionally by the
    /// runner to stop the branch.
    fn run_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput>;

    /// Run a step, suspending while the worker waits on I/O
    async fn arun_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.run_step(step, task)
    }

    /// Run a step incrementally
    fn stream_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.run_step(step, task)
    }

    /// Run a step incrementally, suspending on I/O
    async fn astream_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.arun_step(step, task).await
    }

    /// Called once after the task's final output
    fn finalize_task(&self, _task: &Task) -> Result<()> {
        Ok(())
    }
}

/// Which worker entry point a runner call goes through
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepMode {
    Run,
    Stream,
}

impl StepMode {
    /// Dispatch to the matching blocking entry point
    pub(crate) fn execute(
        self,
        worker: &dyn AgentWorker,
        step: TaskStep,
        task: &Task,
    ) -> Result<TaskStepOutput> {
        match self {
            StepMode::Run => worker.run_step(step, task),
            StepMode::Stream => worker.stream_step(step, task),
        }
    }

    /// Dispatch to the matching async entry point
    pub(crate) async fn aexecute(
        self,
        worker: &dyn AgentWorker,
        step: TaskStep,
        task: &Task,
    ) -> Result<TaskStepOutput> {
        match self {
            StepMode::Run => worker.arun_step(step, task).await,
            StepMode::Stream => worker.astream_step(step, task).await,
        }
    }
}
