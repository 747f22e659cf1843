//! Reference workers for tests and demos.
//!
//! These drive the runners through every interesting path without calling a
//! model: linear counting, memory continuation across tasks, binary fan-out,
//! injected failures and slow async calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::task::{AgentResponse, StateMap, StepId, Task, TaskStep, TaskStepOutput};
use crate::worker::AgentWorker;

/// Counts steps in `extra_state["counter"]` and stops at `limit`.
///
/// Responds with `"counter: N"`.
#[derive(Debug, Clone)]
pub struct MockAgentWorker {
    limit: i64,
}

impl MockAgentWorker {
    /// Finish after `limit` steps
    pub fn new(limit: i64) -> Self {
        Self { limit }
    }
}

impl AgentWorker for MockAgentWorker {
    fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
        task.extra_state.insert("counter", 0)?;
        Ok(TaskStep::first(task))
    }

    fn run_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        let counter = task.extra_state.get::<i64>("counter")?.unwrap_or(0) + 1;
        task.extra_state.insert("counter", counter)?;

        let next_steps = vec![step.next_step()];
        Ok(TaskStepOutput::new(
            AgentResponse::new(format!("counter: {}", counter)),
            step,
            counter >= self.limit,
            next_steps,
        ))
    }
}

/// Like [`MockAgentWorker`], but continues from the last number stored in
/// memory and writes its final count back when done.
#[derive(Debug, Clone)]
pub struct MockMemoryWorker {
    limit: i64,
}

impl MockMemoryWorker {
    /// Finish after `limit` steps of this task
    pub fn new(limit: i64) -> Self {
        Self { limit }
    }
}

impl AgentWorker for MockMemoryWorker {
    fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
        let start = match task.memory.get_all().last() {
            Some(message) => message
                .content
                .parse::<i64>()
                .map_err(|e| AgentError::Other(format!("memory does not hold a counter: {}", e)))?,
            None => 0,
        };

        task.extra_state.insert("counter", 0)?;
        task.extra_state.insert("start", start)?;
        Ok(TaskStep::first(task))
    }

    fn run_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        let counter = task.extra_state.get::<i64>("counter")?.unwrap_or(0) + 1;
        task.extra_state.insert("counter", counter)?;
        let total = counter + task.extra_state.get::<i64>("start")?.unwrap_or(0);

        let is_last = counter >= self.limit;
        if is_last {
            task.memory.put(Message::user(total.to_string()));
        }

        let next_steps = vec![step.next_step()];
        Ok(TaskStepOutput::new(
            AgentResponse::new(format!("counter: {}", total)),
            step,
            is_last,
            next_steps,
        ))
    }
}

/// Splits every step in two until each branch has run `limit` steps.
///
/// Branches are named by appending `0`/`1` to their parent's
/// `step_state["num"]`; the response is the executed step's name.
#[derive(Debug, Clone)]
pub struct ForkStepWorker {
    limit: i64,
}

impl ForkStepWorker {
    /// Stop every branch at depth `limit`
    pub fn new(limit: i64) -> Self {
        Self { limit }
    }

    fn branch(step: &mut TaskStep, num: String, counter: i64) -> TaskStep {
        let mut state = StateMap::new();
        state.insert("num".into(), json!(num));
        state.insert("counter".into(), json!(counter));

        let mut next = step.get_next_step(StepId::new(), None, Some(state));
        step.link_step(&mut next);
        next
    }
}

impl AgentWorker for ForkStepWorker {
    fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
        let mut state = StateMap::new();
        state.insert("num".into(), json!("0"));
        state.insert("counter".into(), json!(0));
        Ok(TaskStep::first(task).with_state(state))
    }

    fn run_step(&self, mut step: TaskStep, _task: &Task) -> Result<TaskStepOutput> {
        let counter = step.step_state.get("counter").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
        step.step_state.insert("counter".into(), json!(counter));

        let num = step
            .step_state
            .get("num")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::Other("step is missing its branch name".into()))?
            .to_owned();

        let is_last = counter >= self.limit;
        let next_steps = if is_last {
            Vec::new()
        } else {
            vec![
                Self::branch(&mut step, format!("{}0", num), counter),
                Self::branch(&mut step, format!("{}1", num), counter),
            ]
        };

        Ok(TaskStepOutput::new(AgentResponse::new(num), step, is_last, next_steps))
    }
}

/// Wraps a worker and fails its `n`-th step call (1-based) exactly once
pub struct FailingWorker<W> {
    inner: W,
    fail_on: usize,
    calls: AtomicUsize,
}

impl<W: AgentWorker> FailingWorker<W> {
    /// Fail the `fail_on`-th step call made through any entry point
    pub fn on_call(inner: W, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }

    /// Step calls seen so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count_call(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(AgentError::Other(format!("injected failure on call {}", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl<W: AgentWorker> AgentWorker for FailingWorker<W> {
    fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
        self.inner.initialize_step(task)
    }

    fn run_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.count_call()?;
        self.inner.run_step(step, task)
    }

    async fn arun_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.count_call()?;
        self.inner.arun_step(step, task).await
    }

    fn stream_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.count_call()?;
        self.inner.stream_step(step, task)
    }

    async fn astream_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.count_call()?;
        self.inner.astream_step(step, task).await
    }

    fn finalize_task(&self, task: &Task) -> Result<()> {
        self.inner.finalize_task(task)
    }
}

/// Wraps a worker and delays every async step call
pub struct SlowWorker<W> {
    inner: W,
    delay: Duration,
}

impl<W: AgentWorker> SlowWorker<W> {
    /// Sleep for `delay` before each async call reaches `inner`
    pub fn new(inner: W, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<W: AgentWorker> AgentWorker for SlowWorker<W> {
    fn initialize_step(&self, task: &Task) -> Result<TaskStep> {
        self.inner.initialize_step(task)
    }

    fn run_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        self.inner.run_step(step, task)
    }

    async fn arun_step(&self, step: TaskStep, task: &Task) -> Result<TaskStepOutput> {
        tokio::time::sleep(self.delay).await;
        self.inner.arun_step(step, task).await
    }

    fn finalize_task(&self, task: &Task) -> Result<()> {
        self.inner.finalize_task(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChatMemoryBuffer;

    #[test]
    fn test_fork_worker_links_branches() {
        let worker = ForkStepWorker::new(2);
        let task = Task::new("hello world", ChatMemoryBuffer::default().shared());
        let step = worker.initialize_step(&task).unwrap();

        let output = worker.run_step(step, &task).unwrap();
        assert_eq!(output.next_steps.len(), 2);
        for next in &output.next_steps {
            assert!(output.task_step.next_steps.contains(&next.step_id));
            assert!(next.prev_steps.contains(&output.task_step.step_id));
        }
    }

    #[test]
    fn test_memory_worker_rejects_garbage_memory() {
        let worker = MockMemoryWorker::new(1);
        let memory = ChatMemoryBuffer::default().shared();
        memory.put(Message::user("not a number"));

        let task = Task::new("hello world", memory);
        assert!(worker.initialize_step(&task).is_err());
    }

    #[test]
    fn test_failing_worker_fails_once() {
        let worker = FailingWorker::on_call(MockAgentWorker::new(5), 1);
        let task = Task::new("hello world", ChatMemoryBuffer::default().shared());
        let step = worker.initialize_step(&task).unwrap();

        assert!(worker.run_step(step.clone(), &task).is_err());
        assert!(worker.run_step(step, &task).is_ok());
        assert_eq!(worker.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_worker_keeps_inner_async_path() {
        let slow = SlowWorker::new(MockAgentWorker::new(5), Duration::from_secs(3));
        let worker = FailingWorker::on_call(slow, 1);
        let task = Task::new("hello world", ChatMemoryBuffer::default().shared());
        let step = worker.initialize_step(&task).unwrap();

        assert!(worker.arun_step(step.clone(), &task).await.is_err());

        let started = tokio::time::Instant::now();
        let output = worker.astream_step(step, &task).await.unwrap();
        assert_eq!(output.output.response, "counter: 1");
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(worker.calls(), 2);
    }
}
