//! # agent-runner
//!
//! Resumable task/step execution core for agents. A pluggable worker decides
//! what each step does; the runners own task bookkeeping and decide which
//! steps run next.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AgentRunner / ParallelAgentRunner        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  TaskState  │  │   Memory    │  │   AgentWorker       │  │
//! │  │  Registry   │──│  (shared)   │──│   (Strategy)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `AgentRunner` follows a single thread of steps. `ParallelAgentRunner`
//! treats every successor as a branch and executes the pending frontier in
//! waves, concurrently on the async path.

pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod runner;
pub mod state;
pub mod task;
pub mod testing;
pub mod worker;

pub use config::RunnerConfig;
pub use error::{AgentError, Result};
pub use memory::{ChatMemoryBuffer, Memory, SharedMemory};
pub use message::{Message, Role};
pub use runner::{AgentRunner, ParallelAgentRunner, RunnerBuilder, RunnerCore, TaskRunner};
pub use state::{FrontierPolicy, TaskRecord, TaskState};
pub use task::{AgentResponse, ExtraState, StateMap, StepId, Task, TaskId, TaskStep, TaskStepOutput};
pub use worker::AgentWorker;
