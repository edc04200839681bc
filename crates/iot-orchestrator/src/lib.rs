//! Flow orchestration
//!
//! This crate turns device events into flow runs:
//!
//! ```text
//! EventBus ──► FlowRouter ──► FlowExecutor ──► CommandDispatcher
//!                  │               │
//!                  │               └──► RunRecorder ──► FlowStore
//!                  └── reload() ◄── FlowManager
//! ```
//!
//! - [`FlowRouter`] holds the enabled-flow snapshot and starts one task per
//!   matching flow
//! - [`FlowExecutor`] walks a flow graph and produces a terminal [`FlowRun`]
//! - [`RunRecorder`] persists runs and broadcasts [`RunNotification`]s
//! - [`FlowManager`] validates and persists flow changes, then reloads the router
//! - [`CommandRegistry`] dispatches device commands with correlation and a deadline
//!
//! [`FlowRun`]: iot_flow::FlowRun

pub mod command;
pub mod executor;
pub mod manager;
pub mod recorder;
pub mod router;

pub use command::{
    CommandDispatcher, CommandError, CommandFuture, CommandHandler, CommandRegistry, CommandResult,
};
pub use executor::{ExecutionError, ExecutionResult, FlowExecutor};
pub use manager::{FlowManager, FlowUpdate, ManagerError, ManagerResult};
pub use recorder::{RunNotification, RunRecorder};
pub use router::{FlowRouter, FlowSnapshot, RouterError, RouterResult};
