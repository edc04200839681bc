//! Flow definitions
//!
//! This crate provides the data model of automation flows and everything that
//! can be decided about a flow without talking to a device.
//!
//! # Architecture
//!
//! ```text
//! FLOW = TRIGGER NODES → (CONDITION NODES) → ACTION NODES
//! ```
//!
//! - **Triggers**: Entry points matched against inbound device events
//! - **Conditions**: Predicates over run variables selecting a labelled branch
//! - **Actions**: Device commands (dispatched by iot-orchestrator)
//!
//! # Key Types
//!
//! - [`FlowGraph`] - Nodes and edges of a flow
//! - [`Flow`] - A persisted, enable-able flow definition
//! - [`validate`] - Static checks run at create/update time
//! - [`Predicate`] / [`ConditionEvaluator`] - Condition language
//! - [`FlowRun`] - Record of one execution

pub mod eval;
pub mod model;
pub mod predicate;
pub mod run;
pub mod validate;

pub use eval::{is_truthy, ConditionEvaluator, EvalContext};
pub use model::{
    ActionConfig, ConditionConfig, Edge, Flow, FlowGraph, Node, NodeConfig, NodeKind, Position,
    TriggerConfig,
};
pub use predicate::{CompareOp, Predicate, PredicateError, PredicateResult};
pub use run::{FlowRun, LogEntry, LogLevel, RunStatus, SYSTEM_NODE_ID};
pub use validate::{lint, validate, ValidationError, ValidationResult, ValidationWarning};
