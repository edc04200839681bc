//! Flow execution engine
//!
//! Walks a flow graph depth-first from every trigger node that matches the
//! triggering event. Within one run the walk is sequential: each outgoing
//! branch is executed to the end before the next one starts, so log entries
//! and device commands happen in a deterministic order.

use iot_core::DeviceEvent;
use iot_flow::{
    ActionConfig, ConditionConfig, ConditionEvaluator, Edge, EvalContext, Flow, FlowGraph,
    FlowRun, LogEntry, Node, NodeConfig, PredicateError, SYSTEM_NODE_ID,
};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::command::{CommandDispatcher, CommandError};

/// Errors that fail a run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("Invalid predicate on node {node_id}: {source}")]
    InvalidPredicate {
        node_id: String,
        #[source]
        source: PredicateError,
    },

    #[error("Action node {node_id} requires deviceId and actionName")]
    InvalidActionConfig { node_id: String },

    #[error("Action {action_name} on {device_id} failed: {source}")]
    ActionDispatch {
        device_id: String,
        action_name: String,
        #[source]
        source: CommandError,
    },

    #[error("Unknown node type '{kind}' on node {node_id}")]
    UnknownNodeKind { node_id: String, kind: String },
}

/// Result type for graph traversal
pub type ExecutionResult<T> = Result<T, ExecutionError>;

type VisitFuture<'a> = Pin<Box<dyn Future<Output = ExecutionResult<()>> + Send + 'a>>;

/// Executes flows against device events
pub struct FlowExecutor {
    dispatcher: Arc<dyn CommandDispatcher>,
    evaluator: ConditionEvaluator,
}

impl FlowExecutor {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Start a fresh run of `flow` for `event` and execute it to completion
    pub async fn run(&self, flow: &Flow, event: &DeviceEvent) -> FlowRun {
        self.execute(FlowRun::start(&flow.id), flow, event).await
    }

    /// Execute an already started run
    ///
    /// Always returns a terminal run; execution errors are recorded in the
    /// run log instead of being returned.
    #[instrument(skip_all, fields(flow_id = %flow.id, run_id = %run.id))]
    pub async fn execute(&self, mut run: FlowRun, flow: &Flow, event: &DeviceEvent) -> FlowRun {
        let ctx = EvalContext::for_event(event);
        let triggers: Vec<&Node> = flow.graph.matching_triggers(event).collect();

        if triggers.is_empty() {
            debug!("No trigger node matches event");
            run.push(LogEntry::warn(
                SYSTEM_NODE_ID,
                format!(
                    "No trigger matched event {} from {}",
                    event.event_name, event.device_id
                ),
            ));
            return run.complete();
        }

        for trigger in triggers {
            if let Err(e) = self.visit(&flow.graph, trigger, &ctx, &mut run).await {
                warn!(error = %e, "Flow execution failed");
                return run.fail(e.to_string());
            }
        }

        info!(entries = run.log.len(), "Flow execution completed");
        run.complete()
    }

    fn visit<'a>(
        &'a self,
        graph: &'a FlowGraph,
        node: &'a Node,
        ctx: &'a EvalContext,
        run: &'a mut FlowRun,
    ) -> VisitFuture<'a> {
        Box::pin(async move {
            trace!(node_id = %node.id, kind = node.kind_name(), "Visiting node");
            run.push(
                LogEntry::info(&node.id, format!("Executing {} node", node.kind_name()))
                    .with_data(node.data()),
            );

            let next: Vec<&Edge> = match &node.config {
                NodeConfig::Trigger(_) => graph.outgoing(&node.id).collect(),
                NodeConfig::Condition(condition) => {
                    let result = self.evaluate(node, condition, ctx, run)?;
                    let selected = graph
                        .outgoing(&node.id)
                        .find(|e| e.branch() == Some(result));
                    if selected.is_none() {
                        debug!(node_id = %node.id, result, "No matching branch, path ends");
                    }
                    selected.into_iter().collect()
                }
                NodeConfig::Action(action) => {
                    self.dispatch(node, action, run).await?;
                    graph.outgoing(&node.id).collect()
                }
                NodeConfig::Unknown { kind, .. } => {
                    run.push(LogEntry::error(
                        &node.id,
                        format!("Unknown node type: {kind}"),
                    ));
                    return Err(ExecutionError::UnknownNodeKind {
                        node_id: node.id.clone(),
                        kind: kind.clone(),
                    });
                }
            };

            for edge in next {
                match graph.node(&edge.target) {
                    Some(target) => self.visit(graph, target, ctx, run).await?,
                    None => run.push(LogEntry::warn(
                        &node.id,
                        format!("Edge {} points to missing node {}", edge.id, edge.target),
                    )),
                }
            }

            Ok(())
        })
    }

    fn evaluate(
        &self,
        node: &Node,
        condition: &ConditionConfig,
        ctx: &EvalContext,
        run: &mut FlowRun,
    ) -> ExecutionResult<bool> {
        let predicate = condition.predicate().map_err(|source| {
            run.push(LogEntry::error(
                &node.id,
                format!("Invalid condition: {source}"),
            ));
            ExecutionError::InvalidPredicate {
                node_id: node.id.clone(),
                source,
            }
        })?;

        let result = self.evaluator.evaluate(&predicate, ctx);
        debug!(node_id = %node.id, result, "Condition evaluated");
        run.push(
            LogEntry::info(&node.id, format!("Condition evaluated to {result}"))
                .with_data(json!({
                    "rule": condition.rule,
                    "variables": ctx.variables(),
                    "result": result,
                })),
        );
        Ok(result)
    }

    async fn dispatch(
        &self,
        node: &Node,
        action: &ActionConfig,
        run: &mut FlowRun,
    ) -> ExecutionResult<()> {
        if !action.is_complete() {
            run.push(LogEntry::error(
                &node.id,
                "Action node requires deviceId and actionName",
            ));
            return Err(ExecutionError::InvalidActionConfig {
                node_id: node.id.clone(),
            });
        }

        let outcome = self
            .dispatcher
            .send_command(&action.device_id, &action.action_name, &action.params)
            .await;

        match outcome {
            Ok(result) => {
                debug!(
                    node_id = %node.id,
                    device_id = %action.device_id,
                    action_name = %action.action_name,
                    "Action executed"
                );
                run.push(
                    LogEntry::info(
                        &node.id,
                        format!("Action {} executed successfully", action.action_name),
                    )
                    .with_data(json!({
                        "deviceId": action.device_id,
                        "actionName": action.action_name,
                        "params": action.params,
                        "result": result,
                    })),
                );
                Ok(())
            }
            Err(source) => {
                run.push(
                    LogEntry::error(
                        &node.id,
                        format!("Action {} failed: {source}", action.action_name),
                    )
                    .with_data(json!({
                        "deviceId": action.device_id,
                        "actionName": action.action_name,
                        "params": action.params,
                        "error": source.to_string(),
                    })),
                );
                Err(ExecutionError::ActionDispatch {
                    device_id: action.device_id.clone(),
                    action_name: action.action_name.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandResult;
    use async_trait::async_trait;
    use iot_flow::{LogLevel, RunStatus};
    use serde_json::{Map, Value};
    use std::sync::Mutex;

    /// Records every command and fails the ones listed in `failing`
    #[derive(Default)]
    struct FakeDevices {
        sent: Mutex<Vec<(String, String)>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl CommandDispatcher for FakeDevices {
        async fn send_command(
            &self,
            device_id: &str,
            action_name: &str,
            _params: &Map<String, Value>,
        ) -> CommandResult<Value> {
            self.sent
                .lock()
                .unwrap()
                .push((device_id.to_string(), action_name.to_string()));
            if self.failing.iter().any(|f| *f == action_name) {
                Err(CommandError::Timeout)
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn executor(failing: Vec<&'static str>) -> (FlowExecutor, Arc<FakeDevices>) {
        let devices = Arc::new(FakeDevices {
            failing,
            ..Default::default()
        });
        (FlowExecutor::new(devices.clone()), devices)
    }

    fn sent(devices: &FakeDevices) -> Vec<String> {
        devices
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, action)| action.clone())
            .collect()
    }

    fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        Flow::new("test", FlowGraph::new(nodes, edges))
    }

    fn ping() -> DeviceEvent {
        DeviceEvent::new("d1", "ping", json!({"level": 5}))
    }

    #[tokio::test]
    async fn test_every_node_logs_before_processing() {
        let (executor, _) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", Some("d1"), None),
                Node::action("a", "d2", "turnOn", json!({})),
            ],
            vec![Edge::new("e", "t", "a")],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.log[0].message, "Executing trigger node");
        assert_eq!(run.log[1].message, "Executing action node");
        assert_eq!(run.log[2].message, "Action turnOn executed successfully");
        assert_eq!(run.log[2].data.as_ref().unwrap()["deviceId"], "d2");
    }

    #[tokio::test]
    async fn test_action_fans_out_depth_first() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::action("a", "d", "first", json!({})),
                Node::action("b", "d", "left", json!({})),
                Node::action("b2", "d", "left-child", json!({})),
                Node::action("c", "d", "right", json!({})),
            ],
            vec![
                Edge::new("e1", "t", "a"),
                Edge::new("e2", "a", "b"),
                Edge::new("e3", "a", "c"),
                Edge::new("e4", "b", "b2"),
            ],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(sent(&devices), vec!["first", "left", "left-child", "right"]);
    }

    #[tokio::test]
    async fn test_condition_follows_one_branch() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::condition("c", json!({">": [{"var": "trigger.payload.level"}, 3]})),
                Node::action("yes", "d", "high", json!({})),
                Node::action("no", "d", "low", json!({})),
                Node::action("also-yes", "d", "high-again", json!({})),
            ],
            vec![
                Edge::new("e1", "t", "c"),
                Edge::labeled("e2", "c", "no", "false"),
                Edge::labeled("e3", "c", "yes", "true"),
                Edge::labeled("e4", "c", "also-yes", "yes"),
            ],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Completed);
        // Only the first matching edge is taken
        assert_eq!(sent(&devices), vec!["high"]);
    }

    #[tokio::test]
    async fn test_missing_branch_ends_silently() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::condition("c", json!({"==": [1, 2]})),
                Node::action("a", "d", "never", json!({})),
            ],
            vec![Edge::new("e1", "t", "c"), Edge::labeled("e2", "c", "a", "true")],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert!(sent(&devices).is_empty());
        assert!(run.log.iter().all(|e| e.level == LogLevel::Info));
        assert_eq!(run.log.last().unwrap().message, "Condition evaluated to false");
    }

    #[tokio::test]
    async fn test_condition_entry_records_rule_and_variables() {
        let (executor, _) = executor(vec![]);
        let rule = json!({">": [{"var": "trigger.payload.level"}, 3]});
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::condition("c", rule.clone()),
            ],
            vec![Edge::new("e1", "t", "c")],
        );

        let run = executor.run(&flow, &ping()).await;
        let entry = run
            .log
            .iter()
            .find(|e| e.node_id == "c" && e.message.starts_with("Condition evaluated"))
            .unwrap();
        let data = entry.data.as_ref().unwrap();
        assert_eq!(data["rule"], rule);
        assert_eq!(data["variables"]["trigger"]["deviceId"], "d1");
        assert_eq!(data["variables"]["trigger"]["payload"]["level"], 5);
        assert_eq!(data["result"], true);
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let (executor, devices) = executor(vec!["broken"]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::action("a", "d", "broken", json!({})),
                Node::action("after", "d", "after", json!({})),
                Node::action("sibling", "d", "sibling", json!({})),
            ],
            vec![
                Edge::new("e1", "t", "a"),
                Edge::new("e2", "t", "sibling"),
                Edge::new("e3", "a", "after"),
            ],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(sent(&devices), vec!["broken"]);
        assert!(!run.visited_nodes().contains(&"after"));
        assert!(!run.visited_nodes().contains(&"sibling"));

        let last = run.log.last().unwrap();
        assert_eq!(last.node_id, SYSTEM_NODE_ID);
        assert!(last.message.starts_with("Flow execution failed: "));
        assert!(run.error.as_deref().unwrap().contains("Command timeout"));
    }

    #[tokio::test]
    async fn test_invalid_action_config() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::action("a", "", "turnOn", json!({})),
            ],
            vec![Edge::new("e1", "t", "a")],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(sent(&devices).is_empty());
        assert_eq!(
            run.error.as_deref(),
            Some("Action node a requires deviceId and actionName")
        );
    }

    #[tokio::test]
    async fn test_invalid_predicate_fails_run() {
        let (executor, _) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::condition("c", json!({"~": [1, 2]})),
                Node::action("a", "d", "x", json!({})),
            ],
            vec![Edge::new("e1", "t", "c"), Edge::labeled("e2", "c", "a", "true")],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().starts_with("Invalid predicate on node c"));
    }

    #[tokio::test]
    async fn test_unknown_node_kind_fails_run() {
        let (executor, _) = executor(vec![]);
        let odd: Node =
            serde_json::from_value(json!({"id": "x", "type": "delay", "data": {}})).unwrap();
        let flow = flow(
            vec![Node::trigger("t", None, None), odd],
            vec![Edge::new("e1", "t", "x")],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error.as_deref(),
            Some("Unknown node type 'delay' on node x")
        );
    }

    #[tokio::test]
    async fn test_every_matching_trigger_starts_in_one_run() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t1", Some("d1"), None),
                Node::trigger("t2", None, Some("ping")),
                Node::trigger("t3", Some("other"), None),
                Node::action("a1", "d", "one", json!({})),
                Node::action("a2", "d", "two", json!({})),
                Node::action("a3", "d", "three", json!({})),
            ],
            vec![
                Edge::new("e1", "t1", "a1"),
                Edge::new("e2", "t2", "a2"),
                Edge::new("e3", "t3", "a3"),
            ],
        );

        let run = executor.run(&flow, &ping()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(sent(&devices), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_shared_descendant_runs_twice() {
        let (executor, devices) = executor(vec![]);
        let flow = flow(
            vec![
                Node::trigger("t", None, None),
                Node::action("a", "d", "a", json!({})),
                Node::action("b", "d", "b", json!({})),
                Node::action("join", "d", "join", json!({})),
            ],
            vec![
                Edge::new("e1", "t", "a"),
                Edge::new("e2", "t", "b"),
                Edge::new("e3", "a", "join"),
                Edge::new("e4", "b", "join"),
            ],
        );

        executor.run(&flow, &ping()).await;
        assert_eq!(sent(&devices), vec!["a", "join", "b", "join"]);
    }
}
