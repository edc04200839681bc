//! Condition evaluation
//!
//! Null handling: `null == null` is true and `null == x` is false for any
//! non-null `x`. Ordering comparisons are only defined between two numbers or
//! two strings; anything else, including `null`, compares false. There is no
//! string/number coercion.

use iot_core::DeviceEvent;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use tracing::{debug, trace};

use crate::predicate::{CompareOp, Predicate, PredicateResult};

/// Variable bindings for one run
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    variables: Map<String, Value>,
}

impl EvalContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a run started by `event`
    ///
    /// Binds `trigger.deviceId`, `trigger.eventName` and `trigger.payload`.
    pub fn for_event(event: &DeviceEvent) -> Self {
        Self::new().with_var(
            "trigger",
            json!({
                "deviceId": event.device_id,
                "eventName": event.event_name,
                "payload": event.payload,
            }),
        )
    }

    /// Builder form of [`set_var`](Self::set_var)
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_var(name, value);
        self
    }

    /// Bind a top-level variable
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// All bindings
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Resolve a dotted path, returning `null` if any segment is absent
    ///
    /// Numeric segments index into arrays. The empty path yields every binding.
    pub fn resolve(&self, path: &str) -> Value {
        if path.is_empty() {
            return Value::Object(self.variables.clone());
        }

        let mut segments = path.split('.');
        let Some(mut current) = segments.next().and_then(|first| self.variables.get(first)) else {
            return Value::Null;
        };

        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }

        current.clone()
    }
}

/// Truthiness used by logical operators and the final condition result
///
/// `false`, `null`, `0`, `""` and `[]` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(op: CompareOp, a: &Value, b: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(a, b),
        CompareOp::Ne => !loose_eq(a, b),
        CompareOp::Gt => ordering(a, b) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(a, b), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering(a, b) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(a, b), Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Stateless evaluator for condition predicates
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a parsed predicate to a boolean
    pub fn evaluate(&self, predicate: &Predicate, ctx: &EvalContext) -> bool {
        let value = self.value(predicate, ctx);
        trace!(result = %value, "Evaluated predicate");
        is_truthy(&value)
    }

    /// Parse and evaluate a rule in its JSON form
    pub fn evaluate_rule(&self, rule: &Value, ctx: &EvalContext) -> PredicateResult<bool> {
        let predicate = Predicate::parse(rule)?;
        let result = self.evaluate(&predicate, ctx);
        debug!(rule = %rule, result, "Condition evaluated");
        Ok(result)
    }

    fn value(&self, predicate: &Predicate, ctx: &EvalContext) -> Value {
        match predicate {
            Predicate::Literal(v) => v.clone(),
            Predicate::Var { path, default } => {
                let resolved = ctx.resolve(path);
                match (resolved, default) {
                    (Value::Null, Some(fallback)) => fallback.clone(),
                    (value, _) => value,
                }
            }
            Predicate::Compare(op, operands) => {
                let values: Vec<Value> = operands.iter().map(|p| self.value(p, ctx)).collect();
                // Three operands chain: a < b < c
                let holds = values.windows(2).all(|pair| compare(*op, &pair[0], &pair[1]));
                Value::Bool(holds)
            }
            Predicate::And(items) => Value::Bool(items.iter().all(|p| self.evaluate(p, ctx))),
            Predicate::Or(items) => Value::Bool(items.iter().any(|p| self.evaluate(p, ctx))),
            Predicate::Not(inner) => Value::Bool(!self.evaluate(inner, ctx)),
            Predicate::Truthy(inner) => Value::Bool(self.evaluate(inner, ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredicateError;

    fn ctx() -> EvalContext {
        EvalContext::for_event(&DeviceEvent::new(
            "sim-sensor-temp-001",
            "temperature",
            json!({"temperature": 30, "history": [21, 25.5], "label": "warm"}),
        ))
    }

    fn eval(rule: Value) -> bool {
        ConditionEvaluator::new().evaluate_rule(&rule, &ctx()).unwrap()
    }

    #[test]
    fn test_resolve_paths() {
        let ctx = ctx();
        assert_eq!(ctx.resolve("trigger.deviceId"), json!("sim-sensor-temp-001"));
        assert_eq!(ctx.resolve("trigger.payload.temperature"), json!(30));
        assert_eq!(ctx.resolve("trigger.payload.history.1"), json!(25.5));
        assert_eq!(ctx.resolve("trigger.payload.missing.deeper"), Value::Null);
        assert_eq!(ctx.resolve("nope"), Value::Null);
        assert!(ctx.resolve("").get("trigger").is_some());
    }

    #[test]
    fn test_comparisons() {
        assert!(eval(json!({">": [{"var": "trigger.payload.temperature"}, 28]})));
        assert!(!eval(json!({"<": [{"var": "trigger.payload.temperature"}, 28]})));
        assert!(eval(json!({">=": [{"var": "trigger.payload.temperature"}, 30]})));
        assert!(eval(json!({"<=": [25, {"var": "trigger.payload.temperature"}, 35]})));
        assert!(!eval(json!({"<": [31, {"var": "trigger.payload.temperature"}, 35]})));
        assert!(eval(json!({"==": [{"var": "trigger.payload.label"}, "warm"]})));
        assert!(eval(json!({"<": ["apple", "banana"]})));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert!(eval(json!({"==": [1, 1.0]})));
        assert!(!eval(json!({"==": ["1", 1]})));
    }

    #[test]
    fn test_null_convention() {
        assert!(eval(json!({"==": [{"var": "trigger.payload.missing"}, null]})));
        assert!(!eval(json!({"==": [{"var": "trigger.payload.missing"}, 0]})));
        assert!(eval(json!({"!=": [{"var": "trigger.payload.missing"}, 0]})));
        assert!(!eval(json!({">": [{"var": "trigger.payload.missing"}, 0]})));
        assert!(!eval(json!({"<=": [{"var": "trigger.payload.missing"}, 0]})));
        assert!(!eval(json!({">": ["10", 9]})));
    }

    #[test]
    fn test_var_default() {
        assert!(eval(json!({"==": [{"var": ["trigger.payload.missing", 5]}, 5]})));
        assert!(eval(json!({"==": [{"var": ["trigger.payload.temperature", 5]}, 30]})));
    }

    #[test]
    fn test_logic_operators() {
        assert!(eval(json!({"and": [true, {">": [2, 1]}]})));
        assert!(!eval(json!({"and": [true, 0]})));
        assert!(eval(json!({"or": [false, "x"]})));
        assert!(eval(json!({"!": {"var": "trigger.payload.missing"}})));
        assert!(eval(json!({"not": [false]})));
        assert!(eval(json!({"!!": [{"var": "trigger.payload.history"}]})));
        assert!(!eval(json!({"!!": [[]]})));
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(false), json!(null), json!(0), json!(""), json!([])] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(-1), json!("0"), json!([0]), json!({})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn test_malformed_rule_is_an_error() {
        let evaluator = ConditionEvaluator::new();
        assert_eq!(
            evaluator.evaluate_rule(&json!({"matches": ["a", "b"]}), &ctx()),
            Err(PredicateError::UnknownOperator("matches".to_string()))
        );
    }
}
