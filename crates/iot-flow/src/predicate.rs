//! Predicate AST for condition nodes
//!
//! Rules are written in a JSON-logic-like form and parsed into a closed set
//! of operators before evaluation:
//!
//! ```json
//! {"and": [{">": [{"var": "trigger.payload.temperature"}, 28]}, {"!": {"var": "muted"}}]}
//! ```

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised for malformed predicate trees
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredicateError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("operator '{op}' expects {expected} operand(s), got {found}")]
    Arity {
        op: String,
        expected: &'static str,
        found: usize,
    },

    #[error("invalid predicate shape: {0}")]
    InvalidShape(String),

    #[error("invalid var reference: {0}")]
    InvalidVar(String),

    #[error("condition has no rule")]
    Missing,
}

/// Result type for predicate parsing
pub type PredicateResult<T> = Result<T, PredicateError>;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    /// Operator symbol in rule form
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    fn from_symbol(op: &str) -> Option<Self> {
        Some(match op {
            "==" | "===" => CompareOp::Eq,
            "!=" | "!==" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            _ => return None,
        })
    }

    /// `<` and `<=` also take three operands (`a < b < c`)
    fn accepts(&self, operands: usize) -> bool {
        match self {
            CompareOp::Lt | CompareOp::Le => operands == 2 || operands == 3,
            _ => operands == 2,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            CompareOp::Lt | CompareOp::Le => "2 or 3",
            _ => "2",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A constant value
    Literal(Value),

    /// Variable lookup by dotted path, with an optional fallback
    Var {
        path: String,
        default: Option<Value>,
    },

    /// Comparison over two (or, for `<`/`<=`, three) operands
    Compare(CompareOp, Vec<Predicate>),

    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),

    /// Double negation (`!!`), casts the operand to a boolean
    Truthy(Box<Predicate>),
}

impl Predicate {
    /// Parse a rule in its JSON form
    pub fn parse(rule: &Value) -> PredicateResult<Self> {
        let Value::Object(map) = rule else {
            return Ok(Predicate::Literal(rule.clone()));
        };

        let mut entries = map.iter();
        let (op, raw_args) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(PredicateError::InvalidShape(
                    "operator object is empty".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(PredicateError::InvalidShape(format!(
                    "operator object must have exactly one key, found {}",
                    map.len()
                )))
            }
        };

        if op == "var" {
            return Self::parse_var(raw_args);
        }

        // A lone operand may be written without the surrounding array
        let args: Vec<&Value> = match raw_args {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        if let Some(cmp) = CompareOp::from_symbol(op) {
            if !cmp.accepts(args.len()) {
                return Err(PredicateError::Arity {
                    op: op.clone(),
                    expected: cmp.expected(),
                    found: args.len(),
                });
            }
            return Ok(Predicate::Compare(cmp, Self::parse_all(&args)?));
        }

        match op.as_str() {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(PredicateError::Arity {
                        op: op.clone(),
                        expected: "at least 1",
                        found: 0,
                    });
                }
                let operands = Self::parse_all(&args)?;
                Ok(if op == "and" {
                    Predicate::And(operands)
                } else {
                    Predicate::Or(operands)
                })
            }
            "!" | "not" | "!!" => {
                let [operand] = args.as_slice() else {
                    return Err(PredicateError::Arity {
                        op: op.clone(),
                        expected: "1",
                        found: args.len(),
                    });
                };
                let inner = Box::new(Self::parse(operand)?);
                Ok(if op == "!!" {
                    Predicate::Truthy(inner)
                } else {
                    Predicate::Not(inner)
                })
            }
            other => Err(PredicateError::UnknownOperator(other.to_string())),
        }
    }

    fn parse_all(args: &[&Value]) -> PredicateResult<Vec<Predicate>> {
        args.iter().map(|arg| Self::parse(arg)).collect()
    }

    fn parse_var(arg: &Value) -> PredicateResult<Self> {
        let (path, default) = match arg {
            Value::Array(items) => match items.as_slice() {
                [] => (Value::String(String::new()), None),
                [path] => (path.clone(), None),
                [path, default] => (path.clone(), Some(default.clone())),
                _ => {
                    return Err(PredicateError::Arity {
                        op: "var".to_string(),
                        expected: "1 or 2",
                        found: items.len(),
                    })
                }
            },
            other => (other.clone(), None),
        };

        let path = match path {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            other => return Err(PredicateError::InvalidVar(other.to_string())),
        };

        Ok(Predicate::Var { path, default })
    }

    /// Convenience constructor for a var leaf
    pub fn var(path: impl Into<String>) -> Self {
        Predicate::Var {
            path: path.into(),
            default: None,
        }
    }
}
