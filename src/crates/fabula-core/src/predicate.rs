//! Edge availability predicates
//!
//! Predicates are a small closed expression language rather than arbitrary
//! callables: they serialize with the edge that carries them, and their
//! evaluation is a pure function of the namespace, which keeps replay
//! deterministic. Compose with [`EdgePredicate::AllOf`] / [`AnyOf`] /
//! [`Not`] for anything beyond a single test.
//!
//! [`AnyOf`]: EdgePredicate::AnyOf
//! [`Not`]: EdgePredicate::Not

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ns::Namespace;

/// A deterministic condition over the current namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgePredicate {
    /// Always available
    Always,
    /// Never available
    Never,
    /// The named key is present and truthy
    Truthy(String),
    /// The named key equals the given JSON value
    Equals {
        /// Namespace key to test
        key: String,
        /// Expected value
        value: Value,
    },
    /// Negation
    Not(Box<EdgePredicate>),
    /// Conjunction; empty list is true
    AllOf(Vec<EdgePredicate>),
    /// Disjunction; empty list is false
    AnyOf(Vec<EdgePredicate>),
}

impl EdgePredicate {
    /// Evaluate against a namespace
    pub fn evaluate(&self, ns: &Namespace) -> bool {
        match self {
            EdgePredicate::Always => true,
            EdgePredicate::Never => false,
            EdgePredicate::Truthy(key) => ns.truthy(key),
            EdgePredicate::Equals { key, value } => ns
                .get(key)
                .and_then(|v| v.as_value())
                .map(|v| v == value)
                .unwrap_or(false),
            EdgePredicate::Not(inner) => !inner.evaluate(ns),
            EdgePredicate::AllOf(parts) => parts.iter().all(|p| p.evaluate(ns)),
            EdgePredicate::AnyOf(parts) => parts.iter().any(|p| p.evaluate(ns)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns::{NsLayer, NsValue};
    use serde_json::json;

    fn ns_with(key: &str, value: Value) -> Namespace {
        let mut layer = NsLayer::new();
        layer.insert(key.to_string(), NsValue::Value(value));
        let mut ns = Namespace::new();
        ns.push_layer(layer);
        ns
    }

    #[test]
    fn equals_and_truthy() {
        let ns = ns_with("mood", json!("grim"));
        assert!(EdgePredicate::Truthy("mood".into()).evaluate(&ns));
        assert!(EdgePredicate::Equals {
            key: "mood".into(),
            value: json!("grim")
        }
        .evaluate(&ns));
        assert!(!EdgePredicate::Equals {
            key: "mood".into(),
            value: json!("bright")
        }
        .evaluate(&ns));
    }

    #[test]
    fn composition() {
        let ns = ns_with("hp", json!(3));
        let alive = EdgePredicate::Truthy("hp".into());
        let dead = EdgePredicate::Not(Box::new(alive.clone()));
        assert!(alive.evaluate(&ns));
        assert!(!dead.evaluate(&ns));
        assert!(EdgePredicate::AllOf(vec![]).evaluate(&ns));
        assert!(!EdgePredicate::AnyOf(vec![]).evaluate(&ns));
        assert!(EdgePredicate::AnyOf(vec![dead, alive]).evaluate(&ns));
    }

    #[test]
    fn predicates_serialize_with_edges() {
        let p = EdgePredicate::AllOf(vec![
            EdgePredicate::Truthy("lantern".into()),
            EdgePredicate::Not(Box::new(EdgePredicate::Truthy("afraid".into()))),
        ]);
        let tree = serde_json::to_value(&p).unwrap();
        let back: EdgePredicate = serde_json::from_value(tree).unwrap();
        assert_eq!(back, p);
    }
}
