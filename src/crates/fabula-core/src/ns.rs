//! Layered namespaces
//!
//! A [`Namespace`] is a chain of string-keyed layers, nearest first. Lookups
//! walk outward and the nearest layer shadows the rest — node locals shadow
//! subgraph locals shadow graph locals shadow domain defaults. The frame
//! contributes its own nearest layer (`cursor`, `epoch`, `phase`,
//! `rand_seed`) on top of whatever the scope composed.
//!
//! Values are either plain JSON or a reference to a graph node, so that
//! satisfied dependencies can project their providers (`{dep_label: node}`)
//! without copying node state into the namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single namespace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NsValue {
    /// A plain JSON value
    Value(Value),
    /// A reference to a graph node by uid
    NodeRef(Uuid),
}

impl NsValue {
    /// Wrap a node reference
    pub fn node(uid: Uuid) -> Self {
        NsValue::NodeRef(uid)
    }

    /// Truthiness: node refs are always truthy; JSON follows the usual
    /// rules (null, false, 0, empty string/array/object are falsy).
    pub fn is_truthy(&self) -> bool {
        match self {
            NsValue::NodeRef(_) => true,
            NsValue::Value(v) => match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
        }
    }

    /// The referenced node uid, if this entry is a node reference
    pub fn as_node(&self) -> Option<Uuid> {
        match self {
            NsValue::NodeRef(uid) => Some(*uid),
            NsValue::Value(_) => None,
        }
    }

    /// The JSON payload, if this entry is a plain value
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            NsValue::Value(v) => Some(v),
            NsValue::NodeRef(_) => None,
        }
    }
}

impl From<Value> for NsValue {
    fn from(v: Value) -> Self {
        NsValue::Value(v)
    }
}

impl From<bool> for NsValue {
    fn from(v: bool) -> Self {
        NsValue::Value(Value::Bool(v))
    }
}

impl From<&str> for NsValue {
    fn from(v: &str) -> Self {
        NsValue::Value(Value::String(v.to_string()))
    }
}

impl From<u64> for NsValue {
    fn from(v: u64) -> Self {
        NsValue::Value(Value::from(v))
    }
}

/// One namespace layer
pub type NsLayer = BTreeMap<String, NsValue>;

/// A chain of layers, nearest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    layers: Vec<NsLayer>,
}

impl Namespace {
    /// Empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer *farther* than everything already present
    pub fn push_layer(&mut self, layer: NsLayer) {
        self.layers.push(layer);
    }

    /// Return a copy with `layer` as the new nearest layer
    pub fn new_child(&self, layer: NsLayer) -> Namespace {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(layer);
        layers.extend(self.layers.iter().cloned());
        Namespace { layers }
    }

    /// Nearest-wins lookup
    pub fn get(&self, key: &str) -> Option<&NsValue> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    /// True when any layer binds `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Truthiness of a key; absent keys are falsy
    pub fn truthy(&self, key: &str) -> bool {
        self.get(key).map(NsValue::is_truthy).unwrap_or(false)
    }

    /// Node reference lookup
    pub fn get_node(&self, key: &str) -> Option<Uuid> {
        self.get(key).and_then(NsValue::as_node)
    }

    /// Flatten into a single layer, nearest entries winning
    pub fn merged(&self) -> NsLayer {
        let mut out = NsLayer::new();
        for layer in self.layers.iter().rev() {
            for (k, v) in layer {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Number of layers
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl FromIterator<NsLayer> for Namespace {
    fn from_iter<I: IntoIterator<Item = NsLayer>>(iter: I) -> Self {
        Namespace {
            layers: iter.into_iter().collect(),
        }
    }
}
