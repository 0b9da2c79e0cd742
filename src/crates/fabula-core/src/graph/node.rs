//! Vertex records: plain nodes and subgraph containers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A vertex in the story graph.
///
/// Nodes carry `locals` — the string-keyed values that project into the
/// namespace when the cursor stands on or under them — and may belong to at
/// most one parent subgraph. The same record backs subgraphs, which
/// additionally own an ordered `members` list; the distinction lives in the
/// enclosing [`GraphItem`](crate::graph::GraphItem) variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity
    pub uid: Uuid,

    /// Optional short label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tag set
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Containing subgraph, if any (uid, never a live reference)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// String-keyed local values, visible in the namespace at this node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locals: BTreeMap<String, Value>,

    /// Ordered member uids; only meaningful for subgraphs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Uuid>,
}

impl Node {
    /// Create a node with a fresh uid
    pub fn new(label: Option<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label,
            tags: BTreeSet::new(),
            parent_id: None,
            locals: BTreeMap::new(),
            members: Vec::new(),
        }
    }

    /// Create a node with an explicit uid (used by structuring and cloning)
    pub fn with_uid(uid: Uuid, label: Option<String>) -> Self {
        Self {
            uid,
            ..Self::new(label)
        }
    }

    /// Builder: add a tag
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: set a local value
    pub fn with_local(mut self, key: impl Into<String>, value: Value) -> Self {
        self.locals.insert(key.into(), value);
        self
    }

    /// Read a local value
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_tags_and_locals() {
        let n = Node::new(Some("camp".into()))
            .tagged("location")
            .with_local("lit", json!(true));
        assert!(n.tags.contains("location"));
        assert_eq!(n.local("lit"), Some(&json!(true)));
    }

    #[test]
    fn empty_collections_are_omitted_from_serialization() {
        let n = Node::new(Some("x".into()));
        let tree = serde_json::to_value(&n).unwrap();
        assert!(tree.get("tags").is_none());
        assert!(tree.get("locals").is_none());
        assert!(tree.get("members").is_none());
    }
}
