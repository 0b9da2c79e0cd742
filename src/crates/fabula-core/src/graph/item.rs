//! Graph item variants and the polymorphic kind lattice
//!
//! Graph members are a closed set of tagged variants rather than an open
//! class hierarchy. [`ItemKind`] encodes the subtyping lattice explicitly:
//!
//! ```text
//!   Graph            Node             Edge
//!                      │               ├── ChoiceEdge
//!                      └── Subgraph    ├── Dependency
//!                                      └── Affordance
//! ```
//!
//! Handler selection uses [`ItemKind::distance_to`] the way a method
//! resolution order would: a handler registered for `Edge` also fires for a
//! `ChoiceEdge` caller, but at distance 1, so a `ChoiceEdge`-specific
//! handler wins the specificity tiebreak.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::{CoreError, Result};
use crate::graph::edge::Edge;
use crate::graph::node::Node;

/// Polymorphic kind of a graph participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// The owning arena itself (callers in graph-wide dispatch)
    Graph,
    /// A plain vertex
    Node,
    /// A vertex that owns an ordered member list
    Subgraph,
    /// A plain labeled connection
    Edge,
    /// A cursor-selectable connection, possibly auto-triggered
    ChoiceEdge,
    /// An open edge demanding a requirement at its source
    Dependency,
    /// An open edge publishing a requirement toward its destination
    Affordance,
}

impl ItemKind {
    /// Immediate supertype in the lattice, if any
    pub fn parent(self) -> Option<ItemKind> {
        match self {
            ItemKind::Subgraph => Some(ItemKind::Node),
            ItemKind::ChoiceEdge | ItemKind::Dependency | ItemKind::Affordance => {
                Some(ItemKind::Edge)
            }
            ItemKind::Graph | ItemKind::Node | ItemKind::Edge => None,
        }
    }

    /// True when `self` is `ancestor` or a subtype of it
    pub fn is_a(self, ancestor: ItemKind) -> bool {
        self.distance_to(ancestor).is_some()
    }

    /// Number of lattice steps from `self` up to `ancestor`.
    ///
    /// Returns `Some(0)` for the kind itself, `None` when `ancestor` is not
    /// on the parent chain.
    pub fn distance_to(self, ancestor: ItemKind) -> Option<u32> {
        let mut current = self;
        let mut distance = 0;
        loop {
            if current == ancestor {
                return Some(distance);
            }
            current = current.parent()?;
            distance += 1;
        }
    }

    /// True for the node side of the lattice
    pub fn is_node(self) -> bool {
        self.is_a(ItemKind::Node)
    }

    /// True for the edge side of the lattice
    pub fn is_edge(self) -> bool {
        self.is_a(ItemKind::Edge)
    }
}

/// A member of a graph: a vertex or a connection, tagged by kind.
///
/// The serialized form carries the variant name as `obj_cls`, so an
/// unstructured tree reads as a list of class-tagged records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "obj_cls")]
pub enum GraphItem {
    /// A plain vertex
    Node(Node),
    /// A vertex owning an ordered member list
    Subgraph(Node),
    /// A plain labeled connection
    Edge(Edge),
    /// A cursor-selectable connection
    ChoiceEdge(Edge),
    /// An open edge demanding a requirement at its source
    Dependency(Edge),
    /// An open edge publishing a requirement toward its destination
    Affordance(Edge),
}

impl GraphItem {
    /// The kind tag of this item
    pub fn item_kind(&self) -> ItemKind {
        match self {
            GraphItem::Node(_) => ItemKind::Node,
            GraphItem::Subgraph(_) => ItemKind::Subgraph,
            GraphItem::Edge(_) => ItemKind::Edge,
            GraphItem::ChoiceEdge(_) => ItemKind::ChoiceEdge,
            GraphItem::Dependency(_) => ItemKind::Dependency,
            GraphItem::Affordance(_) => ItemKind::Affordance,
        }
    }

    /// Borrow the vertex payload, if this is a node or subgraph
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            GraphItem::Node(n) | GraphItem::Subgraph(n) => Some(n),
            _ => None,
        }
    }

    /// Mutably borrow the vertex payload
    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            GraphItem::Node(n) | GraphItem::Subgraph(n) => Some(n),
            _ => None,
        }
    }

    /// Borrow the connection payload, if this is any edge variant
    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            GraphItem::Edge(e)
            | GraphItem::ChoiceEdge(e)
            | GraphItem::Dependency(e)
            | GraphItem::Affordance(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the connection payload
    pub fn as_edge_mut(&mut self) -> Option<&mut Edge> {
        match self {
            GraphItem::Edge(e)
            | GraphItem::ChoiceEdge(e)
            | GraphItem::Dependency(e)
            | GraphItem::Affordance(e) => Some(e),
            _ => None,
        }
    }

    /// Read a named attribute as a JSON value.
    ///
    /// Attribute names mirror the serialized field names; `None` means the
    /// attribute does not exist on this variant (or is unset).
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        let tree = serde_json::to_value(self).ok()?;
        match tree.get(name) {
            Some(v) if !v.is_null() => Some(v.clone()),
            _ => None,
        }
    }

    /// Write a named attribute from a JSON value.
    ///
    /// This is the single mutation funnel used by event replay: `UPDATE`
    /// events carry `(name, value)` pairs and apply through here.
    pub fn set_attr(&mut self, name: &str, value: Value) -> Result<()> {
        let mut tree = serde_json::to_value(&*self)?;
        let obj = tree
            .as_object_mut()
            .ok_or_else(|| CoreError::structure("graph item did not encode as an object"))?;
        if name == "uid" || name == "obj_cls" {
            return Err(CoreError::UnknownAttribute { name: name.into() });
        }
        obj.insert(name.to_string(), value);
        let rebuilt: GraphItem = serde_json::from_value(tree)
            .map_err(|e| CoreError::structure(format!("attribute '{name}' rejected: {e}")))?;
        *self = rebuilt;
        Ok(())
    }

    /// Remove a named attribute (reset to its default).
    pub fn clear_attr(&mut self, name: &str) -> Result<()> {
        let mut tree = serde_json::to_value(&*self)?;
        let obj = tree
            .as_object_mut()
            .ok_or_else(|| CoreError::structure("graph item did not encode as an object"))?;
        if name == "uid" || name == "obj_cls" {
            return Err(CoreError::UnknownAttribute { name: name.into() });
        }
        obj.remove(name);
        let rebuilt: GraphItem = serde_json::from_value(tree)
            .map_err(|e| CoreError::structure(format!("attribute '{name}' rejected: {e}")))?;
        *self = rebuilt;
        Ok(())
    }

    /// Encode to the class-tagged serializable tree
    pub fn unstructure(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode from a class-tagged tree
    pub fn structure(value: Value) -> Result<GraphItem> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::structure(format!("bad graph item: {e}")))
    }
}

impl Entity for GraphItem {
    fn uid(&self) -> Uuid {
        match self {
            GraphItem::Node(n) | GraphItem::Subgraph(n) => n.uid,
            GraphItem::Edge(e)
            | GraphItem::ChoiceEdge(e)
            | GraphItem::Dependency(e)
            | GraphItem::Affordance(e) => e.uid,
        }
    }

    fn label(&self) -> Option<&str> {
        match self {
            GraphItem::Node(n) | GraphItem::Subgraph(n) => n.label.as_deref(),
            GraphItem::Edge(e)
            | GraphItem::ChoiceEdge(e)
            | GraphItem::Dependency(e)
            | GraphItem::Affordance(e) => e.label.as_deref(),
        }
    }

    fn tags(&self) -> &BTreeSet<String> {
        match self {
            GraphItem::Node(n) | GraphItem::Subgraph(n) => &n.tags,
            GraphItem::Edge(e)
            | GraphItem::ChoiceEdge(e)
            | GraphItem::Dependency(e)
            | GraphItem::Affordance(e) => &e.tags,
        }
    }

    fn kind(&self) -> Option<ItemKind> {
        Some(self.item_kind())
    }

    fn attr(&self, name: &str) -> Option<Value> {
        self.get_attr(name)
    }
}
