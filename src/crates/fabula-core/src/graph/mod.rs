//! The graph arena: nodes, edges, and subgraphs owned by uid
//!
//! Nodes reference parents and edges reference both endpoints, so naive
//! ownership would be cyclic. The [`Graph`] avoids that by owning every
//! item in an arena keyed by uid; items store uids only and live references
//! are resolved on demand through [`Graph::get`].
//!
//! # Invariants
//!
//! - **Membership**: every item added is findable by uid.
//! - **Containment tree**: parent-pointer chains are acyclic; membership
//!   mutations that would close a cycle are rejected.
//! - **Edge integrity**: an edge may hold unresolved endpoints during
//!   construction; it only becomes an error when traversed.
//! - **Label uniqueness** is *not* enforced; [`Graph::get_by_label`] raises
//!   on ambiguity while [`Graph::find_one`] is always safe.
//!
//! # Example
//!
//! ```rust
//! use fabula_core::graph::Graph;
//!
//! let mut g = Graph::new(Some("demo".into()));
//! let a = g.add_node("A").unwrap();
//! let b = g.add_node("B").unwrap();
//! let e = g.add_edge(a, b).unwrap();
//! assert!(g.get(&e).is_some());
//! let scene = g.add_subgraph("scene", &[a, b]).unwrap();
//! assert_eq!(g.path(&a).unwrap(), "scene.A");
//! ```

mod edge;
mod item;
mod node;

pub use edge::{Edge, TriggerPhase};
pub use item::{GraphItem, ItemKind};
pub use node::Node;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use uuid::Uuid;

use crate::criteria::Criteria;
use crate::entity::Entity;
use crate::error::{CoreError, Result};
use crate::hashing;

/// A registry of graph items with containment and connection structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphRepr", into = "GraphRepr")]
pub struct Graph {
    /// Stable identity of the arena itself
    pub uid: Uuid,
    /// Optional label
    pub label: Option<String>,
    /// Tag set
    pub tags: BTreeSet<String>,
    /// Root-level locals, the outermost namespace layer of any scope chain
    pub locals: BTreeMap<String, Value>,
    items: BTreeMap<Uuid, GraphItem>,
}

impl Graph {
    /// Empty graph with a fresh uid
    pub fn new(label: Option<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label,
            tags: BTreeSet::new(),
            locals: BTreeMap::new(),
            items: BTreeMap::new(),
        }
    }

    /// Empty graph with an explicit uid (structuring, tests)
    pub fn with_uid(uid: Uuid, label: Option<String>) -> Self {
        Self {
            uid,
            ..Self::new(label)
        }
    }

    // ------------------------------------------------------------------
    // Registry operations

    /// Insert an item, rejecting a uid already bound to a *different* item.
    ///
    /// Re-adding an identical item is a no-op, so idempotent replays do not
    /// trip the duplicate check.
    pub fn add(&mut self, item: GraphItem) -> Result<Uuid> {
        let uid = item.uid();
        if let Some(existing) = self.items.get(&uid) {
            if *existing == item {
                return Ok(uid);
            }
            return Err(CoreError::DuplicateIdentity { uid });
        }
        trace!(uid = %uid, kind = ?item.item_kind(), "graph add");
        self.items.insert(uid, item);
        Ok(uid)
    }

    /// Look up by uid
    pub fn get(&self, uid: &Uuid) -> Option<&GraphItem> {
        self.items.get(uid)
    }

    /// Mutable lookup by uid
    pub fn get_mut(&mut self, uid: &Uuid) -> Option<&mut GraphItem> {
        self.items.get_mut(uid)
    }

    /// Explicit unique-label lookup.
    ///
    /// Returns `Ok(None)` when nothing carries the label and
    /// [`CoreError::AmbiguousLabel`] when more than one item does.
    pub fn get_by_label(&self, label: &str) -> Result<Option<&GraphItem>> {
        let mut matches = self
            .items
            .values()
            .filter(|item| item.label() == Some(label));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(one), None) => Ok(Some(one)),
            (Some(_), Some(_)) => Err(CoreError::AmbiguousLabel {
                label: label.to_string(),
                count: self
                    .items
                    .values()
                    .filter(|item| item.label() == Some(label))
                    .count(),
            }),
        }
    }

    /// Lazy criteria search over all items
    pub fn find_all<'a>(
        &'a self,
        criteria: &'a Criteria,
    ) -> impl Iterator<Item = &'a GraphItem> + 'a {
        self.items
            .values()
            .filter(move |item| criteria.matches(*item as &dyn Entity))
    }

    /// First criteria match, if any. Never raises on ambiguity.
    pub fn find_one<'a>(&'a self, criteria: &'a Criteria) -> Option<&'a GraphItem> {
        self.find_all(criteria).next()
    }

    /// Remove an item, detaching it from its parent subgraph and orphaning
    /// its members. Edges keep their endpoint uids; dangling endpoints are
    /// allowed and only error if traversed.
    pub fn remove(&mut self, uid: &Uuid) -> Option<GraphItem> {
        let removed = self.items.remove(uid)?;
        if let Some(node) = removed.as_node() {
            if let Some(parent_id) = node.parent_id {
                if let Some(parent) = self.items.get_mut(&parent_id).and_then(GraphItem::as_node_mut)
                {
                    parent.members.retain(|m| m != uid);
                }
            }
            for member in &node.members {
                if let Some(child) = self.items.get_mut(member).and_then(GraphItem::as_node_mut) {
                    child.parent_id = None;
                }
            }
        }
        trace!(uid = %uid, "graph remove");
        Some(removed)
    }

    /// True when the uid resolves
    pub fn contains(&self, uid: &Uuid) -> bool {
        self.items.contains_key(uid)
    }

    /// All items in uid order
    pub fn items(&self) -> impl Iterator<Item = &GraphItem> {
        self.items.values()
    }

    /// All vertices (nodes and subgraphs)
    pub fn nodes(&self) -> impl Iterator<Item = &GraphItem> {
        self.items
            .values()
            .filter(|item| item.item_kind().is_node())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // ------------------------------------------------------------------
    // Factories

    /// Add a plain labeled node
    pub fn add_node(&mut self, label: impl Into<String>) -> Result<Uuid> {
        self.add(GraphItem::Node(Node::new(Some(label.into()))))
    }

    /// Add a prepared node record
    pub fn add_node_item(&mut self, node: Node) -> Result<Uuid> {
        self.add(GraphItem::Node(node))
    }

    /// Add a plain edge between two vertices
    pub fn add_edge(&mut self, source: Uuid, destination: Uuid) -> Result<Uuid> {
        self.add(GraphItem::Edge(Edge::new(Some(source), Some(destination))))
    }

    /// Add a selectable choice edge between two vertices
    pub fn add_choice_edge(&mut self, source: Uuid, destination: Uuid) -> Result<Uuid> {
        self.add(GraphItem::ChoiceEdge(Edge::new(
            Some(source),
            Some(destination),
        )))
    }

    /// Add a subgraph and take ownership of `members` in order
    pub fn add_subgraph(&mut self, label: impl Into<String>, members: &[Uuid]) -> Result<Uuid> {
        let uid = self.add(GraphItem::Subgraph(Node::new(Some(label.into()))))?;
        for member in members {
            self.add_member(uid, *member)?;
        }
        Ok(uid)
    }

    // ------------------------------------------------------------------
    // Containment

    /// Parent uid of a vertex, if any
    pub fn parent_of(&self, uid: &Uuid) -> Option<Uuid> {
        self.get(uid)?.as_node()?.parent_id
    }

    /// Containment ancestors from the immediate parent outward.
    ///
    /// Cycle-guarded: a corrupted parent chain terminates rather than
    /// looping.
    pub fn ancestors(&self, uid: &Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.parent_of(uid);
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = self.parent_of(&parent);
        }
        chain
    }

    /// The vertex itself followed by its ancestors — the scope chain used
    /// for namespace composition and anchored lookups
    pub fn scope_chain(&self, uid: &Uuid) -> Vec<Uuid> {
        let mut chain = vec![*uid];
        chain.extend(self.ancestors(uid));
        chain
    }

    /// Attach `child` as the last member of subgraph `parent`.
    ///
    /// Detaches the child from any previous parent first. Rejects
    /// memberships that would make the containment tree cyclic.
    pub fn add_member(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        match self.get(&parent) {
            Some(GraphItem::Subgraph(_)) => {}
            Some(_) => {
                return Err(CoreError::structure(format!(
                    "{parent} is not a subgraph"
                )))
            }
            None => return Err(CoreError::not_found(format!("subgraph {parent}"))),
        }
        if !self.contains(&child) {
            return Err(CoreError::not_found(format!("member {child}")));
        }
        // Walking up from the parent must never reach the child.
        if parent == child || self.ancestors(&parent).contains(&child) {
            return Err(CoreError::CycleDetected { uid: child });
        }

        if let Some(previous) = self.parent_of(&child) {
            if let Some(prev_node) = self.items.get_mut(&previous).and_then(GraphItem::as_node_mut)
            {
                prev_node.members.retain(|m| *m != child);
            }
        }
        if let Some(child_node) = self.items.get_mut(&child).and_then(GraphItem::as_node_mut) {
            child_node.parent_id = Some(parent);
        } else {
            return Err(CoreError::structure(format!("{child} is not a vertex")));
        }
        if let Some(parent_node) = self.items.get_mut(&parent).and_then(GraphItem::as_node_mut) {
            if !parent_node.members.contains(&child) {
                parent_node.members.push(child);
            }
        }
        Ok(())
    }

    /// Dotted ancestor path, root first: `root.child.node`
    pub fn path(&self, uid: &Uuid) -> Result<String> {
        let item = self
            .get(uid)
            .ok_or_else(|| CoreError::not_found(format!("item {uid}")))?;
        let mut parts = vec![item.display_name()];
        for ancestor in self.ancestors(uid) {
            if let Some(node) = self.get(&ancestor) {
                parts.push(node.display_name());
            }
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    // ------------------------------------------------------------------
    // Connection queries

    /// All edges whose source is `uid`
    pub fn edges_out<'a>(&'a self, uid: &'a Uuid) -> impl Iterator<Item = &'a GraphItem> + 'a {
        self.items.values().filter(move |item| {
            item.as_edge()
                .map(|e| e.source_id == Some(*uid))
                .unwrap_or(false)
        })
    }

    /// All edges whose destination is `uid`
    pub fn edges_in<'a>(&'a self, uid: &'a Uuid) -> impl Iterator<Item = &'a GraphItem> + 'a {
        self.items.values().filter(move |item| {
            item.as_edge()
                .map(|e| e.destination_id == Some(*uid))
                .unwrap_or(false)
        })
    }

    /// Dependency edges sourced at `uid`
    pub fn dependencies_from<'a>(
        &'a self,
        uid: &'a Uuid,
    ) -> impl Iterator<Item = &'a GraphItem> + 'a {
        self.edges_out(uid)
            .filter(|item| item.item_kind() == ItemKind::Dependency)
    }

    /// Affordance edges terminating at `uid`
    pub fn affordances_into<'a>(
        &'a self,
        uid: &'a Uuid,
    ) -> impl Iterator<Item = &'a GraphItem> + 'a {
        self.edges_in(uid)
            .filter(|item| item.item_kind() == ItemKind::Affordance)
    }

    /// Choice edges from `uid` in deterministic `(label, uid)` order
    pub fn choice_edges_from<'a>(&'a self, uid: &'a Uuid) -> Vec<&'a GraphItem> {
        let mut edges: Vec<&GraphItem> = self
            .edges_out(uid)
            .filter(|item| item.item_kind() == ItemKind::ChoiceEdge)
            .collect();
        edges.sort_by(|a, b| {
            (a.label(), a.uid()).cmp(&(b.label(), b.uid()))
        });
        edges
    }

    // ------------------------------------------------------------------
    // Encoding

    /// Deterministic serializable tree: `{obj_cls, uid, label, tags, items}`
    pub fn unstructure(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuild from an unstructured tree, resolving references by uid
    pub fn structure(value: Value) -> Result<Graph> {
        serde_json::from_value(value).map_err(|e| CoreError::structure(format!("bad graph: {e}")))
    }

    /// Hex state-hash over the canonical unstructured form
    pub fn state_hash(&self) -> String {
        hashing::state_hash_value(&self.unstructure())
    }
}

impl Entity for Graph {
    fn uid(&self) -> Uuid {
        self.uid
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn kind(&self) -> Option<ItemKind> {
        Some(ItemKind::Graph)
    }

    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "label" => self.label.as_ref().map(|l| Value::String(l.clone())),
            _ => None,
        }
    }
}

/// Serialized shape of a graph: class-tagged header plus an item list.
#[derive(Serialize, Deserialize)]
struct GraphRepr {
    obj_cls: String,
    uid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    locals: BTreeMap<String, Value>,
    #[serde(default)]
    items: Vec<GraphItem>,
}

impl From<Graph> for GraphRepr {
    fn from(graph: Graph) -> Self {
        GraphRepr {
            obj_cls: "Graph".to_string(),
            uid: graph.uid,
            label: graph.label,
            tags: graph.tags,
            locals: graph.locals,
            items: graph.items.into_values().collect(),
        }
    }
}

impl From<GraphRepr> for Graph {
    fn from(repr: GraphRepr) -> Self {
        let mut items = BTreeMap::new();
        for item in repr.items {
            items.insert(item.uid(), item);
        }
        Graph {
            uid: repr.uid,
            label: repr.label,
            tags: repr.tags,
            locals: repr.locals,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_and_retrieve() {
        let mut g = Graph::new(None);
        let n = g.add_node("root").unwrap();
        assert!(g.contains(&n));
        assert_eq!(g.get(&n).unwrap().label(), Some("root"));
        assert_eq!(g.get_by_label("root").unwrap().unwrap().uid(), n);
        assert!(g.get_by_label("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_uid_rejected_identical_readd_allowed() {
        let mut g = Graph::new(None);
        let node = Node::new(Some("a".into()));
        let uid = node.uid;
        g.add(GraphItem::Node(node.clone())).unwrap();
        // identical re-add is a no-op
        g.add(GraphItem::Node(node)).unwrap();
        // same uid, different content
        let imposter = Node::with_uid(uid, Some("b".into()));
        assert!(matches!(
            g.add(GraphItem::Node(imposter)),
            Err(CoreError::DuplicateIdentity { .. })
        ));
    }

    #[test]
    fn ambiguous_label_raises_on_getter_not_finder() {
        let mut g = Graph::new(None);
        g.add_node("twin").unwrap();
        g.add_node("twin").unwrap();
        assert!(matches!(
            g.get_by_label("twin"),
            Err(CoreError::AmbiguousLabel { .. })
        ));
        let c = Criteria::any().with_label("twin");
        assert!(g.find_one(&c).is_some());
    }

    #[test]
    fn criteria_search() {
        let mut g = Graph::new(None);
        let n1 = g
            .add_node_item(Node::new(None).tagged("red"))
            .unwrap();
        let _n2 = g.add_node_item(Node::new(None).tagged("blue")).unwrap();
        let n3 = g
            .add_node_item(Node::new(None).tagged("red").tagged("blue"))
            .unwrap();

        let red = Criteria::any().with_tag("red");
        let found: Vec<Uuid> = g.find_all(&red).map(|i| i.uid()).collect();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&n1) && found.contains(&n3));
    }

    #[test]
    fn membership_and_paths() {
        let mut g = Graph::new(None);
        let root = g.add_subgraph("root", &[]).unwrap();
        let mid = g.add_subgraph("mid", &[]).unwrap();
        let leaf = g.add_node("leaf").unwrap();
        g.add_member(root, mid).unwrap();
        g.add_member(mid, leaf).unwrap();

        assert_eq!(g.path(&leaf).unwrap(), "root.mid.leaf");
        assert_eq!(g.ancestors(&leaf), vec![mid, root]);
        assert_eq!(g.scope_chain(&leaf), vec![leaf, mid, root]);
    }

    #[test]
    fn membership_cycles_rejected() {
        let mut g = Graph::new(None);
        let outer = g.add_subgraph("outer", &[]).unwrap();
        let inner = g.add_subgraph("inner", &[]).unwrap();
        g.add_member(outer, inner).unwrap();
        assert!(matches!(
            g.add_member(inner, outer),
            Err(CoreError::CycleDetected { .. })
        ));
        assert!(matches!(
            g.add_member(outer, outer),
            Err(CoreError::CycleDetected { .. })
        ));
    }

    #[test]
    fn reparenting_moves_membership() {
        let mut g = Graph::new(None);
        let a = g.add_subgraph("a", &[]).unwrap();
        let b = g.add_subgraph("b", &[]).unwrap();
        let n = g.add_node("n").unwrap();
        g.add_member(a, n).unwrap();
        g.add_member(b, n).unwrap();

        assert_eq!(g.parent_of(&n), Some(b));
        assert!(g.get(&a).unwrap().as_node().unwrap().members.is_empty());
        assert_eq!(g.get(&b).unwrap().as_node().unwrap().members, vec![n]);
    }

    #[test]
    fn remove_detaches_membership_and_orphans_members() {
        let mut g = Graph::new(None);
        let scene = g.add_subgraph("scene", &[]).unwrap();
        let n = g.add_node("n").unwrap();
        g.add_member(scene, n).unwrap();

        g.remove(&scene);
        assert!(!g.contains(&scene));
        assert_eq!(g.parent_of(&n), None);
    }

    #[test]
    fn removing_edge_endpoint_leaves_dangling_edge() {
        let mut g = Graph::new(None);
        let a = g.add_node("a").unwrap();
        let b = g.add_node("b").unwrap();
        let e = g.add_edge(a, b).unwrap();
        g.remove(&b);
        // Edge still present, destination id retained but unresolvable.
        let edge = g.get(&e).unwrap().as_edge().unwrap();
        assert_eq!(edge.destination_id, Some(b));
        assert!(!g.contains(&b));
    }

    #[test]
    fn unstructure_structure_round_trip() {
        let mut g = Graph::new(Some("demo".into()));
        let root = g.add_subgraph("root", &[]).unwrap();
        let leaf = g
            .add_node_item(Node::new(Some("leaf".into())).with_local("x", json!(1)))
            .unwrap();
        g.add_member(root, leaf).unwrap();
        g.add_edge(root, leaf).unwrap();

        let tree = g.unstructure();
        assert_eq!(tree["obj_cls"], "Graph");
        let restored = Graph::structure(tree).unwrap();
        assert_eq!(restored, g);
        assert_eq!(restored.state_hash(), g.state_hash());
        assert_eq!(restored.path(&leaf).unwrap(), "root.leaf");
    }

    #[test]
    fn state_hash_tracks_content() {
        let mut g = Graph::new(None);
        let n = g.add_node("a").unwrap();
        let h0 = g.state_hash();
        g.get_mut(&n)
            .unwrap()
            .set_attr("label", json!("b"))
            .unwrap();
        assert_ne!(g.state_hash(), h0);
    }

    #[test]
    fn edge_queries() {
        let mut g = Graph::new(None);
        let a = g.add_node("a").unwrap();
        let b = g.add_node("b").unwrap();
        g.add_choice_edge(a, b).unwrap();
        g.add_edge(b, a).unwrap();

        assert_eq!(g.edges_out(&a).count(), 1);
        assert_eq!(g.edges_in(&a).count(), 1);
        assert_eq!(g.choice_edges_from(&a).len(), 1);
        assert_eq!(g.choice_edges_from(&b).len(), 0);
    }
}
