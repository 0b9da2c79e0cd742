//! Watched graph mutation: every change emits a replayable event
//!
//! Attribute interception is explicit here: all step-time mutations funnel
//! through [`WatchedGraph`] methods, and each mutating call emits exactly
//! one event carrying a deep snapshot of the top-level attribute it
//! changed. Collection edits (`locals`, `tags`, `members`) therefore emit a
//! single `UPDATE` with the whole new collection value, which is what makes
//! last-write-wins coalescing sound.
//!
//! In event-sourced play the wrapped graph is a disposable preview; the
//! canonicalized buffer becomes the step's patch. In direct play recording
//! is off and the wrapped graph is simply swapped back in at commit.

use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use fabula_core::entity::Entity;
use fabula_core::graph::{Graph, GraphItem};

use crate::error::{Result, VmError};
use crate::events::Event;

/// A graph plus the events its mutations emitted.
#[derive(Debug, Clone)]
pub struct WatchedGraph {
    graph: Graph,
    events: Vec<Event>,
    recording: bool,
}

impl WatchedGraph {
    /// Wrap a graph; `recording` controls whether mutations emit events
    pub fn new(graph: Graph, recording: bool) -> Self {
        Self {
            graph,
            events: Vec::new(),
            recording,
        }
    }

    /// Wrap a graph with an already-accumulated event buffer
    pub fn with_events(graph: Graph, events: Vec<Event>, recording: bool) -> Self {
        Self {
            graph,
            events,
            recording,
        }
    }

    /// The wrapped graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Events emitted so far (including any preloaded buffer)
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Tear down into the graph and its event buffer
    pub fn into_parts(self) -> (Graph, Vec<Event>) {
        (self.graph, self.events)
    }

    fn emit(&mut self, event: Event) {
        if self.recording {
            trace!(event_type = ?event.event_type, source = %event.source_id, "event");
            self.events.push(event);
        }
    }

    // ------------------------------------------------------------------
    // Structural mutation

    /// Insert an item, emitting a structural CREATE
    pub fn insert(&mut self, item: GraphItem) -> Result<Uuid> {
        let tree = item.unstructure();
        let uid = self.graph.add(item)?;
        let registry = self.graph.uid;
        self.emit(Event::created(registry, tree));
        Ok(uid)
    }

    /// Remove an item, emitting a structural DELETE
    pub fn remove(&mut self, uid: Uuid) -> Option<GraphItem> {
        let removed = self.graph.remove(&uid)?;
        let registry = self.graph.uid;
        self.emit(Event::removed(registry, uid));
        Some(removed)
    }

    // ------------------------------------------------------------------
    // Attribute mutation

    /// Set a named attribute on an item, emitting an UPDATE
    pub fn set_attr(&mut self, uid: Uuid, name: &str, value: Value) -> Result<()> {
        let item = self
            .graph
            .get_mut(&uid)
            .ok_or_else(|| VmError::replay_failed(format!("no item {uid}")))?;
        let old = item.get_attr(name);
        item.set_attr(name, value.clone())?;
        self.emit(Event::updated(uid, name, value, old));
        Ok(())
    }

    /// Clear a named attribute on an item, emitting an attribute DELETE
    pub fn clear_attr(&mut self, uid: Uuid, name: &str) -> Result<()> {
        let item = self
            .graph
            .get_mut(&uid)
            .ok_or_else(|| VmError::replay_failed(format!("no item {uid}")))?;
        let old = item.get_attr(name);
        item.clear_attr(name)?;
        self.emit(Event::attr_removed(uid, name, old));
        Ok(())
    }

    /// Set one local on a node. Emits a single UPDATE carrying the whole
    /// new locals map.
    pub fn set_local(&mut self, uid: Uuid, key: &str, value: Value) -> Result<()> {
        let node = self
            .graph
            .get_mut(&uid)
            .and_then(GraphItem::as_node_mut)
            .ok_or_else(|| VmError::replay_failed(format!("no node {uid}")))?;
        let old = serde_json::to_value(&node.locals)?;
        node.locals.insert(key.to_string(), value);
        let new = serde_json::to_value(&node.locals)?;
        self.emit(Event::updated(uid, "locals", new, Some(old)));
        Ok(())
    }

    /// Remove one local from a node; same single-UPDATE snapshot semantics
    pub fn remove_local(&mut self, uid: Uuid, key: &str) -> Result<()> {
        let node = self
            .graph
            .get_mut(&uid)
            .and_then(GraphItem::as_node_mut)
            .ok_or_else(|| VmError::replay_failed(format!("no node {uid}")))?;
        let old = serde_json::to_value(&node.locals)?;
        node.locals.remove(key);
        let new = serde_json::to_value(&node.locals)?;
        self.emit(Event::updated(uid, "locals", new, Some(old)));
        Ok(())
    }

    /// Add a tag to an item; single UPDATE with the whole tag set
    pub fn add_tag(&mut self, uid: Uuid, tag: &str) -> Result<()> {
        self.mutate_tags(uid, |tags| {
            tags.insert(tag.to_string());
        })
    }

    /// Remove a tag from an item; single UPDATE with the whole tag set
    pub fn remove_tag(&mut self, uid: Uuid, tag: &str) -> Result<()> {
        self.mutate_tags(uid, |tags| {
            tags.remove(tag);
        })
    }

    fn mutate_tags(
        &mut self,
        uid: Uuid,
        f: impl FnOnce(&mut std::collections::BTreeSet<String>),
    ) -> Result<()> {
        let item = self
            .graph
            .get_mut(&uid)
            .ok_or_else(|| VmError::replay_failed(format!("no item {uid}")))?;
        let old = item.get_attr("tags").unwrap_or(Value::Array(vec![]));
        let mut tags = item.tags().clone();
        f(&mut tags);
        let new = serde_json::to_value(&tags)?;
        item.set_attr("tags", new.clone())?;
        self.emit(Event::updated(uid, "tags", new, Some(old)));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Domain-shaped conveniences

    /// Fill in an edge's destination (dependency linking)
    pub fn set_edge_destination(&mut self, edge: Uuid, destination: Uuid) -> Result<()> {
        self.set_attr(edge, "destination_id", Value::String(destination.to_string()))
    }

    /// Bind the provider on an edge-carried requirement; single UPDATE with
    /// the whole requirement snapshot
    pub fn bind_requirement_provider(&mut self, edge: Uuid, provider: Uuid) -> Result<()> {
        self.update_requirement(edge, |req| {
            req.provider_id = Some(provider);
        })
    }

    /// Set the sticky unresolvable flag on an edge-carried requirement
    pub fn mark_requirement_unresolvable(&mut self, edge: Uuid) -> Result<()> {
        self.update_requirement(edge, |req| {
            req.is_unresolvable = true;
        })
    }

    fn update_requirement(
        &mut self,
        edge: Uuid,
        f: impl FnOnce(&mut fabula_core::requirement::Requirement),
    ) -> Result<()> {
        let item = self
            .graph
            .get_mut(&edge)
            .ok_or_else(|| VmError::replay_failed(format!("no edge {edge}")))?;
        let edge_rec = item
            .as_edge_mut()
            .ok_or_else(|| VmError::replay_failed(format!("{edge} is not an edge")))?;
        let requirement = edge_rec
            .requirement
            .as_mut()
            .ok_or_else(|| VmError::replay_failed(format!("edge {edge} has no requirement")))?;
        let old = serde_json::to_value(&*requirement)?;
        f(requirement);
        let new = serde_json::to_value(&*requirement)?;
        self.emit(Event::updated(edge, "requirement", new, Some(old)));
        Ok(())
    }

    /// Membership change with event capture for both ends
    pub fn add_member(&mut self, parent: Uuid, child: Uuid) -> Result<()> {
        let old_parent = self.graph.parent_of(&child);
        let old_members = self
            .graph
            .get(&parent)
            .and_then(GraphItem::as_node)
            .map(|n| serde_json::to_value(&n.members))
            .transpose()?;

        self.graph.add_member(parent, child)?;

        if let Some(child_item) = self.graph.get(&child) {
            let new_parent = child_item.get_attr("parent_id").unwrap_or(Value::Null);
            self.emit(Event::updated(
                child,
                "parent_id",
                new_parent,
                old_parent.map(|p| Value::String(p.to_string())),
            ));
        }
        if let Some(parent_item) = self.graph.get(&parent) {
            let new_members = parent_item.get_attr("members").unwrap_or(Value::Array(vec![]));
            self.emit(Event::updated(parent, "members", new_members, old_members));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use fabula_core::graph::Node;
    use serde_json::json;

    #[test]
    fn insert_and_remove_emit_structural_events() {
        let mut wg = WatchedGraph::new(Graph::new(None), true);
        let uid = wg.insert(GraphItem::Node(Node::new(Some("a".into())))).unwrap();
        wg.remove(uid);

        let types: Vec<EventType> = wg.events().iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Create, EventType::Delete]);
        // Create-then-delete cancels out in canonical form.
        assert!(Event::canonicalize_events(wg.events()).is_empty());
    }

    #[test]
    fn set_local_emits_single_snapshot_update() {
        let mut graph = Graph::new(None);
        let uid = graph.add_node("n").unwrap();
        let mut wg = WatchedGraph::new(graph, true);

        wg.set_local(uid, "hp", json!(3)).unwrap();
        wg.set_local(uid, "mp", json!(1)).unwrap();

        assert_eq!(wg.events().len(), 2);
        let last = &wg.events()[1];
        assert_eq!(last.name.as_deref(), Some("locals"));
        assert_eq!(last.value, json!({"hp": 3, "mp": 1}));
    }

    #[test]
    fn recording_off_keeps_buffer_empty() {
        let mut graph = Graph::new(None);
        let uid = graph.add_node("n").unwrap();
        let mut wg = WatchedGraph::new(graph, false);
        wg.set_local(uid, "hp", json!(3)).unwrap();
        assert!(wg.events().is_empty());
        assert_eq!(
            wg.graph().get(&uid).unwrap().as_node().unwrap().local("hp"),
            Some(&json!(3))
        );
    }

    #[test]
    fn buffer_replays_onto_committed_graph() {
        let mut committed = Graph::new(None);
        let uid = committed.add_node("n").unwrap();

        let mut wg = WatchedGraph::new(committed.clone(), true);
        wg.set_attr(uid, "label", json!("renamed")).unwrap();
        let extra = wg.insert(GraphItem::Node(Node::new(Some("extra".into())))).unwrap();

        let (_, events) = wg.into_parts();
        let replayed = Event::apply_all(&Event::canonicalize_events(&events), &committed).unwrap();
        use fabula_core::entity::Entity;
        assert_eq!(replayed.get(&uid).unwrap().label(), Some("renamed"));
        assert!(replayed.contains(&extra));
    }
}
